pub mod auth;
pub mod chat;
pub mod content;
pub mod health;
pub mod profile;

use crate::api::{ApiClient, ClientError};
use crate::session::ChatSession;
use crate::store::TokenStore;

pub type CliSession = ChatSession<ApiClient, Box<dyn TokenStore>>;

/// Build a session and try to resume the stored token.
pub async fn open_session(
    api_url: &str,
    store: Box<dyn TokenStore>,
) -> Result<CliSession, ClientError> {
    let api = ApiClient::new(api_url)?;
    let mut session = ChatSession::new(api, store);
    session.restore().await?;
    Ok(session)
}
