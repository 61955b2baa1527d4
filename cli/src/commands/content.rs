use serde_json::json;

use super::open_session;
use crate::api::{ApiClient, ChatBackend};
use crate::session::{SendRejected, SessionError};
use crate::store::TokenStore;
use crate::util::print_json;

/// Rewrite `text` for the signed-in learner's background.
pub async fn personalize(
    api_url: &str,
    store: Box<dyn TokenStore>,
    text: &str,
) -> Result<(), SessionError> {
    let text = require_text(text)?;
    let api = ApiClient::new(api_url)?;
    let token = store.get()?.ok_or(SendRejected::NotAuthenticated)?;
    let content = api.personalize(Some(&token), text).await?;
    print_json(&json!({ "personalized_content": content }));
    Ok(())
}

/// Translate `text` to Urdu.
pub async fn translate(
    api_url: &str,
    store: Box<dyn TokenStore>,
    text: &str,
) -> Result<(), SessionError> {
    let text = require_text(text)?;
    let api = ApiClient::new(api_url)?;
    let token = store.get()?.ok_or(SendRejected::NotAuthenticated)?;
    let content = api.translate(Some(&token), text).await?;
    print_json(&json!({ "translated_content": content }));
    Ok(())
}

pub async fn explain(
    api_url: &str,
    store: Box<dyn TokenStore>,
    code: &str,
    context: Option<&str>,
) -> Result<(), SessionError> {
    let mut session = open_session(api_url, store).await?;
    session.explain_code(code, context).await?;
    let explanation = session
        .messages()
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    print_json(&json!({ "explanation": explanation }));
    Ok(())
}

fn require_text(text: &str) -> Result<&str, SendRejected> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SendRejected::Empty);
    }
    Ok(text)
}
