use serde_json::json;
use tutor_core::model::ExperienceLevel;
use tutor_core::wire::ProfileUpdate;

use super::open_session;
use crate::session::{SendRejected, SessionError};
use crate::store::TokenStore;
use crate::util::print_json;

pub async fn show(api_url: &str, store: Box<dyn TokenStore>) -> Result<(), SessionError> {
    let mut session = open_session(api_url, store).await?;
    let profile = session.refresh_profile().await?;
    print_json(&json!(profile));
    Ok(())
}

/// Set the learner's experience levels. Omitted levels are sent as null and
/// left unchanged by the backend.
pub async fn update(
    api_url: &str,
    store: Box<dyn TokenStore>,
    software: Option<ExperienceLevel>,
    hardware: Option<ExperienceLevel>,
) -> Result<(), SessionError> {
    if software.is_none() && hardware.is_none() {
        return Err(SendRejected::Empty.into());
    }
    let mut session = open_session(api_url, store).await?;
    let update = ProfileUpdate {
        software_background: software,
        hardware_background: hardware,
    };
    let profile = session.update_profile(&update).await?;
    print_json(&json!({
        "status": "updated",
        "user": profile
    }));
    Ok(())
}
