use serde_json::json;

use crate::api::{ApiClient, ChatBackend, ClientError};
use crate::util::print_json;

pub async fn run(api_url: &str) -> Result<(), ClientError> {
    let api = ApiClient::new(api_url)?;
    let health = api.health().await?;
    print_json(&json!({
        "api_url": api.api_url(),
        "healthy": health.is_healthy(),
        "status": health.status,
        "components": health.components,
    }));
    if !health.is_healthy() {
        tracing::warn!(status = %health.status, "backend reports degraded health");
    }
    Ok(())
}
