//! Request and response bodies exchanged with the tutor backend.
//!
//! Field names follow the backend's snake_case JSON exactly. Optional fields
//! of [`ChatRequest`] are always serialized, as `null` when absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ChatAction, ExperienceLevel, Profile, SessionToken, SourceRef, string_or_number};

/// Response of `GET /auth/verify?token=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    #[serde(default = "default_true")]
    pub valid: bool,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Null for Google accounts that shared no display name.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl VerifyResponse {
    /// The JWT only carries identity; experience levels come from `/chat/profile`.
    pub fn into_profile(self) -> Profile {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_default();
        Profile {
            id: self.user_id,
            name,
            email: self.email,
            software_background: None,
            hardware_background: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Fields for `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_background: Option<ExperienceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_background: Option<ExperienceLevel>,
}

/// Response of login and register.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: Profile,
}

/// A token paired with the profile it authenticates.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: SessionToken,
    pub profile: Profile,
}

impl From<AuthResponse> for AuthSession {
    fn from(resp: AuthResponse) -> Self {
        Self {
            token: SessionToken::new(resp.access_token),
            profile: resp.user,
        }
    }
}

/// Body of `POST /chat/message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub selected_text: Option<String>,
    pub action: Option<ChatAction>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            selected_text: None,
            action: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

/// Body of `POST /chat/personalize` and `POST /chat/translate`.
#[derive(Debug, Clone, Serialize)]
pub struct ContentRequest {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalizeResponse {
    pub personalized_content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponse {
    pub translated_content: String,
}

/// Body of `POST /chat/explain-code`. `message` carries optional context and
/// is sent as an empty string when there is none.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainCodeRequest {
    pub message: String,
    pub selected_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainCodeResponse {
    pub explanation: String,
}

/// Body of `PUT /chat/profile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    pub software_background: Option<ExperienceLevel>,
    pub hardware_background: Option<ExperienceLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdateResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub user: Profile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(flatten)]
    pub components: BTreeMap<String, serde_json::Value>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
