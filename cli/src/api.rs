//! HTTP client for the tutor backend.
//!
//! The client is stateless: it holds the base URL and a connection pool, and
//! callers pass the bearer token for each authenticated call. Any non-2xx
//! response becomes [`ClientError::Status`] carrying the server's `detail`
//! string when there is one. Nothing is retried.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tutor_core::error::ErrorBody;
use tutor_core::model::{Profile, SessionToken};
use tutor_core::wire::{
    AuthResponse, AuthSession, ChatReply, ChatRequest, ContentRequest, ExplainCodeRequest,
    ExplainCodeResponse, HealthStatus, LoginRequest, LogoutResponse, PersonalizeResponse,
    ProfileUpdate, ProfileUpdateResponse, Registration, TranslateResponse, VerifyResponse,
};

use crate::store::StoreError;
use crate::util::client;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("failed to reach tutor backend: {0}")]
    Transport(#[source] reqwest::Error),
    /// Non-2xx response. `message` is the server detail or the status line.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Build the error for a non-2xx response from its raw body.
    pub fn from_response_body(status: StatusCode, body: &[u8]) -> Self {
        let detail = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message().map(str::to_string));
        let message = detail.unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        });
        ClientError::Status { status, message }
    }
}

/// Every backend operation the chat session needs.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn verify_token(&self, token: &SessionToken) -> Result<Profile, ClientError>;

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ClientError>;

    async fn register(&self, registration: &Registration) -> Result<AuthSession, ClientError>;

    async fn send_message(
        &self,
        token: Option<&SessionToken>,
        request: &ChatRequest,
    ) -> Result<ChatReply, ClientError>;

    async fn personalize(
        &self,
        token: Option<&SessionToken>,
        message: &str,
    ) -> Result<String, ClientError>;

    /// Translate to Urdu.
    async fn translate(
        &self,
        token: Option<&SessionToken>,
        message: &str,
    ) -> Result<String, ClientError>;

    async fn explain_code(
        &self,
        token: Option<&SessionToken>,
        code: &str,
        context: Option<&str>,
    ) -> Result<String, ClientError>;

    async fn get_profile(&self, token: Option<&SessionToken>) -> Result<Profile, ClientError>;

    async fn update_profile(
        &self,
        token: Option<&SessionToken>,
        update: &ProfileUpdate,
    ) -> Result<Profile, ClientError>;

    async fn logout(&self, token: Option<&SessionToken>) -> Result<(), ClientError>;

    async fn health(&self) -> Result<HealthStatus, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    api_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self, ClientError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        Url::parse(&api_url).map_err(|e| ClientError::InvalidUrl(format!("{api_url}: {e}")))?;
        Ok(Self {
            api_url,
            http: client(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Entry point of the Google OAuth flow. Opened in a browser, never fetched.
    pub fn google_login_url(&self) -> Result<Url, ClientError> {
        self.endpoint("/auth/google/login")
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Url::parse(&format!("{}{}", self.api_url, path))
            .map_err(|e| ClientError::InvalidUrl(format!("{}{path}: {e}", self.api_url)))
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SessionToken>,
    ) -> Result<RequestBuilder, ClientError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%method, %url, authenticated = token.is_some(), "tutor api request");
        let mut req = self.http.request(method, url);
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t.as_str()));
        }
        Ok(req)
    }

    async fn post_json<B, T>(
        &self,
        path: &str,
        token: Option<&SessionToken>,
        body: &B,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let req = self.request(Method::POST, path, token)?.json(body);
        execute(req).await
    }
}

async fn execute<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ClientError> {
    let resp = req.send().await.map_err(ClientError::Transport)?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(ClientError::Transport)?;

    if !status.is_success() {
        let err = ClientError::from_response_body(status, &bytes);
        tracing::debug!(status = status.as_u16(), error = %err, "tutor api error response");
        return Err(err);
    }

    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn verify_token(&self, token: &SessionToken) -> Result<Profile, ClientError> {
        let mut url = self.endpoint("/auth/verify")?;
        url.query_pairs_mut().append_pair("token", token.as_str());
        tracing::debug!(path = "/auth/verify", "tutor api request");

        let resp: VerifyResponse = execute(self.http.get(url)).await?;
        if !resp.valid {
            return Err(ClientError::Status {
                status: StatusCode::UNAUTHORIZED,
                message: "Token verification failed".to_string(),
            });
        }
        Ok(resp.into_profile())
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp: AuthResponse = self.post_json("/auth/login", None, &body).await?;
        Ok(resp.into())
    }

    async fn register(&self, registration: &Registration) -> Result<AuthSession, ClientError> {
        let resp: AuthResponse = self.post_json("/auth/register", None, registration).await?;
        Ok(resp.into())
    }

    async fn send_message(
        &self,
        token: Option<&SessionToken>,
        request: &ChatRequest,
    ) -> Result<ChatReply, ClientError> {
        self.post_json("/chat/message", token, request).await
    }

    async fn personalize(
        &self,
        token: Option<&SessionToken>,
        message: &str,
    ) -> Result<String, ClientError> {
        let body = ContentRequest {
            message: message.to_string(),
        };
        let resp: PersonalizeResponse = self.post_json("/chat/personalize", token, &body).await?;
        Ok(resp.personalized_content)
    }

    async fn translate(
        &self,
        token: Option<&SessionToken>,
        message: &str,
    ) -> Result<String, ClientError> {
        let body = ContentRequest {
            message: message.to_string(),
        };
        let resp: TranslateResponse = self.post_json("/chat/translate", token, &body).await?;
        Ok(resp.translated_content)
    }

    async fn explain_code(
        &self,
        token: Option<&SessionToken>,
        code: &str,
        context: Option<&str>,
    ) -> Result<String, ClientError> {
        let body = ExplainCodeRequest {
            message: context.unwrap_or_default().to_string(),
            selected_text: code.to_string(),
        };
        let resp: ExplainCodeResponse = self.post_json("/chat/explain-code", token, &body).await?;
        Ok(resp.explanation)
    }

    async fn get_profile(&self, token: Option<&SessionToken>) -> Result<Profile, ClientError> {
        execute(self.request(Method::GET, "/chat/profile", token)?).await
    }

    async fn update_profile(
        &self,
        token: Option<&SessionToken>,
        update: &ProfileUpdate,
    ) -> Result<Profile, ClientError> {
        let req = self.request(Method::PUT, "/chat/profile", token)?.json(update);
        let resp: ProfileUpdateResponse = execute(req).await?;
        Ok(resp.user)
    }

    async fn logout(&self, token: Option<&SessionToken>) -> Result<(), ClientError> {
        let _: LogoutResponse = execute(self.request(Method::POST, "/auth/logout", token)?).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, ClientError> {
        execute(self.request(Method::GET, "/health", None)?).await
    }
}
