use std::time::Duration;

use serde_json::json;
use tutor_core::model::{ExperienceLevel, Profile, SessionToken};
use tutor_core::wire::Registration;

use super::open_session;
use crate::api::{ApiClient, ClientError};
use crate::session::{ChatSession, SessionError};
use crate::store::TokenStore;
use crate::util::print_json;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SIGNED_IN_PAGE: &str = concat!(
    "<html><body><h1>Signed in!</h1>",
    "<p>You can close this tab and return to the terminal.</p></body></html>"
);
const SIGN_IN_FAILED_PAGE: &str = concat!(
    "<html><body><h1>Sign-in failed</h1>",
    "<p>Check the terminal for details.</p></body></html>"
);

fn print_authenticated(profile: &Profile) {
    print_json(&json!({
        "status": "authenticated",
        "user": profile
    }));
}

pub async fn login(
    api_url: &str,
    store: Box<dyn TokenStore>,
    email: &str,
    password: &str,
) -> Result<(), SessionError> {
    let mut session = ChatSession::new(ApiClient::new(api_url)?, store);
    let profile = session.login(email, password).await?;
    print_authenticated(profile);
    Ok(())
}

pub struct RegisterArgs {
    pub email: String,
    pub password: String,
    pub name: String,
    pub software_background: Option<ExperienceLevel>,
    pub hardware_background: Option<ExperienceLevel>,
}

pub async fn register(
    api_url: &str,
    store: Box<dyn TokenStore>,
    args: RegisterArgs,
) -> Result<(), SessionError> {
    let registration = Registration {
        email: args.email,
        password: args.password,
        name: args.name,
        software_background: args.software_background,
        hardware_background: args.hardware_background,
    };
    let mut session = ChatSession::new(ApiClient::new(api_url)?, store);
    let profile = session.register(&registration).await?;
    print_authenticated(profile);
    Ok(())
}

/// Google sign-in: open `/auth/google/login` in a browser and wait for the
/// backend to redirect to `<FRONTEND_URL>/auth/callback?token=...`.
///
/// The backend's FRONTEND_URL must point at `http://127.0.0.1:<callback_port>`.
pub async fn google_login(
    api_url: &str,
    store: Box<dyn TokenStore>,
    callback_port: u16,
    open_browser: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let api = ApiClient::new(api_url)?;
    let login_url = api.google_login_url()?;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", callback_port)).await?;
    eprintln!(
        "Waiting for the Google sign-in redirect on http://127.0.0.1:{callback_port}/auth/callback"
    );
    eprintln!("If the browser doesn't open, visit: {login_url}");

    if open_browser {
        if let Err(e) = open::that(login_url.as_str()) {
            tracing::warn!(error = %e, "could not open browser");
        }
    }

    let token = tokio::select! {
        result = wait_for_callback(listener) => result?,
        _ = tokio::time::sleep(CALLBACK_TIMEOUT) => {
            return Err("Google sign-in timed out after 5 minutes.".into());
        }
    };

    let mut session = ChatSession::new(api, store);
    let profile = session.accept_token(token).await?;
    print_authenticated(profile);
    Ok(())
}

async fn wait_for_callback(
    listener: tokio::net::TcpListener,
) -> Result<SessionToken, Box<dyn std::error::Error + Send + Sync>> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        // GET /auth/callback?token=... HTTP/1.1
        let path = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("");

        let outcome = parse_callback(path);
        let (status, body) = match &outcome {
            CallbackOutcome::Token(_) => ("200 OK", SIGNED_IN_PAGE),
            CallbackOutcome::Error(_) => ("400 Bad Request", SIGN_IN_FAILED_PAGE),
            CallbackOutcome::Ignored => ("404 Not Found", ""),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{body}"
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;

        match outcome {
            CallbackOutcome::Token(token) => return Ok(token),
            CallbackOutcome::Error(message) => {
                return Err(format!("Google sign-in failed: {message}").into());
            }
            // Browsers also ask for /favicon.ico and the like.
            CallbackOutcome::Ignored => continue,
        }
    }
}

#[derive(Debug, PartialEq)]
enum CallbackOutcome {
    Token(SessionToken),
    Error(String),
    Ignored,
}

fn parse_callback(path: &str) -> CallbackOutcome {
    let Ok(url) = url::Url::parse(&format!("http://localhost{path}")) else {
        return CallbackOutcome::Ignored;
    };
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.to_string())
    };

    match url.path() {
        "/auth/callback" => match param("token").filter(|t| !t.is_empty()) {
            Some(token) => CallbackOutcome::Token(SessionToken::new(token)),
            None => CallbackOutcome::Error("no 'token' parameter in callback".to_string()),
        },
        "/auth/error" => CallbackOutcome::Error(
            param("message").unwrap_or_else(|| "unknown error".to_string()),
        ),
        _ => CallbackOutcome::Ignored,
    }
}

pub async fn logout(api_url: &str, store: Box<dyn TokenStore>) -> Result<(), ClientError> {
    let mut session = open_session(api_url, store).await?;
    let was_signed_in = session.is_authenticated();
    session.logout().await?;
    print_json(&json!({
        "status": "logged_out",
        "was_signed_in": was_signed_in
    }));
    Ok(())
}

pub async fn whoami(api_url: &str, store: Box<dyn TokenStore>) -> Result<(), SessionError> {
    let session = open_session(api_url, store).await?;
    match session.profile() {
        Some(profile) => print_authenticated(profile),
        None => print_json(&json!({"status": "unauthenticated"})),
    }
    Ok(())
}
