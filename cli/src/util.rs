use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::api::ClientError;

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("tutor-cli/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    exit_with(4, "cli_error", message, docs_hint)
}

/// Print a structured error to stderr and exit with `code`.
pub fn exit_with(code: i32, error: &str, message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": error,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string())
    );
    std::process::exit(code);
}

/// Exit codes: 0=success, 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(err: &ClientError) -> i32 {
    match err {
        ClientError::Status { status, .. } if status.is_client_error() => 1,
        ClientError::Status { .. } | ClientError::Decode(_) => 2,
        ClientError::Transport(_) => 3,
        ClientError::InvalidUrl(_) | ClientError::Storage(_) => 4,
    }
}

pub fn exit_client_error(err: &ClientError) -> ! {
    let (kind, hint) = match err {
        ClientError::Transport(_) => (
            "connection_error",
            Some("Is the tutor backend running? Check TUTOR_API_URL."),
        ),
        ClientError::Status { .. } if err.is_unauthorized() => (
            "unauthorized",
            Some("Run `tutor login` or `tutor google-login` again."),
        ),
        ClientError::Status { .. } => ("api_error", None),
        ClientError::Decode(_) => ("response_error", None),
        ClientError::InvalidUrl(_) => ("cli_error", Some("Check --api-url / TUTOR_API_URL.")),
        ClientError::Storage(_) => (
            "storage_error",
            Some("Check --credentials / TUTOR_CREDENTIALS."),
        ),
    };
    exit_with(exit_code_for(err), kind, &err.to_string(), hint)
}

pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

pub fn config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tutor");
    config_dir.join("credentials.json")
}

/// Write `data` to `path`, creating parent directories, readable by the owner only.
pub fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write with restricted permissions (0o600)
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;

    Ok(())
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

// Unix-specific imports for file permissions
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

// No-op on non-unix (won't compile for Windows without this)
#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}
