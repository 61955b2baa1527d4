use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_cli::api::DEFAULT_API_URL;
use tutor_cli::commands::{self, auth::RegisterArgs, chat::ChatOptions};
use tutor_cli::session::{SendRejected, SessionError};
use tutor_cli::store::{FileTokenStore, MemoryTokenStore, TokenStore};
use tutor_cli::util::{exit_client_error, exit_error};
use tutor_core::model::{ChatAction, ExperienceLevel};

#[derive(Parser)]
#[command(
    name = "tutor",
    version,
    about = "Physical AI tutor CLI: chat with the textbook's RAG assistant"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "TUTOR_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Credentials file (defaults to the platform config dir)
    #[arg(long, env = "TUTOR_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Keep the token in memory only; nothing is read from or written to disk
    #[arg(long)]
    ephemeral: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "TUTOR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check backend health
    Health,
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TUTOR_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TUTOR_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
        /// beginner | intermediate | advanced
        #[arg(long)]
        software: Option<ExperienceLevel>,
        /// beginner | intermediate | advanced
        #[arg(long)]
        hardware: Option<ExperienceLevel>,
    },
    /// Sign in with Google in the browser
    GoogleLogin {
        /// Local port the backend's FRONTEND_URL redirects to
        #[arg(long, env = "TUTOR_CALLBACK_PORT", default_value_t = 3000)]
        callback_port: u16,
        /// Print the sign-in URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Sign out and remove stored credentials
    Logout,
    /// Show who the stored token belongs to
    Whoami,
    /// Interactive chat
    Chat {
        /// Offer this file's contents as a text selection on start
        #[arg(long)]
        select_file: Option<PathBuf>,
    },
    /// Ask a single question
    Ask {
        message: String,
        /// personalize | translate
        #[arg(long)]
        action: Option<ChatAction>,
        /// Selected text to explain alongside the question
        #[arg(long)]
        select: Option<String>,
    },
    /// Explain a code snippet
    Explain {
        code: String,
        /// What you want to know about it
        #[arg(long)]
        context: Option<String>,
    },
    /// Rewrite text for your background
    Personalize { text: String },
    /// Translate text to Urdu
    Translate { text: String },
    /// Show or update your learner profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show the current profile
    Show,
    /// Update experience levels
    Update {
        #[arg(long)]
        software: Option<ExperienceLevel>,
        #[arg(long)]
        hardware: Option<ExperienceLevel>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TUTOR_LOG")
        .unwrap_or_else(|_| "warn".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn token_store(cli: &Cli) -> Box<dyn TokenStore> {
    if cli.ephemeral {
        return Box::new(MemoryTokenStore::new());
    }
    match &cli.credentials {
        Some(path) => Box::new(FileTokenStore::new(path)),
        None => Box::new(FileTokenStore::default_location()),
    }
}

fn exit_session_error(err: &SessionError) -> ! {
    match err {
        SessionError::Client(e) => exit_client_error(e),
        SessionError::Rejected(SendRejected::NotAuthenticated) => exit_error(
            &err.to_string(),
            Some("Run `tutor login` or `tutor google-login` first."),
        ),
        SessionError::Rejected(_) => exit_error(&err.to_string(), None),
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let store = token_store(&cli);
    let api_url = cli.api_url.as_str();

    let result = match cli.command {
        Commands::Health => commands::health::run(api_url)
            .await
            .map_err(SessionError::from),
        Commands::Login { email, password } => {
            commands::auth::login(api_url, store, &email, &password).await
        }
        Commands::Register {
            email,
            password,
            name,
            software,
            hardware,
        } => {
            let args = RegisterArgs {
                email,
                password,
                name,
                software_background: software,
                hardware_background: hardware,
            };
            commands::auth::register(api_url, store, args).await
        }
        Commands::GoogleLogin {
            callback_port,
            no_browser,
        } => {
            if let Err(e) =
                commands::auth::google_login(api_url, store, callback_port, !no_browser).await
            {
                exit_error(
                    &e.to_string(),
                    Some(
                        "Point the backend FRONTEND_URL at http://127.0.0.1:<callback-port>.",
                    ),
                );
            }
            Ok(())
        }
        Commands::Logout => commands::auth::logout(api_url, store)
            .await
            .map_err(SessionError::from),
        Commands::Whoami => commands::auth::whoami(api_url, store).await,
        Commands::Chat { select_file } => {
            commands::chat::run(api_url, store, ChatOptions { select_file }).await
        }
        Commands::Ask {
            message,
            action,
            select,
        } => commands::chat::ask(api_url, store, &message, action, select.as_deref()).await,
        Commands::Explain { code, context } => {
            commands::content::explain(api_url, store, &code, context.as_deref()).await
        }
        Commands::Personalize { text } => {
            commands::content::personalize(api_url, store, &text).await
        }
        Commands::Translate { text } => commands::content::translate(api_url, store, &text).await,
        Commands::Profile { command } => match command {
            ProfileCommands::Show => commands::profile::show(api_url, store).await,
            ProfileCommands::Update { software, hardware } => {
                commands::profile::update(api_url, store, software, hardware).await
            }
        },
    };

    if let Err(e) = result {
        exit_session_error(&e);
    }
}
