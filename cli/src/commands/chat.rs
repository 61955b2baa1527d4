//! Terminal rendition of the chat widget.
//!
//! The REPL reads one line at a time. Plain lines are sent as messages; lines
//! starting with `/` are widget controls. Text selections arrive through an
//! mpsc channel (`/select` and `--select-file` feed it) and are drained
//! before every prompt, the way the widget reacts to selection events.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tutor_core::avatar::frame_for;
use tutor_core::model::{ActivityState, ChatAction, Message, Role};

use super::{CliSession, open_session};
use crate::animator::{AnimationTiming, Animator, EyeTimers};
use crate::selection::selection_len;
use crate::session::{SelectionOutcome, SendRejected, SessionError};
use crate::store::TokenStore;
use crate::util::print_json;

/// How long a freshly opened widget shows `listening`.
const LISTENING_SETTLE: Duration = Duration::from_secs(2);

const HELP: &str = "\
Type a question and press enter. Commands:
  /select <text>         offer a text selection (10-1000 chars)
  /clear-selection       drop the pending selection
  /personalize <text>    ask with the personalize action
  /translate <text>      ask with the translate action (Urdu)
  /explain <code>        explain a code snippet
  /profile               show your profile
  /open                  open or close the widget
  /logout                sign out and leave
  /quit                  leave";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Send(String),
    Action(ChatAction, String),
    Explain(String),
    Select(String),
    ClearSelection,
    Profile,
    Toggle,
    Logout,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return ReplCommand::Send(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim().to_string()),
            None => (rest, String::new()),
        };
        match name {
            "select" => ReplCommand::Select(arg),
            "clear-selection" => ReplCommand::ClearSelection,
            "personalize" => ReplCommand::Action(ChatAction::Personalize, arg),
            "translate" => ReplCommand::Action(ChatAction::Translate, arg),
            "explain" => ReplCommand::Explain(arg),
            "profile" => ReplCommand::Profile,
            "open" => ReplCommand::Toggle,
            "logout" => ReplCommand::Logout,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        }
    }
}

/// Prints log entries that have not been shown yet.
#[derive(Debug, Default)]
struct Transcript {
    printed: usize,
}

impl Transcript {
    fn pending<'a>(&mut self, log: &'a [Message]) -> &'a [Message] {
        // The log only shrinks on logout, when it is reset to empty.
        if self.printed > log.len() {
            self.printed = 0;
        }
        let new = &log[self.printed..];
        self.printed = log.len();
        new
    }
}

fn render(message: &Message, face: &str) -> String {
    match message.role {
        Role::User => format!("you> {}", message.content),
        Role::System => format!("  * {}", message.content),
        Role::Assistant => {
            let mut out = format!("{face} tutor> {}", message.content);
            for source in &message.sources {
                out.push_str(&format!("\n      [{}]", source.section));
                if let Some(score) = source.score {
                    out.push_str(&format!(" (score {score:.2})"));
                }
            }
            out
        }
    }
}

fn spawn_status_line(
    mut activity: watch::Receiver<ActivityState>,
    eyes: watch::Receiver<EyeTimers>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = 0usize;
        while activity.changed().await.is_ok() {
            let state = *activity.borrow_and_update();
            let timers = *eyes.borrow();
            let frame = frame_for(state, timers.drift, timers.blink).at_keyframe(tick);
            eprintln!("{} {}", frame.glyph(), state.status_label());
            tick = tick.wrapping_add(1);
        }
    })
}

pub struct ChatOptions {
    /// File whose contents are offered as a selection on start.
    pub select_file: Option<PathBuf>,
}

pub async fn run(
    api_url: &str,
    store: Box<dyn TokenStore>,
    options: ChatOptions,
) -> Result<(), SessionError> {
    let mut session = open_session(api_url, store).await?;
    if !session.is_authenticated() {
        return Err(SendRejected::NotAuthenticated.into());
    }

    let animator = Animator::spawn(AnimationTiming::default());
    let status = spawn_status_line(session.subscribe_activity(), animator.subscribe());

    let (selection_tx, mut selections) = mpsc::unbounded_channel::<String>();
    if let Some(path) = &options.select_file {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let _ = selection_tx.send(text);
            }
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "could not read selection file"
            ),
        }
    }

    let mut transcript = Transcript::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    session.toggle_open();
    let settle = tokio::time::sleep(LISTENING_SETTLE);
    tokio::pin!(settle);
    let mut settled = false;

    eprintln!("Type /help for commands.");
    loop {
        session.poll_selections(&mut selections);
        flush(&mut transcript, &session, &animator);
        prompt(&session);

        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    break;
                }
            },
            _ = &mut settle, if !settled => {
                session.settle_listening();
                settled = true;
                continue;
            }
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Send(text) if text.is_empty() && session.selected_text().is_none() => {}
            ReplCommand::Send(text) => report(session.send(&text, None).await),
            ReplCommand::Action(action, text) => report(session.send(&text, Some(action)).await),
            ReplCommand::Explain(code) => report(session.explain_code(&code, None).await),
            ReplCommand::Select(text) => {
                let _ = selection_tx.send(text);
            }
            ReplCommand::ClearSelection => {
                session.clear_selection();
                eprintln!("  selection cleared");
            }
            ReplCommand::Profile => match session.refresh_profile().await {
                Ok(profile) => print_json(&json!(profile)),
                Err(e) => report(Err(e)),
            },
            ReplCommand::Toggle => {
                let open = session.toggle_open();
                eprintln!("  widget {}", if open { "open" } else { "closed" });
                if open {
                    settle.as_mut().reset(tokio::time::Instant::now() + LISTENING_SETTLE);
                    settled = false;
                }
            }
            ReplCommand::Logout => {
                session.logout().await?;
                eprintln!("  signed out");
                break;
            }
            ReplCommand::Help => eprintln!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(name) => eprintln!("  unknown command /{name}; try /help"),
        }
    }

    flush(&mut transcript, &session, &animator);
    status.abort();
    Ok(())
}

fn flush(transcript: &mut Transcript, session: &CliSession, animator: &Animator) {
    let frame = animator.frame(ActivityState::Responding);
    let pending = transcript.pending(session.messages().as_slice());
    for (tick, message) in pending.iter().enumerate() {
        println!("{}", render(message, &frame.at_keyframe(tick).glyph()));
    }
}

fn prompt(session: &CliSession) {
    let marker = if session.selected_text().is_some() {
        "[selection] "
    } else {
        ""
    };
    print!("{marker}> ");
    let _ = std::io::stdout().flush();
}

/// Send failures are already in the log as a system message; only rejected
/// sends need a note here.
fn report(result: Result<(), SessionError>) {
    match result {
        Ok(()) => {}
        Err(SessionError::Rejected(reason)) => eprintln!("  ! {reason}"),
        Err(SessionError::Client(e)) => tracing::debug!(error = %e, "request failed"),
    }
}

/// One-shot send: optionally offer `select` first, ask, print the reply as JSON.
pub async fn ask(
    api_url: &str,
    store: Box<dyn TokenStore>,
    message: &str,
    action: Option<ChatAction>,
    select: Option<&str>,
) -> Result<(), SessionError> {
    let mut session = open_session(api_url, store).await?;
    if !session.is_authenticated() {
        return Err(SendRejected::NotAuthenticated.into());
    }
    if let Some(text) = select {
        if session.on_selection(text) == SelectionOutcome::Ignored {
            tracing::warn!(
                len = selection_len(text.trim()),
                "selection ignored: must be between 10 and 1000 characters"
            );
        }
    }

    session.send(message, action).await?;
    let reply = session
        .messages()
        .last()
        .filter(|m| m.role == Role::Assistant);
    print_json(&json!({
        "session_id": session.session_id(),
        "response": reply.map(|m| m.content.as_str()),
        "sources": reply.map(|m| m.sources.as_slice()).unwrap_or_default(),
    }));
    Ok(())
}
