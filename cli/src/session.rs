//! Chat session controller.
//!
//! One `ChatSession` backs one widget instance. It owns the auth state, the
//! message log, the activity state shown by the avatar, the pending text
//! selection and the backend session id.
//!
//! ```text
//! Unauthenticated --restore (token stored)--> Authenticating
//! Authenticating  --verify ok--> AuthenticatedIdle
//! Authenticating  --verify failed (token cleared)--> Unauthenticated
//! AuthenticatedIdle --begin_send--> AwaitingResponse --complete_send--> AuthenticatedIdle
//! any --logout--> Unauthenticated
//! ```
//!
//! Sending is split into [`ChatSession::begin_send`] and
//! [`ChatSession::complete_send`] so the single-flight rule is enforced by the
//! state machine itself: a second `begin_send` while a request is outstanding
//! is rejected with [`SendRejected::Busy`].

use tokio::sync::watch;
use tutor_core::model::{
    ActivityState, ChatAction, Message, MessageLog, Profile, SessionToken, SourceRef,
};
use tutor_core::wire::{ChatReply, ChatRequest, ProfileUpdate, Registration};

use crate::api::{ChatBackend, ClientError};
use crate::selection::{SelectionObserver, capturable};
use crate::store::{StoreError, TokenStore};
use crate::util::preview;

pub const WELCOME_BACK: &str =
    "Welcome back! I'm your Physical AI tutor. Ask me anything about Chapter 1!";
pub const SEND_FAILED: &str = "Sorry, something went wrong. Please try again.";
/// User message sent when only a selection is pending.
pub const SELECTION_ONLY_PROMPT: &str = "Explain this selected text";
pub const EXPLAIN_CODE_PROMPT: &str = "Explain this code";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    AuthenticatedIdle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejected {
    #[error("sign in before chatting")]
    NotAuthenticated,
    #[error("still waiting for the previous answer")]
    Busy,
    #[error("nothing to send")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] SendRejected),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Client(ClientError::Storage(err))
    }
}

/// A submitted message whose response has not been applied yet.
#[derive(Debug)]
pub struct PendingSend {
    request: ChatRequest,
    generation: u64,
}

impl PendingSend {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Stored for the next message. `opened` is true if the widget was closed.
    Captured { opened: bool },
    Ignored,
}

pub struct ChatSession<B, S> {
    backend: B,
    store: S,
    state: AuthState,
    profile: Option<Profile>,
    log: MessageLog,
    activity: ActivityState,
    activity_tx: watch::Sender<ActivityState>,
    activity_history: Vec<ActivityState>,
    selected_text: Option<String>,
    session_id: Option<String>,
    open: bool,
    /// Bumped on logout so late responses can tell they outlived their session.
    generation: u64,
}

impl<B: ChatBackend, S: TokenStore> ChatSession<B, S> {
    pub fn new(backend: B, store: S) -> Self {
        let (activity_tx, _) = watch::channel(ActivityState::Idle);
        Self {
            backend,
            store,
            state: AuthState::Unauthenticated,
            profile: None,
            log: MessageLog::new(),
            activity: ActivityState::Idle,
            activity_tx,
            activity_history: Vec::new(),
            selected_text: None,
            session_id: None,
            open: false,
            generation: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.state,
            AuthState::AuthenticatedIdle | AuthState::AwaitingResponse
        )
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn messages(&self) -> &MessageLog {
        &self.log
    }

    pub fn activity(&self) -> ActivityState {
        self.activity
    }

    /// Every activity change since the session was created, oldest first.
    pub fn activity_history(&self) -> &[ActivityState] {
        &self.activity_history
    }

    /// Latest-value feed of the activity state for the avatar renderer.
    pub fn subscribe_activity(&self) -> watch::Receiver<ActivityState> {
        self.activity_tx.subscribe()
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.selected_text.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the send control would be enabled for `input`.
    pub fn can_send(&self, input: &str, action: Option<ChatAction>) -> bool {
        self.check_send(input, action).is_ok()
    }

    /// Try to resume a stored session. A rejected token is cleared silently.
    pub async fn restore(&mut self) -> Result<bool, StoreError> {
        let Some(token) = self.store.get()? else {
            return Ok(false);
        };

        self.state = AuthState::Authenticating;
        match self.backend.verify_token(&token).await {
            Ok(profile) => {
                tracing::debug!(user = %profile.id, "stored token verified");
                self.sign_in(profile, WELCOME_BACK.to_string());
                Ok(true)
            }
            Err(err) => {
                tracing::info!(error = %err, "stored token rejected; signing out");
                self.state = AuthState::Unauthenticated;
                self.store.clear()?;
                Ok(false)
            }
        }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<&Profile, SessionError> {
        self.ensure_not_awaiting()?;
        let auth = self.backend.login(email, password).await?;
        self.store.set(&auth.token)?;
        let welcome = welcome_for(&auth.profile);
        Ok(self.sign_in(auth.profile, welcome))
    }

    pub async fn register(
        &mut self,
        registration: &Registration,
    ) -> Result<&Profile, SessionError> {
        self.ensure_not_awaiting()?;
        let auth = self.backend.register(registration).await?;
        self.store.set(&auth.token)?;
        let welcome = welcome_for(&auth.profile);
        Ok(self.sign_in(auth.profile, welcome))
    }

    /// Adopt a token obtained out of band (the Google OAuth redirect).
    /// The token is only stored once the backend accepts it.
    pub async fn accept_token(&mut self, token: SessionToken) -> Result<&Profile, SessionError> {
        self.ensure_not_awaiting()?;
        let profile = self.backend.verify_token(&token).await?;
        self.store.set(&token)?;
        let welcome = welcome_for(&profile);
        Ok(self.sign_in(profile, welcome))
    }

    /// Signing in while a reply is outstanding would reopen the send guard.
    fn ensure_not_awaiting(&self) -> Result<(), SendRejected> {
        if self.state == AuthState::AwaitingResponse {
            return Err(SendRejected::Busy);
        }
        Ok(())
    }

    fn sign_in(&mut self, profile: Profile, welcome: String) -> &Profile {
        // A new identity never inherits the previous user's conversation.
        self.reset_conversation();
        self.state = AuthState::AuthenticatedIdle;
        self.log.push(Message::system(welcome));
        &*self.profile.insert(profile)
    }

    fn reset_conversation(&mut self) {
        self.log.reset();
        self.session_id = None;
        self.selected_text = None;
        self.generation += 1;
    }

    /// Sign out locally. The server is told on a best-effort basis; the stored
    /// token is cleared whatever it answers.
    pub async fn logout(&mut self) -> Result<(), StoreError> {
        let token = self.current_token();
        if let Some(token) = &token {
            if let Err(err) = self.backend.logout(Some(token)).await {
                tracing::warn!(error = %err, "server logout failed; clearing local session anyway");
            }
        }

        let cleared = self.store.clear();
        self.state = AuthState::Unauthenticated;
        self.profile = None;
        self.reset_conversation();
        if self.activity != ActivityState::Idle {
            self.set_activity(ActivityState::Idle);
        }
        cleared
    }

    fn check_send(&self, input: &str, action: Option<ChatAction>) -> Result<(), SendRejected> {
        match self.state {
            AuthState::AuthenticatedIdle => {}
            AuthState::AwaitingResponse => return Err(SendRejected::Busy),
            AuthState::Unauthenticated | AuthState::Authenticating => {
                return Err(SendRejected::NotAuthenticated);
            }
        }
        let typed = input.trim();
        if action.is_some_and(ChatAction::requires_typed_input) && typed.is_empty() {
            return Err(SendRejected::Empty);
        }
        if typed.is_empty() && self.selected_text.is_none() {
            return Err(SendRejected::Empty);
        }
        Ok(())
    }

    /// Record the user's message and move to `AwaitingResponse`.
    ///
    /// The pending selection is consumed here, so it is attached to exactly
    /// this message whether or not the request succeeds.
    pub fn begin_send(
        &mut self,
        input: &str,
        action: Option<ChatAction>,
    ) -> Result<PendingSend, SendRejected> {
        self.check_send(input, action)?;

        let typed = input.trim();
        let message = if typed.is_empty() {
            SELECTION_ONLY_PROMPT.to_string()
        } else {
            typed.to_string()
        };

        self.log.push(Message::user(message.clone()));
        self.state = AuthState::AwaitingResponse;
        self.set_activity(ActivityState::Thinking);

        Ok(PendingSend {
            request: ChatRequest {
                message,
                session_id: self.session_id.clone(),
                selected_text: self.selected_text.take(),
                action,
            },
            generation: self.generation,
        })
    }

    /// Apply the outcome of a request started with [`begin_send`](Self::begin_send).
    ///
    /// Failures are recorded in the log as a system message before being
    /// returned, so callers may ignore the error.
    pub fn complete_send(
        &mut self,
        pending: PendingSend,
        result: Result<ChatReply, ClientError>,
    ) -> Result<(), ClientError> {
        let result = result.map(|reply| {
            let ChatReply {
                session_id,
                response,
                sources,
                ..
            } = reply;
            (response, sources, Some(session_id))
        });
        self.finish(pending.generation, result)
    }

    fn finish(
        &mut self,
        generation: u64,
        result: Result<(String, Vec<SourceRef>, Option<String>), ClientError>,
    ) -> Result<(), ClientError> {
        let current = generation == self.generation;
        let outcome = match result {
            Ok((response, sources, session_id)) => {
                if current {
                    if let Some(id) = session_id {
                        self.capture_session_id(id);
                    }
                    self.set_activity(ActivityState::Responding);
                }
                self.log.push(Message::assistant(response, sources));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "chat request failed");
                self.log.push(Message::system(SEND_FAILED));
                Err(err)
            }
        };

        if current {
            self.set_activity(ActivityState::Idle);
            if self.state == AuthState::AwaitingResponse {
                self.state = AuthState::AuthenticatedIdle;
            }
        }
        outcome
    }

    fn capture_session_id(&mut self, id: String) {
        match &self.session_id {
            None => {
                tracing::debug!(session_id = %id, "chat session started");
                self.session_id = Some(id);
            }
            Some(existing) if *existing != id => {
                tracing::debug!(kept = %existing, returned = %id, "ignoring session id change");
            }
            Some(_) => {}
        }
    }

    /// Submit `input` (and any pending selection) and wait for the answer.
    pub async fn send(
        &mut self,
        input: &str,
        action: Option<ChatAction>,
    ) -> Result<(), SessionError> {
        let pending = self.begin_send(input, action)?;
        let token = self.current_token();
        let result = self
            .backend
            .send_message(token.as_ref(), pending.request())
            .await;
        self.complete_send(pending, result)?;
        Ok(())
    }

    /// Ask for an explanation of a code snippet through `/chat/explain-code`.
    pub async fn explain_code(
        &mut self,
        code: &str,
        context: Option<&str>,
    ) -> Result<(), SessionError> {
        self.check_send(code, None)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(SendRejected::Empty.into());
        }
        let context = context.map(str::trim).filter(|c| !c.is_empty());

        let prompt = context.unwrap_or(EXPLAIN_CODE_PROMPT);
        self.log.push(Message::user(format!("{prompt}\n\n{code}")));
        self.state = AuthState::AwaitingResponse;
        self.set_activity(ActivityState::Thinking);
        let generation = self.generation;

        let token = self.current_token();
        let result = self
            .backend
            .explain_code(token.as_ref(), code, context)
            .await
            .map(|explanation| (explanation, Vec::new(), None));
        self.finish(generation, result)?;
        Ok(())
    }

    /// Offer a host text selection. Only selections strictly between 10 and
    /// 1000 characters are kept.
    pub fn on_selection(&mut self, text: &str) -> SelectionOutcome {
        let Some(text) = capturable(text) else {
            return SelectionOutcome::Ignored;
        };

        let opened = !self.open;
        self.open = true;
        self.log.push(Message::system(format!(
            "Text selected! I can help explain: \"{}\"",
            preview(text, 50)
        )));
        self.selected_text = Some(text.to_string());
        SelectionOutcome::Captured { opened }
    }

    /// Drain everything the observer has queued. Returns how many were captured.
    pub fn poll_selections(&mut self, observer: &mut impl SelectionObserver) -> usize {
        let mut captured = 0;
        while let Some(text) = observer.try_next() {
            if matches!(self.on_selection(&text), SelectionOutcome::Captured { .. }) {
                captured += 1;
            }
        }
        captured
    }

    pub fn clear_selection(&mut self) {
        self.selected_text = None;
    }

    /// Open or close the widget. Opening an idle widget shows `listening`
    /// until [`settle_listening`](Self::settle_listening) is called.
    pub fn toggle_open(&mut self) -> bool {
        self.open = !self.open;
        if self.open && self.activity == ActivityState::Idle {
            self.set_activity(ActivityState::Listening);
        }
        self.open
    }

    pub fn settle_listening(&mut self) {
        if self.activity == ActivityState::Listening {
            self.set_activity(ActivityState::Idle);
        }
    }

    pub async fn refresh_profile(&mut self) -> Result<&Profile, SessionError> {
        if !self.is_authenticated() {
            return Err(SendRejected::NotAuthenticated.into());
        }
        let token = self.current_token();
        let profile = self.backend.get_profile(token.as_ref()).await?;
        Ok(&*self.profile.insert(profile))
    }

    pub async fn update_profile(
        &mut self,
        update: &ProfileUpdate,
    ) -> Result<&Profile, SessionError> {
        if !self.is_authenticated() {
            return Err(SendRejected::NotAuthenticated.into());
        }
        let token = self.current_token();
        let profile = self.backend.update_profile(token.as_ref(), update).await?;
        Ok(&*self.profile.insert(profile))
    }

    fn current_token(&self) -> Option<SessionToken> {
        match self.store.get() {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "could not read stored token");
                None
            }
        }
    }

    fn set_activity(&mut self, state: ActivityState) {
        self.activity = state;
        self.activity_history.push(state);
        self.activity_tx.send_replace(state);
    }
}

fn welcome_for(profile: &Profile) -> String {
    let greeting = match profile.name.trim() {
        "" => "Welcome".to_string(),
        name => format!("Welcome {name}"),
    };
    format!("{greeting}! I'm your Physical AI tutor. Ask me anything about Chapter 1!")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tutor_core::model::Role;
    use tutor_core::wire::{AuthSession, HealthStatus};

    use super::*;
    use crate::store::MemoryTokenStore;

    #[derive(Default)]
    struct FakeState {
        valid_tokens: Vec<String>,
        verify_calls: usize,
        chat_replies: VecDeque<Result<ChatReply, ClientError>>,
        chat_requests: Vec<(Option<SessionToken>, ChatRequest)>,
        logout_calls: usize,
        logout_fails: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeBackend {
        fn accepting(token: &str) -> Self {
            let fake = Self::default();
            fake.state.lock().unwrap().valid_tokens.push(token.to_string());
            fake
        }

        fn queue_reply(&self, reply: Result<ChatReply, ClientError>) {
            self.state.lock().unwrap().chat_replies.push_back(reply);
        }

        fn chat_requests(&self) -> Vec<(Option<SessionToken>, ChatRequest)> {
            self.state.lock().unwrap().chat_requests.clone()
        }
    }

    fn profile(name: &str) -> Profile {
        Profile {
            id: "1".into(),
            name: name.into(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            software_background: None,
            hardware_background: None,
        }
    }

    fn reply(session_id: &str, text: &str) -> ChatReply {
        ChatReply {
            session_id: session_id.into(),
            response: text.into(),
            sources: vec![SourceRef {
                section: "ROS 2 Fundamentals".into(),
                score: Some(0.87),
                content: None,
            }],
            tokens_used: Some(42),
        }
    }

    fn server_error() -> ClientError {
        ClientError::from_response_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"detail":"Internal server error"}"#,
        )
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn verify_token(&self, token: &SessionToken) -> Result<Profile, ClientError> {
            let mut state = self.state.lock().unwrap();
            state.verify_calls += 1;
            if state.valid_tokens.iter().any(|t| t == token.as_str()) {
                Ok(profile("Ada"))
            } else {
                Err(ClientError::from_response_body(
                    StatusCode::UNAUTHORIZED,
                    br#"{"detail":"Token has expired"}"#,
                ))
            }
        }

        async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
            if password == "secret" {
                Ok(AuthSession {
                    token: SessionToken::new(format!("jwt-{email}")),
                    profile: profile("Ada"),
                })
            } else {
                Err(ClientError::from_response_body(
                    StatusCode::UNAUTHORIZED,
                    br#"{"detail":"Invalid email or password"}"#,
                ))
            }
        }

        async fn register(&self, registration: &Registration) -> Result<AuthSession, ClientError> {
            Ok(AuthSession {
                token: SessionToken::new("jwt-new"),
                profile: profile(&registration.name),
            })
        }

        async fn send_message(
            &self,
            token: Option<&SessionToken>,
            request: &ChatRequest,
        ) -> Result<ChatReply, ClientError> {
            let mut state = self.state.lock().unwrap();
            state.chat_requests.push((token.cloned(), request.clone()));
            state.chat_replies.pop_front().unwrap_or_else(|| {
                Ok(reply(
                    request.session_id.as_deref().unwrap_or("abc"),
                    "default answer",
                ))
            })
        }

        async fn personalize(
            &self,
            _token: Option<&SessionToken>,
            message: &str,
        ) -> Result<String, ClientError> {
            Ok(format!("personalized: {message}"))
        }

        async fn translate(
            &self,
            _token: Option<&SessionToken>,
            message: &str,
        ) -> Result<String, ClientError> {
            Ok(format!("translated: {message}"))
        }

        async fn explain_code(
            &self,
            _token: Option<&SessionToken>,
            code: &str,
            _context: Option<&str>,
        ) -> Result<String, ClientError> {
            Ok(format!("`{code}` initializes rclpy"))
        }

        async fn get_profile(&self, _token: Option<&SessionToken>) -> Result<Profile, ClientError> {
            Ok(profile("Ada"))
        }

        async fn update_profile(
            &self,
            _token: Option<&SessionToken>,
            update: &ProfileUpdate,
        ) -> Result<Profile, ClientError> {
            Ok(Profile {
                software_background: update.software_background,
                hardware_background: update.hardware_background,
                ..profile("Ada")
            })
        }

        async fn logout(&self, _token: Option<&SessionToken>) -> Result<(), ClientError> {
            let mut state = self.state.lock().unwrap();
            state.logout_calls += 1;
            if state.logout_fails {
                Err(server_error())
            } else {
                Ok(())
            }
        }

        async fn health(&self) -> Result<HealthStatus, ClientError> {
            Ok(HealthStatus {
                status: "healthy".into(),
                components: Default::default(),
            })
        }
    }

    type TestSession = ChatSession<FakeBackend, MemoryTokenStore>;

    async fn signed_in() -> (TestSession, FakeBackend, MemoryTokenStore) {
        let backend = FakeBackend::accepting("good");
        let store = MemoryTokenStore::with_token("good");
        let mut session = ChatSession::new(backend.clone(), store.clone());
        assert!(session.restore().await.unwrap());
        (session, backend, store)
    }

    fn roles(session: &TestSession) -> Vec<Role> {
        session.messages().iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn restore_with_valid_token_authenticates() {
        let (session, _, store) = signed_in().await;
        assert_eq!(session.state(), AuthState::AuthenticatedIdle);
        assert_eq!(session.profile().map(|p| p.name.as_str()), Some("Ada"));
        assert_eq!(session.messages().last().unwrap().content, WELCOME_BACK);
        assert!(store.get().unwrap().is_some());
    }

    #[tokio::test]
    async fn restore_with_rejected_token_clears_it_silently() {
        let backend = FakeBackend::default();
        let store = MemoryTokenStore::with_token("expired");
        let mut session = ChatSession::new(backend, store.clone());

        assert!(!session.restore().await.unwrap());
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(session.profile().is_none());
        assert_eq!(store.get().unwrap(), None);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn restore_without_token_skips_verification() {
        let backend = FakeBackend::default();
        let mut session = ChatSession::new(backend.clone(), MemoryTokenStore::new());
        assert!(!session.restore().await.unwrap());
        assert_eq!(backend.state.lock().unwrap().verify_calls, 0);
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn first_answer_starts_session_and_later_sends_reuse_it() {
        let (mut session, backend, _) = signed_in().await;
        backend.queue_reply(Ok(reply("abc", "ROS 2 is robot middleware.")));
        backend.queue_reply(Ok(reply("zzz", "Nodes talk over topics.")));
        let before = session.messages().len();

        session.send("What is ROS 2?", None).await.unwrap();
        assert_eq!(session.session_id(), Some("abc"));
        let new: Vec<_> = session.messages().iter().skip(before).collect();
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].role, Role::User);
        assert_eq!(new[0].content, "What is ROS 2?");
        assert_eq!(new[1].role, Role::Assistant);
        assert_eq!(new[1].sources[0].section, "ROS 2 Fundamentals");

        session.send("And nodes?", None).await.unwrap();
        session.send("And topics?", None).await.unwrap();

        let requests = backend.chat_requests();
        assert_eq!(requests[0].1.session_id, None);
        assert_eq!(requests[1].1.session_id.as_deref(), Some("abc"));
        assert_eq!(requests[2].1.session_id.as_deref(), Some("abc"));
        assert_eq!(session.session_id(), Some("abc"));
        assert!(
            requests
                .iter()
                .all(|(token, _)| token.as_ref().map(|t| t.as_str()) == Some("good"))
        );
    }

    #[tokio::test]
    async fn server_error_appends_system_notice_and_returns_to_idle() {
        let (mut session, backend, _) = signed_in().await;
        backend.queue_reply(Err(server_error()));
        let before = session.messages().len();

        let err = session.send("What is ROS 2?", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Client(ClientError::Status { .. })));

        let new: Vec<_> = session.messages().iter().skip(before).collect();
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].role, Role::User);
        assert_eq!(new[1].role, Role::System);
        assert_eq!(new[1].content, SEND_FAILED);
        assert_eq!(session.activity(), ActivityState::Idle);
        assert_eq!(session.state(), AuthState::AuthenticatedIdle);
        assert_eq!(session.session_id(), None);
    }

    #[tokio::test]
    async fn successful_send_sequences_activity() {
        let (mut session, _, _) = signed_in().await;
        let activity = session.subscribe_activity();

        session.send("What is Gazebo?", None).await.unwrap();
        assert_eq!(
            session.activity_history(),
            &[
                ActivityState::Thinking,
                ActivityState::Responding,
                ActivityState::Idle
            ]
        );
        assert_eq!(*activity.borrow(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn empty_send_is_a_no_op() {
        let (mut session, backend, _) = signed_in().await;
        let before = session.messages().len();

        let err = session.send("   ", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(SendRejected::Empty)));
        assert!(!session.can_send("", None));
        assert!(backend.chat_requests().is_empty());
        assert_eq!(session.messages().len(), before);
        assert!(session.activity_history().is_empty());
        assert_eq!(session.state(), AuthState::AuthenticatedIdle);
    }

    #[tokio::test]
    async fn only_one_request_in_flight() {
        let (mut session, _, _) = signed_in().await;

        let pending = session.begin_send("first", None).unwrap();
        assert_eq!(session.state(), AuthState::AwaitingResponse);
        assert_eq!(session.begin_send("second", None).unwrap_err(), SendRejected::Busy);
        assert!(!session.can_send("second", None));

        session
            .complete_send(pending, Ok(reply("abc", "one")))
            .unwrap();
        assert_eq!(session.state(), AuthState::AuthenticatedIdle);
        assert!(session.begin_send("second", None).is_ok());
    }

    #[tokio::test]
    async fn sending_requires_sign_in() {
        let mut session = ChatSession::new(FakeBackend::default(), MemoryTokenStore::new());
        assert_eq!(
            session.begin_send("hello", None).unwrap_err(),
            SendRejected::NotAuthenticated
        );
    }

    #[tokio::test]
    async fn selection_window_is_enforced() {
        let (mut session, _, _) = signed_in().await;
        let before = session.messages().len();

        assert_eq!(session.on_selection(&"a".repeat(5)), SelectionOutcome::Ignored);
        assert_eq!(session.on_selection(&"c".repeat(1500)), SelectionOutcome::Ignored);
        assert_eq!(session.messages().len(), before);
        assert!(!session.is_open());

        assert_eq!(
            session.on_selection(&"b".repeat(500)),
            SelectionOutcome::Captured { opened: true }
        );
        assert!(session.is_open());
        assert_eq!(session.selected_text().map(str::len), Some(500));
        let notice = session.messages().last().unwrap();
        assert_eq!(notice.role, Role::System);
        assert!(notice.content.starts_with("Text selected!"));
    }

    #[tokio::test]
    async fn selection_rides_on_next_message_only() {
        let (mut session, backend, _) = signed_in().await;
        let selection = "Gazebo simulates rigid body dynamics and sensors.";
        session.on_selection(selection);

        session.send("What does this mean?", None).await.unwrap();
        session.send("And Isaac Sim?", None).await.unwrap();

        let requests = backend.chat_requests();
        assert_eq!(requests[0].1.selected_text.as_deref(), Some(selection));
        assert_eq!(requests[1].1.selected_text, None);
    }

    #[tokio::test]
    async fn selection_is_cleared_even_when_send_fails() {
        let (mut session, backend, _) = signed_in().await;
        backend.queue_reply(Err(server_error()));
        session.on_selection("NVIDIA Isaac Sim is built on Omniverse.");

        let _ = session.send("explain", None).await;
        assert_eq!(session.selected_text(), None);
    }

    #[tokio::test]
    async fn selection_alone_sends_default_prompt() {
        let (mut session, backend, _) = signed_in().await;
        session.on_selection("ROS 2 uses a distributed architecture.");
        assert!(session.can_send("", None));

        session.send("", None).await.unwrap();
        let requests = backend.chat_requests();
        assert_eq!(requests[0].1.message, SELECTION_ONLY_PROMPT);
    }

    #[tokio::test]
    async fn personalize_needs_typed_text() {
        let (mut session, backend, _) = signed_in().await;
        session.on_selection("ROS 2 uses a distributed architecture.");

        assert_eq!(
            session
                .begin_send("", Some(ChatAction::Personalize))
                .unwrap_err(),
            SendRejected::Empty
        );
        // The selection survives a rejected send.
        assert!(session.selected_text().is_some());

        session
            .send("What are nodes?", Some(ChatAction::Translate))
            .await
            .unwrap();
        assert_eq!(backend.chat_requests()[0].1.action, Some(ChatAction::Translate));
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let (mut session, backend, store) = signed_in().await;
        session.send("What is ROS 2?", None).await.unwrap();
        session.on_selection("a selection long enough to keep");
        assert!(session.session_id().is_some());

        session.logout().await.unwrap();
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(session.messages().is_empty());
        assert_eq!(session.session_id(), None);
        assert!(session.profile().is_none());
        assert_eq!(session.selected_text(), None);
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(backend.state.lock().unwrap().logout_calls, 1);
    }

    #[tokio::test]
    async fn logout_clears_token_even_if_server_fails() {
        let (mut session, backend, store) = signed_in().await;
        backend.state.lock().unwrap().logout_fails = true;

        session.logout().await.unwrap();
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn late_reply_after_logout_is_still_recorded() {
        let (mut session, _, _) = signed_in().await;
        let pending = session.begin_send("What is ROS 2?", None).unwrap();

        session.logout().await.unwrap();
        session
            .complete_send(pending, Ok(reply("abc", "late answer")))
            .unwrap();

        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.session_id(), None);
        assert_eq!(roles(&session), vec![Role::Assistant]);
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn log_is_append_only_across_mixed_outcomes() {
        let (mut session, backend, _) = signed_in().await;
        backend.queue_reply(Ok(reply("abc", "a1")));
        backend.queue_reply(Err(server_error()));
        backend.queue_reply(Ok(reply("abc", "a3")));

        let mut seen: Vec<String> = session.messages().iter().map(|m| m.content.clone()).collect();
        for question in ["q1", "q2", "q3"] {
            let _ = session.send(question, None).await;
            let now: Vec<String> = session.messages().iter().map(|m| m.content.clone()).collect();
            assert_eq!(&now[..seen.len()], &seen[..], "earlier messages must not change");
            seen = now;
        }

        let tail: Vec<&str> = seen.iter().skip(1).map(String::as_str).collect();
        assert_eq!(tail, vec!["q1", "a1", "q2", SEND_FAILED, "q3", "a3"]);
        let stamps: Vec<_> = session.messages().iter().map(|m| m.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn login_stores_token_and_welcomes_by_name() {
        let store = MemoryTokenStore::new();
        let mut session = ChatSession::new(FakeBackend::default(), store.clone());

        let err = session.login("ada@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(session.state(), AuthState::Unauthenticated);

        session.login("ada@example.com", "secret").await.unwrap();
        assert_eq!(
            store.get().unwrap().map(|t| t.as_str().to_string()),
            Some("jwt-ada@example.com".to_string())
        );
        assert_eq!(session.state(), AuthState::AuthenticatedIdle);
        assert!(session.messages().last().unwrap().content.starts_with("Welcome Ada!"));
    }

    #[tokio::test]
    async fn sign_in_is_refused_while_a_reply_is_outstanding() {
        let (mut session, _, store) = signed_in().await;
        let pending = session.begin_send("first", None).unwrap();

        let err = session.login("bob@example.com", "secret").await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(SendRejected::Busy)));
        assert!(matches!(
            session.accept_token(SessionToken::new("good")).await,
            Err(SessionError::Rejected(SendRejected::Busy))
        ));
        assert_eq!(store.get().unwrap(), Some(SessionToken::new("good")));
        assert_eq!(session.state(), AuthState::AwaitingResponse);
        assert_eq!(session.begin_send("second", None).unwrap_err(), SendRejected::Busy);

        session.complete_send(pending, Ok(reply("abc", "one"))).unwrap();
        assert!(session.begin_send("second", None).is_ok());
    }

    #[tokio::test]
    async fn new_sign_in_starts_a_fresh_conversation() {
        let (mut session, backend, _) = signed_in().await;
        session.send("What is ROS 2?", None).await.unwrap();
        session.on_selection("a selection long enough to keep");
        assert_eq!(session.session_id(), Some("abc"));

        session.login("bob@example.com", "secret").await.unwrap();
        assert_eq!(session.session_id(), None);
        assert_eq!(session.selected_text(), None);
        assert_eq!(roles(&session), vec![Role::System]);

        session.send("Hi, I'm Bob", None).await.unwrap();
        let requests = backend.chat_requests();
        let last = &requests.last().unwrap().1;
        assert_eq!(last.session_id, None);
        assert_eq!(last.selected_text, None);
    }

    #[test]
    fn welcome_without_name_still_greets() {
        let nameless = Profile {
            name: String::new(),
            ..profile("Ada")
        };
        assert!(welcome_for(&nameless).starts_with("Welcome! I'm your Physical AI tutor."));
        assert!(welcome_for(&profile("Ada")).starts_with("Welcome Ada! "));
    }

    #[tokio::test]
    async fn oauth_token_is_stored_only_after_verification() {
        let store = MemoryTokenStore::new();
        let mut session = ChatSession::new(FakeBackend::accepting("oauth-ok"), store.clone());

        assert!(session.accept_token(SessionToken::new("forged")).await.is_err());
        assert_eq!(store.get().unwrap(), None);

        session.accept_token(SessionToken::new("oauth-ok")).await.unwrap();
        assert_eq!(store.get().unwrap(), Some(SessionToken::new("oauth-ok")));
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn explain_code_appends_explanation() {
        let (mut session, _, _) = signed_in().await;
        session.explain_code("rclpy.init()", None).await.unwrap();

        let last = session.messages().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("rclpy"));
        assert_eq!(session.activity(), ActivityState::Idle);
        assert_eq!(session.session_id(), None);
    }

    #[tokio::test]
    async fn opening_the_widget_listens_until_settled() {
        let mut session = ChatSession::new(FakeBackend::default(), MemoryTokenStore::new());
        assert!(session.toggle_open());
        assert_eq!(session.activity(), ActivityState::Listening);
        session.settle_listening();
        assert_eq!(session.activity(), ActivityState::Idle);
        assert!(!session.toggle_open());
        assert_eq!(session.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn profile_update_replaces_cached_profile() {
        let (mut session, _, _) = signed_in().await;
        let update = ProfileUpdate {
            software_background: Some(tutor_core::model::ExperienceLevel::Beginner),
            hardware_background: None,
        };
        let updated = session.update_profile(&update).await.unwrap();
        assert_eq!(
            updated.software_background,
            Some(tutor_core::model::ExperienceLevel::Beginner)
        );
    }
}
