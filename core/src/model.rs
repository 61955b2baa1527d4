use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ParseEnumError;

/// Opaque bearer credential issued by `/auth/login`, `/auth/register` or the
/// Google OAuth callback. At most one is held per installation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "SessionToken({prefix}...)")
    }
}

/// Self-reported experience level used by the backend to personalize answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => "beginner",
            ExperienceLevel::Intermediate => "intermediate",
            ExperienceLevel::Advanced => "advanced",
        }
    }
}

impl FromStr for ExperienceLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(ExperienceLevel::Beginner),
            "intermediate" => Ok(ExperienceLevel::Intermediate),
            "advanced" => Ok(ExperienceLevel::Advanced),
            _ => Err(ParseEnumError::new(
                "experience level",
                s,
                "beginner, intermediate, advanced",
            )),
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed-in learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The backend sends the numeric row id; the JWT subject is a string.
    /// Both normalize to a string.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_background: Option<ExperienceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_background: Option<ExperienceLevel>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A retrieved passage the assistant grounded its answer on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            sources,
            ..Self::new(Role::Assistant, content)
        }
    }
}

/// Append-only, ordered conversation log owned by one chat session.
///
/// Messages are kept in the order they were appended. There is no API to
/// remove or reorder individual entries; the whole log is dropped on logout.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop the whole conversation. Only session teardown (logout) uses this.
    pub fn reset(&mut self) {
        self.messages.clear();
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// What the assistant is doing right now. Drives presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Responding,
}

impl ActivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityState::Idle => "idle",
            ActivityState::Listening => "listening",
            ActivityState::Thinking => "thinking",
            ActivityState::Responding => "responding",
        }
    }

    /// Status line shown next to the avatar.
    pub fn status_label(self) -> &'static str {
        match self {
            ActivityState::Idle => "Online",
            ActivityState::Listening => "Listening...",
            ActivityState::Thinking => "Thinking...",
            ActivityState::Responding => "Responding...",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer transformation requested alongside a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatAction {
    /// Rephrase for the learner's software/hardware background.
    Personalize,
    /// Translate the answer to Urdu.
    Translate,
    ExplainCode,
}

impl ChatAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatAction::Personalize => "personalize",
            ChatAction::Translate => "translate",
            ChatAction::ExplainCode => "explain_code",
        }
    }

    /// Personalize and translate act on what the learner typed, so a bare
    /// selection is not enough to trigger them.
    pub fn requires_typed_input(self) -> bool {
        matches!(self, ChatAction::Personalize | ChatAction::Translate)
    }
}

impl FromStr for ChatAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "personalize" => Ok(ChatAction::Personalize),
            "translate" => Ok(ChatAction::Translate),
            "explain_code" => Ok(ChatAction::ExplainCode),
            _ => Err(ParseEnumError::new(
                "chat action",
                s,
                "personalize, translate, explain_code",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_accepts_numeric_and_string_ids() {
        let numeric: Profile =
            serde_json::from_str(r#"{"id": 7, "email": "a@b.c", "name": "Ada"}"#).unwrap();
        assert_eq!(numeric.id, "7");

        let textual: Profile = serde_json::from_str(r#"{"id": "7", "name": "Ada"}"#).unwrap();
        assert_eq!(textual.id, "7");
        assert_eq!(textual.software_background, None);
    }

    #[test]
    fn profile_tolerates_null_name() {
        let p: Profile =
            serde_json::from_str(r#"{"id": 3, "email": "g@example.com", "name": null}"#).unwrap();
        assert_eq!(p.name, "");
    }

    #[test]
    fn profile_parses_experience_levels() {
        let p: Profile = serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Ada",
            "software_background": "advanced",
            "hardware_background": null
        }))
        .unwrap();
        assert_eq!(p.software_background, Some(ExperienceLevel::Advanced));
        assert_eq!(p.hardware_background, None);
    }

    #[test]
    fn experience_level_from_str_is_case_insensitive() {
        assert_eq!(
            "Intermediate".parse::<ExperienceLevel>().unwrap(),
            ExperienceLevel::Intermediate
        );
        let err = "expert".parse::<ExperienceLevel>().unwrap_err();
        assert!(err.to_string().contains("expert"));
    }

    #[test]
    fn message_log_keeps_append_order() {
        let mut log = MessageLog::new();
        log.push(Message::user("first"));
        log.push(Message::assistant("second", Vec::new()));
        log.push(Message::system("third"));

        let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(log.last().map(|m| m.role), Some(Role::System));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = SessionToken::new("eyJhbGciOiJIUzI1NiJ9.secret");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn chat_action_wire_names() {
        assert_eq!(
            serde_json::to_value(ChatAction::ExplainCode).unwrap(),
            serde_json::json!("explain_code")
        );
        assert_eq!("explain-code".parse::<ChatAction>().unwrap(), ChatAction::ExplainCode);
        assert!(ChatAction::Translate.requires_typed_input());
        assert!(!ChatAction::ExplainCode.requires_typed_input());
    }
}
