//! Domain models for captured library traffic.
//!
//! These models represent the records decoded from the host application's
//! positional wire format, and the items produced by a library scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a request or response, either raw text or already-structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Body as received over the wire.
    Text(String),
    /// Body that was already parsed by the capturing side.
    Structured(Value),
}

impl Default for Body {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// One observed request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExchange {
    /// HTTP method, upper case.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Request body (needed to identify deletions).
    #[serde(default)]
    pub request_body: Body,
    /// Response status code.
    pub status: u16,
    /// Response body.
    #[serde(default)]
    pub response_body: Body,
}

/// Role of a message in a chat transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageRole {
    /// Message from the user (human).
    User = 1,
    /// Message from the model.
    Assistant = 2,
    /// Unknown or other role.
    Unknown = 0,
}

impl From<MessageRole> for u8 {
    fn from(role: MessageRole) -> Self {
        role as Self
    }
}

impl From<u8> for MessageRole {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::User,
            2 => Self::Assistant,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A single message of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Coarse classification of a library item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Regular text conversation.
    #[default]
    Conversation,
    /// Generative (image) item.
    Generative,
}

impl ItemKind {
    /// Maps the wire tag to a kind. Anything unrecognized is a conversation.
    #[must_use]
    pub const fn from_tag(tag: i64) -> Self {
        match tag {
            2 => Self::Generative,
            _ => Self::Conversation,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Generative => "generative",
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "generative" => Ok(Self::Generative),
            _ => Err(format!("Unknown item kind: {s}")),
        }
    }
}

/// A fully resolved chat, including its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Creation time, epoch seconds.
    pub created_at: Option<i64>,
    /// Messages in wire order.
    pub messages: Vec<ChatMessage>,
}

/// One entry of the library listing as seen by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Creation time, epoch seconds.
    pub created_at: Option<i64>,
    /// Opaque metadata carried along for the store.
    pub metadata: Option<Value>,
    #[serde(default)]
    pub kind: ItemKind,
}

/// A saved prompt as returned by the create/update endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub metadata: Option<Value>,
}

/// Discriminant of a [`DomainRecord`], used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    ChatParsed,
    LibraryItem,
    PromptCreated,
    PromptUpdated,
    PromptDeleted,
}

impl RecordKind {
    pub const ALL: [Self; 5] = [
        Self::ChatParsed,
        Self::LibraryItem,
        Self::PromptCreated,
        Self::PromptUpdated,
        Self::PromptDeleted,
    ];
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChatParsed => "chat-parsed",
            Self::LibraryItem => "library-item",
            Self::PromptCreated => "prompt-created",
            Self::PromptUpdated => "prompt-updated",
            Self::PromptDeleted => "prompt-deleted",
        };
        f.write_str(name)
    }
}

/// A record decoded from one intercepted exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum DomainRecord {
    ChatParsed(ChatTranscript),
    LibraryItem(LibraryItem),
    PromptCreated(Prompt),
    PromptUpdated(Prompt),
    PromptDeleted { id: String },
}

impl DomainRecord {
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::ChatParsed(_) => RecordKind::ChatParsed,
            Self::LibraryItem(_) => RecordKind::LibraryItem,
            Self::PromptCreated(_) => RecordKind::PromptCreated,
            Self::PromptUpdated(_) => RecordKind::PromptUpdated,
            Self::PromptDeleted { .. } => RecordKind::PromptDeleted,
        }
    }

    /// Identifier of the resource this record is about.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::ChatParsed(chat) => &chat.id,
            Self::LibraryItem(item) => &item.id,
            Self::PromptCreated(prompt) | Self::PromptUpdated(prompt) => &prompt.id,
            Self::PromptDeleted { id } => id,
        }
    }

    /// Human readable title, empty for deletions.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::ChatParsed(chat) => &chat.title,
            Self::LibraryItem(item) => &item.title,
            Self::PromptCreated(prompt) | Self::PromptUpdated(prompt) => &prompt.title,
            Self::PromptDeleted { .. } => "",
        }
    }
}

/// Takes the final segment of a slash-delimited resource path.
///
/// Returns `None` unless the input contains a `/` and ends in a non-empty segment.
#[must_use]
pub fn identifier_from_path(path: &str) -> Option<&str> {
    let (_, last) = path.trim().rsplit_once('/')?;
    if last.is_empty() {
        None
    } else {
        Some(last)
    }
}

/// An item as rendered in the host UI's list, scraped from the DOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

impl DomItem {
    /// Builds an item from a link href, using its final path segment as identifier.
    #[must_use]
    pub fn from_href(href: &str, title: impl Into<String>) -> Option<Self> {
        let path = href.split(['?', '#']).next().unwrap_or(href);
        identifier_from_path(path).map(|id| Self {
            id: id.to_string(),
            title: title.into(),
        })
    }
}

/// A DOM item after reconciliation with the API view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedItem {
    pub id: String,
    pub title: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub kind: ItemKind,
}

impl MergedItem {
    /// Whether the API view contributed to this item.
    #[must_use]
    pub const fn is_enriched(&self) -> bool {
        self.created_at.is_some() || self.metadata.is_some()
    }
}

/// Library item as persisted, including any transcript captured for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub title: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Full export of the local store, moved by export/import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub items: Vec<StoredItem>,
    pub prompts: Vec<Prompt>,
}

impl StoreSnapshot {
    pub const CURRENT_VERSION: u32 = 1;
}

/// Converts epoch seconds to a UTC datetime for display.
#[must_use]
pub fn epoch_to_datetime(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_path() {
        assert_eq!(identifier_from_path("prompts/abc123"), Some("abc123"));
        assert_eq!(identifier_from_path("/app/c/xyz"), Some("xyz"));
        assert_eq!(identifier_from_path("abc123"), None);
        assert_eq!(identifier_from_path("prompts/"), None);
    }

    #[test]
    fn test_dom_item_from_href_strips_query() {
        let item = DomItem::from_href("/app/abc123?hl=en", "Title").unwrap();
        assert_eq!(item.id, "abc123");
        assert!(DomItem::from_href("", "x").is_none());
    }

    #[test]
    fn test_item_kind_defaults_to_conversation() {
        assert_eq!(ItemKind::from_tag(2), ItemKind::Generative);
        assert_eq!(ItemKind::from_tag(1), ItemKind::Conversation);
        assert_eq!(ItemKind::from_tag(99), ItemKind::Conversation);
    }

    #[test]
    fn test_unknown_role_codes_decode_as_unknown() {
        assert_eq!(MessageRole::from(2), MessageRole::Assistant);
        let role: MessageRole = serde_json::from_str("7").unwrap();
        assert_eq!(role, MessageRole::Unknown);
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "1");
    }

    #[test]
    fn test_body_untagged_forms() {
        let text: Body = serde_json::from_str(r#""[1,2]""#).unwrap();
        assert!(matches!(text, Body::Text(_)));
        let structured: Body = serde_json::from_str("[1,2]").unwrap();
        assert!(matches!(structured, Body::Structured(_)));
    }

    #[test]
    fn test_record_serde_tagging() {
        let record = DomainRecord::PromptDeleted { id: "p1".into() };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "prompt_deleted");
        assert_eq!(json["record"]["id"], "p1");
    }
}
