//! Decoders for the host application's positional responses.
//!
//! Each endpoint has a schema table mapping fields to array paths. When the
//! upstream format drifts, the fix is an edit to one of the tables below.
//! Decoders never fail on shape: a missing required slot yields no record,
//! a missing optional slot yields the field's default.

use serde_json::Value;

use crate::domain::{
    ChatMessage, ChatTranscript, DomainRecord, ItemKind, LibraryItem, MessageRole, Prompt,
    RawExchange,
};

use super::wire::{epoch_seconds, parse_body, resource_id, text, value_at, DecodeError};

/// Endpoint families the proxy knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    /// Full conversation fetch, including messages.
    ChatResolve,
    /// One page of the library listing.
    List,
    /// Prompt creation.
    Create,
    /// Prompt update.
    Update,
    /// Prompt deletion.
    Delete,
}

impl std::fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChatResolve => "chat",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for EndpointCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" | "chat-resolve" => Ok(Self::ChatResolve),
            "list" => Ok(Self::List),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!(
                "Unknown endpoint: {s}. Use: chat, list, create, update, delete"
            )),
        }
    }
}

/// Logical fields a schema can locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Slash-delimited resource path; its last segment is the identifier.
    ResourcePath,
    /// Display title. Default: empty.
    Title,
    /// Creation seconds. Default: null.
    Created,
    /// Update seconds. Default: null.
    Updated,
    /// Free-form metadata. Default: null.
    Metadata,
    /// Numeric type tag. Default: conversation.
    KindTag,
    /// Array of chat turns.
    Messages,
    /// Array of listing items.
    Items,
    /// Role code of a turn. Default: unknown.
    Role,
    /// Text of a turn.
    Content,
}

/// One row of a schema table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: Field,
    pub path: &'static [usize],
    /// A missing required field rejects the whole record.
    pub required: bool,
}

const fn req(field: Field, path: &'static [usize]) -> FieldSpec {
    FieldSpec {
        field,
        path,
        required: true,
    }
}

const fn opt(field: Field, path: &'static [usize]) -> FieldSpec {
    FieldSpec {
        field,
        path,
        required: false,
    }
}

/// Positional layout of one endpoint's payload.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

pub const CHAT_SCHEMA: Schema = Schema {
    name: "chat",
    fields: &[
        req(Field::Messages, &[0]),
        req(Field::ResourcePath, &[1]),
        opt(Field::Title, &[2]),
        opt(Field::Created, &[3, 0]),
    ],
};

pub const TURN_SCHEMA: Schema = Schema {
    name: "turn",
    fields: &[opt(Field::Role, &[0]), req(Field::Content, &[1])],
};

pub const LISTING_SCHEMA: Schema = Schema {
    name: "listing",
    fields: &[req(Field::Items, &[0])],
};

pub const LIST_ITEM_SCHEMA: Schema = Schema {
    name: "list-item",
    fields: &[
        req(Field::ResourcePath, &[0]),
        opt(Field::Title, &[1]),
        opt(Field::KindTag, &[2, 1]),
        opt(Field::Metadata, &[2, 2]),
        opt(Field::Created, &[4, 4, 0, 0]),
    ],
};

pub const CREATE_SCHEMA: Schema = Schema {
    name: "create",
    fields: &[
        req(Field::ResourcePath, &[0]),
        opt(Field::Title, &[1, 0]),
        opt(Field::Metadata, &[1, 2]),
        opt(Field::Created, &[2, 0, 0]),
        opt(Field::Updated, &[2, 1, 0]),
    ],
};

pub const UPDATE_SCHEMA: Schema = Schema {
    name: "update",
    fields: &[
        req(Field::ResourcePath, &[0, 0]),
        opt(Field::Title, &[0, 1, 0]),
        opt(Field::Metadata, &[0, 1, 2]),
        opt(Field::Created, &[0, 2, 0, 0]),
        opt(Field::Updated, &[0, 2, 1, 0]),
    ],
};

/// Applied to the request body; deletion responses carry no path.
pub const DELETE_SCHEMA: Schema = Schema {
    name: "delete",
    fields: &[req(Field::ResourcePath, &[0])],
};

/// Slots read out of one payload according to a schema.
struct Slots<'a> {
    schema: Schema,
    root: &'a Value,
}

impl<'a> Slots<'a> {
    /// Returns `None` if any required field is missing.
    fn read(schema: Schema, root: &'a Value) -> Option<Self> {
        let slots = Self { schema, root };
        for spec in schema.fields.iter().filter(|s| s.required) {
            if value_at(root, spec.path).is_none() {
                tracing::debug!(
                    schema = schema.name,
                    field = ?spec.field,
                    path = ?spec.path,
                    "Required slot missing"
                );
                return None;
            }
        }
        Some(slots)
    }

    fn get(&self, field: Field) -> Option<&'a Value> {
        self.schema
            .fields
            .iter()
            .find(|s| s.field == field)
            .and_then(|s| value_at(self.root, s.path))
    }

    fn id(&self) -> Option<String> {
        let id = self.get(Field::ResourcePath).and_then(resource_id);
        if id.is_none() {
            tracing::debug!(schema = self.schema.name, "Slot is not a resource path");
        }
        id
    }

    fn title(&self) -> String {
        self.get(Field::Title).and_then(text).unwrap_or_default()
    }

    fn seconds(&self, field: Field) -> Option<i64> {
        self.get(field).and_then(epoch_seconds)
    }

    fn metadata(&self) -> Option<Value> {
        self.get(Field::Metadata).cloned()
    }

    fn kind(&self) -> ItemKind {
        self.get(Field::KindTag)
            .and_then(Value::as_i64)
            .map_or_else(ItemKind::default, ItemKind::from_tag)
    }

    fn array(&self, field: Field) -> Option<&'a Vec<Value>> {
        self.get(field).and_then(Value::as_array)
    }
}

/// Decodes a resolved chat. Chats without any readable message yield nothing.
#[must_use]
pub fn decode_chat(root: &Value) -> Option<ChatTranscript> {
    let slots = Slots::read(CHAT_SCHEMA, root)?;
    let id = slots.id()?;
    let messages: Vec<ChatMessage> = slots
        .array(Field::Messages)?
        .iter()
        .filter_map(decode_turn)
        .collect();

    if messages.is_empty() {
        tracing::debug!(%id, "Chat has no messages");
        return None;
    }

    Some(ChatTranscript {
        id,
        title: slots.title(),
        created_at: slots.seconds(Field::Created),
        messages,
    })
}

fn decode_turn(turn: &Value) -> Option<ChatMessage> {
    let slots = Slots::read(TURN_SCHEMA, turn)?;
    let content = slots.get(Field::Content).and_then(text)?;
    let role = match slots.get(Field::Role) {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|code| u8::try_from(code).ok())
            .map_or(MessageRole::Unknown, MessageRole::from),
        Some(Value::String(s)) => match s.as_str() {
            "user" => MessageRole::User,
            "model" | "assistant" => MessageRole::Assistant,
            _ => MessageRole::Unknown,
        },
        _ => MessageRole::Unknown,
    };
    Some(ChatMessage { role, content })
}

/// Decodes one page of the listing, dropping malformed entries.
#[must_use]
pub fn decode_listing(root: &Value) -> Vec<LibraryItem> {
    let Some(items) = Slots::read(LISTING_SCHEMA, root)
        .as_ref()
        .and_then(|s| s.array(Field::Items))
    else {
        return Vec::new();
    };

    let decoded: Vec<LibraryItem> = items.iter().filter_map(decode_library_item).collect();
    if decoded.len() < items.len() {
        tracing::debug!(
            total = items.len(),
            kept = decoded.len(),
            "Dropped malformed listing items"
        );
    }
    decoded
}

/// Decodes a single listing entry.
#[must_use]
pub fn decode_library_item(item: &Value) -> Option<LibraryItem> {
    let slots = Slots::read(LIST_ITEM_SCHEMA, item)?;
    Some(LibraryItem {
        id: slots.id()?,
        title: slots.title(),
        created_at: slots.seconds(Field::Created),
        metadata: slots.metadata(),
        kind: slots.kind(),
    })
}

/// Decodes a prompt payload with the given schema (create or update).
#[must_use]
pub fn decode_prompt(schema: Schema, root: &Value) -> Option<Prompt> {
    let slots = Slots::read(schema, root)?;
    Some(Prompt {
        id: slots.id()?,
        title: slots.title(),
        created_at: slots.seconds(Field::Created),
        updated_at: slots.seconds(Field::Updated),
        metadata: slots.metadata(),
    })
}

/// Extracts the deleted identifier from a deletion request body.
#[must_use]
pub fn decode_deletion(request: &Value) -> Option<String> {
    Slots::read(DELETE_SCHEMA, request)?.id()
}

/// Decodes one exchange for a known endpoint.
///
/// An empty result means the shape was not recognized.
///
/// # Errors
/// Returns [`DecodeError`] if the relevant body cannot be parsed at all.
pub fn decode_exchange(
    category: EndpointCategory,
    exchange: &RawExchange,
) -> Result<Vec<DomainRecord>, DecodeError> {
    if category == EndpointCategory::Delete {
        let request = parse_body(&exchange.request_body)?;
        return Ok(decode_deletion(&request)
            .map(|id| DomainRecord::PromptDeleted { id })
            .into_iter()
            .collect());
    }

    let root = parse_body(&exchange.response_body)?;
    let records = match category {
        EndpointCategory::ChatResolve => decode_chat(&root)
            .map(DomainRecord::ChatParsed)
            .into_iter()
            .collect(),
        EndpointCategory::List => decode_listing(&root)
            .into_iter()
            .map(DomainRecord::LibraryItem)
            .collect(),
        EndpointCategory::Create => decode_prompt(CREATE_SCHEMA, &root)
            .map(DomainRecord::PromptCreated)
            .into_iter()
            .collect(),
        EndpointCategory::Update => decode_prompt(UPDATE_SCHEMA, &root)
            .map(DomainRecord::PromptUpdated)
            .into_iter()
            .collect(),
        EndpointCategory::Delete => Vec::new(),
    };
    Ok(records)
}
