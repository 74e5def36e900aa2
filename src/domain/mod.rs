//! Domain layer - core types shared by every stage of the pipeline.
//!
//! This layer contains pure domain models, configuration and error types
//! without any external dependencies (DB, IO, etc.).

pub mod config;
pub mod error;
pub mod models;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use models::{
    identifier_from_path, Body, ChatMessage, ChatTranscript, DomItem, DomainRecord, ItemKind,
    LibraryItem, MergedItem, MessageRole, Prompt, RawExchange, RecordKind, StoreSnapshot,
    StoredItem,
};
