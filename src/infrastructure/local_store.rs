//! Local SQLite store for captured library data.
//!
//! Implements the [`RecordStore`] port so the pipeline can be exercised
//! end to end. Scan upserts never erase API-side fields the store already
//! has when a merged item arrives without them.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::application::RecordStore;
use crate::domain::{
    AppError, ChatMessage, ChatTranscript, ItemKind, MergedItem, MessageRole, Prompt, Result,
    StoreSnapshot, StoredItem,
};

/// Local storage repository using SQLite.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Opens or creates the store database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::database)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(AppError::database)?;

        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory store.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::database)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(AppError::database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS library_items (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'conversation',
                created_at INTEGER,
                updated_at INTEGER,
                metadata TEXT,
                synced_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                item_id TEXT NOT NULL REFERENCES library_items(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                role INTEGER NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (item_id, position)
            );

            CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                created_at INTEGER,
                updated_at INTEGER,
                metadata TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_library_items_updated
                ON library_items(updated_at DESC);
            ",
            )
            .map_err(AppError::database)?;

        Ok(())
    }

    /// Number of stored library items.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn item_count(&self) -> Result<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM library_items", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|c| usize::try_from(c).unwrap_or_default())
            .map_err(AppError::database)
    }

    fn messages_for(&self, item_id: &str) -> Result<Vec<ChatMessage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT role, content FROM messages WHERE item_id = ?1 ORDER BY position")
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([item_id], |row| {
                Ok(ChatMessage {
                    role: MessageRole::from(row.get::<_, u8>(0)?),
                    content: row.get(1)?,
                })
            })
            .map_err(AppError::database)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::database)
    }

    fn prompts(&self) -> Result<Vec<Prompt>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, created_at, updated_at, metadata FROM prompts ORDER BY id")
            .map_err(AppError::database)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Prompt {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    metadata: parse_metadata(row.get(4)?),
                })
            })
            .map_err(AppError::database)?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(AppError::database)
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<StoredItem> {
        let kind: String = row.get(2)?;
        Ok(StoredItem {
            id: row.get(0)?,
            title: row.get(1)?,
            kind: kind.parse().unwrap_or_default(),
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            metadata: parse_metadata(row.get(5)?),
            messages: Vec::new(),
        })
    }
}

fn encode_metadata(metadata: Option<&Value>) -> Option<String> {
    metadata.map(Value::to_string)
}

fn parse_metadata(raw: Option<String>) -> Option<Value> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Stored metadata is not JSON: {}", e);
            None
        }
    }
}

fn upsert_item(conn: &Connection, item: &MergedItem) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO library_items (id, title, kind, created_at, updated_at, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            title = CASE WHEN excluded.title = '' THEN title ELSE excluded.title END,
            kind = CASE
                WHEN excluded.created_at IS NULL AND excluded.metadata IS NULL THEN kind
                ELSE excluded.kind
            END,
            created_at = COALESCE(excluded.created_at, created_at),
            updated_at = COALESCE(excluded.updated_at, updated_at),
            metadata = COALESCE(excluded.metadata, metadata),
            synced_at = datetime('now')
        ",
        params![
            &item.id,
            &item.title,
            item.kind.as_str(),
            item.created_at,
            item.updated_at,
            encode_metadata(item.metadata.as_ref()),
        ],
    )
    .map_err(AppError::database)?;
    Ok(())
}

fn replace_messages(conn: &Connection, item_id: &str, messages: &[ChatMessage]) -> Result<()> {
    conn.execute("DELETE FROM messages WHERE item_id = ?1", [item_id])
        .map_err(AppError::database)?;

    let mut stmt = conn
        .prepare("INSERT INTO messages (item_id, position, role, content) VALUES (?1, ?2, ?3, ?4)")
        .map_err(AppError::database)?;
    for (position, message) in messages.iter().enumerate() {
        stmt.execute(params![
            item_id,
            i64::try_from(position).unwrap_or(i64::MAX),
            u8::from(message.role),
            &message.content,
        ])
        .map_err(AppError::database)?;
    }
    Ok(())
}

fn upsert_prompt_row(conn: &Connection, prompt: &Prompt) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO prompts (id, title, created_at, updated_at, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            created_at = COALESCE(excluded.created_at, created_at),
            updated_at = COALESCE(excluded.updated_at, updated_at),
            metadata = COALESCE(excluded.metadata, metadata)
        ",
        params![
            &prompt.id,
            &prompt.title,
            prompt.created_at,
            prompt.updated_at,
            encode_metadata(prompt.metadata.as_ref()),
        ],
    )
    .map_err(AppError::database)?;
    Ok(())
}

impl RecordStore for LocalStore {
    fn save_chat(&self, chat: &ChatTranscript) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(AppError::database)?;

        let existing_kind: Option<String> = tx
            .query_row(
                "SELECT kind FROM library_items WHERE id = ?1",
                [&chat.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::database)?;

        upsert_item(
            &tx,
            &MergedItem {
                id: chat.id.clone(),
                title: chat.title.clone(),
                created_at: chat.created_at,
                updated_at: None,
                metadata: None,
                kind: existing_kind
                    .and_then(|k| k.parse().ok())
                    .unwrap_or(ItemKind::Conversation),
            },
        )?;
        replace_messages(&tx, &chat.id, &chat.messages)?;

        tx.commit().map_err(AppError::database)?;
        tracing::debug!(id = %chat.id, messages = chat.messages.len(), "Chat saved");
        Ok(())
    }

    fn upsert_prompt(&self, prompt: &Prompt) -> Result<()> {
        upsert_prompt_row(&self.conn, prompt)
    }

    fn delete_prompt(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM prompts WHERE id = ?1", [id])
            .map_err(AppError::database)?;
        Ok(removed > 0)
    }

    fn upsert_library(&self, items: &[MergedItem]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(AppError::database)?;
        for item in items {
            upsert_item(&tx, item)?;
        }
        tx.commit().map_err(AppError::database)?;

        tracing::info!(count = items.len(), "Library items upserted");
        Ok(items.len())
    }

    fn list_library(&self, limit: usize) -> Result<Vec<StoredItem>> {
        let mut stmt = self
            .conn
            .prepare(
                r"
            SELECT id, title, kind, created_at, updated_at, metadata
            FROM library_items
            ORDER BY COALESCE(updated_at, created_at, 0) DESC, id
            LIMIT ?1
            ",
            )
            .map_err(AppError::database)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map([limit], Self::row_to_item)
            .map_err(AppError::database)?;

        let mut items = Vec::new();
        for row in rows {
            match row {
                Ok(mut item) => {
                    item.messages = self.messages_for(&item.id)?;
                    items.push(item);
                }
                Err(e) => {
                    tracing::warn!("Failed to read row: {}", e);
                }
            }
        }

        Ok(items)
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            version: StoreSnapshot::CURRENT_VERSION,
            exported_at: Utc::now(),
            items: self.list_library(usize::MAX)?,
            prompts: self.prompts()?,
        })
    }

    fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<usize> {
        if snapshot.version > StoreSnapshot::CURRENT_VERSION {
            return Err(AppError::InvalidData {
                message: format!("Unsupported snapshot version {}", snapshot.version),
            });
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(AppError::database)?;

        for item in &snapshot.items {
            upsert_item(
                &tx,
                &MergedItem {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    created_at: item.created_at,
                    updated_at: item.updated_at,
                    metadata: item.metadata.clone(),
                    kind: item.kind,
                },
            )?;
            if !item.messages.is_empty() {
                replace_messages(&tx, &item.id, &item.messages)?;
            }
        }
        for prompt in &snapshot.prompts {
            upsert_prompt_row(&tx, prompt)?;
        }

        tx.commit().map_err(AppError::database)?;

        let imported = snapshot.items.len() + snapshot.prompts.len();
        tracing::info!(imported, "Snapshot imported");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn merged(id: &str, created: Option<i64>, meta: Option<Value>) -> MergedItem {
        MergedItem {
            id: id.into(),
            title: format!("Title {id}"),
            created_at: created,
            updated_at: created,
            metadata: meta,
            kind: if created.is_some() {
                ItemKind::Generative
            } else {
                ItemKind::Conversation
            },
        }
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let store = LocalStore::open(&db_path).unwrap();

        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert!(count >= 3);
    }

    #[test]
    fn test_dom_only_upsert_keeps_api_fields() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert_library(&[merged("a", Some(100), Some(json!({"k": 1})))])
            .unwrap();
        store.upsert_library(&[merged("a", None, None)]).unwrap();

        let items = store.list_library(10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].created_at, Some(100));
        assert_eq!(items[0].metadata, Some(json!({"k": 1})));
        assert_eq!(items[0].kind, ItemKind::Generative);
    }

    #[test]
    fn test_chat_replaces_messages() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut chat = ChatTranscript {
            id: "c1".into(),
            title: "Chat".into(),
            created_at: None,
            messages: vec![
                ChatMessage {
                    role: MessageRole::User,
                    content: "one".into(),
                },
                ChatMessage {
                    role: MessageRole::Assistant,
                    content: "two".into(),
                },
            ],
        };
        store.save_chat(&chat).unwrap();
        chat.messages.truncate(1);
        store.save_chat(&chat).unwrap();

        let items = store.list_library(10).unwrap();
        assert_eq!(items[0].messages.len(), 1);
        assert_eq!(items[0].messages[0].role, MessageRole::User);
    }

    #[test]
    fn test_snapshot_import_round_trip() {
        let source = LocalStore::open_in_memory().unwrap();
        source
            .upsert_library(&[merged("a", Some(1), None), merged("b", None, None)])
            .unwrap();
        source
            .upsert_prompt(&Prompt {
                id: "p".into(),
                title: "Prompt".into(),
                created_at: Some(3),
                updated_at: None,
                metadata: Some(json!(["x"])),
            })
            .unwrap();

        let snapshot = source.snapshot().unwrap();
        let target = LocalStore::open_in_memory().unwrap();
        assert_eq!(target.import_snapshot(&snapshot).unwrap(), 3);
        assert_eq!(target.item_count().unwrap(), 2);
        assert_eq!(target.snapshot().unwrap().prompts, snapshot.prompts);
    }

    #[test]
    fn test_newer_snapshot_version_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let snapshot = StoreSnapshot {
            version: StoreSnapshot::CURRENT_VERSION + 1,
            exported_at: Utc::now(),
            items: Vec::new(),
            prompts: Vec::new(),
        };
        assert!(matches!(
            store.import_snapshot(&snapshot),
            Err(AppError::InvalidData { .. })
        ));
    }
}
