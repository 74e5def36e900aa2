//! Consumer side: applies decoded records to the store collaborator.

use crate::domain::{
    ChatTranscript, DomainRecord, MergedItem, Prompt, RecordKind, Result, StoreSnapshot,
    StoredItem,
};

use super::transport::{Frame, Reassembler};

/// Record kinds the store applier reacts to. Library items only arrive via scans.
pub const APPLIED_KINDS: [RecordKind; 4] = [
    RecordKind::ChatParsed,
    RecordKind::PromptCreated,
    RecordKind::PromptUpdated,
    RecordKind::PromptDeleted,
];

/// Write operations the pipeline needs from persistent storage.
pub trait RecordStore {
    /// Stores a chat and replaces its messages.
    ///
    /// # Errors
    /// Returns error if the write fails.
    fn save_chat(&self, chat: &ChatTranscript) -> Result<()>;

    /// Inserts or updates a prompt.
    ///
    /// # Errors
    /// Returns error if the write fails.
    fn upsert_prompt(&self, prompt: &Prompt) -> Result<()>;

    /// Removes a prompt, returning whether it existed.
    ///
    /// # Errors
    /// Returns error if the write fails.
    fn delete_prompt(&self, id: &str) -> Result<bool>;

    /// Bulk upsert of reconciled scan results, in one transaction.
    ///
    /// # Errors
    /// Returns error if the write fails; nothing is written in that case.
    fn upsert_library(&self, items: &[MergedItem]) -> Result<usize>;

    /// Lists stored library items, newest first.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn list_library(&self, limit: usize) -> Result<Vec<StoredItem>>;

    /// Captures the whole store.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn snapshot(&self) -> Result<StoreSnapshot>;

    /// Merges a snapshot into the store.
    ///
    /// # Errors
    /// Returns error if the write fails.
    fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<usize>;
}

/// Something that consumes records delivered by the bridge.
pub trait RecordHandler {
    fn handle(&mut self, record: DomainRecord);
}

/// Collects records instead of applying them (dry runs).
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub records: Vec<DomainRecord>,
}

impl RecordHandler for CollectingHandler {
    fn handle(&mut self, record: DomainRecord) {
        self.records.push(record);
    }
}

/// Counters for applied records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyStats {
    pub chats: usize,
    pub prompts_saved: usize,
    pub prompts_deleted: usize,
    pub ignored: usize,
    pub errors: usize,
}

/// Applies single-record events directly to a store.
pub struct StoreApplier<'s, S: RecordStore> {
    store: &'s S,
    stats: ApplyStats,
}

impl<'s, S: RecordStore> StoreApplier<'s, S> {
    pub const fn new(store: &'s S) -> Self {
        Self {
            store,
            stats: ApplyStats {
                chats: 0,
                prompts_saved: 0,
                prompts_deleted: 0,
                ignored: 0,
                errors: 0,
            },
        }
    }

    #[must_use]
    pub const fn stats(&self) -> ApplyStats {
        self.stats
    }

    fn apply(&mut self, record: &DomainRecord) -> Result<()> {
        match record {
            DomainRecord::ChatParsed(chat) => {
                self.store.save_chat(chat)?;
                self.stats.chats += 1;
            }
            DomainRecord::PromptCreated(prompt) | DomainRecord::PromptUpdated(prompt) => {
                self.store.upsert_prompt(prompt)?;
                self.stats.prompts_saved += 1;
            }
            DomainRecord::PromptDeleted { id } => {
                if self.store.delete_prompt(id)? {
                    self.stats.prompts_deleted += 1;
                } else {
                    tracing::debug!(%id, "Deleted prompt was not stored");
                }
            }
            DomainRecord::LibraryItem(item) => {
                tracing::debug!(id = %item.id, "Library item outside a scan, ignoring");
                self.stats.ignored += 1;
            }
        }
        Ok(())
    }
}

impl<S: RecordStore> RecordHandler for StoreApplier<'_, S> {
    fn handle(&mut self, record: DomainRecord) {
        if let Err(e) = self.apply(&record) {
            tracing::warn!(kind = %record.kind(), id = %record.id(), "Failed to apply record: {}", e);
            self.stats.errors += 1;
        }
    }
}

/// Outcome of importing a frame stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportReport {
    /// Transfers whose snapshot was merged into the store.
    pub transfers: usize,
    /// Items and prompts merged.
    pub imported: usize,
    /// Complete transfers whose payload was not a snapshot.
    pub failed: usize,
    /// Transfers still missing fragments at the end of the stream.
    pub pending: usize,
}

/// Reassembles `frames` and merges every complete snapshot into `store`.
///
/// A payload that is not a snapshot is logged and skipped.
///
/// # Errors
/// Returns error if the store rejects a snapshot.
pub fn import_frames<S: RecordStore>(
    store: &S,
    frames: impl IntoIterator<Item = Frame>,
) -> Result<ImportReport> {
    let mut reassembler = Reassembler::new();
    let mut report = ImportReport::default();

    for frame in frames {
        let Some(payload) = reassembler.receive(frame) else {
            continue;
        };
        match serde_json::from_slice::<StoreSnapshot>(&payload) {
            Ok(snapshot) => {
                report.imported += store.import_snapshot(&snapshot)?;
                report.transfers += 1;
            }
            Err(e) => {
                tracing::warn!(bytes = payload.len(), "Transfer is not a store snapshot: {}", e);
                report.failed += 1;
            }
        }
    }

    report.pending = reassembler.pending();
    if report.pending > 0 {
        tracing::warn!(pending = report.pending, "Frame stream ends with incomplete transfers");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::split;
    use crate::domain::{ChatMessage, LibraryItem, MessageRole};
    use crate::infrastructure::LocalStore;

    fn prompt(id: &str, title: &str) -> Prompt {
        Prompt {
            id: id.into(),
            title: title.into(),
            created_at: Some(1),
            updated_at: Some(2),
            metadata: None,
        }
    }

    #[test]
    fn test_applies_prompt_lifecycle() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut applier = StoreApplier::new(&store);

        applier.handle(DomainRecord::PromptCreated(prompt("p1", "First")));
        applier.handle(DomainRecord::PromptUpdated(prompt("p1", "Second")));
        applier.handle(DomainRecord::PromptDeleted { id: "p1".into() });
        applier.handle(DomainRecord::PromptDeleted { id: "never".into() });

        let stats = applier.stats();
        assert_eq!(stats.prompts_saved, 2);
        assert_eq!(stats.prompts_deleted, 1);
        assert_eq!(stats.errors, 0);
        assert!(store.snapshot().unwrap().prompts.is_empty());
    }

    #[test]
    fn test_applies_chat_and_ignores_stray_items() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut applier = StoreApplier::new(&store);

        applier.handle(DomainRecord::ChatParsed(ChatTranscript {
            id: "c1".into(),
            title: "Chat".into(),
            created_at: Some(5),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: "hi".into(),
            }],
        }));
        applier.handle(DomainRecord::LibraryItem(LibraryItem {
            id: "stray".into(),
            title: String::new(),
            created_at: None,
            metadata: None,
            kind: crate::domain::ItemKind::Conversation,
        }));

        assert_eq!(applier.stats().chats, 1);
        assert_eq!(applier.stats().ignored, 1);
        let items = store.list_library(10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].messages.len(), 1);
    }

    #[test]
    fn test_import_skips_bad_transfers_and_continues() {
        let source = LocalStore::open_in_memory().unwrap();
        source.upsert_prompt(&prompt("p1", "Kept")).unwrap();
        let snapshot = serde_json::to_vec(&source.snapshot().unwrap()).unwrap();

        let mut frames = vec![Frame::Whole {
            payload: b"not a snapshot".to_vec(),
        }];
        frames.extend(split(&snapshot, 64).unwrap());
        let stalled = split(&[7; 100], 10).unwrap();
        frames.push(stalled[0].clone());

        let target = LocalStore::open_in_memory().unwrap();
        let report = import_frames(&target, frames).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.transfers, 1);
        assert_eq!(report.imported, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(target.snapshot().unwrap().prompts[0].title, "Kept");
    }
}
