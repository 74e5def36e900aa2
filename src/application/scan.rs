//! Library scans: DOM walk plus API capture, merged by identifier.
//!
//! The DOM list decides which items exist. The API items captured while the
//! walk was running only contribute timestamps, metadata and type.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::domain::{DomItem, DomainRecord, ItemKind, LibraryItem, MergedItem, RecordKind, Result};

use super::bridge::BridgeListener;
use super::consumer::RecordHandler;

/// Accumulates API-side library items for the duration of one scan.
#[derive(Debug, Default)]
pub struct ScanSession {
    api: HashMap<String, LibraryItem>,
    received: usize,
}

impl ScanSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item. A later item with the same identifier replaces the earlier one.
    pub fn accept(&mut self, item: LibraryItem) {
        self.received += 1;
        self.api.insert(item.id.clone(), item);
    }

    /// Distinct identifiers captured so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.api.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.api.is_empty()
    }

    /// Items accepted, duplicates included.
    #[must_use]
    pub const fn received(&self) -> usize {
        self.received
    }

    /// Merges the captured items into the DOM list.
    #[must_use]
    pub fn reconcile(&self, dom: &[DomItem]) -> Vec<MergedItem> {
        reconcile(dom, self.api.values().cloned())
    }
}

/// Merges DOM items with API items keyed by identifier.
///
/// API items without a DOM counterpart are dropped. Duplicate API identifiers
/// resolve to the last one; duplicate DOM identifiers keep the first.
#[must_use]
pub fn reconcile(dom: &[DomItem], api: impl IntoIterator<Item = LibraryItem>) -> Vec<MergedItem> {
    let api: HashMap<String, LibraryItem> =
        api.into_iter().map(|item| (item.id.clone(), item)).collect();
    let mut seen = HashSet::new();
    dom.iter()
        .filter(|item| seen.insert(item.id.as_str()))
        .map(|item| match api.get(&item.id) {
            // The listing has no separate update time, so creation doubles for it.
            Some(found) => MergedItem {
                id: item.id.clone(),
                title: item.title.clone(),
                created_at: found.created_at,
                updated_at: found.created_at,
                metadata: found.metadata.clone(),
                kind: found.kind,
            },
            None => MergedItem {
                id: item.id.clone(),
                title: item.title.clone(),
                created_at: None,
                updated_at: None,
                metadata: None,
                kind: ItemKind::default(),
            },
        })
        .collect()
}

/// Walks the host UI's list and reports what it rendered.
///
/// Walking is expected to trigger the listing requests the interceptor decodes.
pub trait DomDriver {
    /// # Errors
    /// Returns error if the list could not be read.
    fn drive(&mut self) -> Result<Vec<DomItem>>;
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub merged: Vec<MergedItem>,
    pub dom_items: usize,
    pub api_items: usize,
}

impl ScanOutcome {
    #[must_use]
    pub fn enriched(&self) -> usize {
        self.merged.iter().filter(|m| m.is_enriched()).count()
    }
}

/// Runs one scan end to end.
///
/// Library items are collected into a fresh [`ScanSession`]; any other record
/// that arrives meanwhile goes to `others`. After the DOM walk, the scan waits
/// `settle` once for late responses. The wait is fixed, not a quiescence check.
///
/// # Errors
/// Returns error if the DOM walk fails.
pub async fn run_scan<D, H>(
    driver: &mut D,
    listener: &mut BridgeListener,
    others: &mut H,
    settle: Duration,
) -> Result<ScanOutcome>
where
    D: DomDriver,
    H: RecordHandler,
{
    listener.subscribe(RecordKind::LibraryItem);
    let mut session = ScanSession::new();

    let dom = driver.drive()?;
    collect(listener, &mut session, others);
    tracing::info!(
        dom = dom.len(),
        captured = session.len(),
        settle_ms = settle.as_millis(),
        "DOM walk finished, waiting for late responses"
    );

    tokio::time::sleep(settle).await;
    collect(listener, &mut session, others);
    if session.is_empty() && !dom.is_empty() {
        tracing::warn!("No listing traffic captured, items keep their DOM titles only");
    }

    let merged = session.reconcile(&dom);
    tracing::info!(
        merged = merged.len(),
        api = session.len(),
        received = session.received(),
        "Scan reconciled"
    );

    Ok(ScanOutcome {
        merged,
        dom_items: dom.len(),
        api_items: session.len(),
    })
}

fn collect<H: RecordHandler>(
    listener: &mut BridgeListener,
    session: &mut ScanSession,
    others: &mut H,
) {
    listener.drain(|record| match record {
        DomainRecord::LibraryItem(item) => session.accept(item),
        other => others.handle(other),
    });
}
