//! One-way event bridge between the interception side and the consumer.
//!
//! The two sides share no memory. A published record is serialized into a
//! named event with a JSON detail string and queued; the listener parses it
//! back and hands it to whoever subscribed to that record kind. Delivery is
//! fire-and-forget and FIFO, with no acknowledgement or retry.

use std::collections::HashSet;

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::domain::{DomainRecord, RecordKind};

/// Namespace for event names on the shared dispatch queue.
pub const EVENT_PREFIX: &str = "chat-bridge:";

/// An event as it travels across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub name: String,
    pub detail: String,
}

/// Creates a connected publisher/listener pair.
#[must_use]
pub fn channel() -> (EventBridge, BridgeListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventBridge { tx },
        BridgeListener {
            rx,
            subscriptions: HashSet::new(),
        },
    )
}

/// Event name for a record kind.
#[must_use]
pub fn event_name(kind: RecordKind) -> String {
    format!("{EVENT_PREFIX}{kind}")
}

fn kind_for_event(name: &str) -> Option<RecordKind> {
    let suffix = name.strip_prefix(EVENT_PREFIX)?;
    RecordKind::ALL
        .into_iter()
        .find(|kind| kind.to_string() == suffix)
}

/// Publishing half, owned by the interception side.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: mpsc::UnboundedSender<DocumentEvent>,
}

impl EventBridge {
    /// Dispatches one record. Failures are logged and otherwise ignored.
    pub fn publish(&self, record: &DomainRecord) {
        let detail = match serde_json::to_string(record) {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!(kind = %record.kind(), "Failed to serialize record: {}", e);
                return;
            }
        };
        let event = DocumentEvent {
            name: event_name(record.kind()),
            detail,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(kind = %record.kind(), "No listener attached, event dropped");
        }
    }
}

/// Listening half, owned by the consumer side.
#[derive(Debug)]
pub struct BridgeListener {
    rx: mpsc::UnboundedReceiver<DocumentEvent>,
    subscriptions: HashSet<RecordKind>,
}

impl BridgeListener {
    /// Starts receiving records of `kind`. Other kinds are discarded on arrival.
    pub fn subscribe(&mut self, kind: RecordKind) {
        self.subscriptions.insert(kind);
    }

    #[must_use]
    pub fn is_subscribed(&self, kind: RecordKind) -> bool {
        self.subscriptions.contains(&kind)
    }

    /// Delivers every queued event to `handler`, returning how many were delivered.
    pub fn drain(&mut self, mut handler: impl FnMut(DomainRecord)) -> usize {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(record) = self.accept(&event) {
                        handler(record);
                        delivered += 1;
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }

    fn accept(&self, event: &DocumentEvent) -> Option<DomainRecord> {
        let Some(kind) = kind_for_event(&event.name) else {
            tracing::debug!(name = %event.name, "Ignoring foreign event");
            return None;
        };
        if !self.is_subscribed(kind) {
            return None;
        }
        match serde_json::from_str::<DomainRecord>(&event.detail) {
            Ok(record) if record.kind() == kind => Some(record),
            Ok(record) => {
                tracing::warn!(expected = %kind, got = %record.kind(), "Event name and payload disagree");
                None
            }
            Err(e) => {
                tracing::warn!(%kind, "Unreadable event detail: {}", e);
                None
            }
        }
    }
}
