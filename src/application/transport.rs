//! Chunked transport for payloads larger than one message.
//!
//! Payloads up to the frame size travel as a single [`Frame::Whole`].
//! Larger ones are cut into `ceil(len / frame_size)` fragments that share a
//! transfer id. The receiver keeps one slot array per transfer and delivers
//! the payload once every slot is filled.
//!
//! A transfer may span at most [`MAX_FRAGMENTS`] frames; fragments claiming
//! more are dropped before any slot is allocated.
//!
//! There is no timeout: a transfer that loses a fragment stays pending until
//! the receiver is dropped. The sender has to start over in that case.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{AppError, Result};

static TRANSFER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Upper bound on the fragments of one transfer.
pub const MAX_FRAGMENTS: usize = 1 << 16;

/// One message on the size-bounded channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// A payload small enough to send as-is.
    Whole {
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    /// Piece `index` of `total` of a larger payload.
    Fragment {
        transfer_id: String,
        index: usize,
        total: usize,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Destination for outgoing frames.
pub trait FrameSink {
    /// # Errors
    /// Returns error if the frame could not be handed to the channel.
    fn send_frame(&mut self, frame: Frame) -> Result<()>;
}

impl FrameSink for Vec<Frame> {
    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}

fn next_transfer_id() -> String {
    let seq = TRANSFER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{seq:x}", chrono::Utc::now().timestamp_millis())
}

/// Splits a payload into frames of at most `frame_size` bytes each.
///
/// # Errors
/// Returns error if `frame_size` is zero.
pub fn split(payload: &[u8], frame_size: usize) -> Result<Vec<Frame>> {
    split_with_id(payload, frame_size, &next_transfer_id())
}

fn split_with_id(payload: &[u8], frame_size: usize, transfer_id: &str) -> Result<Vec<Frame>> {
    if frame_size == 0 {
        return Err(AppError::transport("frame size must be greater than zero"));
    }
    if payload.len() <= frame_size {
        return Ok(vec![Frame::Whole {
            payload: payload.to_vec(),
        }]);
    }

    let total = payload.len().div_ceil(frame_size);
    if total > MAX_FRAGMENTS {
        return Err(AppError::transport(format!(
            "payload of {} bytes needs {total} frames, limit is {MAX_FRAGMENTS}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks(frame_size)
        .enumerate()
        .map(|(index, data)| Frame::Fragment {
            transfer_id: transfer_id.to_string(),
            index,
            total,
            data: data.to_vec(),
        })
        .collect())
}

/// Sending half: splits payloads and pushes frames into a sink.
pub struct ChunkedSender<S: FrameSink> {
    sink: S,
    frame_size: usize,
}

impl<S: FrameSink> ChunkedSender<S> {
    pub const fn new(sink: S, frame_size: usize) -> Self {
        Self { sink, frame_size }
    }

    /// Sends one payload, returning the number of frames written.
    ///
    /// # Errors
    /// Returns error if splitting fails or the sink rejects a frame.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize> {
        let frames = split(payload, self.frame_size)?;
        let count = frames.len();
        for frame in frames {
            self.sink.send_frame(frame)?;
        }
        tracing::debug!(bytes = payload.len(), frames = count, "Payload sent");
        Ok(count)
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

/// Reassembly state for one transfer id.
#[derive(Debug)]
struct TransferSession {
    slots: Vec<Option<Vec<u8>>>,
}

impl TransferSession {
    fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
        }
    }

    fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn assemble(self) -> Vec<u8> {
        self.slots.into_iter().flatten().flatten().collect()
    }
}

/// Receiving half: rebuilds payloads from frames in any order.
#[derive(Debug, Default)]
pub struct Reassembler {
    sessions: HashMap<String, TransferSession>,
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers that have started but not completed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sessions.len()
    }

    /// Takes one frame. Returns the full payload when this frame completes it.
    pub fn receive(&mut self, frame: Frame) -> Option<Vec<u8>> {
        let (transfer_id, index, total, data) = match frame {
            Frame::Whole { payload } => return Some(payload),
            Frame::Fragment {
                transfer_id,
                index,
                total,
                data,
            } => (transfer_id, index, total, data),
        };

        if index >= total {
            tracing::warn!(%transfer_id, index, total, "Fragment index out of range, dropped");
            return None;
        }
        if total > MAX_FRAGMENTS {
            tracing::warn!(%transfer_id, total, "Fragment claims too many frames, dropped");
            return None;
        }

        let session = self
            .sessions
            .entry(transfer_id.clone())
            .or_insert_with(|| TransferSession::new(total));

        if session.slots.len() != total {
            tracing::warn!(
                %transfer_id,
                expected = session.slots.len(),
                got = total,
                "Fragment disagrees on total, dropped"
            );
            return None;
        }

        session.slots[index] = Some(data);
        if !session.is_complete() {
            return None;
        }

        let payload = self.sessions.remove(&transfer_id)?.assemble();
        tracing::debug!(%transfer_id, bytes = payload.len(), "Transfer complete");
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_small_payload_is_not_fragmented() {
        let data = payload(10);
        let frames = split(&data, 10).unwrap();
        assert_eq!(frames, vec![Frame::Whole { payload: data.clone() }]);

        let mut rx = Reassembler::new();
        assert_eq!(rx.receive(frames[0].clone()), Some(data));
    }

    #[test]
    fn test_fragment_count_and_bounds() {
        let data = payload(25);
        let frames = split_with_id(&data, 10, "t").unwrap();
        assert_eq!(frames.len(), 3);
        let Frame::Fragment { index, total, data: last, .. } = &frames[2] else {
            panic!("expected fragment");
        };
        assert_eq!((*index, *total), (2, 3));
        assert_eq!(last.as_slice(), &data[20..25]);
    }

    #[test]
    fn test_reassembles_in_any_order() {
        let data = payload(47);
        let frames = split_with_id(&data, 10, "t").unwrap();
        let orders: [&[usize]; 4] = [
            &[0, 1, 2, 3, 4],
            &[4, 3, 2, 1, 0],
            &[2, 0, 4, 1, 3],
            &[1, 3, 0, 4, 2],
        ];

        for order in orders {
            let mut rx = Reassembler::new();
            let mut delivered = Vec::new();
            for &i in order {
                if let Some(p) = rx.receive(frames[i].clone()) {
                    delivered.push(p);
                }
            }
            assert_eq!(delivered, vec![data.clone()], "order {order:?}");
            assert_eq!(rx.pending(), 0);
        }
    }

    #[test]
    fn test_duplicates_overwrite_and_deliver_once() {
        let data = payload(30);
        let frames = split_with_id(&data, 10, "dup").unwrap();
        let mut rx = Reassembler::new();

        assert!(rx.receive(frames[0].clone()).is_none());
        assert!(rx.receive(frames[0].clone()).is_none());
        assert!(rx.receive(frames[2].clone()).is_none());
        assert_eq!(rx.receive(frames[1].clone()), Some(data));
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_missing_fragment_stalls() {
        let frames = split_with_id(&payload(30), 10, "stall").unwrap();
        let mut rx = Reassembler::new();
        assert!(rx.receive(frames[0].clone()).is_none());
        assert!(rx.receive(frames[2].clone()).is_none());
        assert_eq!(rx.pending(), 1);
    }

    #[test]
    fn test_interleaved_transfers_are_independent() {
        let a = payload(25);
        let b: Vec<u8> = payload(35).into_iter().rev().collect();
        let fa = split_with_id(&a, 10, "a").unwrap();
        let fb = split_with_id(&b, 10, "b").unwrap();

        let mut rx = Reassembler::new();
        let mut out = Vec::new();
        for frame in fb.iter().chain(fa.iter()).rev() {
            out.extend(rx.receive(frame.clone()));
        }
        assert_eq!(out.len(), 2);
        assert!(out.contains(&a));
        assert!(out.contains(&b));
    }

    #[test]
    fn test_inconsistent_fragments_are_dropped() {
        let mut rx = Reassembler::new();
        let frag = |index, total| Frame::Fragment {
            transfer_id: "x".into(),
            index,
            total,
            data: vec![1],
        };
        assert!(rx.receive(frag(5, 2)).is_none());
        assert_eq!(rx.pending(), 0);
        assert!(rx.receive(frag(0, 2)).is_none());
        assert!(rx.receive(frag(1, 3)).is_none());
        assert_eq!(rx.receive(frag(1, 2)), Some(vec![1, 1]));
    }

    #[test]
    fn test_oversized_total_is_dropped_without_allocating() {
        let mut rx = Reassembler::new();
        for total in [usize::MAX / 2, MAX_FRAGMENTS + 1] {
            let frame = Frame::Fragment {
                transfer_id: "huge".into(),
                index: 0,
                total,
                data: vec![1],
            };
            assert!(rx.receive(frame).is_none());
        }
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_split_refuses_too_many_fragments() {
        let data = payload(MAX_FRAGMENTS + 1);
        assert!(split(&data, 1).is_err());
    }

    #[test]
    fn test_zero_frame_size_is_rejected() {
        assert!(split(b"abc", 0).is_err());
    }

    #[test]
    fn test_sender_writes_frames_to_sink() {
        let mut sender = ChunkedSender::new(Vec::new(), 4);
        assert_eq!(sender.send(b"0123456789").unwrap(), 3);
        let frames = sender.into_inner();

        let json = serde_json::to_string(&frames[0]).unwrap();
        assert!(json.contains("\"kind\":\"fragment\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frames[0]);
    }

    #[test]
    fn test_transfer_ids_are_unique() {
        assert_ne!(next_transfer_id(), next_transfer_id());
    }
}
