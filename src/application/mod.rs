//! Application layer - the capture pipeline.
//!
//! Interception and decoding on one side, the event bridge in the middle,
//! and on the other side the consumer, library scans and chunked transport.

pub mod bridge;
pub mod consumer;
pub mod decoder;
pub mod formatter;
pub mod interceptor;
pub mod scan;
pub mod transport;
pub mod wire;

pub use bridge::{channel, BridgeListener};
pub use consumer::{
    import_frames, ApplyStats, CollectingHandler, RecordHandler, RecordStore, StoreApplier,
    APPLIED_KINDS,
};
pub use decoder::{decode_exchange, EndpointCategory};
pub use formatter::{
    format_json, format_merged_table, format_records_markdown, format_records_table,
    format_replay_stats, format_stored_table, OutputFormat,
};
pub use interceptor::{InterceptStats, Interceptor, Notifier};
pub use scan::{run_scan, DomDriver};
pub use transport::{ChunkedSender, Frame, FrameSink};
