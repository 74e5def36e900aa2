//! Infrastructure layer - external adapters (database, filesystem).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod capture;
pub mod config;
pub mod frame_file;
pub mod local_store;

pub use capture::{read_capture, read_dom_snapshot, ReplayDomDriver};
pub use config::{ensure_config_exists, load_config, render_config};
pub use frame_file::{read_frames, FrameFileWriter};
pub use local_store::LocalStore;
