//! Per-source durable state management: a bounded producer queue feeding a
//! long-running actor that periodically snapshots a [`tailkeep_core::RangeTracker`]
//! to disk, detects truncation via `Range::seq`, and supports two terminal
//! dispositions (delete the snapshot, or perform a final save).

pub mod batcher;
pub mod config;
pub mod error;
pub mod manager;
mod path;

pub use batcher::RangeBatcher;
pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::{StateManager, StateManagerRunner, Stop, StopHandle};
pub use path::{escape, file_path};
