use std::io;

use tailkeep_core::InvalidMaxOffset;
use thiserror::Error;

/// Error returned by [`crate::StateManager::restore`].
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The state file does not exist. Distinguished from other I/O failures
    /// so callers can proceed as if the source has never been seen.
    #[error("no state file at {path}")]
    NotFound { path: String },

    #[error("failed to read or write state file at {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Line 1 of the snapshot was not a valid `u64`. Unlike a malformed
    /// range list (line 3), this is not recoverable: the whole snapshot is
    /// rejected.
    #[error("state file at {path} has an invalid max offset")]
    InvalidMaxOffset {
        path: String,
        #[source]
        source: InvalidMaxOffset,
    },
}

impl ManagerError {
    pub fn path(&self) -> &str {
        match self {
            ManagerError::NotFound { path } => path,
            ManagerError::Io { path, .. } => path,
            ManagerError::InvalidMaxOffset { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::NotFound { .. })
    }
}

/// Re-exported so callers logging a restore failure can walk the full
/// cause chain without depending on `tailkeep-core` directly.
pub use tailkeep_core::source_chain;
