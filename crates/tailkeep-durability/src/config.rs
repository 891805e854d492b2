use std::time::Duration;

/// Per-source configuration for a [`crate::StateManager`].
///
/// Mirrors `commitlog::Options` in shape: a plain, `Clone + Debug` struct
/// with public fields and a documented `Default`, plus `with_*` builder
/// setters for ergonomic construction at call sites.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Logical source identifier. Embedded in the snapshot (line 2) and
    /// used to derive the state file name.
    pub name: String,
    /// Directory in which to write the snapshot. Persistence is disabled
    /// entirely when this is empty.
    pub state_dir: String,
    /// Filename prefix prepended to the escaped `name`.
    pub state_prefix: String,
    /// Bounded producer -> consumer queue capacity.
    ///
    /// Default: 2000. Values `<= 0` fall back to the default.
    pub queue_size: i64,
    /// Snapshot cadence.
    ///
    /// Default: 100ms. A zero or negative duration falls back to the
    /// default.
    pub save_interval: Duration,
    /// Capacity passed to the underlying `RangeTracker`.
    ///
    /// `0` (the default) means unbounded; `1` selects single-offset mode.
    pub max_persist_items: i64,
}

pub const DEFAULT_QUEUE_SIZE: i64 = 2000;
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_millis(100);

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            state_dir: String::new(),
            state_prefix: String::new(),
            queue_size: DEFAULT_QUEUE_SIZE,
            save_interval: DEFAULT_SAVE_INTERVAL,
            max_persist_items: 0,
        }
    }
}

impl ManagerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_state_dir(mut self, dir: impl Into<String>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_state_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.state_prefix = prefix.into();
        self
    }

    pub fn with_queue_size(mut self, queue_size: i64) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_save_interval(mut self, save_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self
    }

    pub fn with_max_persist_items(mut self, max_persist_items: i64) -> Self {
        self.max_persist_items = max_persist_items;
        self
    }

    /// Resolved queue capacity: `queue_size` if positive, else the default.
    pub(crate) fn resolved_queue_size(&self) -> usize {
        if self.queue_size > 0 {
            self.queue_size as usize
        } else {
            DEFAULT_QUEUE_SIZE as usize
        }
    }

    /// Resolved snapshot cadence: `save_interval` if non-zero, else the
    /// default.
    pub(crate) fn resolved_save_interval(&self) -> Duration {
        if self.save_interval.is_zero() {
            DEFAULT_SAVE_INTERVAL
        } else {
            self.save_interval
        }
    }

    /// The path snapshots are written to, or `None` when persistence is
    /// disabled (`state_dir` empty).
    pub fn state_path(&self) -> Option<std::path::PathBuf> {
        crate::path::file_path(&self.state_dir, &format!("{}{}", self.state_prefix, self.name))
    }
}
