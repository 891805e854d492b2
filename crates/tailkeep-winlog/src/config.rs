use std::time::Duration;

/// Tuning knobs for [`crate::gap_replay::GapReplay`].
#[derive(Debug, Clone, Copy)]
pub struct GapReplayConfig {
    /// Starting batch size for gap-replay queries and live-subscription
    /// polls. Halved (floor 1) whenever the provider reports a batch too
    /// large for its RPC bound.
    ///
    /// Default: 512.
    pub initial_batch_size: usize,
    /// How often the live subscription is polled once gap replay has
    /// drained.
    ///
    /// Default: 1s.
    pub poll_interval: Duration,
}

impl Default for GapReplayConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 512,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl GapReplayConfig {
    pub fn with_initial_batch_size(mut self, size: usize) -> Self {
        self.initial_batch_size = size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
