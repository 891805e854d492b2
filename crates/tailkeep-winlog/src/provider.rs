use crate::error::ProviderError;

/// A half-open filter on `RecordId`, mirroring the gap's own shape:
/// `RecordId > gt AND RecordId <= le`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIdFilter {
    pub gt: u64,
    pub le: u64,
}

/// Abstracts the Windows Event Log API so [`crate::gap_replay::GapReplay`]'s
/// protocol logic is portable and unit-testable without a real event
/// channel. A `#[cfg(windows)]` implementation backs this with `windows-sys`
/// `Wevtapi` calls; [`crate::mock::MockProvider`] backs it with an in-memory
/// log, available on every platform.
pub trait EventProvider: Send + Sync {
    /// Open a one-shot query over `channel` filtered by `filter`.
    fn query(&self, channel: &str, filter: RecordIdFilter) -> Result<Box<dyn QueryHandle>, ProviderError>;

    /// Subscribe for records delivered to `channel` after `after`. Returns
    /// `Err(ProviderError::Unavailable)` if the channel cannot be opened;
    /// callers are expected to retry on a later tick rather than treat this
    /// as fatal.
    fn subscribe(&self, channel: &str, after: u64) -> Result<Box<dyn SubscriptionHandle>, ProviderError>;
}

/// A one-shot catch-up query, iterated in batches of record ids.
pub trait QueryHandle: Send {
    /// Pull up to `max` record ids. An empty result means the query is
    /// exhausted. `Err(ProviderError::RecordTooLarge)` means the caller
    /// should halve `max` and retry the same call.
    fn next_batch(&mut self, max: usize) -> Result<Vec<u64>, ProviderError>;

    /// Render a record previously yielded by [`Self::next_batch`] to text.
    fn render(&mut self, id: u64) -> Result<String, ProviderError>;

    /// Advance past the next record without yielding it, used when a batch
    /// of size one still reports `RecordTooLarge` and that one record must
    /// be abandoned. Returns `Err` if there is no next record to skip.
    fn skip_one(&mut self) -> Result<(), ProviderError>;

    /// Release provider-side resources. Default no-op for providers with
    /// no explicit handle to close (e.g. an in-memory mock).
    fn close(self: Box<Self>) {}
}

/// A live subscription, polled on a fixed schedule after gap replay
/// completes.
pub trait SubscriptionHandle: Send {
    /// Pull up to `max` newly-arrived record ids. An empty result means
    /// nothing new has arrived since the last poll.
    fn poll_batch(&mut self, max: usize) -> Result<Vec<u64>, ProviderError>;

    /// Render a record previously yielded by [`Self::poll_batch`] to text.
    fn render(&mut self, id: u64) -> Result<String, ProviderError>;
}
