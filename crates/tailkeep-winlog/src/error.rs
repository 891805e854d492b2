use thiserror::Error;

/// Error surfaced by an [`crate::provider::EventProvider`] implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Subscribing or opening a query failed because the event log service
    /// itself is unreachable (e.g. not yet started, access denied). Logged
    /// and treated as non-fatal: the reader retries later.
    #[error("event log provider unavailable")]
    Unavailable,

    /// The provider reports that the requested batch exceeds its RPC
    /// transport bound. Recoverable by halving the batch size and
    /// retrying, down to a floor of one record; at the floor it is fatal
    /// for that one record only.
    #[error("record batch exceeds the provider's RPC bound")]
    RecordTooLarge,

    /// Rendering a specific record to text failed.
    #[error("failed to render record {record_id}")]
    Render {
        record_id: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
