use thiserror::Error;

/// Error returned when decoding the textual form of a [`crate::Range`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidRange {
    #[error("range {0:?} is not of the form \"start-end\" or \"start-\"")]
    Malformed(String),
    #[error("range {0:?} contains a non-numeric offset")]
    NotANumber(String),
    #[error("range start={start} is not smaller than end={end}")]
    StartNotBeforeEnd { start: u64, end: u64 },
}

/// Error returned when decoding line 1 (`max_offset`) of a [`crate::RangeTracker`]
/// snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("max offset {0:?} is not a non-negative decimal integer")]
pub struct InvalidMaxOffset(pub String);

/// Error returned when decoding line 3 (the range list) of a snapshot.
///
/// Callers of [`crate::RangeTracker::unmarshal_text`] never see this
/// directly: a bad line 3 is recovered from by seeding `[0, max_offset)`.
/// It exists so the recovery can still be logged with its cause.
#[derive(Debug, Error)]
#[error("range list {content:?} could not be parsed: {source}")]
pub struct InvalidContent {
    pub content: String,
    #[source]
    pub source: InvalidRange,
}

/// Walk an error's `source()` chain, formatting each link.
///
/// Used to give warn-level log lines the full causal chain instead of just
/// the top-level message.
pub fn source_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(source) = cur {
        out.push_str(": ");
        out.push_str(&source.to_string());
        cur = source.source();
    }
    out
}
