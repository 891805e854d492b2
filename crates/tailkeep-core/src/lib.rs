//! Disjoint-interval offset tracking with a backward-compatible textual
//! codec.
//!
//! [`Range`] is a half-open `[start, end)` interval with a truncation
//! sequence counter. [`RangeTracker`] merges observed ranges for a single
//! source into a minimal disjoint set, in either a single-offset-compatible
//! mode or a capacity-bounded multi-range mode. [`invert_ranges`] turns a
//! persisted set into the gaps a consumer still needs to replay.

pub mod error;
mod range;
mod tracker;

pub use error::{source_chain, InvalidContent, InvalidMaxOffset, InvalidRange};
pub use range::Range;
pub use tracker::{invert_ranges, RangeList, RangeTracker};
