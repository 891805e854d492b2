//! Windows Event Log gap-replay catch-up engine.
//!
//! Wraps the Windows Event Log subscription API (`EvtSubscribe`) with a
//! startup phase that replays any gap between the last persisted record id
//! and the live tail, so a crash or restart never silently drops events.
//! [`provider::EventProvider`] decouples the protocol in [`gap_replay`] from
//! the real API: [`windows::WinEventProvider`] backs it with `windows-sys`
//! `Wevtapi` calls on Windows, [`mock::MockProvider`] backs it with an
//! in-memory log everywhere else (including in this crate's own tests).

pub mod config;
pub mod error;
pub mod gap_replay;
pub mod mock;
pub mod provider;

#[cfg(windows)]
pub mod windows;

pub use config::GapReplayConfig;
pub use error::ProviderError;
pub use gap_replay::GapReplay;
pub use mock::MockProvider;
pub use provider::{EventProvider, QueryHandle, RecordIdFilter, SubscriptionHandle};

#[cfg(windows)]
pub use windows::WinEventProvider;
