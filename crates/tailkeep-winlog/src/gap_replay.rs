use tailkeep_core::{invert_ranges, Range, RangeList};
use tailkeep_durability::StateManager;
use tokio::sync::oneshot;

use crate::config::GapReplayConfig;
use crate::error::ProviderError;
use crate::provider::{EventProvider, QueryHandle, RecordIdFilter, SubscriptionHandle};

/// Windows-event-log-specific startup catch-up engine.
///
/// On [`GapReplay::run`]: inverts the restored [`RangeList`] into gaps,
/// replays each finite gap through a one-shot query (backfilling offset
/// ranges the agent never persisted, e.g. because it crashed mid-batch),
/// then hands off to a live subscription polled on a fixed schedule. Every
/// delivered record's id is translated into a `[id - 1, id)` range and
/// pushed into `manager`, so the next restart sees exactly the same
/// progress a file tailer would have recorded.
pub struct GapReplay<P> {
    provider: P,
    channel: String,
    manager: StateManager,
    config: GapReplayConfig,
}

impl<P: EventProvider> GapReplay<P> {
    pub fn new(provider: P, channel: impl Into<String>, manager: StateManager, config: GapReplayConfig) -> Self {
        Self { provider, channel: channel.into(), manager, config }
    }

    /// Drive the full protocol: replay every finite gap in `restored`, then
    /// poll a live subscription until `stop` resolves.
    ///
    /// `deliver` is called once per record, in delivery order, with the
    /// record's id and rendered body.
    pub async fn run(
        mut self,
        restored: RangeList,
        mut deliver: impl FnMut(u64, &str) + Send,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut bookmark = restored.last().end;
        let mut subscription = self.open_subscription(bookmark);

        let mut gaps = invert_ranges(restored.as_slice());
        if gaps.last().is_some_and(Range::is_unbounded) {
            gaps.pop();
        }

        for gap in gaps {
            self.replay_gap(gap, &mut deliver).await;
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if subscription.is_none() {
                        subscription = self.open_subscription(bookmark);
                    }
                    if let Some(sub) = subscription.as_mut() {
                        bookmark = drain_subscription(sub.as_mut(), self.config.initial_batch_size, &self.manager, &mut deliver, bookmark);
                    }
                }
                _ = &mut stop => break,
            }
        }
    }

    fn open_subscription(&self, after: u64) -> Option<Box<dyn SubscriptionHandle>> {
        match self.provider.subscribe(&self.channel, after) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "event subscription unavailable, will retry");
                None
            }
        }
    }

    async fn replay_gap(&mut self, gap: Range, deliver: &mut impl FnMut(u64, &str)) {
        let filter = RecordIdFilter { gt: gap.start, le: gap.end };
        let handle = match self.provider.query(&self.channel, filter) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(channel = %self.channel, gap = ?gap, error = %e, "failed to open gap replay query");
                return;
            }
        };
        let mut handle = scopeguard::guard(handle, |h| h.close());

        let mut batch_size = self.config.initial_batch_size.max(1);
        loop {
            match handle.next_batch(batch_size) {
                Ok(ids) if ids.is_empty() => break,
                Ok(ids) => {
                    for id in ids {
                        let rendered = handle.render(id);
                        deliver_record(&self.manager, deliver, id, rendered);
                    }
                }
                Err(ProviderError::RecordTooLarge) => {
                    if batch_size <= 1 {
                        tracing::warn!(gap = ?gap, "record batch too large at minimum size, skipping one record");
                        if handle.skip_one().is_err() {
                            break;
                        }
                    } else {
                        batch_size = (batch_size / 2).max(1);
                    }
                }
                Err(e) => {
                    tracing::warn!(gap = ?gap, error = %e, "gap replay query failed");
                    break;
                }
            }
        }
    }
}

/// Poll `sub` until it reports no new records, returning the id of the last
/// one delivered (or `prev_bookmark` if nothing new arrived).
fn drain_subscription(
    sub: &mut dyn SubscriptionHandle,
    batch_size: usize,
    manager: &StateManager,
    deliver: &mut impl FnMut(u64, &str),
    prev_bookmark: u64,
) -> u64 {
    let mut bookmark = prev_bookmark;
    loop {
        match sub.poll_batch(batch_size.max(1)) {
            Ok(ids) if ids.is_empty() => break,
            Ok(ids) => {
                for id in ids {
                    let rendered = sub.render(id);
                    deliver_record(manager, deliver, id, rendered);
                    bookmark = bookmark.max(id);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "live subscription poll failed");
                break;
            }
        }
    }
    bookmark
}

fn deliver_record(manager: &StateManager, deliver: &mut impl FnMut(u64, &str), id: u64, rendered: Result<String, ProviderError>) {
    match rendered {
        Ok(body) => {
            deliver(id, &body);
            manager.enqueue(Range::new(id.saturating_sub(1), id));
        }
        Err(e) => tracing::warn!(record_id = id, error = %e, "failed to render record"),
    }
}
