use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ProviderError;
use crate::provider::{EventProvider, QueryHandle, RecordIdFilter, SubscriptionHandle};

/// An in-memory [`EventProvider`] used by tests and by non-Windows builds.
///
/// Records are seeded with [`MockProvider::seed`]; `set_rpc_bound` simulates
/// the provider's "batch too large" condition so [`crate::gap_replay::GapReplay`]'s
/// halving logic can be exercised deterministically.
#[derive(Clone)]
pub struct MockProvider {
    log: Arc<Mutex<BTreeMap<u64, String>>>,
    rpc_bound: Arc<AtomicUsize>,
    subscribe_unavailable: Arc<AtomicBool>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(BTreeMap::new())),
            rpc_bound: Arc::new(AtomicUsize::new(usize::MAX)),
            subscribe_unavailable: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record the provider will yield once its id falls inside a
    /// query or subscription's range.
    pub fn seed(&self, id: u64, body: impl Into<String>) {
        self.log.lock().unwrap().insert(id, body.into());
    }

    /// Cap batch sizes at `bound`; requests above it fail with
    /// `RecordTooLarge` until the caller halves down to it.
    pub fn set_rpc_bound(&self, bound: usize) {
        self.rpc_bound.store(bound, Ordering::SeqCst);
    }

    pub fn set_subscribe_unavailable(&self, unavailable: bool) {
        self.subscribe_unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl EventProvider for MockProvider {
    fn query(&self, _channel: &str, filter: RecordIdFilter) -> Result<Box<dyn QueryHandle>, ProviderError> {
        Ok(Box::new(MockHandle {
            log: self.log.clone(),
            rpc_bound: self.rpc_bound.clone(),
            cursor: filter.gt,
            le: filter.le,
        }))
    }

    fn subscribe(&self, _channel: &str, after: u64) -> Result<Box<dyn SubscriptionHandle>, ProviderError> {
        if self.subscribe_unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable);
        }
        Ok(Box::new(MockHandle {
            log: self.log.clone(),
            rpc_bound: self.rpc_bound.clone(),
            cursor: after,
            le: u64::MAX,
        }))
    }
}

/// Backs both [`QueryHandle`] and [`SubscriptionHandle`]: a query is simply
/// a subscription bounded above by `le`.
struct MockHandle {
    log: Arc<Mutex<BTreeMap<u64, String>>>,
    rpc_bound: Arc<AtomicUsize>,
    cursor: u64,
    le: u64,
}

impl MockHandle {
    fn next(&mut self, max: usize) -> Result<Vec<u64>, ProviderError> {
        let bound = self.rpc_bound.load(Ordering::SeqCst);
        if max > bound {
            return Err(ProviderError::RecordTooLarge);
        }
        let log = self.log.lock().unwrap();
        let ids: Vec<u64> = log
            .range(self.cursor.saturating_add(1)..=self.le)
            .take(max)
            .map(|(&id, _)| id)
            .collect();
        if let Some(&last) = ids.last() {
            self.cursor = last;
        }
        Ok(ids)
    }

    fn render_one(&mut self, id: u64) -> Result<String, ProviderError> {
        self.log.lock().unwrap().get(&id).cloned().ok_or_else(|| ProviderError::Render {
            record_id: id,
            source: format!("no such record {id}").into(),
        })
    }
}

impl QueryHandle for MockHandle {
    fn next_batch(&mut self, max: usize) -> Result<Vec<u64>, ProviderError> {
        self.next(max)
    }

    fn render(&mut self, id: u64) -> Result<String, ProviderError> {
        self.render_one(id)
    }

    fn skip_one(&mut self) -> Result<(), ProviderError> {
        let log = self.log.lock().unwrap();
        match log.range(self.cursor.saturating_add(1)..=self.le).next() {
            Some((&id, _)) => {
                self.cursor = id;
                Ok(())
            }
            None => Err(ProviderError::RecordTooLarge),
        }
    }
}

impl SubscriptionHandle for MockHandle {
    fn poll_batch(&mut self, max: usize) -> Result<Vec<u64>, ProviderError> {
        self.next(max)
    }

    fn render(&mut self, id: u64) -> Result<String, ProviderError> {
        self.render_one(id)
    }
}
