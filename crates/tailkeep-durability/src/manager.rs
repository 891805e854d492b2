use std::fs;
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tailkeep_core::{source_chain, Range, RangeList, RangeTracker};
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument as _;

use crate::config::ManagerConfig;
use crate::error::ManagerError;

/// The producer-facing handle for a source's positional state.
///
/// Cheap to clone: every clone shares the same bounded queue and replace
/// slot with the [`StateManagerRunner`] that was created alongside it.
#[derive(Clone)]
pub struct StateManager {
    config: Arc<ManagerConfig>,
    queue_tx: async_channel::Sender<Range>,
    queue_rx: async_channel::Receiver<Range>,
    replace_tx: mpsc::Sender<RangeTracker>,
}

/// The actor side of a [`StateManager`]: owns the consuming ends of the
/// queue and replace slot, and is consumed by [`StateManagerRunner::run`].
///
/// Split out from [`StateManager`] the way `SchedulerStarter` is split from
/// `Scheduler`: a handle that many callers can clone and use concurrently,
/// and a one-shot runner that is handed off to the task that drives it.
pub struct StateManagerRunner {
    config: Arc<ManagerConfig>,
    queue_rx: async_channel::Receiver<Range>,
    replace_rx: mpsc::Receiver<RangeTracker>,
}

impl StateManager {
    /// Construct a manager/runner pair for `config`. The runner must be
    /// handed to exactly one [`StateManagerRunner::run`] invocation.
    pub fn new(config: ManagerConfig) -> (StateManager, StateManagerRunner) {
        let (queue_tx, queue_rx) = async_channel::bounded(config.resolved_queue_size());
        let (replace_tx, replace_rx) = mpsc::channel(1);
        let config = Arc::new(config);

        let manager = StateManager {
            config: config.clone(),
            queue_tx,
            queue_rx: queue_rx.clone(),
            replace_tx,
        };
        let runner = StateManagerRunner { config, queue_rx, replace_rx };
        (manager, runner)
    }

    pub fn id(&self) -> &str {
        &self.config.name
    }

    /// Merge `r` into the running actor's tracker, non-blocking.
    ///
    /// If the bounded queue is full, the oldest pending item is dropped to
    /// make room (lossy oldest-first overflow policy).
    pub fn enqueue(&self, r: Range) {
        let mut pending = r;
        loop {
            match self.queue_tx.try_send(pending) {
                Ok(()) => return,
                Err(async_channel::TrySendError::Full(back)) => {
                    pending = back;
                    if self.queue_rx.try_recv().is_ok() {
                        tracing::debug!(name = %self.config.name, "state queue full, dropping oldest item");
                    }
                }
                Err(async_channel::TrySendError::Closed(_)) => return,
            }
        }
    }

    /// Read the persisted snapshot (if any) and hand a freshly-built
    /// tracker to the running actor via the single-slot replace channel.
    ///
    /// Returns the restored [`RangeList`] regardless of whether an actor is
    /// currently running to receive it. Call this once, before `run` starts
    /// consuming the replace slot's effect.
    pub fn restore(&self) -> Result<RangeList, ManagerError> {
        let Some(path) = self.config.state_path() else {
            return Ok(RangeList::default());
        };
        let path_str = path.display().to_string();

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path_str, "no existing state file");
                return Err(ManagerError::NotFound { path: path_str });
            }
            Err(source) => return Err(ManagerError::Io { path: path_str, source }),
        };

        let mut tracker = RangeTracker::new(self.config.max_persist_items);
        tracker
            .unmarshal_text(&text)
            .map_err(|source| ManagerError::InvalidMaxOffset { path: path_str, source })?;

        let ranges = tracker.ranges();
        let _ = self.replace_tx.try_send(tracker);
        Ok(ranges)
    }
}

/// One-shot stop signal for a running [`StateManagerRunner`].
///
/// `delete` removes the state file before exiting; `done` performs a final
/// snapshot. Whichever fires first wins: firing one leaves the other
/// channel's sender alive (but never sent on) for as long as this handle is
/// held, so the loser's receiver does not spuriously resolve mid-run.
pub struct StopHandle {
    delete: Mutex<Option<oneshot::Sender<()>>>,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

pub struct Stop {
    delete: oneshot::Receiver<()>,
    done: oneshot::Receiver<()>,
}

impl StopHandle {
    pub fn channel() -> (Arc<StopHandle>, Stop) {
        let (delete_tx, delete_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        (
            Arc::new(StopHandle {
                delete: Mutex::new(Some(delete_tx)),
                done: Mutex::new(Some(done_tx)),
            }),
            Stop { delete: delete_rx, done: done_rx },
        )
    }

    /// Request that the state file be removed, then the actor exit.
    pub fn delete(&self) {
        if let Some(tx) = self.delete.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Request a final snapshot, then the actor exit.
    pub fn done(&self) {
        if let Some(tx) = self.done.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

impl StateManagerRunner {
    /// Drive the actor loop until a stop signal fires.
    ///
    /// Selects, on every iteration, over: a replace-tracker hand-off, a
    /// queue item, the periodic save tick, and the two stop signals.
    pub async fn run(self, stop: Stop) {
        let name = self.config.name.clone();
        let span = tracing::info_span!("state_manager", name = %name);
        self.run_loop(stop).instrument(span).await
    }

    async fn run_loop(self, stop: Stop) {
        let StateManagerRunner { config, queue_rx, mut replace_rx } = self;
        let Stop { mut delete, mut done } = stop;

        let mut tracker = RangeTracker::new(config.max_persist_items);
        let mut last_seq = 0u64;
        let mut dirty = false;

        let mut tick = tokio::time::interval(config.resolved_save_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the first tick fires immediately; consume it up front

        let mut queue_closed = false;
        let mut replace_closed = false;
        let mut delete_closed = false;
        let mut done_closed = false;

        tracing::info!("state manager started");

        loop {
            tokio::select! {
                new_tracker = replace_rx.recv(), if !replace_closed => {
                    match new_tracker {
                        Some(t) => tracker = t,
                        None => replace_closed = true,
                    }
                }
                item = queue_rx.recv(), if !queue_closed => {
                    match item {
                        Ok(r) => {
                            if r.seq > last_seq {
                                last_seq = r.seq;
                                tracker.clear();
                            }
                            if tracker.insert(r) {
                                dirty = true;
                            }
                        }
                        Err(_) => queue_closed = true,
                    }
                }
                _ = tick.tick() => {
                    if dirty {
                        match write_snapshot(&config, &tracker) {
                            Ok(()) => dirty = false,
                            Err(e) => tracing::warn!(error = %source_chain(&e), "failed to write state snapshot"),
                        }
                    }
                }
                res = &mut delete, if !delete_closed => {
                    match res {
                        Ok(()) => {
                            if let Err(e) = delete_snapshot(&config) {
                                tracing::warn!(error = %source_chain(&e), "failed to delete state file");
                            }
                            tracing::info!("state manager exiting (delete)");
                            break;
                        }
                        Err(_) => delete_closed = true,
                    }
                }
                res = &mut done, if !done_closed => {
                    match res {
                        Ok(()) => {
                            if let Err(e) = write_snapshot(&config, &tracker) {
                                tracing::warn!(error = %source_chain(&e), "failed final state snapshot");
                            }
                            tracing::info!("state manager exiting (done)");
                            break;
                        }
                        Err(_) => done_closed = true,
                    }
                }
            }

            if delete_closed && done_closed {
                tracing::warn!("stop handle dropped without signaling; saving final snapshot");
                if let Err(e) = write_snapshot(&config, &tracker) {
                    tracing::warn!(error = %source_chain(&e), "failed final state snapshot");
                }
                break;
            }
        }
    }
}

fn write_snapshot(config: &ManagerConfig, tracker: &RangeTracker) -> io::Result<()> {
    let Some(path) = config.state_path() else {
        return Ok(());
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    set_permissions(dir, 0o755)?;

    let text = tracker.marshal_text(&config.name);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;
    #[cfg(unix)]
    set_permissions(tmp.path(), 0o644)?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

fn delete_snapshot(config: &ManagerConfig) -> io::Result<()> {
    let Some(path) = config.state_path() else {
        return Ok(());
    };
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tailkeep_core::Range;
    use tempfile::tempdir;

    use super::*;
    use crate::ManagerConfig;

    fn config_in(dir: &Path, name: &str) -> ManagerConfig {
        ManagerConfig::new(name).with_state_dir(dir.to_string_lossy().into_owned())
    }

    #[tokio::test(start_paused = true)]
    async fn s1_adjacent_enqueues_merge() {
        let dir = tempdir().unwrap();
        let (manager, runner) = StateManager::new(config_in(dir.path(), "s1"));
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        manager.enqueue(Range::new(0, 100));
        manager.enqueue(Range::new(100, 200));
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.done();
        task.await.unwrap();

        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(0, 200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn s2_out_of_order_enqueues_merge() {
        let dir = tempdir().unwrap();
        let (manager, runner) = StateManager::new(config_in(dir.path(), "s2"));
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        manager.enqueue(Range::new(0, 5));
        manager.enqueue(Range::new(20, 30));
        manager.enqueue(Range::new(5, 20));
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.done();
        task.await.unwrap();

        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(0, 30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn s3_truncation_shift_collapses_tracker() {
        let dir = tempdir().unwrap();
        let (manager, runner) = StateManager::new(config_in(dir.path(), "s3"));
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        let mut r = Range::default();
        r.shift(5);
        manager.enqueue(r);
        r.shift(3);
        manager.enqueue(r);
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.done();
        task.await.unwrap();

        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(0, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn s4_single_mode_rolls_up() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), "s4").with_max_persist_items(1);
        let (manager, runner) = StateManager::new(config);
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        manager.enqueue(Range::new(0, 5));
        manager.enqueue(Range::new(20, 30));
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.done();
        task.await.unwrap();

        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(0, 30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_oldest_queued_items() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), "overflow").with_queue_size(10);
        let (manager, runner) = StateManager::new(config);

        // No `.await` between these calls: the runner task cannot be
        // scheduled until this loop yields, so all 21 enqueues race against
        // a queue of capacity 10 with nothing draining it yet.
        for i in 0..21u64 {
            manager.enqueue(Range::new(i, i + 1));
        }

        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.done();
        task.await.unwrap();

        // Capacity-10 FIFO eviction always keeps exactly the last 10 items
        // enqueued: i = 11..=20, which merge into one contiguous range.
        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(11, 21)]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_save_on_done_even_with_long_interval() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), "final").with_save_interval(Duration::from_secs(3600));
        let (manager, runner) = StateManager::new(config);
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        manager.enqueue(Range::new(100, 200));
        tokio::time::advance(Duration::from_millis(1)).await;

        stop.done();
        task.await.unwrap();

        let restored = manager.restore().unwrap();
        pretty_assertions::assert_eq!(restored.as_slice(), &[Range::new(100, 200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_removes_state_file() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path(), "deleteme");
        let (manager, runner) = StateManager::new(config.clone());
        let (stop, stop_rx) = StopHandle::channel();
        let task = tokio::spawn(runner.run(stop_rx));

        manager.enqueue(Range::new(0, 50));
        tokio::time::advance(Duration::from_millis(150)).await;

        stop.delete();
        task.await.unwrap();

        assert!(!config.state_path().unwrap().exists());
        assert!(matches!(manager.restore(), Err(ManagerError::NotFound { .. })));
    }

    #[test]
    fn persistence_disabled_when_dir_empty() {
        let config = ManagerConfig::new("nodir");
        assert_eq!(config.state_path(), None);
    }
}
