//! Periodic checkpointing of the shared aggregate to a durable store.
//!
//! The stream consumer and the coordinator talk over two one-way channels
//! carrying [`CheckpointMessage`]s. Both ends poll without blocking:
//!
//! - the consumer sends `New` at most once until it sees `Saved`;
//! - the coordinator, on each timer tick, drains `New`s, writes a full
//!   snapshot if one is pending, and answers `Saved` only when every locus
//!   was written. A failed write leaves the request pending for the next tick.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{encode_locus, DurableStore, SharedLoci, StoreError};

/// Messages exchanged between the stream consumer and the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMessage {
    /// Consumer -> coordinator: unsaved updates exist.
    New,
    /// Coordinator -> consumer: a snapshot has been written.
    Saved,
}

/// Create the connected pair of link endpoints.
pub fn checkpoint_channel() -> (DriverLink, CoordinatorLink) {
    let (to_coordinator, from_driver) = unbounded();
    let (to_driver, from_coordinator) = unbounded();
    (
        DriverLink {
            tx: to_coordinator,
            rx: from_coordinator,
            notified: false,
        },
        CoordinatorLink {
            tx: to_driver,
            rx: from_driver,
        },
    )
}

/// Consumer side of the checkpoint link.
#[derive(Debug)]
pub struct DriverLink {
    tx: Sender<CheckpointMessage>,
    rx: Receiver<CheckpointMessage>,
    notified: bool,
}

impl DriverLink {
    /// Consume any pending acknowledgements. Returns `true` if one arrived,
    /// in which case the next [`DriverLink::notify`] will send again.
    pub fn poll_ack(&mut self) -> bool {
        let mut acknowledged = false;
        while let Ok(message) = self.rx.try_recv() {
            if message == CheckpointMessage::Saved {
                acknowledged = true;
            }
        }
        if acknowledged {
            self.notified = false;
        }
        acknowledged
    }

    /// Send `New` unless one is already outstanding. Returns whether a
    /// message was sent.
    pub fn notify(&mut self) -> bool {
        if self.notified {
            return false;
        }
        match self.tx.send(CheckpointMessage::New) {
            Ok(()) => {
                self.notified = true;
                true
            }
            Err(_) => {
                warn!("checkpoint coordinator is gone; new data will not be checkpointed");
                false
            }
        }
    }

    /// Whether a `New` is outstanding.
    pub fn is_notified(&self) -> bool {
        self.notified
    }
}

/// Coordinator side of the checkpoint link.
#[derive(Debug)]
pub struct CoordinatorLink {
    tx: Sender<CheckpointMessage>,
    rx: Receiver<CheckpointMessage>,
}

impl CoordinatorLink {
    fn poll_new(&self) -> bool {
        let mut new_data = false;
        while let Ok(message) = self.rx.try_recv() {
            if message == CheckpointMessage::New {
                new_data = true;
            }
        }
        new_data
    }

    fn acknowledge(&self) -> bool {
        self.tx.send(CheckpointMessage::Saved).is_ok()
    }
}

/// Coordinator state between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    /// No unsaved data has been reported.
    Idle,
    /// New data was reported and has not been saved yet.
    Pending,
}

/// Result of one coordinator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// A full snapshot was written and acknowledged.
    Saved {
        /// Loci written.
        loci: usize,
        /// Time spent snapshotting and writing.
        elapsed: Duration,
    },
    /// Nothing was pending; the run did nothing.
    NothingPending,
}

/// Errors from checkpoint runs.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Writing the snapshot failed; the request stays pending.
    #[error("checkpoint of {loci} loci failed: {source}")]
    Store {
        /// Size of the snapshot being written.
        loci: usize,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The coordinator thread could not be started.
    #[error("failed to start checkpoint thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The coordinator thread panicked.
    #[error("checkpoint thread panicked")]
    WorkerPanicked,
}

/// Run counters kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Runs that wrote a snapshot.
    pub saved: u64,
    /// Runs with nothing pending.
    pub skipped: u64,
    /// Runs whose write failed.
    pub failed: u64,
}

/// Writes snapshots of [`SharedLoci`] to a [`DurableStore`] when the stream
/// consumer reports new data.
#[derive(Debug)]
pub struct CheckpointCoordinator<S> {
    shared: SharedLoci,
    store: S,
    link: CoordinatorLink,
    state: CheckpointState,
    stats: CheckpointStats,
}

impl<S: DurableStore> CheckpointCoordinator<S> {
    /// Create an idle coordinator.
    pub fn new(shared: SharedLoci, store: S, link: CoordinatorLink) -> Self {
        Self {
            shared,
            store,
            link,
            state: CheckpointState::Idle,
            stats: CheckpointStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CheckpointState {
        self.state
    }

    /// Run counters.
    pub fn stats(&self) -> CheckpointStats {
        self.stats
    }

    /// Borrow the durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the durable store back.
    pub fn into_store(self) -> S {
        self.store
    }

    /// One timer-driven invocation.
    pub fn run_once(&mut self) -> Result<CheckpointOutcome, CheckpointError> {
        if self.link.poll_new() {
            self.state = CheckpointState::Pending;
        }
        if self.state == CheckpointState::Idle {
            self.stats.skipped += 1;
            debug!("no new data reported; skipping checkpoint");
            return Ok(CheckpointOutcome::NothingPending);
        }

        let started = Instant::now();
        let snapshot = self.shared.snapshot();
        let loci = snapshot.len();
        info!(loci, "starting checkpoint");

        let written = snapshot
            .iter()
            .map(|locus| Ok((locus.key(), encode_locus(locus)?)))
            .collect::<Result<Vec<_>, StoreError>>()
            .and_then(|entries| self.store.set_many(&entries));
        if let Err(source) = written {
            self.stats.failed += 1;
            warn!(loci, error = %source, "checkpoint failed; will retry on next run");
            return Err(CheckpointError::Store { loci, source });
        }

        self.state = CheckpointState::Idle;
        self.stats.saved += 1;
        if !self.link.acknowledge() {
            debug!("stream consumer is gone; acknowledgement dropped");
        }
        let elapsed = started.elapsed();
        info!(loci, ?elapsed, "checkpoint saved");
        Ok(CheckpointOutcome::Saved { loci, elapsed })
    }

    /// Write a snapshot now, whether or not new data was reported.
    pub fn checkpoint_now(&mut self) -> Result<CheckpointOutcome, CheckpointError> {
        self.link.poll_new();
        self.state = CheckpointState::Pending;
        self.run_once()
    }
}

impl<S: DurableStore + Send + 'static> CheckpointCoordinator<S> {
    /// Move the coordinator onto its own thread and invoke it every
    /// `interval`. Runs never overlap; ticks missed during a slow run are
    /// dropped rather than queued.
    pub fn spawn(self, interval: Duration) -> Result<CheckpointHandle<S>, CheckpointError> {
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let thread = thread::Builder::new()
            .name("checkpoint".to_string())
            .spawn(move || {
                let mut coordinator = self;
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            // Failures are logged by run_once and retried next tick.
                            let _ = coordinator.run_once();
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                let last = coordinator.checkpoint_now();
                (coordinator, last)
            })?;

        Ok(CheckpointHandle {
            shutdown: shutdown_tx,
            thread,
        })
    }
}

/// Handle to a coordinator running on its own thread.
#[derive(Debug)]
pub struct CheckpointHandle<S> {
    shutdown: Sender<()>,
    thread: JoinHandle<(CheckpointCoordinator<S>, Result<CheckpointOutcome, CheckpointError>)>,
}

impl<S> CheckpointHandle<S> {
    /// Stop the timer, write a final snapshot and return the coordinator
    /// together with the outcome of that last run.
    pub fn shutdown(
        self,
    ) -> Result<(CheckpointCoordinator<S>, Result<CheckpointOutcome, CheckpointError>), CheckpointError>
    {
        let _ = self.shutdown.send(());
        self.thread.join().map_err(|_| CheckpointError::WorkerPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{GenotypePriors, Locus};
    use crate::store::{load_locus, MemoryStore};
    use rustc_hash::FxHashMap;

    /// Store whose writes fail until switched on.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail: bool,
    }

    impl DurableStore for FlakyStore {
        fn get(&self, key: u64) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.set(key, value)
        }
    }

    fn seeded_shared(keys: &[u64]) -> SharedLoci {
        let shared = SharedLoci::new();
        let mut batch: FxHashMap<u64, Locus> = keys
            .iter()
            .map(|&key| (key, Locus::new(key, b'A', &GenotypePriors::default())))
            .collect();
        shared.merge(&mut batch);
        shared
    }

    #[test]
    fn idle_run_is_a_no_op() {
        let (_driver, coordinator_link) = checkpoint_channel();
        let store = MemoryStore::new();
        let mut coordinator =
            CheckpointCoordinator::new(seeded_shared(&[1]), store.clone(), coordinator_link);

        assert_eq!(coordinator.run_once().unwrap(), CheckpointOutcome::NothingPending);
        assert!(store.is_empty());
        assert_eq!(coordinator.stats().skipped, 1);
    }

    #[test]
    fn notification_triggers_snapshot_and_ack() {
        let (mut driver, coordinator_link) = checkpoint_channel();
        let store = MemoryStore::new();
        let mut coordinator =
            CheckpointCoordinator::new(seeded_shared(&[1, 5]), store.clone(), coordinator_link);

        assert!(driver.notify());
        assert!(!driver.notify(), "second notify must be debounced");

        match coordinator.run_once().unwrap() {
            CheckpointOutcome::Saved { loci, .. } => assert_eq!(loci, 2),
            other => panic!("expected save, got {other:?}"),
        }
        assert_eq!(coordinator.state(), CheckpointState::Idle);
        assert_eq!(store.keys(), vec![1, 5]);
        assert_eq!(load_locus(&store, 5).unwrap().unwrap().position, 6);

        assert!(driver.poll_ack());
        assert!(!driver.is_notified());
        assert!(driver.notify());
    }

    #[test]
    fn failed_write_keeps_request_pending() {
        let (mut driver, coordinator_link) = checkpoint_channel();
        let store = FlakyStore {
            fail: true,
            ..FlakyStore::default()
        };
        let mut coordinator =
            CheckpointCoordinator::new(seeded_shared(&[3]), store, coordinator_link);

        driver.notify();
        assert!(matches!(
            coordinator.run_once(),
            Err(CheckpointError::Store { loci: 1, .. })
        ));
        assert_eq!(coordinator.state(), CheckpointState::Pending);
        assert!(!driver.poll_ack(), "no acknowledgement after a failed write");

        coordinator.store.fail = false;
        assert!(matches!(
            coordinator.run_once().unwrap(),
            CheckpointOutcome::Saved { loci: 1, .. }
        ));
        assert!(driver.poll_ack());
        assert_eq!(coordinator.stats().failed, 1);
        assert_eq!(coordinator.stats().saved, 1);
    }

    #[test]
    fn spawned_coordinator_writes_final_snapshot_on_shutdown() {
        let (_driver, coordinator_link) = checkpoint_channel();
        let store = MemoryStore::new();
        let coordinator =
            CheckpointCoordinator::new(seeded_shared(&[2, 4, 8]), store.clone(), coordinator_link);

        let handle = coordinator.spawn(Duration::from_secs(3600)).unwrap();
        let (coordinator, last) = handle.shutdown().unwrap();
        assert!(matches!(last.unwrap(), CheckpointOutcome::Saved { loci: 3, .. }));
        assert_eq!(coordinator.state(), CheckpointState::Idle);
        assert_eq!(store.keys(), vec![2, 4, 8]);
    }
}
