use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::{load_locus, store_locus, DurableStore, LocusSink, StoreError};
use crate::genomics::{Evidence, GenotypePriors, Locus};

/// In-memory position -> locus map shared between the stream consumer and
/// the checkpoint coordinator.
///
/// Writers take the exclusive lock only for the duration of a merge; the
/// coordinator copies the whole map under the shared lock and iterates the
/// copy, so every checkpoint sees a state between two merges.
#[derive(Debug, Clone, Default)]
pub struct SharedLoci {
    inner: Arc<RwLock<FxHashMap<u64, Locus>>>,
}

impl SharedLoci {
    /// Create an empty shared map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move every locus out of `batch` into the shared map, replacing entries
    /// with the same key. Returns the number of loci merged.
    pub fn merge(&self, batch: &mut FxHashMap<u64, Locus>) -> usize {
        let merged = batch.len();
        let mut map = self.inner.write();
        map.extend(batch.drain());
        merged
    }

    /// Copy of the locus stored under `key`.
    pub fn get(&self, key: u64) -> Option<Locus> {
        self.inner.read().get(&key).cloned()
    }

    /// Point-in-time copy of every locus.
    pub fn snapshot(&self) -> Vec<Locus> {
        self.inner.read().values().cloned().collect()
    }

    /// Number of loci.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no locus has been merged yet.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Write-back sink: updates accumulate in a private batch that is merged into
/// [`SharedLoci`] every `batch_size` reads and on [`LocusSink::flush`].
#[derive(Debug)]
pub struct WriteBackSink {
    shared: SharedLoci,
    batch: FxHashMap<u64, Locus>,
    priors: GenotypePriors,
    batch_size: usize,
    reads_in_batch: usize,
    merges: u64,
}

impl WriteBackSink {
    /// Create a sink merging into `shared` every `batch_size` reads.
    pub fn new(shared: SharedLoci, priors: GenotypePriors, batch_size: usize) -> Self {
        Self {
            shared,
            batch: FxHashMap::default(),
            priors,
            batch_size: batch_size.max(1),
            reads_in_batch: 0,
            merges: 0,
        }
    }

    /// Handle to the shared map this sink merges into.
    pub fn shared(&self) -> &SharedLoci {
        &self.shared
    }

    /// Loci updated since the last merge.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Number of merges performed so far.
    pub fn merges(&self) -> u64 {
        self.merges
    }

    fn merge(&mut self) {
        self.reads_in_batch = 0;
        if self.batch.is_empty() {
            return;
        }
        let started = Instant::now();
        let merged = self.shared.merge(&mut self.batch);
        self.merges += 1;
        info!(
            merged,
            total = self.shared.len(),
            elapsed = ?started.elapsed(),
            "merged batch into shared store"
        );
    }
}

impl LocusSink for WriteBackSink {
    fn record(&mut self, evidence: &Evidence) -> Result<(), StoreError> {
        let locus = match self.batch.entry(evidence.position) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let seed = self.shared.get(evidence.position).unwrap_or_else(|| {
                    Locus::new(evidence.position, evidence.reference_base, &self.priors)
                });
                entry.insert(seed)
            }
        };
        locus.observe(evidence);
        Ok(())
    }

    fn end_read(&mut self) -> Result<(), StoreError> {
        self.reads_in_batch += 1;
        if self.reads_in_batch >= self.batch_size {
            self.merge();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.merge();
        Ok(())
    }
}

/// Write-through sink: every evidence tuple is a read-modify-write of the
/// durable store, keyed by the 0-based position.
#[derive(Debug)]
pub struct WriteThroughSink<S> {
    store: S,
    priors: GenotypePriors,
    writes: u64,
}

impl<S: DurableStore> WriteThroughSink<S> {
    /// Create a sink writing straight to `store`.
    pub fn new(store: S, priors: GenotypePriors) -> Self {
        Self {
            store,
            priors,
            writes: 0,
        }
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the underlying store back.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Number of locus writes performed.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl<S: DurableStore> LocusSink for WriteThroughSink<S> {
    fn record(&mut self, evidence: &Evidence) -> Result<(), StoreError> {
        let mut locus = match load_locus(&self.store, evidence.position)? {
            Some(locus) => locus,
            None => Locus::new(evidence.position, evidence.reference_base, &self.priors),
        };
        locus.observe(evidence);
        store_locus(&mut self.store, &locus)?;
        self.writes += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        debug!(writes = self.writes, "write-through sink has nothing to flush");
        Ok(())
    }
}
