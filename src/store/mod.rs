//! Aggregate and durable storage of [`Locus`](crate::genomics::Locus) state.
//!
//! Evidence reaches storage through a single [`LocusSink`] interface with two
//! implementations: [`WriteBackSink`] batches updates in memory and merges them
//! into a [`SharedLoci`] map that the checkpoint coordinator snapshots, while
//! [`WriteThroughSink`] performs a read-modify-write against a
//! [`DurableStore`] for every evidence tuple.

mod aggregate;
mod durable;
mod sqlite;

pub use aggregate::{SharedLoci, WriteBackSink, WriteThroughSink};
pub use durable::{decode_locus, encode_locus, load_locus, store_locus, DurableStore, MemoryStore};
pub use sqlite::SqliteStore;

use crate::genomics::Evidence;
use thiserror::Error;

/// Errors raised by aggregate or durable storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite backend failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A locus could not be serialized or deserialized.
    #[error("locus codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Destination for evidence produced by the stream consumer.
pub trait LocusSink {
    /// Fold one evidence tuple into the locus at its position.
    fn record(&mut self, evidence: &Evidence) -> Result<(), StoreError>;

    /// Called once after every read, including skipped ones.
    fn end_read(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Make every recorded update visible to readers of the store.
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<S: LocusSink + ?Sized> LocusSink for &mut S {
    fn record(&mut self, evidence: &Evidence) -> Result<(), StoreError> {
        (**self).record(evidence)
    }

    fn end_read(&mut self) -> Result<(), StoreError> {
        (**self).end_read()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        (**self).flush()
    }
}

impl<S: LocusSink + ?Sized> LocusSink for Box<S> {
    fn record(&mut self, evidence: &Evidence) -> Result<(), StoreError> {
        (**self).record(evidence)
    }

    fn end_read(&mut self) -> Result<(), StoreError> {
        (**self).end_read()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        (**self).flush()
    }
}
