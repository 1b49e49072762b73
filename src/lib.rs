//! # Streaming SNV genotype likelihoods
//!
//! Aligned reads arrive one at a time. Each read is walked along its CIGAR,
//! every aligned base inside the reference window becomes one piece of
//! [`Evidence`], and evidence is folded into a per-position [`Locus`] that
//! carries three diploid genotype likelihoods.
//!
//! ## Pipeline
//!
//! 1. **Extraction** ([`genomics::EvidenceExtractor`]): strand-aware CIGAR walk
//! 2. **Accumulation** ([`store::LocusSink`]): write-back batches merged into a
//!    shared map, or write-through read-modify-write of a durable store
//! 3. **Checkpointing** ([`checkpoint::CheckpointCoordinator`]): periodic full
//!    snapshots of the shared map, acknowledged back to the consumer
//! 4. **Driving** ([`stream::StreamConsumer`]): pulls reads, runs the handshake
//!
//! ## Usage Example
//!
//! ```
//! use snpstream::genomics::{CigarOp, CigarOpKind, GenotypePriors, ReadMessage, ReferenceWindow, Strand};
//! use snpstream::store::{SharedLoci, WriteBackSink};
//! use snpstream::stream::StreamConsumer;
//!
//! let window = ReferenceWindow::new(0, b"ACGT".to_vec());
//! let shared = SharedLoci::new();
//! let sink = WriteBackSink::new(shared.clone(), GenotypePriors::default(), 1);
//! let read = ReadMessage::new("ACGA", "5555", Strand::Forward, 0, 4,
//!     vec![CigarOp::new(CigarOpKind::Match, 4)]);
//!
//! let stats = StreamConsumer::new(sink, &window).run(vec![read]).unwrap();
//! assert_eq!(stats.evidence_recorded, 4);
//! assert_eq!(shared.get(3).unwrap().alternate_base, Some(b'A'));
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod checkpoint; // NEW/SAVED handshake and snapshot writer
pub mod config;     // Run parameters
pub mod genomics;   // Reads, reference, evidence, locus model
pub mod store;      // Aggregate and durable storage
pub mod stream;     // Feed consumer

pub use checkpoint::{
    checkpoint_channel, CheckpointCoordinator, CheckpointError, CheckpointHandle,
    CheckpointMessage, CheckpointOutcome, CheckpointState,
};
pub use config::{CallerConfig, ConfigError, PersistenceMode};
pub use genomics::{Evidence, Locus, ReadMessage, ReferenceWindow};
pub use store::{DurableStore, LocusSink, SharedLoci, SqliteStore, StoreError};
pub use stream::{ConsumerStats, StreamConsumer};
