//! Genomics primitives: read records, reference access, evidence extraction
//! and the per-locus genotype-likelihood model.
//!
//! This module exposes the pure, single-threaded pieces of the caller. The
//! persistence and concurrency layers live in [`crate::store`],
//! [`crate::checkpoint`] and [`crate::stream`].

mod evidence;
mod io;
mod locus;
pub mod phred;
mod reference;
pub mod sequence;
mod types;
mod vcf;

pub use evidence::{extract_evidence, EvidenceExtractor, ReadError};
pub use io::{message_from_record, BamFeed, FeedError, JsonLinesFeed};
pub use locus::{
    Genotype, GenotypePriors, Locus, DEFAULT_HETEROZYGOSITY, MAX_GENOTYPE_QUALITY,
    MIN_GENOTYPE_LIKELIHOOD,
};
pub use reference::{
    IndexedFastaReference, InMemoryReference, ReferenceError, ReferenceProvider, ReferenceWindow,
};
pub use types::{CigarOp, CigarOpKind, Evidence, ReadMessage, Strand};
pub use vcf::{is_variant, render_vcf, write_vcf};
