use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::faidx;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors raised while loading or querying reference sequence.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Reference file could not be opened.
    #[error("failed to read reference {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// htslib could neither load nor build a `.fai` index for the file.
    #[error("reference {} is not an indexable FASTA file", path.display())]
    Unindexable {
        /// Path that failed.
        path: PathBuf,
    },

    /// htslib rejected an index or fetch request.
    #[error("indexed reference query on '{contig}' failed: {source}")]
    Htslib {
        /// Contig being queried.
        contig: String,
        /// Underlying htslib error.
        #[source]
        source: rust_htslib::errors::Error,
    },

    /// Requested contig is not present.
    #[error("contig '{0}' not found in reference")]
    MissingContig(String),

    /// Requested window starts past its (clamped) end.
    #[error("window start {start} is beyond window stop {stop}")]
    WindowOutOfRange {
        /// Requested window start.
        start: u64,
        /// Window stop after clamping to the contig length.
        stop: u64,
    },

    /// Requested window starts at or past the end of the contig.
    #[error("window start {start} lies past the end of contig '{contig}'")]
    StartBeyondContig {
        /// Contig being queried.
        contig: String,
        /// Requested window start.
        start: u64,
    },
}

/// Source of contig sequence.
pub trait ReferenceProvider {
    /// Return bases `[start, stop)` of a contig. `stop` defaults to, and is
    /// clamped at, the contig length.
    fn fetch_region(
        &self,
        contig: &str,
        start: u64,
        stop: Option<u64>,
    ) -> Result<Vec<u8>, ReferenceError>;
}

/// Reference held in memory, keyed by contig name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    contigs: FxHashMap<String, Arc<[u8]>>,
}

impl InMemoryReference {
    /// Create an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a contig.
    pub fn insert(&mut self, name: impl Into<String>, sequence: &[u8]) {
        let upper = sequence.to_ascii_uppercase();
        self.contigs.insert(name.into(), Arc::from(upper.into_boxed_slice()));
    }

    /// Builder-style variant of [`InMemoryReference::insert`].
    pub fn with_contig(mut self, name: impl Into<String>, sequence: &[u8]) -> Self {
        self.insert(name, sequence);
        self
    }

    /// Number of contigs.
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    /// Whether no contigs are loaded.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

impl ReferenceProvider for InMemoryReference {
    fn fetch_region(
        &self,
        contig: &str,
        start: u64,
        stop: Option<u64>,
    ) -> Result<Vec<u8>, ReferenceError> {
        let sequence = self
            .contigs
            .get(contig)
            .ok_or_else(|| ReferenceError::MissingContig(contig.to_string()))?;
        let len = sequence.len() as u64;
        let stop = stop.unwrap_or(len).min(len);
        if start > stop {
            return Err(ReferenceError::WindowOutOfRange { start, stop });
        }
        Ok(sequence[start as usize..stop as usize].to_vec())
    }
}

/// FASTA reference read through an htslib `.fai` index.
///
/// The index is built next to the file when absent. Only the requested
/// region is read from disk.
#[derive(Debug)]
pub struct IndexedFastaReference {
    reader: faidx::Reader,
    contigs: Vec<String>,
}

impl IndexedFastaReference {
    /// Open (and if needed index) a FASTA file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        File::open(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let reader = faidx::Reader::from_path(path).map_err(|source| ReferenceError::Htslib {
            contig: String::new(),
            source,
        })?;
        // htslib hands back a null handle when it cannot load or write the
        // index, so the sidecar must exist before the reader is queried.
        if !index_path(path).is_file() {
            return Err(ReferenceError::Unindexable {
                path: path.to_path_buf(),
            });
        }

        let count = i32::try_from(reader.n_seqs()).unwrap_or(i32::MAX);
        let contigs = (0..count)
            .map(|i| reader.seq_name(i))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ReferenceError::Htslib {
                contig: String::new(),
                source,
            })?;

        Ok(Self { reader, contigs })
    }

    /// Contig names in index order.
    pub fn contig_names(&self) -> &[String] {
        &self.contigs
    }

    /// Number of indexed contigs.
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    /// Whether the index lists no contigs.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

impl ReferenceProvider for IndexedFastaReference {
    fn fetch_region(
        &self,
        contig: &str,
        start: u64,
        stop: Option<u64>,
    ) -> Result<Vec<u8>, ReferenceError> {
        if !self.contigs.iter().any(|name| name == contig) {
            return Err(ReferenceError::MissingContig(contig.to_string()));
        }
        let last = match stop {
            Some(stop) if start > stop => {
                return Err(ReferenceError::WindowOutOfRange { start, stop });
            }
            Some(stop) if start == stop => return Ok(Vec::new()),
            Some(stop) => stop - 1,
            None => i64::MAX as u64,
        };

        // htslib takes an inclusive end and clamps it to the contig length.
        let htslib_error = |source| ReferenceError::Htslib {
            contig: contig.to_string(),
            source,
        };
        let begin = usize::try_from(start).unwrap_or(usize::MAX);
        let end = usize::try_from(last.min(i64::MAX as u64)).unwrap_or(usize::MAX);
        let bases = self
            .reader
            .fetch_seq(contig, begin, end)
            .map_err(htslib_error)?;
        Ok(bases.to_vec())
    }
}

fn index_path(path: &Path) -> PathBuf {
    let mut index = path.as_os_str().to_owned();
    index.push(".fai");
    PathBuf::from(index)
}

/// Half-open reference window `[start, start + sequence.len())`.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    start: u64,
    sequence: Arc<[u8]>,
}

impl ReferenceWindow {
    /// Wrap an already-sliced subsequence beginning at `start`.
    pub fn new(start: u64, sequence: impl Into<Arc<[u8]>>) -> Self {
        Self {
            start,
            sequence: sequence.into(),
        }
    }

    /// Slice `[start, stop)` out of a contig; `stop` defaults to, and is
    /// clamped at, the contig length.
    pub fn slice(contig: &[u8], start: u64, stop: Option<u64>) -> Result<Self, ReferenceError> {
        let len = contig.len() as u64;
        let stop = stop.unwrap_or(len).min(len);
        if start > stop {
            return Err(ReferenceError::WindowOutOfRange { start, stop });
        }
        let bytes = contig[start as usize..stop as usize].to_vec();
        Ok(Self::new(start, bytes.into_boxed_slice()))
    }

    /// Fetch `[start, stop)` of a contig from a provider.
    ///
    /// An empty result for a non-empty request means `start` lies past the
    /// end of the contig.
    pub fn fetch<R: ReferenceProvider + ?Sized>(
        provider: &R,
        contig: &str,
        start: u64,
        stop: Option<u64>,
    ) -> Result<Self, ReferenceError> {
        let sequence = provider.fetch_region(contig, start, stop)?;
        if sequence.is_empty() && stop.map_or(true, |stop| stop > start) {
            return Err(ReferenceError::StartBeyondContig {
                contig: contig.to_string(),
                start,
            });
        }
        Ok(Self::new(start, sequence))
    }

    /// First covered position.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end position.
    pub fn stop(&self) -> u64 {
        self.start + self.sequence.len() as u64
    }

    /// Number of covered bases.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the window covers nothing.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Whether `position` lies inside the window.
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position < self.stop()
    }

    /// Reference base at an absolute position.
    pub fn base_at(&self, position: u64) -> Option<u8> {
        if !self.contains(position) {
            return None;
        }
        self.sequence
            .get((position - self.start) as usize)
            .map(u8::to_ascii_uppercase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FASTA: &str = ">chr1 description\nACGTAC\nGTacgt\nAC\n>chr2\nTTTT\n";

    fn indexed(dir: &TempDir) -> IndexedFastaReference {
        let path = dir.path().join("reference.fa");
        fs::write(&path, FASTA).unwrap();
        IndexedFastaReference::from_path(&path).unwrap()
    }

    #[test]
    fn indexed_fasta_fetches_windows() {
        let dir = TempDir::new().unwrap();
        let reference = indexed(&dir);
        assert_eq!(reference.contig_names(), ["chr1".to_string(), "chr2".to_string()]);
        assert!(dir.path().join("reference.fa.fai").is_file());

        let window = ReferenceWindow::fetch(&reference, "chr1", 4, Some(9)).unwrap();
        assert_eq!((window.start(), window.stop()), (4, 9));
        let bases: Vec<u8> = (4..9).filter_map(|p| window.base_at(p)).collect();
        assert_eq!(bases, b"ACGTA".to_vec());

        let tail = ReferenceWindow::fetch(&reference, "chr1", 10, None).unwrap();
        assert_eq!((tail.start(), tail.stop()), (10, 14));
        assert_eq!(tail.base_at(13), Some(b'C'));

        let clamped = ReferenceWindow::fetch(&reference, "chr2", 1, Some(100)).unwrap();
        assert_eq!(clamped.stop(), 4);

        let empty = ReferenceWindow::fetch(&reference, "chr2", 2, Some(2)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn indexed_fasta_rejects_bad_requests() {
        let dir = TempDir::new().unwrap();
        let reference = indexed(&dir);
        assert!(matches!(
            ReferenceWindow::fetch(&reference, "chr3", 0, None),
            Err(ReferenceError::MissingContig(_))
        ));
        assert!(matches!(
            ReferenceWindow::fetch(&reference, "chr2", 3, Some(1)),
            Err(ReferenceError::WindowOutOfRange { start: 3, stop: 1 })
        ));
        assert!(matches!(
            ReferenceWindow::fetch(&reference, "chr2", 9, None),
            Err(ReferenceError::StartBeyondContig { start: 9, .. })
        ));
        assert!(matches!(
            IndexedFastaReference::from_path(dir.path().join("missing.fa")),
            Err(ReferenceError::Io { .. })
        ));
    }

    #[test]
    fn in_memory_reference_fetches_regions() {
        let reference = InMemoryReference::new()
            .with_contig("chr1", b"acgtACGT")
            .with_contig("chr2", b"TTTT");
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.fetch_region("chr1", 0, None).unwrap(), b"ACGTACGT".to_vec());
        assert_eq!(reference.fetch_region("chr1", 2, Some(5)).unwrap(), b"GTA".to_vec());
        assert!(matches!(
            reference.fetch_region("chr3", 0, None),
            Err(ReferenceError::MissingContig(_))
        ));
        assert!(matches!(
            ReferenceWindow::fetch(&reference, "chr2", 6, None),
            Err(ReferenceError::WindowOutOfRange { start: 6, stop: 4 })
        ));
    }

    #[test]
    fn window_slicing_clamps_to_contig() {
        let window = ReferenceWindow::slice(b"ACGTACGT", 2, Some(100)).unwrap();
        assert_eq!(window.start(), 2);
        assert_eq!(window.stop(), 8);
        assert_eq!(window.base_at(2), Some(b'G'));
        assert_eq!(window.base_at(1), None);
        assert_eq!(window.base_at(8), None);
    }

    #[test]
    fn window_start_beyond_contig_is_an_error() {
        assert!(ReferenceWindow::slice(b"ACGT", 5, None).is_err());
    }
}
