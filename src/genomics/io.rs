use std::io::{BufRead, Lines};
use std::path::Path;

use rust_htslib::bam::{self, ext::BamRecordExtensions, record::Cigar, Read as BamRead};
use thiserror::Error;
use tracing::{debug, warn};

use super::phred::PHRED_OFFSET;
use super::sequence::reverse_complement;
use super::{CigarOp, CigarOpKind, ReadMessage, Strand};

/// Highest quality value carried through from BAM input.
const MAX_BAM_QUALITY: u8 = 93;

/// BAM marks a record without base qualities by filling them with this byte.
const MISSING_BAM_QUALITY: u8 = 0xFF;

/// Errors produced while decoding feed input.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Underlying reader failed.
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line was not a valid read message.
    #[error("invalid read message on line {line}: {source}")]
    Json {
        /// 1-based line number.
        line: usize,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// htslib failed to open or decode the BAM file.
    #[error("BAM error: {0}")]
    Bam(#[from] rust_htslib::errors::Error),

    /// Requested contig is absent from the BAM header.
    #[error("contig '{0}' not present in BAM header")]
    MissingContig(String),
}

/// Newline-delimited JSON read messages.
#[derive(Debug)]
pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> JsonLinesFeed<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for JsonLinesFeed<R> {
    type Item = Result<ReadMessage, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(&line).map_err(|source| FeedError::Json {
                    line: self.line_no,
                    source,
                }),
            );
        }
    }
}

/// Mapped reads of one contig from a BAM file, converted to [`ReadMessage`]s.
///
/// Unmapped records, records on other contigs and records without base
/// qualities are passed over.
pub struct BamFeed {
    reader: bam::Reader,
    tid: i32,
    record: bam::Record,
    missing_quality: u64,
}

impl std::fmt::Debug for BamFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamFeed")
            .field("tid", &self.tid)
            .field("missing_quality", &self.missing_quality)
            .finish()
    }
}

impl BamFeed {
    /// Open a BAM file and restrict it to `contig`.
    pub fn from_path<P: AsRef<Path>>(path: P, contig: &str) -> Result<Self, FeedError> {
        let reader = bam::Reader::from_path(path)?;
        let tid = reader
            .header()
            .tid(contig.as_bytes())
            .ok_or_else(|| FeedError::MissingContig(contig.to_string()))?;
        Ok(Self {
            reader,
            tid: tid as i32,
            record: bam::Record::new(),
            missing_quality: 0,
        })
    }

    /// Records skipped so far because they carried no base qualities.
    pub fn missing_quality(&self) -> u64 {
        self.missing_quality
    }
}

impl Iterator for BamFeed {
    type Item = Result<ReadMessage, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read(&mut self.record)? {
                Ok(()) => {}
                Err(err) => return Some(Err(err.into())),
            }
            if self.record.is_unmapped() || self.record.tid() != self.tid {
                continue;
            }
            match message_from_record(&self.record) {
                Some(message) => return Some(Ok(message)),
                None => {
                    self.missing_quality += 1;
                    let name = String::from_utf8_lossy(self.record.qname());
                    if self.missing_quality == 1 {
                        warn!(read = %name, "BAM records without base qualities are skipped");
                    } else {
                        debug!(read = %name, "skipping record without base qualities");
                    }
                }
            }
        }
    }
}

fn cigar_op(op: &Cigar) -> CigarOp {
    match *op {
        Cigar::Match(len) => CigarOp::new(CigarOpKind::Match, len),
        Cigar::Ins(len) => CigarOp::new(CigarOpKind::Insertion, len),
        Cigar::Del(len) => CigarOp::new(CigarOpKind::Deletion, len),
        Cigar::RefSkip(len) => CigarOp::new(CigarOpKind::Skip, len),
        Cigar::SoftClip(len) => CigarOp::new(CigarOpKind::SoftClip, len),
        Cigar::HardClip(len) => CigarOp::new(CigarOpKind::HardClip, len),
        Cigar::Pad(len) => CigarOp::new(CigarOpKind::Padding, len),
        Cigar::Equal(len) => CigarOp::new(CigarOpKind::SequenceMatch, len),
        Cigar::Diff(len) => CigarOp::new(CigarOpKind::SequenceMismatch, len),
    }
}

/// Convert a BAM record into sequencing orientation.
///
/// BAM stores reverse-strand reads reference-oriented, so their bases are
/// reverse-complemented and their qualities reversed here. Returns `None`
/// when the record has no base qualities.
pub fn message_from_record(record: &bam::Record) -> Option<ReadMessage> {
    if record.qual().first() == Some(&MISSING_BAM_QUALITY) {
        return None;
    }
    let strand = if record.is_reverse() {
        Strand::Reverse
    } else {
        Strand::Forward
    };

    let mut bases = record.seq().as_bytes();
    let mut qualities: Vec<u8> = record
        .qual()
        .iter()
        .map(|&q| q.min(MAX_BAM_QUALITY) + PHRED_OFFSET)
        .collect();
    if strand.is_reverse() {
        bases = reverse_complement(&bases);
        qualities.reverse();
    }

    let cigar = record.cigar().iter().map(cigar_op).collect();
    Some(ReadMessage::new(
        String::from_utf8_lossy(&bases).into_owned(),
        String::from_utf8_lossy(&qualities).into_owned(),
        strand,
        record.pos().max(0) as u64,
        record.reference_end().max(0) as u64,
        cigar,
    ))
}
