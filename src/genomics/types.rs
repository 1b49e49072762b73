use serde::{Deserialize, Serialize};
use std::fmt;

/// Strand a read aligned to.
///
/// Encoded on the wire as `1` (forward) or `-1` (reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Strand {
    /// Read sequence matches the reference orientation.
    Forward,
    /// Read sequence is the reverse complement of the reference.
    Reverse,
}

impl Strand {
    /// Whether this is the reverse strand.
    pub fn is_reverse(self) -> bool {
        matches!(self, Strand::Reverse)
    }
}

impl TryFrom<i8> for Strand {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Strand::Forward),
            -1 => Ok(Strand::Reverse),
            other => Err(format!("invalid strand {other} (expected 1 or -1)")),
        }
    }
}

impl From<Strand> for i8 {
    fn from(strand: Strand) -> Self {
        match strand {
            Strand::Forward => 1,
            Strand::Reverse => -1,
        }
    }
}

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Consuming match/mismatch (`M`).
    Match,
    /// Insertion relative to the reference (`I`).
    Insertion,
    /// Deletion relative to the reference (`D`).
    Deletion,
    /// Skipped reference region (`N`).
    Skip,
    /// Soft clipping, sequence present in read only (`S`).
    SoftClip,
    /// Hard clipping, trimmed sequence not present in read (`H`).
    HardClip,
    /// Silent padding (`P`).
    Padding,
    /// Sequence match (`=`).
    SequenceMatch,
    /// Sequence mismatch (`X`).
    SequenceMismatch,
}

impl CigarOpKind {
    /// Decode a BAM numeric op code (0..=8).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CigarOpKind::Match,
            1 => CigarOpKind::Insertion,
            2 => CigarOpKind::Deletion,
            3 => CigarOpKind::Skip,
            4 => CigarOpKind::SoftClip,
            5 => CigarOpKind::HardClip,
            6 => CigarOpKind::Padding,
            7 => CigarOpKind::SequenceMatch,
            8 => CigarOpKind::SequenceMismatch,
            _ => return None,
        })
    }

    /// BAM numeric op code.
    pub fn code(self) -> u8 {
        match self {
            CigarOpKind::Match => 0,
            CigarOpKind::Insertion => 1,
            CigarOpKind::Deletion => 2,
            CigarOpKind::Skip => 3,
            CigarOpKind::SoftClip => 4,
            CigarOpKind::HardClip => 5,
            CigarOpKind::Padding => 6,
            CigarOpKind::SequenceMatch => 7,
            CigarOpKind::SequenceMismatch => 8,
        }
    }

    /// SAM text symbol.
    pub fn symbol(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::Skip => 'N',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::Padding => 'P',
            CigarOpKind::SequenceMatch => '=',
            CigarOpKind::SequenceMismatch => 'X',
        }
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Deletion
                | CigarOpKind::Skip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether the operation advances along the read sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match
                | CigarOpKind::Insertion
                | CigarOpKind::SoftClip
                | CigarOpKind::SequenceMatch
                | CigarOpKind::SequenceMismatch
        )
    }

    /// Whether read bases under this operation are compared to the reference.
    pub fn is_aligned(self) -> bool {
        self.consumes_reference() && self.consumes_read()
    }
}

/// CIGAR operation with length.
///
/// Serialized as a `[length, op_code]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(u32, u8)", into = "(u32, u8)")]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

impl TryFrom<(u32, u8)> for CigarOp {
    type Error = String;

    fn try_from((len, code): (u32, u8)) -> Result<Self, Self::Error> {
        let kind = CigarOpKind::from_code(code)
            .ok_or_else(|| format!("unknown CIGAR op code {code}"))?;
        Ok(Self { kind, len })
    }
}

impl From<CigarOp> for (u32, u8) {
    fn from(op: CigarOp) -> Self {
        (op.len, op.kind.code())
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.symbol())
    }
}

/// Aligned read as delivered by the feed.
///
/// `sequence` and `quality` are in sequencing orientation: for reverse-strand
/// reads they hold the reverse complement of the reference-oriented bases.
/// `cigar` is always in reference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadMessage {
    /// Read bases.
    #[serde(rename = "seq")]
    pub sequence: String,
    /// Phred+33 quality string, one character per base.
    #[serde(rename = "qual")]
    pub quality: String,
    /// Alignment strand.
    pub strand: Strand,
    /// 0-based leftmost reference coordinate.
    #[serde(rename = "pos")]
    pub alignment_start: u64,
    /// 0-based exclusive reference end.
    #[serde(rename = "end")]
    pub alignment_end: u64,
    /// Read offset of the first aligned base, in sequencing orientation.
    ///
    /// Soft-clipped bases ahead of it are already skipped, and soft clips
    /// never move the read cursor. When absent it is the length of the
    /// leading soft clip in walk order.
    #[serde(rename = "qstart", default, skip_serializing_if = "Option::is_none")]
    pub query_start: Option<usize>,
    /// Alignment operations in reference order.
    #[serde(rename = "cigartuples", default)]
    pub cigar: Vec<CigarOp>,
}

impl ReadMessage {
    /// Build a read message.
    pub fn new(
        sequence: impl Into<String>,
        quality: impl Into<String>,
        strand: Strand,
        alignment_start: u64,
        alignment_end: u64,
        cigar: Vec<CigarOp>,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            quality: quality.into(),
            strand,
            alignment_start,
            alignment_end,
            query_start: None,
            cigar,
        }
    }

    /// Set an explicit query start offset.
    pub fn with_query_start(mut self, query_start: usize) -> Self {
        self.query_start = Some(query_start);
        self
    }

    /// Operations in the order the read is walked: reference order for
    /// forward reads, reversed for reverse reads.
    pub fn walk_order(&self) -> impl Iterator<Item = &CigarOp> + '_ {
        let reverse = self.strand.is_reverse();
        let len = self.cigar.len();
        (0..len).map(move |idx| &self.cigar[if reverse { len - 1 - idx } else { idx }])
    }

    /// Offset of the first aligned base, derived from the leading soft clip
    /// when no explicit offset was given.
    pub fn aligned_query_start(&self) -> usize {
        self.query_start.unwrap_or_else(|| {
            self.walk_order()
                .take_while(|op| matches!(op.kind, CigarOpKind::HardClip | CigarOpKind::SoftClip))
                .filter(|op| op.kind == CigarOpKind::SoftClip)
                .map(|op| op.len as usize)
                .sum()
        })
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// CIGAR rendered as SAM text (`*` when empty).
    pub fn cigar_string(&self) -> String {
        if self.cigar.is_empty() {
            return "*".to_string();
        }
        self.cigar.iter().map(ToString::to_string).collect()
    }
}

/// One observed base attributed to one reference position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    /// 0-based reference coordinate.
    pub position: u64,
    /// Reference base at `position`.
    pub reference_base: u8,
    /// Base observed in the read (upper case).
    pub observed_base: u8,
    /// Probability the observed base is a sequencing error, in (0, 1].
    pub error_probability: f64,
}

impl Evidence {
    /// Whether the observed base disagrees with the reference.
    pub fn is_mismatch(&self) -> bool {
        self.observed_base != self.reference_base
    }
}
