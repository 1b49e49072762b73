//! Translation of one aligned read into per-position evidence.
//!
//! Operations are walked in genomic order for forward reads and in reverse
//! order for reverse reads, whose bases arrive in sequencing orientation. Each
//! aligned run is strand-corrected before it is compared to the reference, so
//! within a run evidence is always emitted in ascending position.

use thiserror::Error;

use crate::genomics::phred::error_probability;
use crate::genomics::sequence::reverse_complement;
use crate::genomics::{CigarOp, CigarOpKind, Evidence, ReadMessage, ReferenceWindow, Strand};

/// Reasons a read cannot be interpreted. None of them are fatal to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The read carries no alignment operations.
    #[error("read has no alignment operations")]
    EmptyCigar,

    /// Quality string and sequence disagree in length.
    #[error("quality length {quality} does not match sequence length {sequence}")]
    QualityLengthMismatch {
        /// Sequence length.
        sequence: usize,
        /// Quality string length.
        quality: usize,
    },

    /// Query start lies beyond the end of the sequence.
    #[error("query start {query_start} is past the end of a {available} base sequence")]
    QueryStartOutOfRange {
        /// Requested offset of the first aligned base.
        query_start: usize,
        /// Sequence length.
        available: usize,
    },

    /// Operations consume more read bases than the sequence holds.
    #[error("alignment needs {required} read bases but sequence has {available}")]
    SequenceTooShort {
        /// Bases needed from the start of the sequence.
        required: usize,
        /// Sequence length.
        available: usize,
    },

    /// Alignment span disagrees with the reference length of the operations.
    #[error("alignment span [{start}, {end}) does not match {consumed} reference bases in CIGAR")]
    SpanMismatch {
        /// Alignment start.
        start: u64,
        /// Alignment end.
        end: u64,
        /// Reference bases consumed by the operations.
        consumed: u64,
    },
}

#[derive(Debug)]
struct AlignedRun {
    reference_start: u64,
    bases: Vec<u8>,
    qualities: Vec<u8>,
    offset: usize,
}

/// Lazy iterator of [`Evidence`] for a single read inside a reference window.
#[derive(Debug)]
pub struct EvidenceExtractor<'a> {
    read: &'a ReadMessage,
    window: &'a ReferenceWindow,
    next_op: usize,
    reference_cursor: u64,
    read_cursor: usize,
    run: Option<AlignedRun>,
    done: bool,
}

impl<'a> EvidenceExtractor<'a> {
    /// Validate `read` and prepare to walk it against `window`.
    pub fn new(read: &'a ReadMessage, window: &'a ReferenceWindow) -> Result<Self, ReadError> {
        if read.cigar.is_empty() {
            return Err(ReadError::EmptyCigar);
        }
        if read.quality.len() != read.sequence.len() {
            return Err(ReadError::QualityLengthMismatch {
                sequence: read.sequence.len(),
                quality: read.quality.len(),
            });
        }

        let available = read.sequence.len();
        let query_start = read.aligned_query_start();
        if query_start > available {
            return Err(ReadError::QueryStartOutOfRange {
                query_start,
                available,
            });
        }
        let walked = read
            .cigar
            .iter()
            .filter(|op| advances_read_cursor(op))
            .try_fold(query_start, |total, op| total.checked_add(op.len as usize));
        match walked {
            Some(required) if required <= available => {}
            _ => {
                return Err(ReadError::SequenceTooShort {
                    required: walked.unwrap_or(usize::MAX),
                    available,
                })
            }
        }

        let consumed: u64 = read
            .cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| u64::from(op.len))
            .sum();
        if read.alignment_end < read.alignment_start
            || read.alignment_end - read.alignment_start != consumed
        {
            return Err(ReadError::SpanMismatch {
                start: read.alignment_start,
                end: read.alignment_end,
                consumed,
            });
        }

        Ok(Self {
            read,
            window,
            next_op: 0,
            reference_cursor: 0,
            read_cursor: query_start,
            run: None,
            done: false,
        })
    }

    fn is_reverse(&self) -> bool {
        self.read.strand == Strand::Reverse
    }

    fn op(&self, idx: usize) -> CigarOp {
        if self.is_reverse() {
            self.read.cigar[self.read.cigar.len() - 1 - idx]
        } else {
            self.read.cigar[idx]
        }
    }

    /// Walk forward to the next aligned run overlapping the window.
    fn advance_run(&mut self) -> Option<AlignedRun> {
        while self.next_op < self.read.cigar.len() {
            let op = self.op(self.next_op);
            self.next_op += 1;
            let len = u64::from(op.len);

            if !op.kind.is_aligned() {
                if op.kind.consumes_reference() {
                    self.reference_cursor += len;
                }
                if advances_read_cursor(&op) {
                    self.read_cursor += op.len as usize;
                }
                continue;
            }

            let reference_start = if self.is_reverse() {
                self.read.alignment_end - self.reference_cursor - len
            } else {
                self.read.alignment_start + self.reference_cursor
            };
            let read_range = self.read_cursor..self.read_cursor + op.len as usize;
            self.reference_cursor += len;
            self.read_cursor += op.len as usize;

            if reference_start >= self.window.stop() {
                if !self.is_reverse() {
                    return None;
                }
                continue;
            }
            if reference_start + len <= self.window.start() {
                continue;
            }

            let mut bases = self.read.sequence.as_bytes()[read_range.clone()].to_ascii_uppercase();
            let mut qualities = self.read.quality.as_bytes()[read_range].to_vec();
            if self.is_reverse() {
                bases = reverse_complement(&bases);
                qualities.reverse();
            }

            return Some(AlignedRun {
                reference_start,
                bases,
                qualities,
                offset: 0,
            });
        }
        None
    }
}

/// Soft-clipped bases sit outside the query range and are never walked.
fn advances_read_cursor(op: &CigarOp) -> bool {
    op.kind.consumes_read() && op.kind != CigarOpKind::SoftClip
}

impl Iterator for EvidenceExtractor<'_> {
    type Item = Evidence;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(mut run) = self.run.take() {
                while run.offset < run.bases.len() {
                    let idx = run.offset;
                    run.offset += 1;
                    let position = run.reference_start + idx as u64;

                    if position < self.window.start() {
                        continue;
                    }
                    let Some(reference_base) = self.window.base_at(position) else {
                        if !self.is_reverse() {
                            self.done = true;
                        }
                        break;
                    };

                    let evidence = Evidence {
                        position,
                        reference_base,
                        observed_base: run.bases[idx],
                        error_probability: error_probability(run.qualities[idx]),
                    };
                    self.run = Some(run);
                    return Some(evidence);
                }
                continue;
            }

            match self.advance_run() {
                Some(run) => self.run = Some(run),
                None => self.done = true,
            }
        }
    }
}

/// Collect every evidence tuple a read contributes to the window.
pub fn extract_evidence(
    read: &ReadMessage,
    window: &ReferenceWindow,
) -> Result<Vec<Evidence>, ReadError> {
    Ok(EvidenceExtractor::new(read, window)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(sequence: &[u8]) -> ReferenceWindow {
        ReferenceWindow::new(0, sequence.to_vec())
    }

    fn positions(evidence: &[Evidence]) -> Vec<u64> {
        evidence.iter().map(|e| e.position).collect()
    }

    #[test]
    fn forward_match_emits_every_base() {
        let read = ReadMessage::new(
            "ACGA",
            "5555",
            Strand::Forward,
            0,
            4,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        );
        let evidence = extract_evidence(&read, &window(b"ACGT")).unwrap();
        assert_eq!(positions(&evidence), vec![0, 1, 2, 3]);
        assert!(evidence[..3].iter().all(|e| !e.is_mismatch()));
        assert_eq!(evidence[3].observed_base, b'A');
        assert_eq!(evidence[3].reference_base, b'T');
        assert!((evidence[3].error_probability - 0.01).abs() < 1e-12);
    }

    #[test]
    fn deletions_and_skips_advance_reference_only() {
        let read = ReadMessage::new(
            "CGCGT",
            "55555",
            Strand::Forward,
            1,
            10,
            vec![
                CigarOp::new(CigarOpKind::Match, 2),
                CigarOp::new(CigarOpKind::Deletion, 2),
                CigarOp::new(CigarOpKind::Skip, 2),
                CigarOp::new(CigarOpKind::Match, 3),
            ],
        );
        let evidence = extract_evidence(&read, &window(b"ACGTACGTACGT")).unwrap();
        assert_eq!(positions(&evidence), vec![1, 2, 7, 8, 9]);
    }

    #[test]
    fn insertions_and_leading_clips_consume_read_only() {
        let read = ReadMessage::new(
            "NNACTTGT",
            "!!555555",
            Strand::Forward,
            0,
            4,
            vec![
                CigarOp::new(CigarOpKind::HardClip, 5),
                CigarOp::new(CigarOpKind::SoftClip, 2),
                CigarOp::new(CigarOpKind::Match, 2),
                CigarOp::new(CigarOpKind::Insertion, 2),
                CigarOp::new(CigarOpKind::Match, 2),
            ],
        );
        let evidence = extract_evidence(&read, &window(b"ACGT")).unwrap();
        let observed: Vec<u8> = evidence.iter().map(|e| e.observed_base).collect();
        assert_eq!(positions(&evidence), vec![0, 1, 2, 3]);
        assert_eq!(observed, b"ACGT".to_vec());
    }

    #[test]
    fn explicit_query_start_skips_leading_soft_clip() {
        let cigar = vec![
            CigarOp::new(CigarOpKind::SoftClip, 2),
            CigarOp::new(CigarOpKind::Match, 4),
        ];
        let read = ReadMessage::new("TTACGT", "555555", Strand::Forward, 0, 4, cigar)
            .with_query_start(2);
        let evidence = extract_evidence(&read, &window(b"ACGT")).unwrap();
        let observed: Vec<u8> = evidence.iter().map(|e| e.observed_base).collect();
        assert_eq!(positions(&evidence), vec![0, 1, 2, 3]);
        assert_eq!(observed, b"ACGT".to_vec());
        assert!(evidence.iter().all(|e| !e.is_mismatch()));
    }

    #[test]
    fn feed_query_start_matches_derived_offset() {
        let json = r#"{"seq":"TTACGT","qual":"555555","strand":1,"pos":0,"end":4,"qstart":2,"cigartuples":[[2,4],[4,0]]}"#;
        let explicit: ReadMessage = serde_json::from_str(json).unwrap();
        let mut derived = explicit.clone();
        derived.query_start = None;

        let reference = window(b"ACGT");
        let explicit = extract_evidence(&explicit, &reference).unwrap();
        assert_eq!(explicit, extract_evidence(&derived, &reference).unwrap());
        assert_eq!(positions(&explicit), vec![0, 1, 2, 3]);
    }

    #[test]
    fn reverse_read_skips_clip_at_sequencing_start() {
        // Reference-order cigar 4M2S; the clip leads in sequencing orientation.
        let cigar = vec![
            CigarOp::new(CigarOpKind::Match, 4),
            CigarOp::new(CigarOpKind::SoftClip, 2),
        ];
        let read = ReadMessage::new("GGACGT", "!!5555", Strand::Reverse, 0, 4, cigar)
            .with_query_start(2);
        let mut evidence = extract_evidence(&read, &window(b"ACGT")).unwrap();
        evidence.sort_by_key(|e| e.position);
        assert_eq!(positions(&evidence), vec![0, 1, 2, 3]);
        assert!(evidence.iter().all(|e| !e.is_mismatch()));
        assert!(evidence.iter().all(|e| (e.error_probability - 0.01).abs() < 1e-12));
    }

    #[test]
    fn reverse_read_matches_forward_read() {
        let reference = window(b"ACGTACGTAC");
        let cigar = vec![
            CigarOp::new(CigarOpKind::Match, 2),
            CigarOp::new(CigarOpKind::Deletion, 2),
            CigarOp::new(CigarOpKind::Match, 3),
        ];
        let forward = ReadMessage::new("CGCGA", "+5?I5", Strand::Forward, 1, 8, cigar.clone());
        let reverse = ReadMessage::new("TCGCG", "5I?5+", Strand::Reverse, 1, 8, cigar);

        let mut fwd = extract_evidence(&forward, &reference).unwrap();
        let mut rev = extract_evidence(&reverse, &reference).unwrap();
        fwd.sort_by_key(|e| e.position);
        rev.sort_by_key(|e| e.position);
        assert_eq!(fwd, rev);
        assert_eq!(positions(&fwd), vec![1, 2, 5, 6, 7]);
        assert_eq!(fwd[4].observed_base, b'A');
    }

    #[test]
    fn window_bounds_exclude_outside_positions() {
        let contig = b"ACGTACGTAC";
        let reference = ReferenceWindow::slice(contig, 3, Some(6)).unwrap();
        let read = ReadMessage::new(
            "ACGTACGT",
            "55555555",
            Strand::Forward,
            0,
            8,
            vec![CigarOp::new(CigarOpKind::Match, 8)],
        );
        let evidence = extract_evidence(&read, &reference).unwrap();
        assert_eq!(positions(&evidence), vec![3, 4, 5]);

        let reverse = ReadMessage::new(
            "ACGTACGT",
            "55555555",
            Strand::Reverse,
            0,
            8,
            vec![CigarOp::new(CigarOpKind::Match, 8)],
        );
        let evidence = extract_evidence(&reverse, &reference).unwrap();
        assert_eq!(positions(&evidence), vec![3, 4, 5]);
    }

    #[test]
    fn read_outside_window_yields_nothing() {
        let reference = ReferenceWindow::slice(b"ACGTACGTAC", 0, Some(4)).unwrap();
        let read = ReadMessage::new(
            "ACGT",
            "5555",
            Strand::Forward,
            6,
            10,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        );
        assert!(extract_evidence(&read, &reference).unwrap().is_empty());
    }

    #[test]
    fn malformed_reads_are_rejected() {
        let reference = window(b"ACGT");
        let empty = ReadMessage::new("ACGT", "5555", Strand::Forward, 0, 4, vec![]);
        assert_eq!(
            extract_evidence(&empty, &reference).unwrap_err(),
            ReadError::EmptyCigar
        );

        let short_qual = ReadMessage::new(
            "ACGT",
            "55",
            Strand::Forward,
            0,
            4,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        );
        assert!(matches!(
            extract_evidence(&short_qual, &reference),
            Err(ReadError::QualityLengthMismatch { .. })
        ));

        let short_seq = ReadMessage::new(
            "AC",
            "55",
            Strand::Forward,
            0,
            4,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        );
        assert!(matches!(
            extract_evidence(&short_seq, &reference),
            Err(ReadError::SequenceTooShort { required: 4, available: 2 })
        ));

        let clipped_only = ReadMessage::new(
            "ACGT",
            "5555",
            Strand::Forward,
            0,
            4,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        )
        .with_query_start(2);
        assert_eq!(
            extract_evidence(&clipped_only, &reference).unwrap_err(),
            ReadError::SequenceTooShort { required: 6, available: 4 }
        );

        let huge_start = ReadMessage::new(
            "ACGT",
            "5555",
            Strand::Forward,
            0,
            4,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        )
        .with_query_start(usize::MAX);
        assert_eq!(
            extract_evidence(&huge_start, &reference).unwrap_err(),
            ReadError::QueryStartOutOfRange { query_start: usize::MAX, available: 4 }
        );

        let decoded: ReadMessage = serde_json::from_str(
            r#"{"seq":"ACGT","qual":"5555","strand":1,"pos":0,"end":4,"qstart":18446744073709551615,"cigartuples":[[4,0]]}"#,
        )
        .unwrap();
        assert!(matches!(
            extract_evidence(&decoded, &reference),
            Err(ReadError::QueryStartOutOfRange { available: 4, .. })
        ));

        let bad_span = ReadMessage::new(
            "ACGT",
            "5555",
            Strand::Reverse,
            0,
            2,
            vec![CigarOp::new(CigarOpKind::Match, 4)],
        );
        assert!(matches!(
            extract_evidence(&bad_span, &reference),
            Err(ReadError::SpanMismatch { .. })
        ));
    }
}
