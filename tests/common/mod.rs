#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use snpstream::genomics::{CigarOp, CigarOpKind, ReadMessage, ReferenceWindow, Strand};

const VCF_COLUMNS: [&str; 10] = [
    "CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT", "SAMPLE",
];

fn golden_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("golden")
        .join(name)
}

/// Split a VCF into its `#` header lines and its tab-separated records.
fn split_vcf(text: &str) -> (Vec<&str>, Vec<Vec<&str>>) {
    let (header, body): (Vec<&str>, Vec<&str>) = text
        .lines()
        .filter(|line| !line.is_empty())
        .partition(|line| line.starts_with('#'));
    (header, body.into_iter().map(|line| line.split('\t').collect()).collect())
}

/// Compare a rendered VCF against `tests/golden/<name>`, naming the first
/// record and column that differ. `SNPSTREAM_BLESS=1` rewrites the file.
pub fn assert_golden_vcf(name: &str, actual: &str) {
    let path = golden_path(name);
    if std::env::var_os("SNPSTREAM_BLESS").is_some() {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(&path, actual).unwrap();
        return;
    }
    compare_golden_vcf(name, actual);
}

/// Comparison half of [`assert_golden_vcf`]; never rewrites the golden file.
pub fn compare_golden_vcf(name: &str, actual: &str) {
    let path = golden_path(name);
    let golden = fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("cannot read golden VCF {}: {err}", path.display()));
    let (golden_header, golden_records) = split_vcf(&golden);
    let (actual_header, actual_records) = split_vcf(actual);

    assert_eq!(actual_header, golden_header, "VCF header differs from {name}");
    for (idx, (got, want)) in actual_records.iter().zip(&golden_records).enumerate() {
        let site = format!("{}:{}", want[0], want.get(1).copied().unwrap_or("?"));
        for (column, (got_field, want_field)) in VCF_COLUMNS.iter().zip(got.iter().zip(want)) {
            assert_eq!(
                got_field, want_field,
                "{name}: record {idx} ({site}) differs in {column}"
            );
        }
        assert_eq!(got.len(), want.len(), "{name}: record {idx} ({site}) column count");
    }
    assert_eq!(
        actual_records.len(),
        golden_records.len(),
        "{name}: record count differs"
    );
}

pub const REFERENCE: &[u8] = b"ACGTACGTAC";

pub fn full_window() -> ReferenceWindow {
    ReferenceWindow::new(0, REFERENCE.to_vec())
}

/// Ungapped forward read.
pub fn forward(seq: &str, qual: &str, pos: u64) -> ReadMessage {
    ReadMessage::new(
        seq,
        qual,
        Strand::Forward,
        pos,
        pos + seq.len() as u64,
        vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
    )
}

/// Ungapped reverse read given in sequencing orientation.
pub fn reverse(seq: &str, qual: &str, pos: u64) -> ReadMessage {
    ReadMessage::new(
        seq,
        qual,
        Strand::Reverse,
        pos,
        pos + seq.len() as u64,
        vec![CigarOp::new(CigarOpKind::Match, seq.len() as u32)],
    )
}

/// Reads covering [`REFERENCE`] on both strands: a heterozygous site at
/// 1-based 5 and 8, a homozygous alternate at 10, reference elsewhere.
pub fn mixed_strand_reads() -> Vec<ReadMessage> {
    let mut reads = Vec::new();
    for _ in 0..12 {
        reads.push(forward("GTTCG", "IIIII", 2));
    }
    reads.push(forward("ACGTACGAA", "555555555", 0));
    reads.push(reverse("TTCGTA", "IIIIII", 3));
    reads.push(forward("ACGTACGT", "????????", 0));
    for _ in 0..14 {
        reads.push(forward("AG", "55", 8));
    }
    reads
}
