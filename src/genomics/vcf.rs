use anyhow::{anyhow, Result};
use std::io::Write;

use super::{Genotype, Locus};

const HEADER: &str = "##fileformat=VCFv4.3\n##source=snpstream\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">\n\
##INFO=<ID=RO,Number=1,Type=Integer,Description=\"Reference observations\">\n\
##INFO=<ID=AO,Number=1,Type=Integer,Description=\"Alternate observations\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE\n";

/// Whether a locus is reported: it carries an alternate and its most likely
/// genotype is not homozygous reference.
pub fn is_variant(locus: &Locus) -> bool {
    reported_alternate(locus).is_some()
}

fn reported_alternate(locus: &Locus) -> Option<u8> {
    locus
        .alternate_base
        .filter(|_| locus.most_likely_genotype() != Genotype::HomRef)
}

/// Write variant loci in position order as a single-sample VCF.
pub fn write_vcf<W: Write>(writer: &mut W, contig: &str, loci: &[Locus]) -> Result<()> {
    writer.write_all(HEADER.as_bytes())?;

    let mut variants: Vec<(&Locus, u8)> = loci
        .iter()
        .filter_map(|locus| reported_alternate(locus).map(|alternate| (locus, alternate)))
        .collect();
    variants.sort_by_key(|(locus, _)| locus.position);

    for (locus, alternate) in variants {
        let gq = locus.genotype_quality();
        let line = format!(
            "{contig}\t{pos}\t.\t{ref_base}\t{alt_base}\t{qual:.2}\tPASS\tDP={depth};RO={ro};AO={ao}\tGT:GQ\t{gt}:{gq}\n",
            pos = locus.position,
            ref_base = locus.reference_base as char,
            alt_base = alternate as char,
            qual = gq,
            depth = locus.depth,
            ro = locus.ref_observations,
            ao = locus.alt_observations,
            gt = locus.most_likely_genotype().as_vcf(),
            gq = gq.round() as u32,
        );
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

/// Render variant loci into a VCF string (useful for tests and snapshots).
pub fn render_vcf(contig: &str, loci: &[Locus]) -> Result<String> {
    let mut buffer = Vec::new();
    write_vcf(&mut buffer, contig, loci)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("rendered VCF is not valid UTF-8"))
}
