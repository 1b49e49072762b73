use serde::{Deserialize, Serialize};

use crate::genomics::phred::to_phred;
use crate::genomics::Evidence;

/// Floor applied to a genotype likelihood that underflows to exactly zero.
pub const MIN_GENOTYPE_LIKELIHOOD: f64 = 1e-300;

/// Population heterozygosity used when none is configured.
pub const DEFAULT_HETEROZYGOSITY: f64 = 8e-4;

/// Highest genotype quality reported.
pub const MAX_GENOTYPE_QUALITY: f64 = 99.0;

/// Genotype priors seeded into every new [`Locus`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenotypePriors {
    /// Prior of the homozygous-reference genotype.
    pub ref_hom: f64,
    /// Prior of the heterozygous genotype.
    pub het: f64,
    /// Prior of the homozygous-alternate genotype.
    pub alt_hom: f64,
}

impl GenotypePriors {
    /// Derive priors from a heterozygosity `h`: `het = h`, `alt_hom = h^2`,
    /// `ref_hom = 1 - het - alt_hom`.
    pub fn from_heterozygosity(heterozygosity: f64) -> Self {
        let het = heterozygosity;
        let alt_hom = heterozygosity * heterozygosity;
        Self {
            ref_hom: 1.0 - het - alt_hom,
            het,
            alt_hom,
        }
    }
}

impl Default for GenotypePriors {
    fn default() -> Self {
        Self::from_heterozygosity(DEFAULT_HETEROZYGOSITY)
    }
}

/// Diploid genotype hypotheses for a biallelic site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Genotype {
    /// Both alleles match the reference.
    HomRef,
    /// One reference and one alternate allele.
    Het,
    /// Both alleles are the alternate.
    HomAlt,
}

impl Genotype {
    /// VCF `GT` field.
    pub fn as_vcf(self) -> &'static str {
        match self {
            Genotype::HomRef => "0/0",
            Genotype::Het => "0/1",
            Genotype::HomAlt => "1/1",
        }
    }
}

/// Accumulated genotype-likelihood state for one reference position.
///
/// Only one alternate allele is tracked; each new mismatch overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locus {
    /// 1-based reference coordinate.
    pub position: u64,
    /// Reference base, fixed at creation.
    pub reference_base: u8,
    /// Most recently observed mismatching base.
    pub alternate_base: Option<u8>,
    /// Number of evidence tuples folded in.
    pub depth: u32,
    /// Evidence agreeing with the reference.
    pub ref_observations: u32,
    /// Evidence disagreeing with the reference.
    pub alt_observations: u32,
    /// Sum of phred qualities over reference observations.
    pub ref_quality_sum: f64,
    /// Sum of phred qualities over alternate observations.
    pub alt_quality_sum: f64,
    /// Unnormalised likelihood of the homozygous-reference genotype.
    pub gl_ref_hom: f64,
    /// Unnormalised likelihood of the heterozygous genotype.
    pub gl_het: f64,
    /// Unnormalised likelihood of the homozygous-alternate genotype.
    pub gl_alt_hom: f64,
}

impl Locus {
    /// Fresh locus for a 0-based position, seeded with `priors`.
    pub fn new(raw_position: u64, reference_base: u8, priors: &GenotypePriors) -> Self {
        Self {
            position: raw_position + 1,
            reference_base,
            alternate_base: None,
            depth: 0,
            ref_observations: 0,
            alt_observations: 0,
            ref_quality_sum: 0.0,
            alt_quality_sum: 0.0,
            gl_ref_hom: priors.ref_hom,
            gl_het: priors.het,
            gl_alt_hom: priors.alt_hom,
        }
    }

    /// Storage key (the 0-based position).
    pub fn key(&self) -> u64 {
        self.position - 1
    }

    /// Fold one evidence tuple into the accumulated state.
    pub fn observe(&mut self, evidence: &Evidence) {
        debug_assert_eq!(evidence.position, self.key());
        let p_error = evidence.error_probability;

        self.depth += 1;
        self.gl_het *= 0.5;

        if evidence.observed_base != self.reference_base {
            self.alternate_base = Some(evidence.observed_base);
            self.gl_ref_hom *= p_error;
            self.gl_alt_hom *= 1.0 - p_error;
            self.alt_observations += 1;
            self.alt_quality_sum += to_phred(p_error);
        } else {
            self.gl_ref_hom *= 1.0 - p_error;
            self.gl_alt_hom *= p_error;
            self.ref_observations += 1;
            self.ref_quality_sum += to_phred(p_error);
        }

        for gl in [&mut self.gl_ref_hom, &mut self.gl_het, &mut self.gl_alt_hom] {
            if *gl == 0.0 {
                *gl = MIN_GENOTYPE_LIKELIHOOD;
            }
        }
    }

    /// Genotype with the highest likelihood; ties favour the reference.
    pub fn most_likely_genotype(&self) -> Genotype {
        let mut best = (Genotype::HomRef, self.gl_ref_hom);
        for candidate in [(Genotype::Het, self.gl_het), (Genotype::HomAlt, self.gl_alt_hom)] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best.0
    }

    /// Phred-scaled margin between the best and second-best genotype,
    /// capped at [`MAX_GENOTYPE_QUALITY`].
    pub fn genotype_quality(&self) -> f64 {
        let mut gls = [self.gl_ref_hom, self.gl_het, self.gl_alt_hom];
        gls.sort_by(|a, b| b.total_cmp(a));
        let margin = 10.0 * (gls[0].log10() - gls[1].log10());
        margin.clamp(0.0, MAX_GENOTYPE_QUALITY)
    }

    /// Fraction of depth supporting the alternate base.
    pub fn allele_fraction(&self) -> f64 {
        if self.depth == 0 {
            return 0.0;
        }
        f64::from(self.alt_observations) / f64::from(self.depth)
    }
}
