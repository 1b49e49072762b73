//! Phred quality conversions.
//!
//! Quality strings use the Sanger encoding: each character is the phred score
//! plus [`PHRED_OFFSET`].

/// ASCII offset of Sanger-encoded quality characters.
pub const PHRED_OFFSET: u8 = 33;

/// Phred-scale an error probability: `-10 * log10(p)`.
pub fn to_phred(error_probability: f64) -> f64 {
    -10.0 * error_probability.log10()
}

/// Error probability for a phred score: `10^(-q/10)`.
pub fn from_phred(phred: f64) -> f64 {
    10f64.powf(-phred / 10.0)
}

/// Phred score encoded by one quality character (0 for characters below the offset).
pub fn decode_quality(symbol: u8) -> u8 {
    symbol.saturating_sub(PHRED_OFFSET)
}

/// Error probability encoded by one quality character.
pub fn error_probability(symbol: u8) -> f64 {
    from_phred(f64::from(decode_quality(symbol)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b'!', 1.0 ; "q0")]
    #[test_case(b'+', 0.1 ; "q10")]
    #[test_case(b'5', 0.01 ; "q20")]
    #[test_case(b'?', 0.001 ; "q30")]
    fn decodes_quality_characters(symbol: u8, expected: f64) {
        assert!((error_probability(symbol) - expected).abs() < 1e-12);
    }

    #[test]
    fn phred_round_trip() {
        for q in [2.0, 13.0, 20.0, 37.0, 60.0] {
            assert!((to_phred(from_phred(q)) - q).abs() < 1e-9);
        }
    }

    #[test]
    fn characters_below_offset_saturate() {
        assert_eq!(decode_quality(b' '), 0);
        assert_eq!(error_probability(b'\n'), 1.0);
    }
}
