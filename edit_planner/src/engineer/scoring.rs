//! On-target efficiency terms.
//!
//! Every term lies in [0, 1]. The score is the weighted mean of the terms that
//! apply to a spacer, so it lies in [0, 1] as well.

use serde::{Deserialize, Serialize};

use crate::config::OnTargetWeights;
use crate::models::Manufacturability;
use crate::sequence::pairs;

/// Closeness of `gc` to `optimum`, 1.0 at the optimum and 0.0 at the far end
/// of [0, 1].
pub fn gc_term(gc: f64, optimum: f64) -> f64 {
    let span = optimum.max(1.0 - optimum);
    if span <= 0.0 {
        return 1.0;
    }
    (1.0 - (gc - optimum).abs() / span).clamp(0.0, 1.0)
}

/// Hairpin penalty of a spacer.
///
/// Each maximal self-complementary stem of at least `min_stem` pairs closing
/// a loop of at least `min_loop` bases adds `stem - min_stem + 1`. Depends on
/// the bases only, never on where the spacer sits.
pub fn structure_penalty(protospacer: &str, min_stem: usize, min_loop: usize) -> f64 {
    let s = protospacer.as_bytes();
    let n = s.len();
    let min_stem = min_stem.max(1);
    let mut penalty = 0usize;

    for i in 0..n {
        for j in (i + 1)..n {
            if !pairs(s[i], s[j]) {
                continue;
            }
            // Only count a stem from its outermost pair.
            if i > 0 && j + 1 < n && pairs(s[i - 1], s[j + 1]) {
                continue;
            }
            let mut stem = 0;
            while i + stem < j - stem && pairs(s[i + stem], s[j - stem]) {
                let loop_len = (j - stem) - (i + stem) - 1;
                if loop_len < min_loop {
                    break;
                }
                stem += 1;
            }
            if stem >= min_stem {
                penalty += stem - min_stem + 1;
            }
        }
    }
    penalty as f64
}

/// Maps a penalty onto (0, 1]; `half_point` is the penalty scoring one half.
pub fn structure_term(penalty: f64, half_point: f64) -> f64 {
    half_point / (half_point + penalty.max(0.0))
}

/// Binding strength of a base at the PAM-proximal end of the seed.
pub fn seed_strength(base: u8) -> f64 {
    match base {
        b'G' | b'C' => 1.0,
        b'A' => 0.75,
        b'T' => 0.4,
        _ => 0.0,
    }
}

/// Mean of motif specificity and seed strength of the spacer's last base.
pub fn pam_strength(motif_specificity: f64, protospacer: &str) -> f64 {
    let seed = protospacer.bytes().last().map_or(0.0, seed_strength);
    0.5 * motif_specificity.clamp(0.0, 1.0) + 0.5 * seed
}

/// Position-specific nucleotide scores for a 20-nt spacer, rows A, C, G, T;
/// column 0 is the PAM-distal base.
const POSITION_SCORES: [[f64; 20]; 4] = [
    [0.322, 0.409, 0.324, 0.072, 0.039, 0.143, 0.178, -0.013, 0.439, 0.458, 0.318, 0.254, -0.242, 0.291, 0.106, 0.151, -0.191, -0.673, -0.523, 0.048],
    [-0.776, -0.131, -0.5, -0.143, -0.059, -0.079, 0.017, 0.03, -0.245, -0.092, -0.107, 0.174, 0.509, -0.163, -0.108, 0.366, 0.177, 1.0, 0.075, -0.631],
    [0.281, -0.103, 0.088, 0.437, 0.11, 0.344, 0.169, 0.003, 0.013, 0.103, 0.052, -0.431, -0.056, -0.585, -0.223, -0.377, 0.012, -0.326, 0.442, 0.584],
    [0.172, -0.174, 0.087, -0.367, -0.207, -0.402, -0.365, -0.014, -0.206, -0.468, -0.258, 0.006, -0.209, 0.461, 0.227, -0.144, -1.0, -1.0, -1.0, -1.0],
];

/// Lowest and highest raw sums any spacer can reach: the per-position column
/// extremes added up.
fn position_score_bounds() -> (f64, f64) {
    (0..20).fold((0.0, 0.0), |(lo, hi), pos| {
        let column = POSITION_SCORES.iter().map(|row| row[pos]);
        let (min, max) = column.fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| (a.min(v), b.max(v)));
        (lo + min, hi + max)
    })
}

fn nucleotide_index(base: u8) -> Option<usize> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Matrix score rescaled to [0, 1]. `None` unless the spacer is 20 nt of A/C/G/T.
pub fn position_matrix_score(protospacer: &str) -> Option<f64> {
    if protospacer.len() != 20 {
        return None;
    }
    let mut raw = 0.0;
    for (pos, base) in protospacer.bytes().enumerate() {
        raw += POSITION_SCORES[nucleotide_index(base)?][pos];
    }
    let (min, max) = position_score_bounds();
    let scaled = (raw - min) / (max - min);
    Some(scaled.clamp(0.0, 1.0))
}

/// Consecutive complementary pairs reading inwards from both ends.
pub fn end_complementarity(protospacer: &str) -> usize {
    let s = protospacer.as_bytes();
    let n = s.len();
    (0..n / 2).take_while(|&i| pairs(s[i], s[n - 1 - i])).count()
}

pub fn manufacturability(protospacer: &str) -> Manufacturability {
    Manufacturability {
        poly_t_terminator: protospacer.contains("TTTT"),
        needs_g_prefix: !protospacer.starts_with('G'),
        end_complementarity: end_complementarity(protospacer),
    }
}

/// Inputs of the on-target score for one spacer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnTargetFeatures {
    pub gc_content: f64,
    pub structure_penalty: f64,
    pub pam_strength: f64,
    pub position_matrix: Option<f64>,
}

impl OnTargetFeatures {
    /// Weighted mean of the applicable terms. The matrix term drops out (with
    /// its weight) when it does not apply.
    pub fn score(&self, weights: &OnTargetWeights, gc_optimum: f64, half_point: f64) -> f64 {
        let mut terms = vec![
            (weights.gc, gc_term(self.gc_content, gc_optimum)),
            (weights.structure, structure_term(self.structure_penalty, half_point)),
            (weights.pam_strength, self.pam_strength),
        ];
        if let Some(matrix) = self.position_matrix {
            terms.push((weights.position_matrix, matrix));
        }
        let total: f64 = terms.iter().map(|(w, _)| w).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = terms.iter().map(|(w, v)| w * v).sum();
        (weighted / total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gc_term_peaks_at_optimum() {
        assert_eq!(gc_term(0.5, 0.5), 1.0);
        assert_eq!(gc_term(0.0, 0.5), 0.0);
        assert_eq!(gc_term(1.0, 0.5), 0.0);
        assert!((gc_term(0.75, 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn hairpin_is_penalised() {
        assert_eq!(structure_penalty("GGGGAAAACCCC", 4, 3), 1.0);
        // Loop too short.
        assert_eq!(structure_penalty("GGGGACCCC", 4, 3), 0.0);
        assert_eq!(structure_penalty("AAAAAAAAAAAAAAAAAAAA", 4, 3), 0.0);
    }

    #[test]
    fn structure_is_position_independent() {
        let a = structure_penalty("GGGGAAAACCCCAA", 4, 3);
        let b = structure_penalty("AAGGGGAAAACCCC", 4, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn seed_and_pam_strength() {
        assert_eq!(seed_strength(b'G'), 1.0);
        assert!(seed_strength(b'A') > seed_strength(b'T'));
        assert!((pam_strength(2.0 / 3.0, "ACGTG") - (1.0 / 3.0 + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn position_matrix_needs_twenty_clean_bases() {
        assert!(position_matrix_score("ACGT").is_none());
        assert!(position_matrix_score("ACGTACGTACGTACGTACGN").is_none());
        let s = position_matrix_score("GACGCATAAAGATGAGACGC").unwrap();
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn position_matrix_spans_the_whole_unit_range() {
        let (min, max) = position_score_bounds();
        assert!((min - -9.634).abs() < 1e-9);
        assert!((max - 7.389).abs() < 1e-9);

        let extreme = |pick: fn(f64, f64) -> bool| -> String {
            (0..20)
                .map(|pos| {
                    let best = (0..4).reduce(|a, b| if pick(POSITION_SCORES[b][pos], POSITION_SCORES[a][pos]) { b } else { a });
                    b"ACGT"[best.unwrap_or(0)] as char
                })
                .collect()
        };
        let strongest = extreme(|a, b| a > b);
        let weakest = extreme(|a, b| a < b);
        assert!((position_matrix_score(&strongest).unwrap() - 1.0).abs() < 1e-9);
        assert!(position_matrix_score(&weakest).unwrap().abs() < 1e-9);
    }

    #[test]
    fn manufacturing_flags() {
        let m = manufacturability("ACGTTTTACGT");
        assert!(m.poly_t_terminator);
        assert!(m.needs_g_prefix);
        assert_eq!(m.end_complementarity, 4);
        assert!(!manufacturability("GACCA").poly_t_terminator);
        assert!(!manufacturability("GACCA").needs_g_prefix);
    }

    #[test]
    fn missing_matrix_term_drops_its_weight() {
        let features = OnTargetFeatures { gc_content: 0.5, structure_penalty: 0.0, pam_strength: 1.0, position_matrix: None };
        let score = features.score(&OnTargetWeights::default(), 0.5, 4.0);
        assert!((score - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn lower_penalty_never_lowers_score(
            gc in 0.0f64..=1.0,
            pam in 0.0f64..=1.0,
            matrix in proptest::option::of(0.0f64..=1.0),
            low in 0.0f64..50.0,
            extra in 0.0f64..50.0,
        ) {
            let weights = OnTargetWeights::default();
            let better = OnTargetFeatures { gc_content: gc, structure_penalty: low, pam_strength: pam, position_matrix: matrix };
            let worse = OnTargetFeatures { structure_penalty: low + extra, ..better };
            let (b, w) = (better.score(&weights, 0.5, 4.0), worse.score(&weights, 0.5, 4.0));
            prop_assert!(b >= w);
            prop_assert!((0.0..=1.0).contains(&b));
        }
    }
}
