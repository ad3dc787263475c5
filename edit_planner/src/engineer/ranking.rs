//! Composite ranking of scored candidates.

use std::cmp::Ordering;

use crate::config::RankingWeights;
use crate::models::GuideCandidate;

/// Weighted mean of on-target efficiency and specificity (1 - risk).
pub fn composite_score(on_target: f64, off_target_risk: f64, weights: &RankingWeights) -> f64 {
    let total = weights.on_target + weights.specificity;
    if total <= 0.0 {
        return 0.0;
    }
    (weights.on_target * on_target + weights.specificity * (1.0 - off_target_risk)) / total
}

/// Best first: higher composite, then fewer off-target hits, then the
/// earliest site, then forward before reverse.
pub fn compare_candidates(a: &GuideCandidate, b: &GuideCandidate) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then(a.off_targets.total_hits.cmp(&b.off_targets.total_hits))
        .then(a.site.start.cmp(&b.site.start))
        .then(a.strand.cmp(&b.strand))
        .then(a.pam_position.cmp(&b.pam_position))
}

/// Sort `candidates` in place and number them from 1. Nothing is dropped.
pub fn rank(candidates: &mut [GuideCandidate]) {
    candidates.sort_by(compare_candidates);
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = i + 1;
    }
}
