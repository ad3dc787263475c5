//! Off-target search: a mismatch-bounded scan of the input sequence on both
//! strands, plus an optional genome-wide index.

use std::cmp::Ordering;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::EngineerConfig;
use crate::error::IndexError;
use crate::models::{DnaSequence, HitSource, IndexStatus, OffTargetProfile, OffTargetSite, Strand};
use crate::sequence::reverse_complement;

use super::pam::TargetSite;

// Positions scanned between two deadline checks.
const DEADLINE_STRIDE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexQuery<'a> {
    pub protospacer: &'a str,
    pub max_mismatches: u32,
    /// The index should stop and report `complete: false` once this passes.
    pub deadline: Option<Instant>,
}

/// One near-match reported by a genome index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub contig: Option<String>,
    pub position: usize,
    pub strand: Strand,
    pub mismatches: u32,
    /// Matched bases in guide orientation, when the index reports them.
    pub sequence: Option<String>,
    pub gene: Option<String>,
    pub essential: bool,
    /// Set by indexes that recognise the queried guide's own locus.
    pub on_target: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexSearch {
    pub hits: Vec<IndexHit>,
    pub complete: bool,
}

/// Genome-wide near-match search, implemented outside this crate.
pub trait GenomeIndex: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, query: &IndexQuery<'_>) -> Result<IndexSearch, IndexError>;
}

/// Mismatch weights in guide orientation: `distal` at the PAM-distal end,
/// rising linearly to 1.0 next to the PAM.
pub fn mismatch_weights(length: usize, distal: f64) -> Vec<f64> {
    match length {
        0 => Vec::new(),
        1 => vec![1.0],
        n => (0..n)
            .map(|i| distal + (1.0 - distal) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// 1 minus the weighted share of mismatched positions.
pub fn similarity(mismatched: impl IntoIterator<Item = usize>, weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let penalty: f64 = mismatched.into_iter().filter_map(|i| weights.get(i)).sum();
    (1.0 - penalty / total).clamp(0.0, 1.0)
}

/// Saturating risk from summed hit similarity; 0.0 for no hits.
pub fn risk_from_hits(sites: &[OffTargetSite], scale: f64) -> f64 {
    let load: f64 = sites.iter().map(|s| s.similarity).sum();
    1.0 - (-load / scale).exp()
}

/// Retained profile and risk for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct OffTargetSearch {
    pub profile: OffTargetProfile,
    pub risk: f64,
}

pub struct OffTargetSearcher<'a> {
    sequence: &'a DnaSequence,
    config: &'a EngineerConfig,
    index: Option<&'a dyn GenomeIndex>,
    weights: Vec<f64>,
}

impl<'a> OffTargetSearcher<'a> {
    pub fn new(sequence: &'a DnaSequence, config: &'a EngineerConfig, index: Option<&'a dyn GenomeIndex>) -> Self {
        Self {
            sequence,
            config,
            index,
            weights: mismatch_weights(config.protospacer_length, config.distal_mismatch_weight),
        }
    }

    pub fn search(&self, target: &TargetSite, deadline: Option<Instant>) -> OffTargetSearch {
        let (mut sites, local_complete) = self.scan_sequence(target, deadline);
        let mut truncated = !local_complete;

        let index_status = match self.index {
            None => IndexStatus::NotConfigured,
            Some(index) => {
                let query = IndexQuery {
                    protospacer: &target.protospacer,
                    max_mismatches: self.config.max_mismatches,
                    deadline,
                };
                match index.search(&query) {
                    Ok(found) => {
                        truncated |= !found.complete;
                        sites.extend(self.index_sites(&target.protospacer, found.hits));
                        IndexStatus::Searched
                    }
                    Err(e) => {
                        warn!(
                            "{} unavailable for {}{} ({}), using the input sequence only",
                            index.name(),
                            target.strand,
                            target.pam_position,
                            e
                        );
                        IndexStatus::Unavailable
                    }
                }
            }
        };

        sites.retain(|s| s.similarity >= self.config.min_similarity);
        sites.sort_by(compare_sites);
        let total_hits = sites.len();
        let risk = risk_from_hits(&sites, self.config.risk_scale);
        sites.truncate(self.config.top_k);

        if truncated {
            warn!(
                "Off-target search for {}{} hit the deadline, {} hit(s) so far",
                target.strand, target.pam_position, total_hits
            );
        } else {
            debug!("{}{}: {} off-target hit(s), risk {:.3}", target.strand, target.pam_position, total_hits, risk);
        }

        OffTargetSearch {
            profile: OffTargetProfile {
                sites,
                total_hits,
                truncated,
                index_status,
            },
            risk,
        }
    }

    /// Sliding comparison over both strands. Returns `false` with whatever
    /// was found when the deadline interrupts it.
    fn scan_sequence(&self, target: &TargetSite, deadline: Option<Instant>) -> (Vec<OffTargetSite>, bool) {
        let bases = self.sequence.bases().as_bytes();
        let guide = target.protospacer.as_bytes();
        let rc_guide = reverse_complement(&target.protospacer).into_bytes();
        let l = guide.len();
        let max = self.config.max_mismatches as usize;
        let mut hits = Vec::new();

        if l == 0 || bases.len() < l {
            return (hits, true);
        }

        for start in 0..=bases.len() - l {
            if start % DEADLINE_STRIDE == 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                return (hits, false);
            }
            let window = &bases[start..start + l];

            if !(target.strand == Strand::Forward && start == target.protospacer_start) {
                if let Some(mismatched) = mismatches_within(window, guide, max, |u| u) {
                    hits.push(self.local_site(start, Strand::Forward, mismatched));
                }
            }
            if !(target.strand == Strand::Reverse && start == target.protospacer_start) {
                // Window position u is guide position l - 1 - u on this strand.
                if let Some(mismatched) = mismatches_within(window, &rc_guide, max, |u| l - 1 - u) {
                    hits.push(self.local_site(start, Strand::Reverse, mismatched));
                }
            }
        }
        (hits, true)
    }

    fn local_site(&self, position: usize, strand: Strand, mismatched: Vec<usize>) -> OffTargetSite {
        OffTargetSite {
            position,
            strand,
            mismatches: mismatched.len() as u32,
            similarity: similarity(mismatched, &self.weights),
            source: HitSource::Sequence,
            gene: None,
            essential: false,
        }
    }

    fn index_sites(&self, guide: &str, hits: Vec<IndexHit>) -> Vec<OffTargetSite> {
        let max = self.config.max_mismatches;
        let mut hits: Vec<IndexHit> = hits.into_iter().filter(|hit| hit.mismatches <= max).collect();
        let reported = hits.len();
        hits.retain(|hit| !hit.on_target && !self.covered_locally(hit));

        // An index that searches the guide's own genome reports the guide
        // itself. When nothing above recognised it and the locus cannot be
        // placed, the first unplaceable perfect match is taken to be it.
        if hits.len() == reported {
            let own = hits.iter().position(|hit| {
                hit.mismatches == 0
                    && (self.sequence.origin().is_none() || hit.contig.is_none())
                    && hit.sequence.as_deref().map_or(true, |matched| matched == guide)
            });
            if let Some(i) = own {
                let hit = hits.remove(i);
                debug!("Dropping index hit at {} as the guide's own site", hit.position);
            }
        }

        hits.into_iter()
            .map(|hit| {
                let sim = match hit.sequence.as_deref() {
                    Some(matched) if matched.len() == guide.len() => {
                        let mismatched = guide.bytes().zip(matched.bytes()).enumerate().filter(|(_, (g, m))| g != m);
                        similarity(mismatched.map(|(i, _)| i), &self.weights)
                    }
                    // Count only: every mismatch weighs the mean weight.
                    _ => 1.0 - hit.mismatches as f64 / guide.len().max(1) as f64,
                };
                OffTargetSite {
                    position: hit.position,
                    strand: hit.strand,
                    mismatches: hit.mismatches,
                    similarity: sim.clamp(0.0, 1.0),
                    source: HitSource::GenomeIndex,
                    gene: hit.gene,
                    essential: hit.essential,
                }
            })
            .collect()
    }

    /// Index hits inside the input sequence's own locus are already covered
    /// by the local scan, the on-target site included.
    fn covered_locally(&self, hit: &IndexHit) -> bool {
        let (Some(origin), Some(contig)) = (self.sequence.origin(), hit.contig.as_deref()) else {
            return false;
        };
        let start = origin.start as usize;
        origin.contig == contig && (start..start + self.sequence.len()).contains(&hit.position)
    }
}

/// Mismatched guide positions of `window` against `pattern`, `None` once more
/// than `max` are found. `to_guide` maps a window offset to a guide position.
fn mismatches_within(window: &[u8], pattern: &[u8], max: usize, to_guide: impl Fn(usize) -> usize) -> Option<Vec<usize>> {
    let mut mismatched = Vec::new();
    for (u, (&w, &p)) in window.iter().zip(pattern).enumerate() {
        if w != p || w == b'N' {
            mismatched.push(to_guide(u));
            if mismatched.len() > max {
                return None;
            }
        }
    }
    Some(mismatched)
}

/// Descending similarity, then fewer mismatches, then position and strand.
pub fn compare_sites(a: &OffTargetSite, b: &OffTargetSite) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then(a.mismatches.cmp(&b.mismatches))
        .then(a.position.cmp(&b.position))
        .then(a.strand.cmp(&b.strand))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SequenceOrigin;

    const GUIDE: &str = "ACCTGAAC";

    fn config(top_k: usize) -> EngineerConfig {
        EngineerConfig {
            protospacer_length: 8,
            max_mismatches: 1,
            top_k,
            ..EngineerConfig::default()
        }
    }

    fn target_at(start: usize) -> TargetSite {
        TargetSite {
            strand: Strand::Forward,
            pam_position: start + 8,
            protospacer: GUIDE.to_string(),
            pam: "TGG".to_string(),
            protospacer_start: start,
            site: start..start + 11,
            cut_site: start + 5,
        }
    }

    struct FixedIndex(Result<IndexSearch, IndexError>);

    impl GenomeIndex for FixedIndex {
        fn name(&self) -> &str {
            "fixed"
        }

        fn search(&self, _query: &IndexQuery<'_>) -> Result<IndexSearch, IndexError> {
            self.0.clone()
        }
    }

    fn index_hit(contig: &str, position: usize, mismatches: u32, essential: bool) -> IndexHit {
        IndexHit {
            contig: Some(contig.to_string()),
            position,
            strand: Strand::Forward,
            mismatches,
            sequence: None,
            gene: essential.then(|| "POLR2A".to_string()),
            essential,
            on_target: false,
        }
    }

    fn unplaced_hit(position: usize, mismatches: u32) -> IndexHit {
        IndexHit {
            contig: None,
            ..index_hit("chrU", position, mismatches, false)
        }
    }

    #[test]
    fn proximal_mismatches_cost_more() {
        let w = mismatch_weights(5, 0.2);
        assert!((w[0] - 0.2).abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
        assert!(similarity([0], &w) > similarity([4], &w));
        assert_eq!(similarity([], &w), 1.0);
    }

    #[test]
    fn local_scan_skips_the_candidate_itself() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTTTTACCTGATCTT").unwrap();
        let cfg = config(10);
        let found = OffTargetSearcher::new(&seq, &cfg, None).search(&target_at(2), None);

        assert_eq!(found.profile.total_hits, 1);
        let hit = &found.profile.sites[0];
        assert_eq!((hit.position, hit.strand, hit.mismatches), (17, Strand::Forward, 1));
        assert_eq!(hit.source, HitSource::Sequence);
        assert_eq!(found.profile.index_status, IndexStatus::NotConfigured);
        assert!(!found.profile.truncated);
        assert!(found.risk > 0.0 && found.risk < 1.0);
    }

    #[test]
    fn retains_top_k_by_similarity() {
        let seq = DnaSequence::new("s", "ACCTGAACTGGCACCTGAAGCACGTGAACCTCCTGAACC").unwrap();
        let cfg = config(2);
        let found = OffTargetSearcher::new(&seq, &cfg, None).search(&target_at(0), None);

        assert_eq!(found.profile.total_hits, 3);
        let positions: Vec<usize> = found.profile.sites.iter().map(|s| s.position).collect();
        // Distal mismatch at 30, then 21; the proximal one at 12 is dropped.
        assert_eq!(positions, vec![30, 21]);
        assert!((found.profile.sites[0].similarity - 0.95).abs() < 1e-9);
    }

    #[test]
    fn no_hits_means_no_risk() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTTTTTTTTT").unwrap();
        let cfg = config(10);
        let found = OffTargetSearcher::new(&seq, &cfg, None).search(&target_at(2), None);
        assert_eq!(found.profile.total_hits, 0);
        assert_eq!(found.risk, 0.0);
    }

    #[test]
    fn expired_deadline_truncates() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTTTTACCTGATCTT").unwrap();
        let cfg = config(10);
        let found = OffTargetSearcher::new(&seq, &cfg, None).search(&target_at(2), Some(Instant::now()));
        assert!(found.profile.truncated);
        assert!(found.profile.sites.is_empty());
    }

    #[test]
    fn unavailable_index_falls_back_to_sequence() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTTTTACCTGATCTT").unwrap();
        let cfg = config(10);
        let index = FixedIndex(Err(IndexError::Unavailable("offline".into())));
        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);
        assert_eq!(found.profile.index_status, IndexStatus::Unavailable);
        assert_eq!(found.profile.total_hits, 1);
    }

    #[test]
    fn index_hits_are_merged_and_own_locus_dropped() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTTTTACCTGATCTT")
            .unwrap()
            .with_origin(SequenceOrigin { contig: "chr7".into(), start: 1_000, strand: Strand::Forward });
        let cfg = config(10);
        let index = FixedIndex(Ok(IndexSearch {
            hits: vec![
                // The on-target locus itself.
                index_hit("chr7", 1_002, 0, false),
                index_hit("chr3", 5_000, 0, true),
                index_hit("chr1", 42, 1, false),
                index_hit("chr1", 99, 3, false),
            ],
            complete: false,
        }));
        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);

        assert_eq!(found.profile.index_status, IndexStatus::Searched);
        assert!(found.profile.truncated);
        assert_eq!(found.profile.total_hits, 3);
        let first = &found.profile.sites[0];
        assert_eq!((first.position, first.mismatches, first.essential), (5_000, 0, true));
        assert_eq!(first.similarity, 1.0);
        assert_eq!(first.source, HitSource::GenomeIndex);
    }

    #[test]
    fn reported_bases_give_positional_similarity() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTT").unwrap();
        let cfg = config(10);
        let mut distal = index_hit("chr2", 10, 1, false);
        distal.sequence = Some("TCCTGAAC".to_string());
        let mut proximal = index_hit("chr2", 20, 1, false);
        proximal.sequence = Some("ACCTGAAG".to_string());
        let index = FixedIndex(Ok(IndexSearch { hits: vec![proximal, distal], complete: true }));

        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);
        let positions: Vec<usize> = found.profile.sites.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![10, 20]);
        assert!(found.profile.sites.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn unplaced_perfect_hit_is_the_guide_itself() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTT").unwrap();
        let cfg = config(10);
        let index = FixedIndex(Ok(IndexSearch {
            hits: vec![unplaced_hit(0, 0), unplaced_hit(300, 1)],
            complete: true,
        }));
        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);

        assert_eq!(found.profile.total_hits, 1);
        assert_eq!(found.profile.sites[0].position, 300);
    }

    #[test]
    fn only_one_unplaced_perfect_hit_is_dropped() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTT").unwrap();
        let cfg = config(10);
        let index = FixedIndex(Ok(IndexSearch {
            hits: vec![unplaced_hit(0, 0), unplaced_hit(700, 0)],
            complete: true,
        }));
        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);

        assert_eq!(found.profile.total_hits, 1);
        assert_eq!(found.profile.sites[0].position, 700);
        assert_eq!(found.profile.sites[0].similarity, 1.0);
    }

    #[test]
    fn tagged_on_target_hit_is_dropped_without_a_locus() {
        let seq = DnaSequence::new("s", "TTACCTGAACTGGTT").unwrap();
        let cfg = config(10);
        let mut own = index_hit("chr5", 77, 0, false);
        own.on_target = true;
        let index = FixedIndex(Ok(IndexSearch {
            hits: vec![index_hit("chr9", 12, 0, true), own],
            complete: true,
        }));
        let found = OffTargetSearcher::new(&seq, &cfg, Some(&index)).search(&target_at(2), None);

        // The tag identified the own site, so the other perfect hit stays.
        assert_eq!(found.profile.total_hits, 1);
        assert_eq!((found.profile.sites[0].position, found.profile.sites[0].essential), (12, true));
    }
}
