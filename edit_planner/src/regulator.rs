//! Safety rules applied to ranked candidates.
//!
//! Evaluation is a pure function of the candidate, the annotated variants
//! and the configuration.

use tracing::{debug, info};

use crate::config::RegulatorConfig;
use crate::models::{
    CandidateId, ClinicalSignificance, GuideCandidate, HitSource, RiskTier, RuleId, RuleViolation, ValidationResult,
    Variant,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// One result per evaluated candidate, in rank order.
    pub results: Vec<(CandidateId, ValidationResult)>,
}

impl ValidationReport {
    pub fn tier_counts(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for (_, r) in &self.results {
            counts[r.tier as usize] += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Default)]
pub struct Regulator {
    config: RegulatorConfig,
}

impl Regulator {
    pub fn new(config: RegulatorConfig) -> Self {
        Self { config }
    }

    /// Validate the configured top-N (or all) candidates.
    pub fn validate(&self, candidates: &[GuideCandidate], variants: &[Variant]) -> ValidationReport {
        let n = self.config.top_n.unwrap_or(candidates.len()).min(candidates.len());
        let results: Vec<(CandidateId, ValidationResult)> = candidates[..n]
            .iter()
            .map(|c| (c.id.clone(), self.evaluate(c, variants)))
            .collect();

        let report = ValidationReport { results };
        let [low, medium, high, rejected] = report.tier_counts();
        info!(
            "Validated {} of {} candidate(s): {} low, {} medium, {} high, {} rejected",
            n,
            candidates.len(),
            low,
            medium,
            high,
            rejected
        );
        report
    }

    /// Apply every rule in order. The tier is the most severe violation, LOW
    /// when there is none.
    pub fn evaluate(&self, candidate: &GuideCandidate, variants: &[Variant]) -> ValidationResult {
        let cfg = &self.config;
        let profile = &candidate.off_targets;
        let mut violations = Vec::new();

        if profile.total_hits > cfg.max_off_targets {
            violations.push(RuleViolation {
                rule: RuleId::OffTargetLimit,
                tier: RiskTier::Rejected,
                rationale: format!(
                    "{} off-target hits exceed the limit of {}",
                    profile.total_hits, cfg.max_off_targets
                ),
            });
        }

        let spacer_len = candidate.protospacer.len().max(1);
        for site in profile.sites.iter().filter(|s| s.source == HitSource::Sequence) {
            let span = site.position..site.position + spacer_len;
            if let Some(v) = variants.iter().find(|v| is_sensitive(v) && v.overlaps(&span)) {
                violations.push(RuleViolation {
                    rule: RuleId::ClinicalRegionHit,
                    tier: RiskTier::High,
                    rationale: format!(
                        "off-target at {}{} ({} mismatches) covers clinically relevant variant {}",
                        site.strand,
                        site.position,
                        site.mismatches,
                        v.id
                    ),
                });
            }
        }

        for site in profile.sites.iter().filter(|s| s.essential && s.mismatches <= cfg.essential_mismatch_limit) {
            violations.push(RuleViolation {
                rule: RuleId::EssentialGeneHit,
                tier: RiskTier::High,
                rationale: format!(
                    "off-target in essential gene {} with {} mismatches",
                    site.gene.as_deref().unwrap_or("(unnamed)"),
                    site.mismatches
                ),
            });
        }

        if let Some(site) = profile.sites.iter().find(|s| s.mismatches == 0) {
            violations.push(RuleViolation {
                rule: RuleId::PerfectOffTarget,
                tier: RiskTier::High,
                rationale: format!("perfect off-target match at {}{}", site.strand, site.position),
            });
        }

        if candidate.on_target < cfg.min_efficiency {
            violations.push(RuleViolation {
                rule: RuleId::LowEfficiency,
                tier: RiskTier::Medium,
                rationale: format!(
                    "on-target efficiency {:.3} below the floor of {:.3}",
                    candidate.on_target, cfg.min_efficiency
                ),
            });
        }

        if profile.truncated {
            violations.push(RuleViolation {
                rule: RuleId::IncompleteSearch,
                tier: RiskTier::Medium,
                rationale: "off-target search stopped at the run deadline".to_string(),
            });
        }

        if candidate.manufacturing.poly_t_terminator {
            violations.push(RuleViolation {
                rule: RuleId::PolyTTerminator,
                tier: RiskTier::Medium,
                rationale: "spacer contains TTTT, a Pol III terminator".to_string(),
            });
        }

        let tier = violations.iter().map(|v| v.tier).max().unwrap_or(RiskTier::Low);
        debug!("Candidate {} -> {:?} ({} violation(s))", candidate.id, tier, violations.len());
        ValidationResult {
            tier,
            passed: tier <= RiskTier::Medium,
            violations,
        }
    }
}

fn is_sensitive(variant: &Variant) -> bool {
    variant
        .annotation
        .as_ref()
        .is_some_and(|a| a.clinically_relevant || a.significance == ClinicalSignificance::Pathogenic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Accessibility, IndexStatus, Manufacturability, OffTargetProfile, OffTargetSite, Strand, VariantAnnotation,
    };
    use proptest::prelude::*;

    fn site(position: usize, mismatches: u32) -> OffTargetSite {
        OffTargetSite {
            position,
            strand: Strand::Forward,
            mismatches,
            similarity: 1.0 - mismatches as f64 * 0.1,
            source: HitSource::Sequence,
            gene: None,
            essential: false,
        }
    }

    fn candidate(on_target: f64, sites: Vec<OffTargetSite>) -> GuideCandidate {
        GuideCandidate {
            id: CandidateId::new(Strand::Forward, 20),
            protospacer: "GACGCATAAAGATGAGACGC".into(),
            pam: "TGG".into(),
            strand: Strand::Forward,
            pam_position: 20,
            site: 0..23,
            cut_site: 17,
            gc_content: 0.5,
            structure_penalty: 0.0,
            on_target,
            off_target_risk: 0.0,
            composite: on_target,
            rank: 1,
            off_targets: OffTargetProfile {
                total_hits: sites.len(),
                sites,
                truncated: false,
                index_status: IndexStatus::NotConfigured,
            },
            manufacturing: Manufacturability { poly_t_terminator: false, needs_g_prefix: false, end_complementarity: 0 },
            nearest_variant: None,
            cut_distance: None,
            pam_shield: None,
            repair: None,
        }
    }

    fn pathogenic(position: usize) -> Variant {
        let mut v = Variant::new(position, "A", "G").unwrap();
        v.annotation = Some(VariantAnnotation {
            significance: ClinicalSignificance::Pathogenic,
            clinically_relevant: true,
            accessibility: Accessibility::Open,
            ..VariantAnnotation::unknown()
        });
        v
    }

    fn rules(result: &ValidationResult) -> Vec<RuleId> {
        result.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn clean_candidate_is_low() {
        let result = Regulator::default().evaluate(&candidate(0.9, Vec::new()), &[]);
        assert_eq!(result.tier, RiskTier::Low);
        assert!(result.violations.is_empty());
        assert!(result.passed);
    }

    #[test]
    fn too_many_hits_rejects_but_keeps_every_violation() {
        let reg = Regulator::new(RegulatorConfig { max_off_targets: 2, ..RegulatorConfig::default() });
        let hits = vec![site(40, 1), site(60, 2), site(80, 3)];
        let result = reg.evaluate(&candidate(0.1, hits), &[]);
        assert_eq!(result.tier, RiskTier::Rejected);
        assert_eq!(rules(&result), vec![RuleId::OffTargetLimit, RuleId::LowEfficiency]);
        assert!(!result.passed);
        assert!(!result.is_suitable());
    }

    #[test]
    fn hit_over_clinical_variant_is_high() {
        let result = Regulator::default().evaluate(&candidate(0.9, vec![site(100, 2)]), &[pathogenic(110)]);
        assert_eq!(result.tier, RiskTier::High);
        assert_eq!(rules(&result), vec![RuleId::ClinicalRegionHit]);

        let clear = Regulator::default().evaluate(&candidate(0.9, vec![site(100, 2)]), &[pathogenic(120)]);
        assert_eq!(clear.tier, RiskTier::Low);
    }

    #[test]
    fn essential_and_perfect_hits_are_high() {
        let mut essential = site(300, 2);
        essential.source = HitSource::GenomeIndex;
        essential.essential = true;
        essential.gene = Some("RPL11".into());
        let result = Regulator::default().evaluate(&candidate(0.9, vec![site(200, 0), essential]), &[]);
        assert_eq!(result.tier, RiskTier::High);
        assert_eq!(rules(&result), vec![RuleId::EssentialGeneHit, RuleId::PerfectOffTarget]);
    }

    #[test]
    fn design_concerns_are_medium_and_pass() {
        let mut c = candidate(0.2, Vec::new());
        c.off_targets.truncated = true;
        c.manufacturing.poly_t_terminator = true;
        let result = Regulator::default().evaluate(&c, &[]);
        assert_eq!(result.tier, RiskTier::Medium);
        assert_eq!(rules(&result), vec![RuleId::LowEfficiency, RuleId::IncompleteSearch, RuleId::PolyTTerminator]);
        assert!(result.passed);
    }

    #[test]
    fn top_n_limits_the_report() {
        let reg = Regulator::new(RegulatorConfig { top_n: Some(1), ..RegulatorConfig::default() });
        let mut second = candidate(0.5, Vec::new());
        second.id = CandidateId::new(Strand::Reverse, 3);
        let report = reg.validate(&[candidate(0.9, Vec::new()), second], &[]);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.tier_counts(), [1, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn evaluation_is_pure(
            on_target in 0.0f64..=1.0,
            hits in proptest::collection::vec((0usize..200, 0u32..4), 0..15),
            variant_at in proptest::option::of(0usize..200),
        ) {
            let sites: Vec<OffTargetSite> = hits.iter().map(|&(p, m)| site(p, m)).collect();
            let c = candidate(on_target, sites);
            let variants: Vec<Variant> = variant_at.into_iter().map(pathogenic).collect();
            let reg = Regulator::default();
            let first = reg.evaluate(&c, &variants);
            prop_assert_eq!(&first, &reg.evaluate(&c.clone(), &variants.clone()));
            prop_assert_eq!(first.passed, first.tier <= RiskTier::Medium);
        }
    }
}
