//! Guide design: PAM scan, feasibility filter, on-target scoring, off-target
//! search and ranking.

pub mod off_target;
pub mod pam;
pub mod ranking;
pub mod repair;
pub mod scoring;

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineerConfig;
use crate::control::{RunControl, WorkerPool};
use crate::error::{InputError, PipelineError};
use crate::models::{CandidateId, DnaSequence, GuideCandidate, StageKind, Variant};
use crate::sequence::{gc_fraction, invalid_positions};

pub use off_target::{GenomeIndex, IndexHit, IndexQuery, IndexSearch, OffTargetSearch, OffTargetSearcher};
pub use pam::{PamMotif, ScanResult, TargetSite};
pub use scoring::OnTargetFeatures;

/// Target sites dropped by the feasibility filter, by first failing reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    /// Overlaps a pathogenic or closed-chromatin variant.
    pub blocked_by_variant: usize,
    pub gc_out_of_range: usize,
    /// Protospacer contains `N`.
    pub ambiguous_bases: usize,
    pub poly_t: usize,
}

impl FilterCounts {
    pub fn total(&self) -> usize {
        self.blocked_by_variant + self.gc_out_of_range + self.ambiguous_bases + self.poly_t
    }
}

/// Why the Engineer produced nothing. An outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DesignDiagnostic {
    NoTargetSites {
        pam_matches: usize,
        /// PAMs with room for a full protospacer.
        target_sites: usize,
        filtered: FilterCounts,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignOutcome {
    /// Ranked, best first.
    pub candidates: Vec<GuideCandidate>,
    pub diagnostic: Option<DesignDiagnostic>,
    pub filtered: FilterCounts,
}

/// A site that survived the feasibility filter, with its on-target features.
struct ScoredSite {
    site: TargetSite,
    features: OnTargetFeatures,
    on_target: f64,
}

pub struct Engineer {
    config: EngineerConfig,
    index: Option<Arc<dyn GenomeIndex>>,
    pool: Arc<WorkerPool>,
}

impl Engineer {
    pub fn new(config: EngineerConfig, pool: Arc<WorkerPool>) -> Self {
        Self { config, index: None, pool }
    }

    pub fn with_index(mut self, index: Arc<dyn GenomeIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &EngineerConfig {
        &self.config
    }

    /// Design ranked candidates for `sequence`. Only annotated variants take
    /// part in the feasibility filter.
    pub fn design(
        &self,
        sequence: &DnaSequence,
        variants: &[Variant],
        control: &RunControl,
    ) -> Result<DesignOutcome, PipelineError> {
        self.config.validate()?;
        let motif = PamMotif::parse(&self.config.pam)?;

        let invalid = invalid_positions(sequence.bases());
        if let Some(&(offset, first)) = invalid.first() {
            return Err(InputError::InvalidBases {
                id: sequence.id().to_string(),
                count: invalid.len(),
                tolerance: 0,
                first,
                offset,
            }
            .into());
        }

        let scan = pam::scan(sequence, &motif, self.config.protospacer_length, self.config.cut_offset);
        info!(
            "Scanned {} ({} nt) for {}: {} PAM match(es), {} target site(s)",
            sequence.id(),
            sequence.len(),
            motif.as_str(),
            scan.pam_matches,
            scan.sites.len()
        );

        let target_sites = scan.sites.len();
        let (feasible, filtered) = self.filter(scan.sites, variants);
        if filtered.total() > 0 {
            info!(
                "Filtered {} site(s): {} blocked by variants, {} GC out of range, {} ambiguous, {} poly-T",
                filtered.total(),
                filtered.blocked_by_variant,
                filtered.gc_out_of_range,
                filtered.ambiguous_bases,
                filtered.poly_t
            );
        }

        if feasible.is_empty() {
            warn!("No feasible target sites on {}", sequence.id());
            return Ok(DesignOutcome {
                candidates: Vec::new(),
                diagnostic: Some(DesignDiagnostic::NoTargetSites {
                    pam_matches: scan.pam_matches,
                    target_sites,
                    filtered,
                }),
                filtered,
            });
        }

        let scored: Vec<ScoredSite> = feasible.into_iter().map(|site| self.score(&motif, site)).collect();

        let searcher = OffTargetSearcher::new(sequence, &self.config, self.index.as_deref());
        let searches: Vec<Option<OffTargetSearch>> = self.pool.install(|| {
            scored
                .par_iter()
                .map(|s| {
                    if control.is_cancelled() {
                        return None;
                    }
                    Some(searcher.search(&s.site, control.deadline))
                })
                .collect()
        });

        if control.is_cancelled() || searches.iter().any(Option::is_none) {
            warn!("Design cancelled during off-target search, discarding partial results");
            return Err(PipelineError::Cancelled {
                stage: StageKind::Engineer,
            });
        }

        let mut candidates: Vec<GuideCandidate> = scored
            .into_iter()
            .zip(searches.into_iter().flatten())
            .map(|(s, search)| self.candidate(s, search, &motif, sequence, variants))
            .collect();
        ranking::rank(&mut candidates);

        let truncated = candidates.iter().filter(|c| c.off_targets.truncated).count();
        if truncated > 0 {
            warn!("{} candidate(s) carry a truncated off-target search", truncated);
        }
        info!(
            "Designed {} candidate(s) for {}, best composite {:.3}",
            candidates.len(),
            sequence.id(),
            candidates.first().map_or(0.0, |c| c.composite)
        );

        Ok(DesignOutcome {
            candidates,
            diagnostic: None,
            filtered,
        })
    }

    fn filter(&self, sites: Vec<TargetSite>, variants: &[Variant]) -> (Vec<TargetSite>, FilterCounts) {
        let cfg = &self.config;
        let blocking: Vec<&Variant> = variants
            .iter()
            .filter(|v| v.annotation.as_ref().is_some_and(|a| a.blocks_editing()))
            .collect();

        let mut counts = FilterCounts::default();
        let mut kept = Vec::with_capacity(sites.len());
        for site in sites {
            let gc = gc_fraction(&site.protospacer);
            if let Some(v) = blocking.iter().find(|v| v.overlaps(&site.site)) {
                debug!("Site {}{} overlaps blocking variant {}", site.strand, site.pam_position, v.id);
                counts.blocked_by_variant += 1;
            } else if gc < cfg.gc_min || gc > cfg.gc_max {
                counts.gc_out_of_range += 1;
            } else if site.protospacer.contains('N') {
                counts.ambiguous_bases += 1;
            } else if cfg.reject_poly_t && site.protospacer.contains("TTTT") {
                counts.poly_t += 1;
            } else {
                kept.push(site);
            }
        }
        (kept, counts)
    }

    fn score(&self, motif: &PamMotif, site: TargetSite) -> ScoredSite {
        let cfg = &self.config;
        let features = OnTargetFeatures {
            gc_content: gc_fraction(&site.protospacer),
            structure_penalty: scoring::structure_penalty(&site.protospacer, cfg.min_stem, cfg.min_loop),
            pam_strength: scoring::pam_strength(motif.specificity(), &site.protospacer),
            position_matrix: scoring::position_matrix_score(&site.protospacer),
        };
        let on_target = features.score(&cfg.on_target_weights, cfg.gc_optimum, cfg.structure_half_point);
        ScoredSite { site, features, on_target }
    }

    fn candidate(
        &self,
        scored: ScoredSite,
        search: OffTargetSearch,
        motif: &PamMotif,
        sequence: &DnaSequence,
        variants: &[Variant],
    ) -> GuideCandidate {
        let ScoredSite { site, features, on_target } = scored;
        let composite = ranking::composite_score(on_target, search.risk, &self.config.ranking);
        let pam_shield = pam::shield(&site, motif);
        let nearest = variants
            .iter()
            .map(|v| (v, v.cut_distance(site.cut_site)))
            .min_by_key(|(_, distance)| *distance);
        let repair = nearest
            .filter(|(_, distance)| *distance <= self.config.repair.max_cut_distance)
            .map(|(v, _)| repair::design_templates(sequence, site.cut_site, pam_shield.as_ref(), v, &self.config.repair));

        GuideCandidate {
            id: CandidateId::new(site.strand, site.pam_position),
            manufacturing: scoring::manufacturability(&site.protospacer),
            protospacer: site.protospacer,
            pam: site.pam,
            strand: site.strand,
            pam_position: site.pam_position,
            site: site.site,
            cut_site: site.cut_site,
            gc_content: features.gc_content,
            structure_penalty: features.structure_penalty,
            on_target,
            off_target_risk: search.risk,
            composite,
            rank: 0,
            off_targets: search.profile,
            nearest_variant: nearest.map(|(v, _)| v.id.clone()),
            cut_distance: nearest.map(|(_, distance)| distance),
            pam_shield,
            repair,
        }
    }
}

impl std::fmt::Debug for Engineer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engineer")
            .field("config", &self.config)
            .field("index", &self.index.as_ref().map(|i| i.name().to_string()))
            .field("pool", &self.pool)
            .finish()
    }
}
