//! Run configuration. Every field has a default so partial JSON files load.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DesignError;
use crate::sequence::iupac_bases;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub diagnostician: DiagnosticianConfig,
    pub engineer: EngineerConfig,
    pub regulator: RegulatorConfig,
    /// Worker threads for per-item work inside a stage.
    pub concurrency_limit: usize,
    /// Deadline for the whole run; only the off-target search degrades on it.
    pub run_timeout_ms: Option<u64>,
    /// Foreign characters replaced by `N` before a sequence is rejected.
    pub invalid_base_tolerance: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            diagnostician: DiagnosticianConfig::default(),
            engineer: EngineerConfig::default(),
            regulator: RegulatorConfig::default(),
            concurrency_limit: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            run_timeout_ms: None,
            invalid_base_tolerance: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::open(path.as_ref())?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}

// ───────────────────────────── diagnostician ─────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.initial_backoff_ms as f64 * self.factor.max(1.0).powi(attempt as i32);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticianConfig {
    pub retry: RetryPolicy,
    /// Conservation at or above this marks a splice-site variant as clinically relevant.
    pub high_conservation: f64,
    /// Distance from an exon boundary still counted as a splice site.
    pub splice_window: usize,
}

impl Default for DiagnosticianConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            high_conservation: 0.8,
            splice_window: 2,
        }
    }
}

// ───────────────────────────── engineer ─────────────────────────────

/// Weights of the on-target efficiency terms. Normalised by their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnTargetWeights {
    pub gc: f64,
    pub structure: f64,
    pub pam_strength: f64,
    /// Position-specific matrix term, applied to 20-nt spacers only.
    pub position_matrix: f64,
}

impl Default for OnTargetWeights {
    fn default() -> Self {
        Self {
            gc: 0.35,
            structure: 0.35,
            pam_strength: 0.15,
            position_matrix: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub on_target: f64,
    pub specificity: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            on_target: 0.5,
            specificity: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineerConfig {
    /// IUPAC motif read 5'→3' on the guide's strand, e.g. `NGG`.
    pub pam: String,
    pub protospacer_length: usize,
    /// Cut position, in bases upstream of the PAM.
    pub cut_offset: usize,
    pub gc_min: f64,
    pub gc_max: f64,
    pub gc_optimum: f64,
    /// Mismatch bound M for the off-target search.
    pub max_mismatches: u32,
    /// Off-target sites retained per candidate (K).
    pub top_k: usize,
    /// Sites below this similarity are discarded.
    pub min_similarity: f64,
    /// Mismatch weight at the PAM-distal end; the PAM-proximal end weighs 1.0.
    pub distal_mismatch_weight: f64,
    /// Shortest self-complementary stem counted by the structure heuristic.
    pub min_stem: usize,
    /// Shortest hairpin loop between the two arms of a stem.
    pub min_loop: usize,
    /// Penalty at which the structure term falls to one half.
    pub structure_half_point: f64,
    /// Summed similarity at which off-target risk reaches 1 - 1/e.
    pub risk_scale: f64,
    pub reject_poly_t: bool,
    pub on_target_weights: OnTargetWeights,
    pub ranking: RankingWeights,
    pub repair: RepairConfig,
}

impl Default for EngineerConfig {
    fn default() -> Self {
        Self {
            pam: "NGG".to_string(),
            protospacer_length: 20,
            cut_offset: 3,
            gc_min: 0.20,
            gc_max: 0.80,
            gc_optimum: 0.50,
            max_mismatches: 3,
            top_k: 10,
            min_similarity: 0.0,
            distal_mismatch_weight: 0.25,
            min_stem: 4,
            min_loop: 3,
            structure_half_point: 4.0,
            risk_scale: 1.0,
            reject_poly_t: true,
            on_target_weights: OnTargetWeights::default(),
            ranking: RankingWeights::default(),
            repair: RepairConfig::default(),
        }
    }
}

impl EngineerConfig {
    pub fn validate(&self) -> Result<(), DesignError> {
        // Same normalisation as `PamMotif::parse`.
        let pam = self.pam.trim();
        if pam.is_empty() {
            return Err(DesignError::EmptyPam);
        }
        if let Some(symbol) = pam.bytes().find(|b| iupac_bases(*b).is_none()) {
            return Err(DesignError::InvalidPamSymbol {
                motif: pam.to_string(),
                symbol: symbol as char,
            });
        }
        if self.protospacer_length == 0 {
            return Err(DesignError::ZeroProtospacerLength);
        }
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.gc_min) || !in_unit(self.gc_max) || self.gc_min > self.gc_max || !in_unit(self.gc_optimum) {
            return Err(DesignError::InvalidGcRange {
                min: self.gc_min,
                max: self.gc_max,
            });
        }
        if self.top_k == 0 {
            return Err(DesignError::ZeroTopK);
        }

        let w = &self.on_target_weights;
        check_weights(
            "on-target",
            &[
                ("gc", w.gc),
                ("structure", w.structure),
                ("pam_strength", w.pam_strength),
                ("position_matrix", w.position_matrix),
            ],
        )?;
        check_weights(
            "ranking",
            &[("on_target", self.ranking.on_target), ("specificity", self.ranking.specificity)],
        )?;
        for (name, value, valid) in [
            ("distal_mismatch_weight", self.distal_mismatch_weight, in_unit(self.distal_mismatch_weight)),
            ("min_similarity", self.min_similarity, in_unit(self.min_similarity)),
            ("structure_half_point", self.structure_half_point, self.structure_half_point > 0.0),
            ("risk_scale", self.risk_scale, self.risk_scale > 0.0),
        ] {
            if !valid {
                return Err(DesignError::InvalidWeight { name, value });
            }
        }
        let repair = &self.repair;
        if repair.template_length < 2 * repair.min_arm {
            return Err(DesignError::InvalidRepairLayout {
                template_length: repair.template_length,
                min_arm: repair.min_arm,
            });
        }
        Ok(())
    }
}

/// Homology-directed repair templates designed for candidates cutting near a
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Candidates cutting farther than this from every variant get no design.
    pub max_cut_distance: usize,
    pub template_length: usize,
    /// Shortest homology arm on either side of the cut.
    pub min_arm: usize,
    pub max_templates: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_cut_distance: 15,
            template_length: 120,
            min_arm: 40,
            max_templates: 3,
        }
    }
}

fn check_weights(group: &'static str, weights: &[(&'static str, f64)]) -> Result<(), DesignError> {
    for &(name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(DesignError::InvalidWeight { name, value });
        }
    }
    if weights.iter().all(|(_, v)| *v == 0.0) {
        return Err(DesignError::ZeroWeights { group });
    }
    Ok(())
}

// ───────────────────────────── regulator ─────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulatorConfig {
    /// More off-target hits than this rejects the candidate.
    pub max_off_targets: usize,
    /// Efficiency below this is a design concern.
    pub min_efficiency: f64,
    /// Essential-gene hits at or under this many mismatches raise HIGH risk.
    pub essential_mismatch_limit: u32,
    /// Validate only the best N candidates; `None` validates all.
    pub top_n: Option<usize>,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            max_off_targets: 10,
            min_efficiency: 0.4,
            essential_mismatch_limit: 2,
            top_n: None,
        }
    }
}
