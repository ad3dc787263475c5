//! Variant annotation.
//!
//! Every variant is looked up in each configured source. A source that keeps
//! failing degrades that variant to `Unknown` significance; it never aborts
//! the run.

pub mod regions;
pub mod source;

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DiagnosticianConfig;
use crate::control::{RunControl, WorkerPool};
use crate::error::PipelineError;
use crate::models::{ClinicalSignificance, DnaSequence, GeneFeature, StageKind, Variant, VariantAnnotation};

pub use regions::{GenomicRegions, IntervalSet};
pub use source::{lookup_with_retry, AnnotationRecord, AnnotationSource, LookupOutcome, TableAnnotationSource, VariantQuery};

/// Annotations in variant order, plus the ids of degraded variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationReport {
    pub annotations: Vec<VariantAnnotation>,
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignificanceCounts {
    pub pathogenic: usize,
    pub benign: usize,
    pub uncertain: usize,
    pub unknown: usize,
    pub degraded: usize,
}

impl AnnotationReport {
    pub fn counts(&self) -> SignificanceCounts {
        let mut counts = SignificanceCounts {
            degraded: self.degraded.len(),
            ..SignificanceCounts::default()
        };
        for a in &self.annotations {
            match a.significance {
                ClinicalSignificance::Pathogenic => counts.pathogenic += 1,
                ClinicalSignificance::Benign => counts.benign += 1,
                ClinicalSignificance::Uncertain => counts.uncertain += 1,
                ClinicalSignificance::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

pub struct Diagnostician {
    sources: Vec<Arc<dyn AnnotationSource>>,
    regions: GenomicRegions,
    config: DiagnosticianConfig,
    pool: Arc<WorkerPool>,
}

impl Diagnostician {
    pub fn new(config: DiagnosticianConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            sources: Vec::new(),
            regions: GenomicRegions::default(),
            config,
            pool,
        }
    }

    /// Add a source. Earlier sources win when two supply the same field.
    pub fn with_source(mut self, source: Arc<dyn AnnotationSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_regions(mut self, regions: GenomicRegions) -> Self {
        self.regions = regions;
        self
    }

    /// Annotate `variants`, in parallel across variants. Cancellation discards
    /// the partial work.
    pub fn annotate(
        &self,
        sequence: &DnaSequence,
        variants: &[Variant],
        control: &RunControl,
    ) -> Result<AnnotationReport, PipelineError> {
        info!(
            "Annotating {} variants on {} against {} source(s)",
            variants.len(),
            sequence.id(),
            self.sources.len()
        );

        let results: Vec<Option<(VariantAnnotation, bool)>> = self.pool.install(|| {
            variants
                .par_iter()
                .map(|variant| {
                    if control.is_cancelled() {
                        return None;
                    }
                    self.annotate_one(variant, control)
                })
                .collect()
        });

        if control.is_cancelled() || results.iter().any(Option::is_none) {
            warn!("Annotation cancelled, discarding partial results");
            return Err(PipelineError::Cancelled {
                stage: StageKind::Diagnostician,
            });
        }

        let mut annotations = Vec::with_capacity(variants.len());
        let mut degraded = Vec::new();
        for (variant, (annotation, is_degraded)) in variants.iter().zip(results.into_iter().flatten()) {
            if is_degraded {
                degraded.push(variant.id.clone());
            }
            annotations.push(annotation);
        }

        let report = AnnotationReport { annotations, degraded };
        let counts = report.counts();
        info!(
            "Annotated {} variants: {} pathogenic, {} benign, {} uncertain, {} unknown ({} degraded)",
            variants.len(),
            counts.pathogenic,
            counts.benign,
            counts.uncertain,
            counts.unknown,
            counts.degraded
        );
        Ok(report)
    }

    /// `None` when cancelled mid-lookup.
    fn annotate_one(&self, variant: &Variant, control: &RunControl) -> Option<(VariantAnnotation, bool)> {
        let query = VariantQuery::from(variant);
        let mut merged = AnnotationRecord::default();
        let mut degraded = false;

        for source in &self.sources {
            match lookup_with_retry(source.as_ref(), &query, &self.config.retry, control) {
                LookupOutcome::Answered(Some(record)) => {
                    merged.significance = merged.significance.or(record.significance);
                    merged.conservation = merged.conservation.or(record.conservation);
                }
                LookupOutcome::Answered(None) => {}
                LookupOutcome::Exhausted { attempts, last_error } => {
                    warn!(
                        "Variant {} degraded: {} failed after {} attempt(s) ({})",
                        variant.id,
                        source.name(),
                        attempts,
                        last_error
                    );
                    degraded = true;
                }
                LookupOutcome::Cancelled => return None,
            }
        }

        let significance = merged.significance.unwrap_or(ClinicalSignificance::Unknown);
        let feature = self.regions.gene_feature(variant, self.config.splice_window);
        let clinically_relevant = significance == ClinicalSignificance::Pathogenic
            || (feature == GeneFeature::SpliceSite
                && merged.conservation.is_some_and(|c| c >= self.config.high_conservation));

        let annotation = VariantAnnotation {
            significance,
            conservation: merged.conservation,
            accessibility: self.regions.accessibility(variant),
            feature,
            clinically_relevant,
            degraded,
        };
        debug!("Variant {} annotated {:?}", variant.id, annotation);
        Some((annotation, degraded))
    }
}

impl std::fmt::Debug for Diagnostician {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("Diagnostician")
            .field("sources", &names)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::RetryPolicy;
    use crate::control::CancellationToken;
    use crate::error::AnnotationSourceError;
    use crate::models::Accessibility;

    /// Times out for one position, answers from a table otherwise.
    struct PartiallyDown {
        dead_position: usize,
        table: TableAnnotationSource,
    }

    impl AnnotationSource for PartiallyDown {
        fn name(&self) -> &str {
            "partially-down"
        }

        fn lookup(&self, query: &VariantQuery<'_>) -> Result<Option<AnnotationRecord>, AnnotationSourceError> {
            if query.position == self.dead_position {
                return Err(AnnotationSourceError::Timeout);
            }
            self.table.lookup(query)
        }
    }

    /// Cancels the run from inside its first lookup.
    struct CancelsOnFirstLookup {
        cancel: CancellationToken,
        calls: AtomicU32,
    }

    impl AnnotationSource for CancelsOnFirstLookup {
        fn name(&self) -> &str {
            "cancels-on-first-lookup"
        }

        fn lookup(&self, _query: &VariantQuery<'_>) -> Result<Option<AnnotationRecord>, AnnotationSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Ok(Some(AnnotationRecord { significance: Some(ClinicalSignificance::Benign), conservation: None }))
        }
    }

    fn config() -> DiagnosticianConfig {
        DiagnosticianConfig {
            retry: RetryPolicy { max_retries: 2, initial_backoff_ms: 1, max_backoff_ms: 2, factor: 2.0 },
            ..DiagnosticianConfig::default()
        }
    }

    fn fixture() -> (DnaSequence, Vec<Variant>) {
        let seq = DnaSequence::new("s", "ACGTACGTACGTACGTACGT").unwrap();
        let variants = vec![
            Variant::new(1, "C", "T").unwrap(),
            Variant::new(6, "G", "A").unwrap(),
            Variant::new(11, "T", "C").unwrap(),
        ];
        (seq, variants)
    }

    fn record(significance: ClinicalSignificance, conservation: f64) -> AnnotationRecord {
        AnnotationRecord { significance: Some(significance), conservation: Some(conservation) }
    }

    #[test]
    fn one_unreachable_variant_degrades_to_unknown() {
        let (seq, variants) = fixture();
        let mut table = TableAnnotationSource::new("clinvar");
        table.insert(1, "C", "T", record(ClinicalSignificance::Pathogenic, 0.9));
        table.insert(11, "T", "C", record(ClinicalSignificance::Benign, 0.1));
        let source = PartiallyDown { dead_position: 6, table };

        let diag = Diagnostician::new(config(), Arc::new(WorkerPool::new(2))).with_source(Arc::new(source));
        let report = diag.annotate(&seq, &variants, &RunControl::default()).unwrap();

        assert_eq!(report.annotations.len(), 3);
        assert_eq!(report.annotations[0].significance, ClinicalSignificance::Pathogenic);
        assert_eq!(report.annotations[1].significance, ClinicalSignificance::Unknown);
        assert!(report.annotations[1].degraded);
        assert_eq!(report.annotations[2].significance, ClinicalSignificance::Benign);
        assert_eq!(report.degraded, vec![variants[1].id.clone()]);

        let counts = report.counts();
        assert_eq!((counts.pathogenic, counts.benign, counts.unknown, counts.degraded), (1, 1, 1, 1));
    }

    #[test]
    fn first_source_wins_per_field() {
        let (seq, variants) = fixture();
        let mut clinical = TableAnnotationSource::new("clinical");
        clinical.insert(1, "C", "T", AnnotationRecord { significance: Some(ClinicalSignificance::Uncertain), conservation: None });
        let mut conservation = TableAnnotationSource::new("phylop");
        conservation.insert(1, "C", "T", record(ClinicalSignificance::Benign, 0.42));

        let diag = Diagnostician::new(config(), Arc::new(WorkerPool::new(1)))
            .with_source(Arc::new(clinical))
            .with_source(Arc::new(conservation));
        let report = diag.annotate(&seq, &variants[..1], &RunControl::default()).unwrap();
        assert_eq!(report.annotations[0].significance, ClinicalSignificance::Uncertain);
        assert_eq!(report.annotations[0].conservation, Some(0.42));
        assert!(report.degraded.is_empty());
    }

    #[test]
    fn conserved_splice_site_is_clinically_relevant() {
        let (seq, variants) = fixture();
        let mut table = TableAnnotationSource::new("phylop");
        table.insert(6, "G", "A", record(ClinicalSignificance::Uncertain, 0.95));
        let regions = GenomicRegions {
            closed_chromatin: Some(IntervalSet::new([10..15])),
            exons: Some(IntervalSet::new([8..18])),
        };
        let diag = Diagnostician::new(config(), Arc::new(WorkerPool::new(1)))
            .with_source(Arc::new(table))
            .with_regions(regions);
        let report = diag.annotate(&seq, &variants, &RunControl::default()).unwrap();

        let splice = &report.annotations[1];
        assert_eq!(splice.feature, GeneFeature::SpliceSite);
        assert!(splice.clinically_relevant);
        assert_eq!(splice.accessibility, Accessibility::Open);

        let closed = &report.annotations[2];
        assert_eq!(closed.feature, GeneFeature::Exon);
        assert_eq!(closed.accessibility, Accessibility::Closed);
        assert!(closed.blocks_editing());
    }

    #[test]
    fn cancellation_discards_partial_work() {
        let (seq, variants) = fixture();
        let diag = Diagnostician::new(config(), Arc::new(WorkerPool::new(1)))
            .with_source(Arc::new(TableAnnotationSource::new("empty")));
        let control = RunControl::default();
        control.cancel.cancel();
        assert_eq!(
            diag.annotate(&seq, &variants, &control),
            Err(PipelineError::Cancelled { stage: StageKind::Diagnostician })
        );
    }

    #[test]
    fn cancellation_mid_stage_stops_further_lookups() {
        let (seq, variants) = fixture();
        let control = RunControl::default();
        let source = Arc::new(CancelsOnFirstLookup { cancel: control.cancel.clone(), calls: AtomicU32::new(0) });
        let diag = Diagnostician::new(config(), Arc::new(WorkerPool::new(1))).with_source(source.clone());

        assert_eq!(
            diag.annotate(&seq, &variants, &control),
            Err(PipelineError::Cancelled { stage: StageKind::Diagnostician })
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
