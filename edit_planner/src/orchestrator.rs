//! Runs Diagnostician → Engineer → Regulator over one context and publishes
//! an event after each stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StageOutput};
use crate::control::{CancellationToken, RunControl, WorkerPool};
use crate::diagnostician::{AnnotationSource, Diagnostician, GenomicRegions};
use crate::engineer::{Engineer, GenomeIndex};
use crate::error::{ErrorKind, PipelineError};
use crate::events::{EventKind, EventListener};
use crate::models::{DnaSequence, StageKind, Variant};
use crate::regulator::{Regulator, ValidationReport};

/// One step of the pipeline: read what it needs from the context, return a
/// typed output. Only the orchestrator writes the output back.
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn run(&self, context: &PipelineContext, control: &RunControl) -> Result<StageOutput, PipelineError>;
}

impl PipelineStage for Diagnostician {
    fn kind(&self) -> StageKind {
        StageKind::Diagnostician
    }

    fn run(&self, context: &PipelineContext, control: &RunControl) -> Result<StageOutput, PipelineError> {
        self.annotate(context.sequence(), context.variants(), control)
            .map(StageOutput::Annotations)
    }
}

impl PipelineStage for Engineer {
    fn kind(&self) -> StageKind {
        StageKind::Engineer
    }

    fn run(&self, context: &PipelineContext, control: &RunControl) -> Result<StageOutput, PipelineError> {
        self.design(context.sequence(), context.variants(), control)
            .map(StageOutput::Design)
    }
}

impl PipelineStage for Regulator {
    fn kind(&self) -> StageKind {
        StageKind::Regulator
    }

    fn run(&self, context: &PipelineContext, control: &RunControl) -> Result<StageOutput, PipelineError> {
        if control.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: StageKind::Regulator,
            });
        }
        Ok(StageOutput::Validation(self.validate(context.candidates(), context.variants())))
    }
}

/// How a run ended. Mirrors the terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    /// The Engineer found nothing to design; the Regulator was skipped.
    NoCandidates,
    Failed { stage: StageKind, kind: ErrorKind },
    Cancelled { stage: StageKind },
}

pub struct Orchestrator {
    config: PipelineConfig,
    stages: Vec<Arc<dyn PipelineStage>>,
    regulator: Arc<Regulator>,
    listeners: Vec<Arc<dyn EventListener>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            sources: Vec::new(),
            regions: GenomicRegions::default(),
            index: None,
            listeners: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token a UI can use to abort the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build a context from raw inputs and run it.
    pub fn execute(
        &self,
        sequence: DnaSequence,
        variants: Vec<Variant>,
    ) -> Result<(PipelineContext, RunStatus), PipelineError> {
        let mut context = PipelineContext::new(sequence, variants)?;
        let status = self.run(&mut context)?;
        Ok((context, status))
    }

    /// Run every stage once over `context`.
    ///
    /// Stage failures, cancellation and empty designs end the run with a
    /// terminal event and are reported through [`RunStatus`]. The only error is
    /// a context that has already been run.
    pub fn run(&self, context: &mut PipelineContext) -> Result<RunStatus, PipelineError> {
        if let Some(&stage) = context.completed_stages().first() {
            return Err(PipelineError::AlreadyExecuted { stage });
        }

        let control = RunControl::new(self.cancel.clone(), self.config.run_timeout());
        info!(
            "Starting run on {} ({} nt, {} variants)",
            context.sequence().id(),
            context.sequence().len(),
            context.variants().len()
        );
        let started = json!({
            "sequence": context.sequence().id(),
            "length": context.sequence().len(),
            "variants": context.variants().len(),
        });
        self.emit(context, EventKind::RunStarted, None, started);

        for stage in &self.stages {
            let kind = stage.kind();

            if kind == StageKind::Regulator && context.candidates().is_empty() {
                warn!("No candidates designed, skipping the regulator");
                let payload = json!({ "diagnostic": context.design_diagnostic() });
                self.emit(context, EventKind::NoCandidates, Some(kind), payload);
                return Ok(RunStatus::NoCandidates);
            }
            if control.is_cancelled() {
                return Ok(self.cancelled(context, kind));
            }

            match stage.run(context, &control) {
                Ok(output) => {
                    let (event, payload) = summarize(&output);
                    context.apply(output)?;
                    self.emit(context, event, Some(kind), payload);
                }
                Err(PipelineError::Cancelled { stage: at }) => return Ok(self.cancelled(context, at)),
                Err(e) => {
                    error!("Stage {} failed: {}", kind, e);
                    let payload = json!({
                        "stage": kind,
                        "kind": e.kind(),
                        "reason": e.to_string(),
                    });
                    self.emit(context, EventKind::StageFailed, Some(kind), payload);
                    return Ok(RunStatus::Failed { stage: kind, kind: e.kind() });
                }
            }
        }

        let completed = json!({ "candidates": context.candidates().len() });
        self.emit(context, EventKind::RunCompleted, None, completed);
        info!("Run on {} completed", context.sequence().id());
        Ok(RunStatus::Completed)
    }

    /// Re-run the Regulator over the stored candidates. New results supersede
    /// the previous ones; history is kept. Returns how many were superseded.
    pub fn revalidate(&self, context: &mut PipelineContext) -> Result<usize, PipelineError> {
        if !context.has_completed(StageKind::Engineer) {
            return Err(PipelineError::StageFailed {
                stage: StageKind::Regulator,
                reason: "no designed candidates to validate".to_string(),
            });
        }
        let report = self.regulator.validate(context.candidates(), context.variants());
        let payload = validation_payload(&report);
        let superseded = context.supersede_validation(report);

        self.emit(
            context,
            EventKind::ValidationSuperseded,
            Some(StageKind::Regulator),
            json!({ "superseded": superseded }),
        );
        self.emit(context, EventKind::ValidationComplete, Some(StageKind::Regulator), payload);
        Ok(superseded)
    }

    fn cancelled(&self, context: &mut PipelineContext, stage: StageKind) -> RunStatus {
        warn!("Run cancelled during {}", stage);
        self.emit(context, EventKind::RunCancelled, Some(stage), json!({ "stage": stage }));
        RunStatus::Cancelled { stage }
    }

    fn emit(&self, context: &mut PipelineContext, kind: EventKind, stage: Option<StageKind>, payload: Value) {
        let event = context.record(kind, stage, payload);
        for listener in &self.listeners {
            listener.on_event(&event, context);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<StageKind> = self.stages.iter().map(|s| s.kind()).collect();
        f.debug_struct("Orchestrator")
            .field("stages", &stages)
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Event kind and payload announcing a stage's output.
fn summarize(output: &StageOutput) -> (EventKind, Value) {
    match output {
        StageOutput::Annotations(report) => {
            let counts = report.counts();
            (
                EventKind::VariantsAnnotated,
                json!({
                    "pathogenic": counts.pathogenic,
                    "benign": counts.benign,
                    "uncertain": counts.uncertain,
                    "unknown": counts.unknown,
                    "degraded": report.degraded,
                }),
            )
        }
        StageOutput::Design(outcome) => (
            EventKind::CandidatesGenerated,
            json!({
                "candidates": outcome.candidates.len(),
                "filtered": outcome.filtered,
                "diagnostic": outcome.diagnostic,
            }),
        ),
        StageOutput::Validation(report) => (EventKind::ValidationComplete, validation_payload(report)),
    }
}

fn validation_payload(report: &ValidationReport) -> Value {
    let [low, medium, high, rejected] = report.tier_counts();
    json!({
        "validated": report.results.len(),
        "low": low,
        "medium": medium,
        "high": high,
        "rejected": rejected,
    })
}

pub struct OrchestratorBuilder {
    config: PipelineConfig,
    sources: Vec<Arc<dyn AnnotationSource>>,
    regions: GenomicRegions,
    index: Option<Arc<dyn GenomeIndex>>,
    listeners: Vec<Arc<dyn EventListener>>,
    cancel: CancellationToken,
}

impl OrchestratorBuilder {
    pub fn annotation_source(mut self, source: Arc<dyn AnnotationSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn regions(mut self, regions: GenomicRegions) -> Self {
        self.regions = regions;
        self
    }

    pub fn genome_index(mut self, index: Arc<dyn GenomeIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Orchestrator {
        let pool = Arc::new(WorkerPool::new(self.config.concurrency_limit));

        let mut diagnostician =
            Diagnostician::new(self.config.diagnostician.clone(), pool.clone()).with_regions(self.regions);
        for source in self.sources {
            diagnostician = diagnostician.with_source(source);
        }

        let mut engineer = Engineer::new(self.config.engineer.clone(), pool);
        if let Some(index) = self.index {
            engineer = engineer.with_index(index);
        }

        let regulator = Arc::new(Regulator::new(self.config.regulator.clone()));
        let stages: Vec<Arc<dyn PipelineStage>> = vec![
            Arc::new(diagnostician) as Arc<dyn PipelineStage>,
            Arc::new(engineer),
            regulator.clone(),
        ];

        Orchestrator {
            config: self.config,
            stages,
            regulator,
            listeners: self.listeners,
            cancel: self.cancel,
        }
    }
}
