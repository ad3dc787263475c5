//! The per-run aggregate.
//!
//! Each stage produces a typed output; only the context writes it into its own
//! fields, so no stage can touch another stage's results. Validation results
//! are append-only: a re-validation adds a new revision that supersedes the
//! previous one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostician::AnnotationReport;
use crate::engineer::{DesignDiagnostic, DesignOutcome};
use crate::error::{InputError, PipelineError};
use crate::events::{Event, EventKind, EventLog};
use crate::models::{CandidateId, DnaSequence, GuideCandidate, StageKind, ValidationResult, Variant};
use crate::regulator::ValidationReport;

/// Typed output of one stage.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Annotations(AnnotationReport),
    Design(DesignOutcome),
    Validation(ValidationReport),
}

impl StageOutput {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Annotations(_) => StageKind::Diagnostician,
            Self::Design(_) => StageKind::Engineer,
            Self::Validation(_) => StageKind::Regulator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub candidate: CandidateId,
    pub revision: u32,
    /// Revision this entry replaces, if any.
    pub supersedes: Option<u32>,
    pub result: ValidationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    sequence: DnaSequence,
    variants: Vec<Variant>,
    degraded_variants: Vec<String>,
    candidates: Vec<GuideCandidate>,
    design_diagnostic: Option<DesignDiagnostic>,
    validations: Vec<ValidationEntry>,
    completed: Vec<StageKind>,
    events: EventLog,
}

impl PipelineContext {
    /// Load a sequence and its variants. Every variant must lie inside the
    /// sequence and agree with it on the reference allele.
    pub fn new(sequence: DnaSequence, variants: Vec<Variant>) -> Result<Self, InputError> {
        for variant in &variants {
            variant.check_against(&sequence)?;
        }
        Ok(Self {
            sequence,
            variants,
            degraded_variants: Vec::new(),
            candidates: Vec::new(),
            design_diagnostic: None,
            validations: Vec::new(),
            completed: Vec::new(),
            events: EventLog::new(),
        })
    }

    pub fn sequence(&self) -> &DnaSequence {
        &self.sequence
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn degraded_variants(&self) -> &[String] {
        &self.degraded_variants
    }

    /// Ranked candidates, best first.
    pub fn candidates(&self) -> &[GuideCandidate] {
        &self.candidates
    }

    pub fn design_diagnostic(&self) -> Option<&DesignDiagnostic> {
        self.design_diagnostic.as_ref()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn has_completed(&self, stage: StageKind) -> bool {
        self.completed.contains(&stage)
    }

    pub fn completed_stages(&self) -> &[StageKind] {
        &self.completed
    }

    /// Full validation history, in the order results were attached.
    pub fn validation_history(&self) -> &[ValidationEntry] {
        &self.validations
    }

    /// The latest result attached to `candidate`.
    pub fn current_validation(&self, candidate: &CandidateId) -> Option<&ValidationEntry> {
        self.validations.iter().rev().find(|e| &e.candidate == candidate)
    }

    /// Current results in candidate rank order.
    pub fn current_validations(&self) -> Vec<&ValidationEntry> {
        self.candidates
            .iter()
            .filter_map(|c| self.current_validation(&c.id))
            .collect()
    }

    pub(crate) fn record(&mut self, kind: EventKind, stage: Option<StageKind>, payload: Value) -> Event {
        self.events.append(kind, stage, payload).clone()
    }

    /// Write a stage's output into the fields it owns. Each stage may be
    /// applied once; use [`PipelineContext::supersede_validation`] to re-validate.
    pub(crate) fn apply(&mut self, output: StageOutput) -> Result<(), PipelineError> {
        let stage = output.stage();
        if self.has_completed(stage) {
            return Err(PipelineError::AlreadyExecuted { stage });
        }
        match output {
            StageOutput::Annotations(report) => {
                for (variant, annotation) in self.variants.iter_mut().zip(report.annotations) {
                    variant.annotation = Some(annotation);
                }
                self.degraded_variants = report.degraded;
            }
            StageOutput::Design(outcome) => {
                self.candidates = outcome.candidates;
                self.design_diagnostic = outcome.diagnostic;
            }
            StageOutput::Validation(report) => self.attach_validations(report),
        }
        self.completed.push(stage);
        Ok(())
    }

    /// Attach a fresh round of validation results on top of earlier ones.
    pub(crate) fn supersede_validation(&mut self, report: ValidationReport) -> usize {
        let superseded = report
            .results
            .iter()
            .filter(|(id, _)| self.current_validation(id).is_some())
            .count();
        self.attach_validations(report);
        if !self.has_completed(StageKind::Regulator) {
            self.completed.push(StageKind::Regulator);
        }
        superseded
    }

    fn attach_validations(&mut self, report: ValidationReport) {
        for (candidate, result) in report.results {
            let previous = self.current_validation(&candidate).map(|e| e.revision);
            self.validations.push(ValidationEntry {
                candidate,
                revision: previous.map_or(1, |r| r + 1),
                supersedes: previous,
                result,
            });
        }
    }
}
