//! Error kinds raised by the pipeline.
//!
//! Only malformed input, invalid configuration, cancellation and
//! unexpected stage failures are errors. Empty results and truncated
//! searches are reported as values on the data they affect.

use serde::{Deserialize, Serialize};

use crate::models::StageKind;

/// Malformed sequence or variant data. Fatal: no stage runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("sequence `{id}` is empty")]
    EmptySequence { id: String },

    #[error("sequence `{id}` has {count} characters outside {{A,C,G,T,N}} (tolerance {tolerance}), first `{first}` at offset {offset}")]
    InvalidBases {
        id: String,
        count: usize,
        tolerance: usize,
        first: char,
        offset: usize,
    },

    #[error("variant at {position} lies outside sequence of length {length}")]
    VariantOutOfBounds { position: usize, length: usize },

    #[error("variant at {position}: reference allele `{expected}` does not match sequence `{found}`")]
    ReferenceMismatch {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("variant at {position}: invalid allele `{allele}`")]
    InvalidAllele { position: usize, allele: String },
}

/// Invalid engineer configuration. Fatal for the Engineer stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DesignError {
    #[error("PAM motif is empty")]
    EmptyPam,

    #[error("PAM motif `{motif}` contains non-IUPAC character `{symbol}`")]
    InvalidPamSymbol { motif: String, symbol: char },

    #[error("protospacer length must be positive")]
    ZeroProtospacerLength,

    #[error("GC window [{min}, {max}] is not a sub-range of [0, 1]")]
    InvalidGcRange { min: f64, max: f64 },

    #[error("top-K off-target retention must be positive")]
    ZeroTopK,

    #[error("weight `{name}` is invalid: {value}")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("all {group} weights are zero")]
    ZeroWeights { group: &'static str },

    #[error("repair template of {template_length} nt cannot hold two {min_arm}-nt arms")]
    InvalidRepairLayout { template_length: usize, min_arm: usize },
}

/// Failure of a single annotation lookup. Recovered inside the Diagnostician.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnnotationSourceError {
    #[error("lookup timed out")]
    Timeout,

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AnnotationSourceError {
    /// Timeouts and outages are worth another attempt, malformed answers are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

/// Failure of the genome-wide off-target index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("genome index unavailable: {0}")]
    Unavailable(String),

    #[error("genome index query failed: {0}")]
    QueryFailed(String),
}

/// Top-level pipeline error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("design error: {0}")]
    Design(#[from] DesignError),

    #[error("run cancelled during {stage}")]
    Cancelled { stage: StageKind },

    #[error("stage {stage} failed: {reason}")]
    StageFailed { stage: StageKind, reason: String },

    #[error("stage {stage} already executed for this context")]
    AlreadyExecuted { stage: StageKind },
}

/// Stable tag for an error, recorded in `StageFailed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InputError,
    DesignError,
    Cancelled,
    StageFailed,
    AlreadyExecuted,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::Design(_) => ErrorKind::DesignError,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::StageFailed { .. } => ErrorKind::StageFailed,
            Self::AlreadyExecuted { .. } => ErrorKind::AlreadyExecuted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_lookup_errors() {
        assert!(AnnotationSourceError::Timeout.is_retryable());
        assert!(AnnotationSourceError::Unavailable("503".into()).is_retryable());
        assert!(!AnnotationSourceError::InvalidResponse("bad json".into()).is_retryable());
    }

    #[test]
    fn kind_follows_variant() {
        let err: PipelineError = DesignError::EmptyPam.into();
        assert_eq!(err.kind(), ErrorKind::DesignError);
        let err: PipelineError = InputError::EmptySequence { id: "x".into() }.into();
        assert_eq!(err.kind(), ErrorKind::InputError);
        assert!(err.to_string().contains("empty"));
    }
}
