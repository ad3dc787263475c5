//! Variant-aware guide RNA design.
//!
//! A run annotates the variants of one sequence, designs and ranks guide
//! candidates around them, and validates the candidates against safety rules.
//! [`orchestrator::Orchestrator`] sequences the three stages over a
//! [`context::PipelineContext`].

pub mod config;
pub mod context;
pub mod control;
pub mod diagnostician;
pub mod engineer;
pub mod error;
pub mod events;
pub mod io;
pub mod models;
pub mod orchestrator;
pub mod regulator;
pub mod sequence;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use orchestrator::{Orchestrator, RunStatus};
