use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edit_planner::diagnostician::GenomicRegions;
use edit_planner::events::TracingListener;
use edit_planner::io::{
    align_to_reference, read_annotation_table, read_fasta, read_intervals_csv, read_variants_csv, write_context_json,
};
use edit_planner::{Orchestrator, PipelineConfig, PipelineContext, RunStatus};

/// Variant-aware guide RNA design
#[derive(Parser, Debug)]
#[command(name = "edit_planner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Annotate variants, design guide RNAs around them and validate the guides", long_about = None)]
struct Args {
    /// Reference sequence (FASTA, first record)
    #[arg(value_name = "FASTA")]
    fasta: PathBuf,

    /// Variants as a `position,ref,alt` CSV with 0-based positions
    #[arg(long)]
    variants: Option<PathBuf>,

    /// Sample sequence (FASTA) to call substitutions from against the reference
    #[arg(long)]
    sample: Option<PathBuf>,

    /// Annotation table as a `position,ref,alt,significance,conservation` CSV
    #[arg(long)]
    annotations: Option<PathBuf>,

    /// Exon intervals as a `start,end` CSV
    #[arg(long)]
    exons: Option<PathBuf>,

    /// Closed-chromatin intervals as a `start,end` CSV
    #[arg(long)]
    closed: Option<PathBuf>,

    /// Pipeline configuration (JSON); omitted fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the results
    #[arg(long, default_value = "results.json")]
    out: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting the edit planner");

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let sequence = read_fasta(&args.fasta, config.invalid_base_tolerance)?;
    let mut variants = match &args.variants {
        Some(path) => read_variants_csv(path)?,
        None => Vec::new(),
    };
    if let Some(path) = &args.sample {
        let sample = read_fasta(path, config.invalid_base_tolerance)?;
        for called in align_to_reference(&sequence, &sample)? {
            if !variants.iter().any(|v| v.id == called.id) {
                variants.push(called);
            }
        }
    }
    let regions = GenomicRegions {
        closed_chromatin: args.closed.as_ref().map(read_intervals_csv).transpose()?,
        exons: args.exons.as_ref().map(read_intervals_csv).transpose()?,
    };

    let mut builder = Orchestrator::builder(config)
        .regions(regions)
        .listener(Arc::new(TracingListener));
    if let Some(path) = &args.annotations {
        builder = builder.annotation_source(Arc::new(read_annotation_table(path, "annotation-table")?));
    }
    let orchestrator = builder.build();

    let mut context = PipelineContext::new(sequence, variants).context("variants do not fit the sequence")?;
    let status = orchestrator.run(&mut context)?;

    match status {
        RunStatus::Completed => info!("{} candidate(s) designed and validated", context.candidates().len()),
        RunStatus::NoCandidates => warn!("No target sites survived the design filters"),
        RunStatus::Failed { stage, kind } => error!("Run failed in {} ({:?})", stage, kind),
        RunStatus::Cancelled { stage } => warn!("Run cancelled during {}", stage),
    }

    write_context_json(&context, &args.out)?;
    Ok(())
}
