//! File adapters for the binary and tests: FASTA, CSV tables and the JSON
//! result file. The pipeline itself never touches the filesystem.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;
use crate::diagnostician::{AnnotationRecord, IntervalSet, TableAnnotationSource};
use crate::models::{ClinicalSignificance, DnaSequence, Variant};

/// Read the first record of a FASTA file. The id is the first word of the
/// header; sequence lines are concatenated.
pub fn read_fasta(path: impl AsRef<Path>, tolerance: usize) -> Result<DnaSequence> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let mut id = None;
    let mut bases = String::new();
    for line in content.lines() {
        if let Some(header) = line.strip_prefix('>') {
            if id.is_some() {
                debug!("{} holds more than one record, using the first", path.display());
                break;
            }
            id = Some(header.split_whitespace().next().unwrap_or_default().to_string());
        } else {
            bases.push_str(line.trim());
        }
    }

    let id = id.filter(|s| !s.is_empty()).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sequence".to_string())
    });
    let sequence = DnaSequence::with_tolerance(id, &bases, tolerance)?;
    info!("Loaded {} ({} nt) from {}", sequence.id(), sequence.len(), path.display());
    Ok(sequence)
}

#[derive(Debug, Deserialize)]
struct VariantRow {
    position: usize,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(rename = "alt")]
    alternate: String,
}

/// Variants from a `position,ref,alt` CSV with 0-based positions.
pub fn read_variants_csv(path: impl AsRef<Path>) -> Result<Vec<Variant>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut variants = Vec::new();
    for (line, row) in reader.deserialize::<VariantRow>().enumerate() {
        let row = row.with_context(|| format!("{} record {}", path.display(), line + 1))?;
        variants.push(Variant::new(row.position, &row.reference, &row.alternate)?);
    }
    info!("Loaded {} variants from {}", variants.len(), path.display());
    Ok(variants)
}

/// Substitutions found by comparing `sample` to `reference` base by base
/// from offset 0. Positions where either holds `N` are not called; bases past
/// the shorter sequence are ignored.
pub fn align_to_reference(reference: &DnaSequence, sample: &DnaSequence) -> Result<Vec<Variant>> {
    if reference.len() != sample.len() {
        warn!(
            "{} is {} nt and {} is {} nt, comparing the first {} only",
            reference.id(),
            reference.len(),
            sample.id(),
            sample.len(),
            reference.len().min(sample.len())
        );
    }

    let mut variants = Vec::new();
    let pairs = reference.bases().bytes().zip(sample.bases().bytes()).enumerate();
    for (position, (r, s)) in pairs.filter(|(_, (r, s))| r != s && *r != b'N' && *s != b'N') {
        let variant = Variant::new(position, &char::from(r).to_string(), &char::from(s).to_string())
            .with_context(|| format!("calling {} against {}", sample.id(), reference.id()))?;
        variants.push(variant);
    }
    info!("{} differs from {} at {} position(s)", sample.id(), reference.id(), variants.len());
    Ok(variants)
}

#[derive(Debug, Deserialize)]
struct AnnotationRow {
    position: usize,
    #[serde(rename = "ref")]
    reference: String,
    #[serde(rename = "alt")]
    alternate: String,
    significance: Option<String>,
    conservation: Option<f64>,
}

/// Annotation table from a `position,ref,alt,significance,conservation` CSV.
/// Significance uses ClinVar labels; either value may be blank.
pub fn read_annotation_table(path: impl AsRef<Path>, name: &str) -> Result<TableAnnotationSource> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut table = TableAnnotationSource::new(name);
    for (line, row) in reader.deserialize::<AnnotationRow>().enumerate() {
        let row = row.with_context(|| format!("{} record {}", path.display(), line + 1))?;
        // Keys must match the normalised alleles the Diagnostician queries with.
        let variant = Variant::new(row.position, &row.reference, &row.alternate)?;
        let record = AnnotationRecord {
            significance: row
                .significance
                .filter(|s| !s.is_empty())
                .map(|s| ClinicalSignificance::from_label(&s)),
            conservation: row.conservation,
        };
        table.insert(variant.position, &variant.reference, &variant.alternate, record);
    }
    info!("Loaded {} annotation records into {}", table.len(), name);
    Ok(table)
}

#[derive(Debug, Deserialize)]
struct IntervalRow {
    start: usize,
    end: usize,
}

/// Half-open `start,end` intervals.
pub fn read_intervals_csv(path: impl AsRef<Path>) -> Result<IntervalSet> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut intervals = Vec::new();
    for (line, row) in reader.deserialize::<IntervalRow>().enumerate() {
        let row = row.with_context(|| format!("{} record {}", path.display(), line + 1))?;
        if row.end < row.start {
            bail!("{} record {}: end {} before start {}", path.display(), line + 1, row.end, row.start);
        }
        intervals.push(row.start..row.end);
    }
    Ok(IntervalSet::new(intervals))
}

/// Write the final context as pretty JSON.
pub fn write_context_json(context: &PipelineContext, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), context)?;
    info!("Results written to {}", path.display());
    Ok(())
}
