//! Annotation source contract and the retrying lookup around it.

use std::collections::HashMap;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::control::RunControl;
use crate::error::AnnotationSourceError;
use crate::models::{ClinicalSignificance, Variant};

/// Lookup key: genomic position plus alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantQuery<'a> {
    pub position: usize,
    pub reference: &'a str,
    pub alternate: &'a str,
}

impl<'a> From<&'a Variant> for VariantQuery<'a> {
    fn from(v: &'a Variant) -> Self {
        Self {
            position: v.position,
            reference: &v.reference,
            alternate: &v.alternate,
        }
    }
}

/// What a source knows about one variant. Either field may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub significance: Option<ClinicalSignificance>,
    pub conservation: Option<f64>,
}

/// An external knowledge base (clinical variant database, conservation service, ...).
///
/// `Ok(None)` means the source answered but has no record for the variant.
pub trait AnnotationSource: Send + Sync {
    fn name(&self) -> &str;

    fn lookup(&self, query: &VariantQuery<'_>) -> Result<Option<AnnotationRecord>, AnnotationSourceError>;
}

/// Outcome of a lookup after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Answered(Option<AnnotationRecord>),
    Exhausted { attempts: u32, last_error: AnnotationSourceError },
    Cancelled,
}

/// Query `source`, retrying retryable failures with exponential backoff.
pub fn lookup_with_retry(
    source: &dyn AnnotationSource,
    query: &VariantQuery<'_>,
    policy: &RetryPolicy,
    control: &RunControl,
) -> LookupOutcome {
    let mut attempt = 0u32;
    loop {
        if control.is_cancelled() {
            return LookupOutcome::Cancelled;
        }
        match source.lookup(query) {
            Ok(record) => return LookupOutcome::Answered(record.map(sanitize)),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                debug!(
                    "{} lookup at {} failed ({}), retry {} in {:?}",
                    source.name(),
                    query.position,
                    e,
                    attempt + 1,
                    delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} lookup at {} gave up after {} attempt(s): {}",
                    source.name(),
                    query.position,
                    attempt + 1,
                    e
                );
                return LookupOutcome::Exhausted {
                    attempts: attempt + 1,
                    last_error: e,
                };
            }
        }
    }
}

// Conservation outside [0, 1] is treated as absent rather than trusted.
fn sanitize(record: AnnotationRecord) -> AnnotationRecord {
    AnnotationRecord {
        conservation: record.conservation.filter(|c| (0.0..=1.0).contains(c)),
        ..record
    }
}

/// In-memory source keyed by (position, ref, alt), e.g. loaded from a ClinVar extract.
#[derive(Debug, Clone, Default)]
pub struct TableAnnotationSource {
    name: String,
    records: HashMap<(usize, String, String), AnnotationRecord>,
}

impl TableAnnotationSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: HashMap::new(),
        }
    }

    pub fn insert(&mut self, position: usize, reference: &str, alternate: &str, record: AnnotationRecord) {
        self.records
            .insert((position, reference.to_string(), alternate.to_string()), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AnnotationSource for TableAnnotationSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, query: &VariantQuery<'_>) -> Result<Option<AnnotationRecord>, AnnotationSourceError> {
        let key = (query.position, query.reference.to_string(), query.alternate.to_string());
        Ok(self.records.get(&key).copied())
    }
}
