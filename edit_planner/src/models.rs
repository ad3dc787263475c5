// src/models.rs

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::sequence::{invalid_positions, normalize};

// ───────────────────────────── stages ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Diagnostician,
    Engineer,
    Regulator,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Diagnostician => "diagnostician",
            Self::Engineer => "engineer",
            Self::Regulator => "regulator",
        };
        f.write_str(name)
    }
}

// ───────────────────────────── sequence ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "+",
            Self::Reverse => "-",
        })
    }
}

/// Where a sequence sits in a larger assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceOrigin {
    pub contig: String,
    pub start: u64,
    pub strand: Strand,
}

/// A validated DNA sequence over {A,C,G,T,N}. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnaSequence {
    id: String,
    bases: String,
    origin: Option<SequenceOrigin>,
}

impl DnaSequence {
    /// Normalise and validate `raw` with no tolerance for foreign characters.
    pub fn new(id: impl Into<String>, raw: &str) -> Result<Self, InputError> {
        Self::with_tolerance(id, raw, 0)
    }

    /// Normalise `raw`; up to `tolerance` foreign characters are replaced by `N`.
    pub fn with_tolerance(id: impl Into<String>, raw: &str, tolerance: usize) -> Result<Self, InputError> {
        let id = id.into();
        let mut bases = normalize(raw);
        if bases.is_empty() {
            return Err(InputError::EmptySequence { id });
        }

        let invalid = invalid_positions(&bases);
        if let Some(&(offset, first)) = invalid.first() {
            if invalid.len() > tolerance {
                return Err(InputError::InvalidBases {
                    id,
                    count: invalid.len(),
                    tolerance,
                    first,
                    offset,
                });
            }
            bases = bases
                .chars()
                .map(|c| if c.is_ascii() && crate::sequence::is_dna_base(c as u8) { c } else { 'N' })
                .collect();
        }

        Ok(Self { id, bases, origin: None })
    }

    pub fn with_origin(mut self, origin: SequenceOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bases(&self) -> &str {
        &self.bases
    }

    pub fn origin(&self) -> Option<&SequenceOrigin> {
        self.origin.as_ref()
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Bases in `range`, `None` when out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Option<&str> {
        self.bases.get(range)
    }
}

// ───────────────────────────── variants ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantKind {
    Substitution,
    Insertion,
    Deletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClinicalSignificance {
    Benign,
    Uncertain,
    Pathogenic,
    Unknown,
}

impl ClinicalSignificance {
    /// Map a ClinVar-style CLNSIG label. Anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let l = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match l.as_str() {
            "pathogenic" | "likely_pathogenic" | "pathogenic/likely_pathogenic" => Self::Pathogenic,
            "benign" | "likely_benign" | "benign/likely_benign" => Self::Benign,
            "uncertain" | "uncertain_significance" | "vus" => Self::Uncertain,
            l if l.starts_with("conflicting") => Self::Uncertain,
            _ => Self::Unknown,
        }
    }
}

/// Chromatin state around a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessibility {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneFeature {
    SpliceSite,
    Exon,
    Intron,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnnotation {
    pub significance: ClinicalSignificance,
    /// Conservation in [0, 1], absent when no source supplied one.
    pub conservation: Option<f64>,
    pub accessibility: Accessibility,
    pub feature: GeneFeature,
    pub clinically_relevant: bool,
    /// At least one source exhausted its retries for this variant.
    pub degraded: bool,
}

impl VariantAnnotation {
    /// Annotation used when nothing could be learned about a variant.
    pub fn unknown() -> Self {
        Self {
            significance: ClinicalSignificance::Unknown,
            conservation: None,
            accessibility: Accessibility::Unknown,
            feature: GeneFeature::Unknown,
            clinically_relevant: false,
            degraded: false,
        }
    }

    /// Blocks guide placement over this variant.
    pub fn blocks_editing(&self) -> bool {
        self.significance == ClinicalSignificance::Pathogenic || self.accessibility == Accessibility::Closed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    /// 0-based offset into the sequence.
    pub position: usize,
    pub reference: String,
    pub alternate: String,
    pub kind: VariantKind,
    pub annotation: Option<VariantAnnotation>,
}

impl Variant {
    /// Build a variant, inferring its kind from allele lengths. `-` or an empty
    /// allele denotes absence.
    pub fn new(position: usize, reference: &str, alternate: &str) -> Result<Self, InputError> {
        let reference = clean_allele(position, reference)?;
        let alternate = clean_allele(position, alternate)?;
        let kind = match (reference.len(), alternate.len()) {
            (r, a) if r == a && r > 0 => VariantKind::Substitution,
            (r, a) if a > r => VariantKind::Insertion,
            (r, a) if r > a => VariantKind::Deletion,
            _ => {
                return Err(InputError::InvalidAllele {
                    position,
                    allele: format!("{reference}>{alternate}"),
                })
            }
        };
        Ok(Self {
            id: format!("{position}:{}>{}", display_allele(&reference), display_allele(&alternate)),
            position,
            reference,
            alternate,
            kind,
            annotation: None,
        })
    }

    /// Sequence interval touched by the variant. Pure insertions cover one base.
    pub fn span(&self) -> Range<usize> {
        self.position..self.position + self.reference.len().max(1)
    }

    /// Bases between a cut before `cut_site` and the nearest edge of the
    /// variant; 0 when the cut touches or splits it.
    pub fn cut_distance(&self, cut_site: usize) -> usize {
        let span = self.span();
        if cut_site <= span.start {
            span.start - cut_site
        } else {
            cut_site.saturating_sub(span.end)
        }
    }

    pub fn overlaps(&self, range: &Range<usize>) -> bool {
        let span = self.span();
        span.start < range.end && range.start < span.end
    }

    /// Validate the variant against the sequence it belongs to.
    pub fn check_against(&self, sequence: &DnaSequence) -> Result<(), InputError> {
        let length = sequence.len();
        if self.position >= length || self.span().end > length {
            return Err(InputError::VariantOutOfBounds {
                position: self.position,
                length,
            });
        }
        if !self.reference.is_empty() {
            let found = sequence.slice(self.span()).unwrap_or_default();
            if found != self.reference {
                return Err(InputError::ReferenceMismatch {
                    position: self.position,
                    expected: self.reference.clone(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn clean_allele(position: usize, allele: &str) -> Result<String, InputError> {
    let allele = normalize(allele);
    if allele == "-" || allele == "." {
        return Ok(String::new());
    }
    if !invalid_positions(&allele).is_empty() {
        return Err(InputError::InvalidAllele { position, allele });
    }
    Ok(allele)
}

fn display_allele(allele: &str) -> &str {
    if allele.is_empty() {
        "-"
    } else {
        allele
    }
}

// ───────────────────────────── candidates ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitSource {
    /// Found by sliding over the input sequence.
    Sequence,
    /// Reported by the genome-wide index.
    GenomeIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffTargetSite {
    pub position: usize,
    pub strand: Strand,
    pub mismatches: u32,
    /// Position-weighted similarity in [0, 1]; 1.0 is a perfect match.
    pub similarity: f64,
    pub source: HitSource,
    pub gene: Option<String>,
    pub essential: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    NotConfigured,
    Searched,
    Unavailable,
}

/// Retained off-target hits for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffTargetProfile {
    /// Top-K sites, descending similarity.
    pub sites: Vec<OffTargetSite>,
    /// Every hit within the mismatch bound, including those not retained.
    pub total_hits: usize,
    /// The search deadline expired before the search finished.
    pub truncated: bool,
    pub index_status: IndexStatus,
}

impl OffTargetProfile {
    pub fn empty() -> Self {
        Self {
            sites: Vec::new(),
            total_hits: 0,
            truncated: false,
            index_status: IndexStatus::NotConfigured,
        }
    }
}

/// U6 expression concerns for a spacer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manufacturability {
    /// Contains `TTTT`, a Pol III terminator.
    pub poly_t_terminator: bool,
    /// Spacer does not start with `G`; one must be prepended.
    pub needs_g_prefix: bool,
    /// Consecutive complementary pairs between the 5' and 3' ends.
    pub end_complementarity: usize,
}

/// Substitution inside the PAM that keeps a repaired allele from being cut
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PamShield {
    /// Offset of the substituted base within the PAM, guide orientation.
    pub offset: usize,
    /// Forward-strand offset of the substituted base.
    pub position: usize,
    /// Replacement base, forward strand.
    pub replacement: char,
    /// PAM after the substitution, guide orientation.
    pub shielded_pam: String,
    /// The PAM reads `TGG`. As the only tryptophan codon it has no silent
    /// substitution.
    pub tryptophan_codon: bool,
}

/// One homology-directed repair template, forward strand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairTemplate {
    pub sequence: String,
    pub left_arm: usize,
    pub right_arm: usize,
    /// Consecutive complementary pairs between the template's ends.
    pub hairpin: usize,
    pub shielded: bool,
}

/// Repair templates restoring the reference allele of one variant around a
/// candidate's cut, fewest hairpin pairs first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairDesign {
    pub variant: String,
    pub unshieldable_pam: bool,
    pub too_short_context: bool,
    pub templates: Vec<RepairTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub String);

impl CandidateId {
    pub fn new(strand: Strand, pam_position: usize) -> Self {
        Self(format!("{strand}{pam_position}"))
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scored guide RNA. Built once by the Engineer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideCandidate {
    pub id: CandidateId,
    /// 5'→3' spacer, PAM-proximal base last.
    pub protospacer: String,
    /// PAM as read on the candidate's strand.
    pub pam: String,
    pub strand: Strand,
    /// Forward-strand offset of the PAM's leftmost base.
    pub pam_position: usize,
    /// Forward-strand interval covering protospacer and PAM.
    pub site: Range<usize>,
    /// Forward-strand offset of the first base after the cut.
    pub cut_site: usize,
    pub gc_content: f64,
    pub structure_penalty: f64,
    pub on_target: f64,
    pub off_target_risk: f64,
    pub composite: f64,
    /// 1-based position in the ranked output.
    pub rank: usize,
    pub off_targets: OffTargetProfile,
    pub manufacturing: Manufacturability,
    /// Id of the variant nearest to the cut, if there are variants.
    pub nearest_variant: Option<String>,
    /// See [`Variant::cut_distance`].
    pub cut_distance: Option<usize>,
    /// `None` when every PAM position accepts any base.
    pub pam_shield: Option<PamShield>,
    /// Present when the nearest variant lies close enough to the cut.
    pub repair: Option<RepairDesign>,
}

// ───────────────────────────── validation ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    OffTargetLimit,
    ClinicalRegionHit,
    EssentialGeneHit,
    PerfectOffTarget,
    LowEfficiency,
    IncompleteSearch,
    PolyTTerminator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule: RuleId,
    pub tier: RiskTier,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub tier: RiskTier,
    pub violations: Vec<RuleViolation>,
    pub passed: bool,
}

impl ValidationResult {
    /// Usable downstream; REJECTED candidates stay in the context but are flagged.
    pub fn is_suitable(&self) -> bool {
        self.tier != RiskTier::Rejected
    }
}
