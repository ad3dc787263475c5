//! PAM motif matching and target-site extraction on both strands.

use std::ops::Range;

use regex::Regex;

use crate::error::DesignError;
use crate::models::{DnaSequence, PamShield, Strand};
use crate::sequence::{iupac_bases, iupac_complement, reverse_complement};

/// An IUPAC PAM motif compiled for the forward strand and for its reverse
/// complement, which is how a reverse-strand PAM reads on the forward strand.
#[derive(Debug, Clone)]
pub struct PamMotif {
    motif: String,
    forward: Regex,
    reverse: Regex,
}

impl PamMotif {
    pub fn parse(motif: &str) -> Result<Self, DesignError> {
        let motif = motif.trim().to_ascii_uppercase();
        if motif.is_empty() {
            return Err(DesignError::EmptyPam);
        }
        let reverse_motif: String = motif.bytes().rev().map(|b| iupac_complement(b) as char).collect();
        let forward = compile(&motif)?;
        let reverse = compile(&reverse_motif)?;
        Ok(Self { motif, forward, reverse })
    }

    pub fn as_str(&self) -> &str {
        &self.motif
    }

    pub fn len(&self) -> usize {
        self.motif.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motif.is_empty()
    }

    /// Whether `pam`, read on the guide's strand, satisfies the motif.
    pub fn matches(&self, pam: &str) -> bool {
        pam.len() == self.motif.len() && self.forward.find(pam).is_some_and(|m| m.start() == 0)
    }

    /// Fraction of motif positions that fix a single base; `NGG` gives 2/3.
    pub fn specificity(&self) -> f64 {
        let fixed = self
            .motif
            .bytes()
            .filter(|b| iupac_bases(*b).is_some_and(|bases| bases.len() == 1))
            .count();
        fixed as f64 / self.motif.len() as f64
    }
}

fn compile(motif: &str) -> Result<Regex, DesignError> {
    let mut pattern = String::with_capacity(motif.len() * 6);
    for symbol in motif.bytes() {
        let bases = iupac_bases(symbol).ok_or(DesignError::InvalidPamSymbol {
            motif: motif.to_string(),
            symbol: symbol as char,
        })?;
        pattern.push('[');
        pattern.extend(bases.iter().map(|b| *b as char));
        pattern.push(']');
    }
    Regex::new(&pattern).map_err(|_| DesignError::InvalidPamSymbol {
        motif: motif.to_string(),
        symbol: '?',
    })
}

/// Every start offset of `re` in `text`, overlapping matches included.
fn overlapping_starts(re: &Regex, text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut from = 0;
    while from < text.len() {
        match re.find_at(text, from) {
            Some(m) => {
                starts.push(m.start());
                from = m.start() + 1;
            }
            None => break,
        }
    }
    starts
}

/// A PAM with room for a full protospacer next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSite {
    pub strand: Strand,
    /// Forward-strand offset of the PAM's leftmost base.
    pub pam_position: usize,
    /// 5'→3' on the guide's strand.
    pub protospacer: String,
    pub pam: String,
    /// Forward-strand offset where the protospacer begins.
    pub protospacer_start: usize,
    /// Protospacer plus PAM on the forward strand.
    pub site: Range<usize>,
    pub cut_site: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    pub sites: Vec<TargetSite>,
    /// Motif hits on either strand, with or without room for a protospacer.
    pub pam_matches: usize,
}

/// Linear scan of both strands for `motif`.
///
/// Forward strand: the protospacer is the `protospacer_length` bases 5' of the
/// PAM. Reverse strand: the motif's reverse complement is found on the
/// forward strand and the protospacer is the reverse complement of the bases
/// 3' of it.
pub fn scan(sequence: &DnaSequence, motif: &PamMotif, protospacer_length: usize, cut_offset: usize) -> ScanResult {
    let bases = sequence.bases();
    let n = bases.len();
    let k = motif.len();
    let l = protospacer_length;
    let mut result = ScanResult::default();

    for p in overlapping_starts(&motif.forward, bases) {
        result.pam_matches += 1;
        if p < l || p + k > n {
            continue;
        }
        result.sites.push(TargetSite {
            strand: Strand::Forward,
            pam_position: p,
            protospacer: bases[p - l..p].to_string(),
            pam: bases[p..p + k].to_string(),
            protospacer_start: p - l,
            site: p - l..p + k,
            cut_site: p.saturating_sub(cut_offset),
        });
    }

    for q in overlapping_starts(&motif.reverse, bases) {
        result.pam_matches += 1;
        if q + k + l > n {
            continue;
        }
        result.sites.push(TargetSite {
            strand: Strand::Reverse,
            pam_position: q,
            protospacer: reverse_complement(&bases[q + k..q + k + l]),
            pam: reverse_complement(&bases[q..q + k]),
            protospacer_start: q + k,
            site: q..q + k + l,
            cut_site: q + k + cut_offset,
        });
    }

    result
}

/// Shielding substitution for `site`: the last motif position that fixes
/// anything, turned into a base the motif rejects there (`A` when possible).
/// `None` when every motif position is `N`.
pub fn shield(site: &TargetSite, motif: &PamMotif) -> Option<PamShield> {
    let symbols = motif.as_str().as_bytes();
    let k = symbols.len();
    let offset = (0..k).rev().find(|&i| iupac_bases(symbols[i]).is_some_and(|bases| bases.len() < 4))?;
    let allowed = iupac_bases(symbols[offset])?;
    let replacement = b"ACGT".iter().copied().find(|b| !allowed.contains(b))?;

    let (position, forward_base) = match site.strand {
        Strand::Forward => (site.pam_position + offset, replacement),
        Strand::Reverse => (site.pam_position + k - 1 - offset, iupac_complement(replacement)),
    };
    let shielded_pam = site
        .pam
        .bytes()
        .enumerate()
        .map(|(i, b)| if i == offset { replacement as char } else { b as char })
        .collect();

    Some(PamShield {
        offset,
        position,
        replacement: forward_base as char,
        shielded_pam,
        tryptophan_codon: site.pam == "TGG",
    })
}
