//! Homology-directed repair templates.
//!
//! The design sequence carries reference alleles, so a template is a window
//! of it around the cut: it restores the reference allele in a genome that
//! carries the variant's alternate one. The PAM shield is written into every
//! template so the repaired allele is not cut again.

use tracing::debug;

use crate::config::RepairConfig;
use crate::models::{DnaSequence, PamShield, RepairDesign, RepairTemplate, Variant};

use super::scoring::end_complementarity;

/// Templates for a cut before `cut_site` that repair `variant`.
///
/// Arms slide from `min_arm` up to `template_length - min_arm` on the left.
/// Windows running off the sequence or not covering the variant are skipped.
/// Nothing is designed for an unshieldable PAM.
pub fn design_templates(
    sequence: &DnaSequence,
    cut_site: usize,
    shield: Option<&PamShield>,
    variant: &Variant,
    config: &RepairConfig,
) -> RepairDesign {
    let unshieldable_pam = shield.map_or(true, |s| s.tryptophan_codon);
    let mut design = RepairDesign {
        variant: variant.id.clone(),
        unshieldable_pam,
        too_short_context: false,
        templates: Vec::new(),
    };
    if unshieldable_pam {
        debug!("No repair templates around {}: the PAM cannot be shielded", cut_site);
        return design;
    }

    let bases = sequence.bases();
    let length = config.template_length;
    let half = length / 2;
    let span = variant.span();
    let mut templates = Vec::new();

    for left_arm in config.min_arm..=length.saturating_sub(config.min_arm) {
        let right_arm = length - left_arm;
        let Some(start) = cut_site.checked_sub(left_arm) else {
            continue;
        };
        let end = cut_site + right_arm;
        if end > bases.len() || span.start < start || span.end > end {
            continue;
        }

        let mut window = bases.as_bytes()[start..end].to_vec();
        // A shield on the variant itself would undo the repair.
        let shielded = shield.is_some_and(|s| (start..end).contains(&s.position) && !span.contains(&s.position));
        if let Some(s) = shield.filter(|_| shielded) {
            window[s.position - start] = s.replacement as u8;
        }
        let text: String = window.into_iter().map(char::from).collect();
        templates.push(RepairTemplate {
            hairpin: end_complementarity(&text),
            sequence: text,
            left_arm,
            right_arm,
            shielded,
        });
    }

    design.too_short_context = templates.is_empty();
    templates.sort_by_key(|t| (t.hairpin, t.left_arm.abs_diff(half), t.left_arm));
    templates.truncate(config.max_templates);
    design.templates = templates;
    design
}
