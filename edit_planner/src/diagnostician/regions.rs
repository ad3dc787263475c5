//! Interval maps supplied by the GFF3 / chromatin collaborators.

use std::ops::Range;

use crate::models::{Accessibility, GeneFeature, Variant};

/// Sorted, half-open intervals on the forward strand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalSet {
    intervals: Vec<Range<usize>>,
}

impl IntervalSet {
    pub fn new(intervals: impl IntoIterator<Item = Range<usize>>) -> Self {
        let mut intervals: Vec<Range<usize>> = intervals.into_iter().filter(|r| r.start < r.end).collect();
        intervals.sort_by_key(|r| (r.start, r.end));
        Self { intervals }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
        self.intervals.iter()
    }

    pub fn overlaps(&self, range: &Range<usize>) -> bool {
        // Intervals starting at or after range.end cannot overlap.
        let upper = self.intervals.partition_point(|r| r.start < range.end);
        self.intervals[..upper].iter().any(|r| r.end > range.start)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// Optional region maps; a missing map yields `Unknown` classifications.
#[derive(Debug, Clone, Default)]
pub struct GenomicRegions {
    pub closed_chromatin: Option<IntervalSet>,
    pub exons: Option<IntervalSet>,
}

impl GenomicRegions {
    pub fn accessibility(&self, variant: &Variant) -> Accessibility {
        match &self.closed_chromatin {
            None => Accessibility::Unknown,
            Some(closed) if closed.overlaps(&variant.span()) => Accessibility::Closed,
            Some(_) => Accessibility::Open,
        }
    }

    /// Exon / intron / splice-site call. Within `splice_window` bases of an exon
    /// boundary counts as a splice site.
    pub fn gene_feature(&self, variant: &Variant, splice_window: usize) -> GeneFeature {
        let Some(exons) = &self.exons else {
            return GeneFeature::Unknown;
        };
        let pos = variant.position;
        let near = |boundary: usize| pos.abs_diff(boundary) <= splice_window;

        if exons.iter().any(|e| near(e.start) || near(e.end - 1)) {
            return GeneFeature::SpliceSite;
        }
        if exons.iter().any(|e| e.contains(&pos)) {
            return GeneFeature::Exon;
        }
        GeneFeature::Intron
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant_at(position: usize) -> Variant {
        Variant::new(position, "A", "G").unwrap()
    }

    #[test]
    fn overlaps_respects_half_open_bounds() {
        let set = IntervalSet::new([10..20, 30..40, 5..5]);
        assert_eq!(set.len(), 2);
        assert!(set.overlaps(&(19..21)));
        assert!(!set.overlaps(&(20..30)));
        assert!(set.overlaps(&(0..11)));
        assert!(!set.overlaps(&(40..50)));
    }

    #[test]
    fn accessibility_calls() {
        let none = GenomicRegions::default();
        assert_eq!(none.accessibility(&variant_at(3)), Accessibility::Unknown);

        let regions = GenomicRegions { closed_chromatin: Some(IntervalSet::new([0..10])), exons: None };
        assert_eq!(regions.accessibility(&variant_at(3)), Accessibility::Closed);
        assert_eq!(regions.accessibility(&variant_at(12)), Accessibility::Open);
    }

    #[test]
    fn gene_feature_calls() {
        let regions = GenomicRegions { closed_chromatin: None, exons: Some(IntervalSet::new([100..200])) };
        assert_eq!(regions.gene_feature(&variant_at(98), 2), GeneFeature::SpliceSite);
        assert_eq!(regions.gene_feature(&variant_at(201), 2), GeneFeature::SpliceSite);
        assert_eq!(regions.gene_feature(&variant_at(150), 2), GeneFeature::Exon);
        assert_eq!(regions.gene_feature(&variant_at(50), 2), GeneFeature::Intron);
        assert_eq!(GenomicRegions::default().gene_feature(&variant_at(150), 2), GeneFeature::Unknown);
    }
}
