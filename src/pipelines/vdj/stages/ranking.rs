//! Result filter / ranker
//!
//! Orders, deduplicates and trims the candidate alignments of one gene class
//! for each query.
//!
//! # Ordering
//!
//! Candidates are compared by bit score (descending), alignment length
//! (descending) and subject id (ascending). J candidates additionally get a
//! positional override: when two reliably long J alignments start more than
//! `override_distance` bases apart on the same strand, the one closer to the
//! 5' end of the V-oriented query ranks first as long as its score is at
//! least `score_ratio` times the other's.
//!
//! The override is pairwise and not transitive over three or more
//! candidates, so the full ranking is built by selection over the base order:
//! repeatedly take the first remaining candidate that no other remaining
//! candidate beats. This is deterministic for any input order.

use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;

use super::{ClassHits, PipelineStage, StageContext, StageError, check_batch};
use crate::defaults;
use crate::pipelines::vdj::engine::SequenceProvider;
use crate::pipelines::vdj::types::{CandidateAlignment, GeneClass, Strand, TaggedAlignment};
use crate::pipelines::vdj::vdj_opt::SearchParameters;

/// Tunables of the J positional override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingThresholds {
    /// Minimum distance between query starts for the override to apply.
    pub override_distance: usize,
    /// The 5' candidate must score at least this fraction of the other.
    pub score_ratio: f64,
}

impl Default for RankingThresholds {
    fn default() -> Self {
        Self {
            override_distance: defaults::J_POSITION_OVERRIDE_DISTANCE,
            score_ratio: defaults::J_POSITION_SCORE_RATIO,
        }
    }
}

/// Score/length/id order with full tie-breaking. A total order.
pub fn base_order(a: &CandidateAlignment, b: &CandidateAlignment) -> Ordering {
    b.bit_score
        .total_cmp(&a.bit_score)
        .then_with(|| b.align_length.cmp(&a.align_length))
        .then_with(|| a.subject_id.cmp(&b.subject_id))
        .then_with(|| (a.strand == Strand::Minus).cmp(&(b.strand == Strand::Minus)))
        .then_with(|| a.query_start.cmp(&b.query_start))
        .then_with(|| a.query_end.cmp(&b.query_end))
        .then_with(|| a.subject_start.cmp(&b.subject_start))
        .then_with(|| a.subject_end.cmp(&b.subject_end))
        .then_with(|| a.evalue.total_cmp(&b.evalue))
}

/// Alignment covers more than half of the pair's average subject length.
fn reliably_long(
    a: &CandidateAlignment,
    b: &CandidateAlignment,
    provider: &dyn SequenceProvider,
) -> bool {
    let (Some(len_a), Some(len_b)) = (provider.length(&a.subject_id), provider.length(&b.subject_id))
    else {
        return false;
    };
    let half_avg = (len_a + len_b) as f64 / 4.0;
    a.align_length as f64 > half_avg && b.align_length as f64 > half_avg
}

/// `Some(order)` when the J positional override decides the pair.
fn position_override(
    a: &CandidateAlignment,
    b: &CandidateAlignment,
    provider: &dyn SequenceProvider,
    thresholds: &RankingThresholds,
) -> Option<Ordering> {
    if a.strand != b.strand || a.query_start.abs_diff(b.query_start) <= thresholds.override_distance {
        return None;
    }
    if !reliably_long(a, b, provider) {
        return None;
    }

    // 5' on the minus strand is the higher plus-strand start
    let a_is_5prime = match a.strand {
        Strand::Plus => a.query_start < b.query_start,
        Strand::Minus => a.query_start > b.query_start,
    };
    let (five, three) = if a_is_5prime { (a, b) } else { (b, a) };
    if five.bit_score >= thresholds.score_ratio * three.bit_score {
        Some(if a_is_5prime {
            Ordering::Less
        } else {
            Ordering::Greater
        })
    } else {
        None
    }
}

/// Pairwise comparison: `Less` means `a` ranks before `b`.
pub fn compare_candidates(
    a: &CandidateAlignment,
    b: &CandidateAlignment,
    class: GeneClass,
    provider: &dyn SequenceProvider,
    thresholds: &RankingThresholds,
) -> Ordering {
    if class == GeneClass::J {
        if let Some(order) = position_override(a, b, provider, thresholds) {
            return order;
        }
    }
    base_order(a, b)
}

/// Rank and deduplicate (best hit per subject id).
pub fn rank_candidates(
    mut hits: Vec<CandidateAlignment>,
    class: GeneClass,
    provider: &dyn SequenceProvider,
    thresholds: &RankingThresholds,
) -> Vec<CandidateAlignment> {
    hits.sort_by(base_order);

    let ranked = if class == GeneClass::J && hits.len() > 1 {
        let mut remaining = hits;
        let mut ranked = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let pick = (0..remaining.len())
                .find(|&i| {
                    !remaining.iter().enumerate().any(|(k, other)| {
                        k != i
                            && compare_candidates(other, &remaining[i], class, provider, thresholds)
                                == Ordering::Less
                    })
                })
                .unwrap_or(0);
            ranked.push(remaining.remove(pick));
        }
        ranked
    } else {
        hits
    };

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|h| seen.insert(h.subject_id.clone()))
        .collect()
}

/// Batch sort applied to raw engine output: e-value ascending, then bit
/// score descending, then subject id.
pub fn sort_by_evalue(hits: &mut [CandidateAlignment]) {
    hits.sort_by(|a, b| {
        a.evalue
            .total_cmp(&b.evalue)
            .then_with(|| b.bit_score.total_cmp(&a.bit_score))
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
}

/// Move the hit for `subject_id` to the front, keeping the rest in order.
pub fn promote(hits: &mut Vec<CandidateAlignment>, subject_id: &str) {
    if let Some(pos) = hits.iter().position(|h| h.subject_id == subject_id) {
        if pos > 0 {
            let chosen = hits.remove(pos);
            hits.insert(0, chosen);
        }
    }
}

/// Merge one query's ranked per-class lists into the tagged result list,
/// in V, D, J, C order, applying each class's retention cutoff.
pub fn append_class_results(
    lists: &[(GeneClass, &[CandidateAlignment])],
    params: &SearchParameters,
) -> Vec<TaggedAlignment> {
    let mut merged = Vec::new();
    for class in GeneClass::ALL {
        for (_, hits) in lists.iter().filter(|(c, _)| *c == class) {
            merged.extend(
                hits.iter()
                    .take(params.num_alignments(class))
                    .map(|alignment| TaggedAlignment {
                        class,
                        alignment: alignment.clone(),
                    }),
            );
        }
    }
    merged
}

// ============================================================================
// STAGE
// ============================================================================

/// Ranks every query's candidates for one class. Lists are not truncated
/// here: D/J resolution scans past the retention cutoff, which is applied
/// when results are assembled.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankingStage {
    thresholds: RankingThresholds,
}

impl RankingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, thresholds: RankingThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

impl PipelineStage for RankingStage {
    type Input = ClassHits;
    type Output = ClassHits;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        check_batch(self.name(), input.num_queries(), ctx)?;

        let class = input.class;
        let sequences = ctx.sequences;
        let thresholds = self.thresholds;

        let per_query = input
            .per_query
            .into_par_iter()
            .map(|hits| rank_candidates(hits, class, sequences, &thresholds))
            .collect();

        Ok(ClassHits { class, per_query })
    }

    fn name(&self) -> &'static str {
        "Ranking"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::stages::test_support::{MapProvider, hit};

    fn ids(hits: &[CandidateAlignment]) -> Vec<&str> {
        hits.iter().map(|h| h.subject_id.as_str()).collect()
    }

    fn j_pair(strand: Strand, five_score: f64) -> (Vec<CandidateAlignment>, MapProvider) {
        let mut a = hit("IGHJ_a", strand, (50, 270), (0, 220), five_score);
        a.align_length = 220;
        let mut b = hit("IGHJ_b", strand, (400, 615), (0, 215), 300.0);
        b.align_length = 215;
        let provider = MapProvider::with_lengths(&[("IGHJ_a", 200), ("IGHJ_b", 200)]);
        (vec![a, b], provider)
    }

    #[test]
    fn test_minus_strand_j_pair() {
        // start 400 is the 5' candidate on the minus strand and also the
        // higher-scoring one
        let (hits, provider) = j_pair(Strand::Minus, 180.0);
        let ranked = rank_candidates(hits, GeneClass::J, &provider, &RankingThresholds::default());
        assert_eq!(ranked[0].query_start, 400);
    }

    #[test]
    fn test_plus_strand_override() {
        let (hits, provider) = j_pair(Strand::Plus, 180.0);
        let ranked = rank_candidates(hits, GeneClass::J, &provider, &RankingThresholds::default());
        assert_eq!(ids(&ranked), vec!["IGHJ_a", "IGHJ_b"]);

        // below 0.5x the other score the override does not apply
        let (hits, provider) = j_pair(Strand::Plus, 140.0);
        let ranked = rank_candidates(hits, GeneClass::J, &provider, &RankingThresholds::default());
        assert_eq!(ids(&ranked), vec!["IGHJ_b", "IGHJ_a"]);
    }

    #[test]
    fn test_override_needs_reliable_length() {
        let (mut hits, _) = j_pair(Strand::Plus, 180.0);
        hits[0].align_length = 90;
        let provider = MapProvider::with_lengths(&[("IGHJ_a", 200), ("IGHJ_b", 200)]);
        let ranked = rank_candidates(hits, GeneClass::J, &provider, &RankingThresholds::default());
        assert_eq!(ids(&ranked), vec!["IGHJ_b", "IGHJ_a"]);

        // unknown subject lengths disable the override
        let (hits, _) = j_pair(Strand::Plus, 180.0);
        let ranked = rank_candidates(
            hits,
            GeneClass::J,
            &MapProvider::default(),
            &RankingThresholds::default(),
        );
        assert_eq!(ids(&ranked), vec!["IGHJ_b", "IGHJ_a"]);
    }

    #[test]
    fn test_override_ignored_for_other_classes() {
        let (hits, provider) = j_pair(Strand::Plus, 180.0);
        let ranked = rank_candidates(hits, GeneClass::V, &provider, &RankingThresholds::default());
        assert_eq!(ids(&ranked), vec!["IGHJ_b", "IGHJ_a"]);
    }

    #[test]
    fn test_base_order_tie_breaks() {
        let provider = MapProvider::default();
        let a = hit("IGHV1", Strand::Plus, (0, 290), (0, 290), 400.0);
        let b = hit("IGHV2", Strand::Plus, (0, 296), (0, 296), 400.0);
        let c = hit("IGHV0", Strand::Plus, (0, 290), (0, 290), 400.0);
        let ranked = rank_candidates(
            vec![a, b, c],
            GeneClass::V,
            &provider,
            &RankingThresholds::default(),
        );
        assert_eq!(ids(&ranked), vec!["IGHV2", "IGHV0", "IGHV1"]);
    }

    #[test]
    fn test_dedup_keeps_best_per_subject() {
        let provider = MapProvider::default();
        let hits = vec![
            hit("IGHD3-10*01", Strand::Plus, (300, 312), (5, 17), 20.0),
            hit("IGHD3-10*01", Strand::Plus, (305, 321), (2, 18), 28.0),
            hit("IGHD2-2*01", Strand::Plus, (303, 313), (0, 10), 18.0),
        ];
        let ranked = rank_candidates(hits, GeneClass::D, &provider, &RankingThresholds::default());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].bit_score, 28.0);
    }

    #[test]
    fn test_sort_by_evalue() {
        let mut a = hit("b", Strand::Plus, (0, 10), (0, 10), 10.0);
        a.evalue = 1e-3;
        let mut b = hit("a", Strand::Plus, (0, 10), (0, 10), 20.0);
        b.evalue = 1e-3;
        let mut c = hit("c", Strand::Plus, (0, 10), (0, 10), 5.0);
        c.evalue = 1e-9;
        let mut hits = vec![a, b, c];
        sort_by_evalue(&mut hits);
        assert_eq!(ids(&hits), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_promote_and_append() {
        let mut hits = vec![
            hit("IGHJ4*02", Strand::Plus, (300, 348), (0, 48), 90.0),
            hit("IGHJ5*01", Strand::Plus, (300, 348), (0, 48), 80.0),
            hit("IGHJ6*01", Strand::Plus, (300, 348), (0, 48), 70.0),
        ];
        promote(&mut hits, "IGHJ6*01");
        assert_eq!(ids(&hits), vec!["IGHJ6*01", "IGHJ4*02", "IGHJ5*01"]);

        let params = SearchParameters {
            num_alignments_j: 2,
            ..SearchParameters::default()
        };
        let v = vec![hit("IGHV3-23*01", Strand::Plus, (0, 296), (0, 296), 500.0)];
        let merged = append_class_results(
            &[(GeneClass::J, hits.as_slice()), (GeneClass::V, v.as_slice())],
            &params,
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].class, GeneClass::V);
        assert_eq!(merged[2].alignment.subject_id, "IGHJ4*02");
    }
}
