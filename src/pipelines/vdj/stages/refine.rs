//! Alignment refinement
//!
//! Local alignments routinely stop a few bases short of the germline ends
//! because of mismatches near the edges. The refiner optionally extends V
//! alignments to the germline 5' end and J alignments to the germline 3' end,
//! then screens both classes by a minimum alignment length.
//!
//! Extension works on the oriented query and is always bounded by the query
//! ends. Refinement produces new candidates; inputs are never mutated.

use rayon::prelude::*;

use super::{ClassHits, PipelineStage, StageContext, StageError, check_batch};
use crate::pipelines::vdj::engine::SequenceProvider;
use crate::pipelines::vdj::types::{CandidateAlignment, GeneClass, Span, Strand};
use crate::pipelines::vdj::vdj_opt::RefineParams;

fn with_oriented_span(aln: &CandidateAlignment, oriented: Span, query_len: usize) -> CandidateAlignment {
    let plus = oriented.to_plus_strand(aln.strand, query_len);
    CandidateAlignment {
        query_start: plus.start,
        query_end: plus.end,
        ..aln.clone()
    }
}

fn push_match(cigar: &mut Vec<(u8, u32)>, len: usize, front: bool) {
    if cigar.is_empty() {
        return;
    }
    let len = len as u32;
    if front {
        match cigar.first_mut() {
            Some((b'M', n)) => *n += len,
            _ => cigar.insert(0, (b'M', len)),
        }
    } else {
        match cigar.last_mut() {
            Some((b'M', n)) => *n += len,
            _ => cigar.push((b'M', len)),
        }
    }
}

/// Extend toward the germline 5' end when the unaligned subject prefix is
/// at most `max_extension` bases.
pub fn extend_5_prime(
    aln: &CandidateAlignment,
    query_len: usize,
    max_extension: usize,
) -> CandidateAlignment {
    let gap = aln.subject_start;
    let oriented = aln.oriented_query_span(query_len);
    let ext = gap.min(oriented.start);
    if gap == 0 || gap > max_extension || ext == 0 {
        return aln.clone();
    }

    let mut extended = with_oriented_span(aln, Span::new(oriented.start - ext, oriented.end), query_len);
    extended.subject_start -= ext;
    extended.align_length += ext;
    push_match(&mut extended.cigar, ext, true);
    extended
}

/// Extend toward the germline 3' end when the unaligned subject suffix is
/// at most `max_extension` bases.
pub fn extend_3_prime(
    aln: &CandidateAlignment,
    query_len: usize,
    subject_len: usize,
    max_extension: usize,
) -> CandidateAlignment {
    let gap = subject_len.saturating_sub(aln.subject_end);
    let oriented = aln.oriented_query_span(query_len);
    let ext = gap.min(query_len.saturating_sub(oriented.end));
    if gap == 0 || gap > max_extension || ext == 0 {
        return aln.clone();
    }

    let mut extended = with_oriented_span(aln, Span::new(oriented.start, oriented.end + ext), query_len);
    extended.subject_end += ext;
    extended.align_length += ext;
    push_match(&mut extended.cigar, ext, false);
    extended
}

/// Refine one query's candidates of one class.
pub fn refine_candidates(
    hits: Vec<CandidateAlignment>,
    class: GeneClass,
    query_len: usize,
    params: &RefineParams,
    provider: &dyn SequenceProvider,
) -> Vec<CandidateAlignment> {
    match class {
        GeneClass::V => hits
            .into_iter()
            .map(|h| {
                if params.extend_5_end {
                    extend_5_prime(&h, query_len, params.max_edge_extension)
                } else {
                    h
                }
            })
            .filter(|h| h.align_length >= params.min_v_length)
            .collect(),
        GeneClass::J => hits
            .into_iter()
            .map(|h| match provider.length(&h.subject_id) {
                Some(subject_len) if params.extend_3_end => {
                    extend_3_prime(&h, query_len, subject_len, params.max_edge_extension)
                }
                _ => h,
            })
            .filter(|h| h.align_length >= params.min_j_length)
            .collect(),
        GeneClass::D | GeneClass::C => hits,
    }
}

/// Refines every query's candidates for one class.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefineStage;

impl RefineStage {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for RefineStage {
    type Input = ClassHits;
    type Output = ClassHits;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        check_batch(self.name(), input.num_queries(), ctx)?;

        let class = input.class;
        let params = ctx.params.refine_params();
        let before = input.total_hits();

        let per_query: Vec<Vec<CandidateAlignment>> = input
            .per_query
            .into_par_iter()
            .enumerate()
            .map(|(i, hits)| refine_candidates(hits, class, ctx.query_len(i), &params, ctx.sequences))
            .collect();

        let output = ClassHits { class, per_query };
        log::debug!(
            "Refine {}: {} candidates, {} after length screen",
            class,
            before,
            output.total_hits()
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "Refine"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::coordinates::parse_cigar;
    use crate::pipelines::vdj::stages::test_support::{MapProvider, hit};

    fn params() -> RefineParams {
        RefineParams {
            extend_5_end: true,
            extend_3_end: true,
            max_edge_extension: 30,
            min_v_length: 9,
            min_j_length: 0,
        }
    }

    #[test]
    fn test_extend_5_prime_plus() {
        let mut v = hit("IGHV3-23*01", Strand::Plus, (10, 300), (6, 296), 450.0);
        v.cigar = parse_cigar("290M").unwrap();
        let ext = extend_5_prime(&v, 400, 30);
        assert_eq!((ext.query_start, ext.subject_start), (4, 0));
        assert_eq!(ext.align_length, 296);
        assert_eq!(ext.cigar, vec![(b'M', 296)]);
        // input untouched
        assert_eq!(v.query_start, 10);
    }

    #[test]
    fn test_extend_5_prime_bounded_by_query() {
        let v = hit("IGHV3-23*01", Strand::Plus, (3, 300), (10, 307), 450.0);
        let ext = extend_5_prime(&v, 400, 30);
        assert_eq!(ext.query_start, 0);
        assert_eq!(ext.subject_start, 7);
    }

    #[test]
    fn test_extend_5_prime_minus_strand() {
        // oriented [10, 300) on a 400-base query is plus [100, 390)
        let v = hit("IGHV3-23*01", Strand::Minus, (100, 390), (5, 295), 450.0);
        let ext = extend_5_prime(&v, 400, 30);
        assert_eq!((ext.query_start, ext.query_end), (100, 395));
        assert_eq!(ext.subject_start, 0);
    }

    #[test]
    fn test_extension_limit() {
        let v = hit("IGHV3-23*01", Strand::Plus, (60, 300), (50, 290), 400.0);
        assert_eq!(extend_5_prime(&v, 400, 30), v);
    }

    #[test]
    fn test_extend_3_prime() {
        let j = hit("IGHJ4*02", Strand::Plus, (330, 370), (2, 42), 80.0);
        let ext = extend_3_prime(&j, 375, 48, 30);
        // six subject bases missing, only five query bases left
        assert_eq!(ext.query_end, 375);
        assert_eq!(ext.subject_end, 47);
        assert_eq!(ext.align_length, 45);
    }

    #[test]
    fn test_length_screen() {
        let provider = MapProvider::with_lengths(&[("IGHJ4*02", 48)]);
        let hits = vec![
            hit("IGHV3-23*01", Strand::Plus, (0, 296), (0, 296), 450.0),
            hit("IGHV1-2*02", Strand::Plus, (10, 15), (200, 205), 10.0),
        ];
        let refined = refine_candidates(hits, GeneClass::V, 400, &params(), &provider);
        assert_eq!(refined.len(), 1);

        let strict = RefineParams {
            min_j_length: 50,
            ..params()
        };
        let j = vec![hit("IGHJ4*02", Strand::Plus, (330, 370), (2, 42), 80.0)];
        assert!(refine_candidates(j, GeneClass::J, 400, &strict, &provider).is_empty());
    }
}
