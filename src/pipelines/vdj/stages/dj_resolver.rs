//! D/J resolution
//!
//! Picks one J and, for loci that rearrange a D segment, one D per query so
//! that the assignment is consistent with the V hit:
//!
//! * J shares the V strand, starts after the V start, ends past the V end
//!   and belongs to a compatible chain. TRAV/TRDV genes pair with either an
//!   alpha or a delta J; the first acceptable J in rank order decides which.
//! * D lies between V and J. Without overlap permission this is strict
//!   (`V end <= D start`, `D end <= J start`); with it, D may overlap either
//!   neighbour as long as it extends past the V end, starts before the J
//!   start and stays inside `[V start, J end)`.
//!
//! When every D candidate was rejected only for overlapping its neighbours,
//! the resolver either records the overlap (overlap detection) or asks for a
//! narrower D search between V and J.

use rayon::prelude::*;

use super::search_builder::DWindow;
use super::{ClassHits, PipelineStage, StageContext, StageError, check_batch};
use crate::pipelines::vdj::annotation::{AnnotationRecord, AssignedGene, DjAnnotation};
use crate::pipelines::vdj::domain_table::DomainLayoutTable;
use crate::pipelines::vdj::types::{CandidateAlignment, ChainType, GeneClass, Span, Strand};
use crate::pipelines::vdj::vdj_opt::ResolverParams;

/// What the resolver needs to know about a query's V assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VContext {
    pub strand: Strand,
    /// Oriented V span.
    pub span: Span,
    pub chain: Option<ChainType>,
}

impl VContext {
    pub fn from_record(record: &AnnotationRecord) -> Option<Self> {
        let v = record.v.as_ref()?;
        Some(Self {
            strand: v.strand(),
            span: v.span,
            chain: record.query_chain.or(v.chain),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DjResolution {
    pub annotation: DjAnnotation,
    /// Set when a no-overlap D search should be issued for this query.
    pub no_overlap_d_window: Option<DWindow>,
}

fn chains_compatible(v: Option<ChainType>, j: Option<ChainType>) -> bool {
    match (v, j) {
        (Some(v), Some(j)) => {
            v.locus == j.locus || (v.locus.is_alpha_delta() && j.locus.is_alpha_delta())
        }
        _ => true,
    }
}

fn j_acceptable(
    v: Option<&VContext>,
    j: &CandidateAlignment,
    j_chain: Option<ChainType>,
    query_len: usize,
) -> bool {
    let Some(v) = v else {
        return true;
    };
    let js = j.oriented_query_span(query_len);
    j.strand == v.strand
        && js.end > v.span.end
        && js.start > v.span.start
        && chains_compatible(v.chain, j_chain)
}

enum DFit {
    Accepted,
    /// Rejected only because it overlaps V or J.
    Overlapping,
    Rejected,
}

fn d_fit(
    ds: Span,
    v: Option<Span>,
    j: Option<Span>,
    allow_overlap: bool,
) -> DFit {
    let strict = v.is_none_or(|v| v.end <= ds.start) && j.is_none_or(|j| ds.end <= j.start);
    if strict {
        return DFit::Accepted;
    }

    let loose = v.is_none_or(|v| ds.end > v.end && ds.start >= v.start)
        && j.is_none_or(|j| ds.start < j.start && ds.end <= j.end);
    match (loose, allow_overlap) {
        (true, true) => DFit::Accepted,
        (true, false) => DFit::Overlapping,
        (false, _) => DFit::Rejected,
    }
}

/// First D in rank order that fits between V and J, and whether any D was
/// rejected for overlap alone.
fn select_d<'h>(
    d_hits: &'h [CandidateAlignment],
    strand: Option<Strand>,
    v: Option<Span>,
    j: Option<Span>,
    query_len: usize,
    params: &ResolverParams,
) -> (Option<&'h CandidateAlignment>, bool) {
    let mut overlap_rejected = false;
    for d in d_hits {
        if d.align_length < params.min_d_match || strand.is_some_and(|s| s != d.strand) {
            continue;
        }
        match d_fit(d.oriented_query_span(query_len), v, j, params.allow_overlap) {
            DFit::Accepted => return (Some(d), overlap_rejected),
            DFit::Overlapping => overlap_rejected = true,
            DFit::Rejected => {}
        }
    }
    (None, overlap_rejected)
}

/// Resolve D and J for one query.
pub fn resolve_dj(
    v: Option<&VContext>,
    d_hits: &[CandidateAlignment],
    j_hits: &[CandidateAlignment],
    query_len: usize,
    params: &ResolverParams,
    layouts: &DomainLayoutTable,
) -> DjResolution {
    let mut annotation = DjAnnotation {
        query_chain: v.and_then(|v| v.chain),
        ..DjAnnotation::default()
    };

    let chosen_j = j_hits.iter().find_map(|j| {
        let chain = layouts.chain_of(&j.subject_id, GeneClass::J);
        j_acceptable(v, j, chain, query_len).then(|| AssignedGene::new(j, query_len, chain))
    });

    // Alpha/delta V genes take their locus from the J they pair with
    if let (Some(v_chain), Some(j_chain)) = (annotation.query_chain, chosen_j.as_ref().and_then(|j| j.chain)) {
        if v_chain.locus.is_alpha_delta() && j_chain.locus.is_alpha_delta() {
            annotation.query_chain = Some(ChainType::new(GeneClass::V, j_chain.locus));
        }
    }

    let needs_d = annotation.query_chain.is_none_or(|c| c.locus.has_d())
        || (chosen_j.is_none()
            && annotation
                .query_chain
                .is_some_and(|c| c.locus.is_alpha_delta()));

    let mut no_overlap_d_window = None;
    if needs_d {
        let strand = v
            .map(|v| v.strand)
            .or_else(|| chosen_j.as_ref().map(AssignedGene::strand));
        let v_span = v.map(|v| v.span);
        let j_span = chosen_j.as_ref().map(|j| j.span);

        let (d, overlap_rejected) = select_d(d_hits, strand, v_span, j_span, query_len, params);
        annotation.d = d.map(|d| {
            let chain = layouts.chain_of(&d.subject_id, GeneClass::D);
            AssignedGene::new(d, query_len, chain)
        });

        if annotation.d.is_none() && overlap_rejected {
            if params.detect_overlap {
                annotation
                    .messages
                    .push("D gene candidates overlap the V or J gene; no D assigned".to_string());
            } else if let (Some(v_span), Some(j_span), Some(strand)) = (v_span, j_span, strand) {
                if v_span.end < j_span.start {
                    no_overlap_d_window = Some(DWindow {
                        query_index: 0,
                        span: Span::new(v_span.end, j_span.start),
                        strand,
                    });
                }
            }
        }
    }

    annotation.j = chosen_j;
    DjResolution {
        annotation,
        no_overlap_d_window,
    }
}

/// Re-resolve D only, from a no-overlap D search. Always strict.
pub fn resolve_d_only(
    record: &AnnotationRecord,
    d_hits: &[CandidateAlignment],
    params: &ResolverParams,
    layouts: &DomainLayoutTable,
) -> Option<AssignedGene> {
    let strict = ResolverParams {
        allow_overlap: false,
        ..*params
    };
    let (d, _) = select_d(
        d_hits,
        record.strand,
        record.gene_span(GeneClass::V),
        record.gene_span(GeneClass::J),
        record.query_length,
        &strict,
    );
    d.map(|d| AssignedGene::new(d, record.query_length, layouts.chain_of(&d.subject_id, GeneClass::D)))
}

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug, Clone)]
pub struct DjInput {
    pub v: Vec<Option<VContext>>,
    pub d: ClassHits,
    pub j: ClassHits,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DjResolverStage;

impl DjResolverStage {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for DjResolverStage {
    type Input = DjInput;
    type Output = Vec<DjResolution>;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        self.validate(&input)?;
        check_batch(self.name(), input.v.len(), ctx)?;
        check_batch(self.name(), input.d.num_queries(), ctx)?;
        check_batch(self.name(), input.j.num_queries(), ctx)?;

        let params = ctx.params.resolver_params();
        let output: Vec<DjResolution> = (0..input.v.len())
            .into_par_iter()
            .map(|i| {
                let mut resolution = resolve_dj(
                    input.v[i].as_ref(),
                    &input.d.per_query[i],
                    &input.j.per_query[i],
                    ctx.query_len(i),
                    &params,
                    ctx.layouts,
                );
                if let Some(window) = resolution.no_overlap_d_window.as_mut() {
                    window.query_index = i;
                }
                resolution
            })
            .collect();

        log::debug!(
            "D/J resolution: {} J and {} D assigned, {} no-overlap D searches requested",
            output.iter().filter(|r| r.annotation.j.is_some()).count(),
            output.iter().filter(|r| r.annotation.d.is_some()).count(),
            output.iter().filter(|r| r.no_overlap_d_window.is_some()).count()
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "DjResolver"
    }

    fn validate(&self, input: &Self::Input) -> Result<(), StageError> {
        if input.d.class != GeneClass::D || input.j.class != GeneClass::J {
            return Err(StageError::ValidationFailed(format!(
                "D/J resolution given {} and {} candidates",
                input.d.class, input.j.class
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::stages::test_support::hit;
    use crate::pipelines::vdj::types::Locus;

    fn params(allow_overlap: bool, detect_overlap: bool) -> ResolverParams {
        ResolverParams {
            allow_overlap,
            detect_overlap,
            min_d_match: 5,
        }
    }

    fn heavy_v(span: (usize, usize)) -> VContext {
        VContext {
            strand: Strand::Plus,
            span: Span::new(span.0, span.1),
            chain: Some(ChainType::new(GeneClass::V, Locus::Igh)),
        }
    }

    #[test]
    fn test_overlapping_d_accepted_when_permitted() {
        let v = heavy_v((0, 296));
        let d = vec![hit("IGHD3-10*01", Strand::Plus, (296, 310), (3, 17), 28.0)];
        let j = vec![hit("IGHJ4*02", Strand::Plus, (305, 340), (13, 48), 70.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 300, &params(true, false), &layouts);
        let ann = res.annotation;
        assert_eq!(ann.d.as_ref().unwrap().span, Span::new(296, 310));
        assert_eq!(ann.j.as_ref().unwrap().span, Span::new(305, 340));
        assert!(res.no_overlap_d_window.is_none());
    }

    #[test]
    fn test_overlapping_d_triggers_no_overlap_search() {
        let v = heavy_v((0, 296));
        let d = vec![hit("IGHD3-10*01", Strand::Plus, (296, 315), (3, 22), 28.0)];
        let j = vec![hit("IGHJ4*02", Strand::Plus, (310, 345), (13, 48), 70.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 400, &params(false, false), &layouts);
        assert!(res.annotation.d.is_none());
        assert!(res.annotation.j.is_some());
        let window = res.no_overlap_d_window.unwrap();
        assert_eq!(window.span, Span::new(296, 310));
        assert_eq!(window.strand, Strand::Plus);
    }

    #[test]
    fn test_overlap_detection_records_message() {
        let v = heavy_v((0, 296));
        let d = vec![hit("IGHD3-10*01", Strand::Plus, (296, 315), (3, 22), 28.0)];
        let j = vec![hit("IGHJ4*02", Strand::Plus, (310, 345), (13, 48), 70.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 400, &params(false, true), &layouts);
        assert!(res.annotation.d.is_none());
        assert!(res.no_overlap_d_window.is_none());
        assert_eq!(res.annotation.messages.len(), 1);
    }

    #[test]
    fn test_j_must_follow_v_on_same_strand() {
        let v = heavy_v((0, 296));
        let j = vec![
            hit("IGHJ6*01", Strand::Minus, (300, 350), (0, 50), 90.0),
            hit("IGHJ5*01", Strand::Plus, (200, 250), (0, 50), 85.0),
            hit("IGHJ4*02", Strand::Plus, (310, 345), (13, 48), 70.0),
        ];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &[], &j, 400, &params(false, false), &layouts);
        assert_eq!(res.annotation.j.unwrap().id, "IGHJ4*02");
    }

    #[test]
    fn test_chain_mismatch_rejected() {
        let v = heavy_v((0, 296));
        let j = vec![
            hit("IGKJ1*01", Strand::Plus, (310, 348), (0, 38), 75.0),
            hit("IGHJ4*02", Strand::Plus, (310, 345), (13, 48), 70.0),
        ];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &[], &j, 400, &params(false, false), &layouts);
        assert_eq!(res.annotation.j.unwrap().id, "IGHJ4*02");
    }

    #[test]
    fn test_alpha_delta_ambiguity() {
        let v = VContext {
            strand: Strand::Plus,
            span: Span::new(0, 290),
            chain: Some(ChainType::new(GeneClass::V, Locus::Tra)),
        };
        let d = vec![hit("TRDD2*01", Strand::Plus, (292, 302), (0, 10), 20.0)];
        let layouts = DomainLayoutTable::new();

        // Alpha J: no D
        let alpha_j = vec![hit("TRAJ42*01", Strand::Plus, (305, 365), (0, 60), 110.0)];
        let res = resolve_dj(Some(&v), &d, &alpha_j, 400, &params(false, false), &layouts);
        assert_eq!(
            res.annotation.query_chain,
            Some(ChainType::new(GeneClass::V, Locus::Tra))
        );
        assert!(res.annotation.d.is_none());

        // Delta J ranked first: delta, with D
        let delta_j = vec![
            hit("TRDJ1*01", Strand::Plus, (305, 355), (0, 50), 100.0),
            hit("TRAJ42*01", Strand::Plus, (305, 365), (0, 60), 90.0),
        ];
        let res = resolve_dj(Some(&v), &d, &delta_j, 400, &params(false, false), &layouts);
        assert_eq!(
            res.annotation.query_chain,
            Some(ChainType::new(GeneClass::V, Locus::Trd))
        );
        assert_eq!(res.annotation.d.unwrap().id, "TRDD2*01");
    }

    #[test]
    fn test_light_chain_skips_d() {
        let v = VContext {
            strand: Strand::Plus,
            span: Span::new(0, 285),
            chain: Some(ChainType::new(GeneClass::V, Locus::Igk)),
        };
        let d = vec![hit("IGHD3-10*01", Strand::Plus, (288, 300), (3, 15), 24.0)];
        let j = vec![hit("IGKJ1*01", Strand::Plus, (300, 338), (0, 38), 75.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 400, &params(false, false), &layouts);
        assert!(res.annotation.d.is_none());
        assert_eq!(res.annotation.j.unwrap().id, "IGKJ1*01");
    }

    #[test]
    fn test_short_d_ignored() {
        let v = heavy_v((0, 296));
        let d = vec![
            hit("IGHD1-1*01", Strand::Plus, (298, 302), (0, 4), 30.0),
            hit("IGHD3-10*01", Strand::Plus, (299, 307), (3, 11), 16.0),
        ];
        let j = vec![hit("IGHJ4*02", Strand::Plus, (310, 345), (13, 48), 70.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 400, &params(false, false), &layouts);
        assert_eq!(res.annotation.d.unwrap().id, "IGHD3-10*01");
    }

    #[test]
    fn test_minus_strand_resolution() {
        // Oriented V [4, 300), D [302, 314), J [318, 366) on a 400-base query
        let v = VContext {
            strand: Strand::Minus,
            span: Span::new(4, 300),
            chain: Some(ChainType::new(GeneClass::V, Locus::Igh)),
        };
        let d = vec![hit("IGHD3-10*01", Strand::Minus, (86, 98), (3, 15), 24.0)];
        let j = vec![hit("IGHJ4*02", Strand::Minus, (34, 82), (0, 48), 90.0)];
        let layouts = DomainLayoutTable::new();

        let res = resolve_dj(Some(&v), &d, &j, 400, &params(false, false), &layouts);
        assert_eq!(res.annotation.d.unwrap().span, Span::new(302, 314));
        assert_eq!(res.annotation.j.unwrap().span, Span::new(318, 366));
    }
}
