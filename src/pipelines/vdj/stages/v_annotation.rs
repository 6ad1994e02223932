//! V annotation: the top-ranked V hit fixes the query's strand and chain.

use rayon::prelude::*;

use super::{ClassHits, PipelineStage, StageContext, StageError, check_batch};
use crate::pipelines::vdj::annotation::{AssignedGene, VAnnotation};
use crate::pipelines::vdj::types::GeneClass;

#[derive(Debug, Clone, Copy, Default)]
pub struct VAnnotationStage;

impl VAnnotationStage {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for VAnnotationStage {
    type Input = ClassHits;
    type Output = Vec<Option<VAnnotation>>;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        self.validate(&input)?;
        check_batch(self.name(), input.num_queries(), ctx)?;

        let output: Vec<Option<VAnnotation>> = input
            .per_query
            .par_iter()
            .enumerate()
            .map(|(i, hits)| {
                let top = hits.first()?;
                let chain = ctx.layouts.chain_of(&top.subject_id, GeneClass::V);
                Some(VAnnotation {
                    strand: top.strand,
                    gene: AssignedGene::new(top, ctx.query_len(i), chain),
                    query_chain: chain,
                })
            })
            .collect();

        log::debug!(
            "V annotation: {} of {} queries have a V gene",
            output.iter().flatten().count(),
            output.len()
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "VAnnotation"
    }

    fn validate(&self, input: &Self::Input) -> Result<(), StageError> {
        if input.class != GeneClass::V {
            return Err(StageError::ValidationFailed(format!(
                "V annotation given {} candidates",
                input.class
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::domain_table::DomainLayoutTable;
    use crate::pipelines::vdj::stages::test_support::{MapProvider, hit};
    use crate::pipelines::vdj::types::{ChainType, Locus, Query, Span, Strand};
    use crate::pipelines::vdj::vdj_opt::SearchParameters;

    #[test]
    fn test_top_hit_sets_strand_and_chain() {
        let params = SearchParameters::default();
        let layouts = DomainLayoutTable::new();
        let provider = MapProvider::default();
        let queries = vec![Query::new(0, "q0", 400), Query::new(1, "q1", 400)];
        let ctx = StageContext::new(&params, &layouts, &provider, &queries);

        let input = ClassHits {
            class: GeneClass::V,
            per_query: vec![
                vec![
                    hit("TRBV20-1*01", Strand::Minus, (100, 390), (0, 290), 480.0),
                    hit("TRBV29-1*01", Strand::Minus, (100, 380), (0, 280), 300.0),
                ],
                Vec::new(),
            ],
        };

        let out = VAnnotationStage::new().process(input, &ctx).unwrap();
        let v = out[0].as_ref().unwrap();
        assert_eq!(v.strand, Strand::Minus);
        assert_eq!(v.gene.id, "TRBV20-1*01");
        assert_eq!(v.gene.span, Span::new(10, 300));
        assert_eq!(v.query_chain, Some(ChainType::new(GeneClass::V, Locus::Trb)));
        assert!(out[1].is_none());
    }

    #[test]
    fn test_rejects_wrong_class() {
        let params = SearchParameters::default();
        let layouts = DomainLayoutTable::new();
        let provider = MapProvider::default();
        let queries = vec![Query::new(0, "q0", 400)];
        let ctx = StageContext::new(&params, &layouts, &provider, &queries);

        let err = VAnnotationStage::new()
            .process(ClassHits::empty(GeneClass::J, 1), &ctx)
            .unwrap_err();
        assert!(matches!(err, StageError::ValidationFailed(_)));
    }
}
