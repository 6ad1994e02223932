//! C annotation: the top-ranked constant-region hit downstream of J.

use super::{ClassHits, PipelineStage, StageContext, StageError, check_batch};
use crate::pipelines::vdj::annotation::{AssignedGene, CAnnotation};
use crate::pipelines::vdj::types::GeneClass;

#[derive(Debug, Clone, Copy, Default)]
pub struct CAnnotationStage;

impl CAnnotationStage {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for CAnnotationStage {
    type Input = ClassHits;
    type Output = Vec<Option<CAnnotation>>;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        self.validate(&input)?;
        check_batch(self.name(), input.num_queries(), ctx)?;

        Ok(input
            .per_query
            .iter()
            .enumerate()
            .map(|(i, hits)| {
                hits.first().map(|top| CAnnotation {
                    gene: AssignedGene::new(
                        top,
                        ctx.query_len(i),
                        ctx.layouts.chain_of(&top.subject_id, GeneClass::C),
                    ),
                })
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "CAnnotation"
    }

    fn validate(&self, input: &Self::Input) -> Result<(), StageError> {
        if input.class != GeneClass::C {
            return Err(StageError::ValidationFailed(format!(
                "C annotation given {} candidates",
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
    fn test_top_c_hit() {
        let params = SearchParameters::default();
        let layouts = DomainLayoutTable::new();
        let provider = MapProvider::default();
        let queries = vec![Query::new(0, "q0", 500), Query::new(1, "q1", 300)];
        let ctx = StageContext::new(&params, &layouts, &provider, &queries);

        let input = ClassHits {
            class: GeneClass::C,
            per_query: vec![
                vec![hit("IGHG1*01", Strand::Plus, (350, 500), (0, 150), 270.0)],
                Vec::new(),
            ],
        };
        let out = CAnnotationStage::new().process(input, &ctx).unwrap();
        let c = out[0].as_ref().unwrap();
        assert_eq!(c.gene.span, Span::new(350, 500));
        assert_eq!(c.gene.chain, Some(ChainType::new(GeneClass::C, Locus::Igh)));
        assert!(out[1].is_none());
    }
}
