//! Pipeline stage abstraction layer
//!
//! This module defines the `PipelineStage` trait that the annotation stages
//! implement. Each stage consumes one batch-wide input (one slot per query)
//! and produces one batch-wide output; the orchestrator runs them in order
//! with a barrier between them.
//!
//! # Stage Pipeline
//!
//! ```text
//! V search → Rank/Refine → V annotation → D/J search → Rank/Refine
//!          → D/J resolution → (no-overlap D) → C search → C annotation
//!          → Domain annotation
//! ```
//!
//! Search requests are built by `search_builder`; the searches themselves
//! are issued by the orchestrator through the `SearchEngine` collaborator.

pub mod c_annotation;
pub mod dj_resolver;
pub mod domain;
pub mod ranking;
pub mod refine;
pub mod search_builder;
pub mod v_annotation;

use crate::pipelines::vdj::domain_table::DomainLayoutTable;
use crate::pipelines::vdj::engine::SequenceProvider;
use crate::pipelines::vdj::types::{CandidateAlignment, GeneClass, Query};
use crate::pipelines::vdj::vdj_opt::SearchParameters;

/// Shared, read-only state available to every stage.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub params: &'a SearchParameters,
    pub layouts: &'a DomainLayoutTable,
    pub sequences: &'a dyn SequenceProvider,
    pub queries: &'a [Query],
}

impl<'a> StageContext<'a> {
    pub fn new(
        params: &'a SearchParameters,
        layouts: &'a DomainLayoutTable,
        sequences: &'a dyn SequenceProvider,
        queries: &'a [Query],
    ) -> Self {
        Self {
            params,
            layouts,
            sequences,
            queries,
        }
    }

    /// Number of queries in the batch.
    pub fn batch_size(&self) -> usize {
        self.queries.len()
    }

    pub fn query_len(&self, query_index: usize) -> usize {
        self.queries.get(query_index).map_or(0, |q| q.length)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{stage}: expected {expected} per-query entries, got {found}")]
    BatchMismatch {
        stage: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// A single transformation step of the annotation pipeline.
pub trait PipelineStage {
    type Input;
    type Output;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError>;

    fn name(&self) -> &'static str;

    fn validate(&self, _input: &Self::Input) -> Result<(), StageError> {
        Ok(())
    }
}

/// Candidate alignments of one gene class, one list per query.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassHits {
    pub class: GeneClass,
    pub per_query: Vec<Vec<CandidateAlignment>>,
}

impl ClassHits {
    pub fn empty(class: GeneClass, num_queries: usize) -> Self {
        Self {
            class,
            per_query: vec![Vec::new(); num_queries],
        }
    }

    pub fn num_queries(&self) -> usize {
        self.per_query.len()
    }

    pub fn total_hits(&self) -> usize {
        self.per_query.iter().map(Vec::len).sum()
    }

    pub fn top(&self, query_index: usize) -> Option<&CandidateAlignment> {
        self.per_query.get(query_index).and_then(|hits| hits.first())
    }
}

/// Check that a batch-wide input has one entry per query.
pub(crate) fn check_batch(
    stage: &'static str,
    found: usize,
    ctx: &StageContext,
) -> Result<(), StageError> {
    if found != ctx.batch_size() {
        return Err(StageError::BatchMismatch {
            stage,
            expected: ctx.batch_size(),
            found,
        });
    }
    Ok(())
}
