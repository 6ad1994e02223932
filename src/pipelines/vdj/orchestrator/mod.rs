//! Pipeline orchestration layer
//!
//! The orchestrator sequences the annotation stages for a query batch:
//! - Configuration validation
//! - Search issuing (one request per class, split per query window)
//! - Stage sequencing with a barrier between stages
//! - Folding stage outputs into per-query records
//! - Statistics aggregation
//!
//! # Pipeline Flow
//!
//! ```text
//! validate → V search → rank/refine → V annotation
//!          → D/J search → rank/refine → D/J resolution → [no-overlap D]
//!          → C search → C annotation → domain annotation → results
//! ```

pub mod pipeline;
pub mod results;

use std::fmt;
use std::time::Instant;

use crate::pipelines::vdj::engine::EngineError;
use crate::pipelines::vdj::stages::StageError;
use crate::pipelines::vdj::vdj_opt::ConfigError;

pub use pipeline::AnnotationPipeline;
pub use results::{AnnotationResultSet, QueryResult};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Search engine failure: {0}")]
    Engine(EngineError),

    #[error("Stage failed: {0}")]
    Stage(#[from] StageError),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStatistics {
    pub total_queries: usize,
    pub total_bases: usize,
    pub searches_issued: usize,
    pub windows_searched: usize,
    pub degraded_queries: usize,
    pub queries_with_v: usize,
    pub queries_with_j: usize,
    pub queries_with_d: usize,
    pub queries_with_c: usize,
    pub no_overlap_d_searches: usize,
    pub productive: usize,
    /// Largest effective search space the engine reported.
    pub search_space: Option<f64>,
    pub wall_time_secs: f64,
}

impl PipelineStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_search_space(&mut self, space: Option<f64>) {
        if let Some(space) = space {
            self.search_space = Some(self.search_space.map_or(space, |s| s.max(space)));
        }
    }
}

impl fmt::Display for PipelineStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} queries ({} bp), V {} / D {} / J {} / C {}, {} productive, \
             {} searches over {} windows, {} degraded, {:.3}s",
            self.total_queries,
            self.total_bases,
            self.queries_with_v,
            self.queries_with_d,
            self.queries_with_j,
            self.queries_with_c,
            self.productive,
            self.searches_issued,
            self.windows_searched,
            self.degraded_queries,
            self.wall_time_secs
        )
    }
}

/// Wall-clock timer for a run.
pub struct PipelineTimer {
    start: Instant,
}

impl PipelineTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since `start`.
    pub fn stop(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

// ============================================================================
// TESTS
// ============================================================================
