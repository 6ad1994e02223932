//! Annotation pipeline orchestrator
//!
//! Runs one query batch through every stage. Each stage completes for the
//! whole batch before the next begins, since the next stage's search windows
//! depend on the previous stage's annotation.
//!
//! # Usage
//!
//! ```ignore
//! let mut pipeline = AnnotationPipeline::new(queries, databases, params, &layouts, &engine, &sequences);
//! let results = pipeline.run()?;
//! ```

use std::collections::BTreeSet;

use rayon::prelude::*;

use super::{AnnotationResultSet, PipelineError, PipelineStatistics, PipelineTimer, QueryResult};
use crate::pipelines::vdj::annotation::AnnotationRecord;
use crate::pipelines::vdj::domain_table::DomainLayoutTable;
use crate::pipelines::vdj::engine::{SearchEngine, SearchOutcome, SearchRequest, SequenceProvider};
use crate::pipelines::vdj::stages::c_annotation::CAnnotationStage;
use crate::pipelines::vdj::stages::dj_resolver::{DjInput, DjResolverStage, VContext, resolve_d_only};
use crate::pipelines::vdj::stages::domain::{DomainQuery, DomainStage};
use crate::pipelines::vdj::stages::ranking::{
    RankingStage, append_class_results, promote, sort_by_evalue,
};
use crate::pipelines::vdj::stages::refine::RefineStage;
use crate::pipelines::vdj::stages::search_builder::{DWindow, SearchStageBuilder};
use crate::pipelines::vdj::stages::v_annotation::VAnnotationStage;
use crate::pipelines::vdj::stages::{ClassHits, PipelineStage, StageContext};
use crate::pipelines::vdj::types::{GeneClass, GeneDatabases, Query};
use crate::pipelines::vdj::vdj_opt::{ConfigError, SearchParameters};

/// Mutable state threaded through one run.
struct RunState {
    records: Vec<AnnotationRecord>,
    stats: PipelineStatistics,
    degraded: BTreeSet<usize>,
}

/// Ranked candidate lists of every class, kept for result assembly.
struct ClassLists {
    v: ClassHits,
    d: ClassHits,
    j: ClassHits,
    c: ClassHits,
}

pub struct AnnotationPipeline<'a> {
    queries: Vec<Query>,
    databases: GeneDatabases,
    params: SearchParameters,
    layouts: &'a DomainLayoutTable,
    engine: &'a dyn SearchEngine,
    sequences: &'a dyn SequenceProvider,
    /// Pipeline stages
    ranker: RankingStage,
    refiner: RefineStage,
    v_annotator: VAnnotationStage,
    dj_resolver: DjResolverStage,
    c_annotator: CAnnotationStage,
    domain_annotator: DomainStage,
}

impl<'a> AnnotationPipeline<'a> {
    /// Queries are renumbered in input order; results come back in the
    /// same order.
    pub fn new(
        mut queries: Vec<Query>,
        databases: GeneDatabases,
        params: SearchParameters,
        layouts: &'a DomainLayoutTable,
        engine: &'a dyn SearchEngine,
        sequences: &'a dyn SequenceProvider,
    ) -> Self {
        for (i, query) in queries.iter_mut().enumerate() {
            query.index = i;
        }

        Self {
            queries,
            databases,
            params,
            layouts,
            engine,
            sequences,
            ranker: RankingStage::new(),
            refiner: RefineStage::new(),
            v_annotator: VAnnotationStage::new(),
            dj_resolver: DjResolverStage::new(),
            c_annotator: CAnnotationStage::new(),
            domain_annotator: DomainStage::new(),
        }
    }

    pub fn params(&self) -> &SearchParameters {
        &self.params
    }

    /// Annotate the whole batch.
    pub fn run(&mut self) -> Result<AnnotationResultSet, PipelineError> {
        let timer = PipelineTimer::start();
        self.params.validate(&self.databases)?;

        log::info!(
            "AnnotationPipeline: {} queries, {} threads, {} domain system",
            self.queries.len(),
            self.params.n_threads,
            self.params.domain_system
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.n_threads)
            .build()?;
        let mut results = pool.install(|| self.run_stages())?;

        results.statistics.wall_time_secs = timer.stop();
        results.remote_job_id = if self.databases.any_remote() {
            self.engine.remote_job_id()
        } else {
            None
        };
        log::info!("AnnotationPipeline: {}", results.statistics);
        Ok(results)
    }

    fn run_stages(&self) -> Result<AnnotationResultSet, PipelineError> {
        let ctx = StageContext::new(&self.params, self.layouts, self.sequences, &self.queries);
        let builder = SearchStageBuilder::new(&self.params, &self.databases, &self.queries);
        let n = self.queries.len();

        let mut state = RunState {
            records: self.queries.iter().map(AnnotationRecord::new).collect(),
            stats: PipelineStatistics::new(),
            degraded: BTreeSet::new(),
        };
        let mut lists = ClassLists {
            v: ClassHits::empty(GeneClass::V, n),
            d: ClassHits::empty(GeneClass::D, n),
            j: ClassHits::empty(GeneClass::J, n),
            c: ClassHits::empty(GeneClass::C, n),
        };

        // Stage 1: V search and annotation
        let v_requests = builder.v_requests().ok_or(ConfigError::MissingVDatabase)?;
        let v_raw = self.execute(&v_requests.primary, &mut state)?;
        lists.v = self.rank_and_refine(v_raw, &ctx)?;

        let domain_hits = match &v_requests.domain {
            Some(request) => {
                let raw = self.execute(request, &mut state)?;
                self.ranker.process(raw, &ctx)?
            }
            None => lists.v.clone(),
        };

        let v_annotations = self.v_annotator.process(lists.v.clone(), &ctx)?;
        for (record, v) in state.records.iter_mut().zip(v_annotations) {
            if let Some(v) = v {
                record.apply_v(v);
            }
        }
        log::info!(
            "V annotation: {} of {} queries",
            state.records.iter().filter(|r| r.v.is_some()).count(),
            n
        );

        // Stage 2: D/J search and resolution
        if self.params.searches_dj() {
            self.annotate_dj(&builder, &ctx, &mut state, &mut lists)?;
        }

        // Stage 3: C search and annotation
        if self.params.searches_c(&self.databases) {
            if let Some(request) = builder.c_request(&state.records) {
                let raw = self.execute(&request, &mut state)?;
                lists.c = self.rank_and_refine(raw, &ctx)?;
                let c_annotations = self.c_annotator.process(lists.c.clone(), &ctx)?;
                for (record, c) in state.records.iter_mut().zip(c_annotations) {
                    if let Some(c) = c {
                        record.apply_c(c);
                    }
                }
            }
        }

        // Stage 4: domains, frames and CDR3
        let domain_input: Vec<DomainQuery> = state
            .records
            .iter()
            .zip(domain_hits.per_query)
            .map(|(record, hits)| DomainQuery {
                v: record.v.clone(),
                d: record.d.clone(),
                j: record.j.clone(),
                query_chain: record.query_chain,
                domain_hits: hits,
            })
            .collect();
        let domains = self.domain_annotator.process(domain_input, &ctx)?;
        for (record, domain) in state.records.iter_mut().zip(domains) {
            record.apply_domain(domain);
        }

        Ok(self.assemble(state, lists))
    }

    fn annotate_dj(
        &self,
        builder: &SearchStageBuilder,
        ctx: &StageContext,
        state: &mut RunState,
        lists: &mut ClassLists,
    ) -> Result<(), PipelineError> {
        if let Some(request) = builder.d_request(&state.records) {
            let raw = self.execute(&request, state)?;
            lists.d = self.rank_and_refine(raw, ctx)?;
        }
        if let Some(request) = builder.j_request(&state.records) {
            let raw = self.execute(&request, state)?;
            lists.j = self.rank_and_refine(raw, ctx)?;
        }

        let input = DjInput {
            v: state.records.iter().map(VContext::from_record).collect(),
            d: lists.d.clone(),
            j: lists.j.clone(),
        };
        let resolutions = self.dj_resolver.process(input, ctx)?;

        let mut windows: Vec<DWindow> = Vec::new();
        for (record, resolution) in state.records.iter_mut().zip(resolutions) {
            windows.extend(resolution.no_overlap_d_window);
            record.apply_dj(resolution.annotation);
        }

        if !windows.is_empty() {
            state.stats.no_overlap_d_searches += windows.len();
            log::debug!("No-overlap D search for {} queries", windows.len());

            if let Some(request) = builder.no_overlap_d_request(&windows) {
                let raw = self.execute(&request, state)?;
                let narrow = self.rank_and_refine(raw, ctx)?;
                let resolver = self.params.resolver_params();

                for window in &windows {
                    let i = window.query_index;
                    let hits = &narrow.per_query[i];
                    let d = resolve_d_only(&state.records[i], hits, &resolver, self.layouts);
                    if d.is_some() {
                        state.records[i].apply_d(d);
                        lists.d.per_query[i] = hits.clone();
                    }
                }
            }
        }

        // The assigned genes lead their class lists
        for (i, record) in state.records.iter().enumerate() {
            if let Some(d) = &record.d {
                promote(&mut lists.d.per_query[i], &d.id);
            }
            if let Some(j) = &record.j {
                promote(&mut lists.j.per_query[i], &j.id);
            }
        }

        log::info!(
            "D/J annotation: J for {} queries, D for {} queries",
            state.records.iter().filter(|r| r.j.is_some()).count(),
            state.records.iter().filter(|r| r.d.is_some()).count()
        );
        Ok(())
    }

    /// Rank, refine, then rank again: extension can reorder candidates.
    fn rank_and_refine(&self, raw: ClassHits, ctx: &StageContext) -> Result<ClassHits, PipelineError> {
        let ranked = self.ranker.process(raw, ctx)?;
        let refined = self.refiner.process(ranked, ctx)?;
        Ok(self.ranker.process(refined, ctx)?)
    }

    /// Issue one request, one engine call per window. Per-query failures
    /// degrade that query; a fatal failure aborts the run.
    fn execute(&self, request: &SearchRequest, state: &mut RunState) -> Result<ClassHits, PipelineError> {
        let class = request.class();
        let sub_requests = request.split_per_window();

        log::debug!(
            "{} search against {}: {} windows",
            class,
            request.database.name,
            sub_requests.len()
        );

        let outcomes: Vec<(usize, Result<SearchOutcome, _>)> = sub_requests
            .par_iter()
            .map(|sub| {
                let query_index = sub.windows.first().map_or(0, |w| w.query_index);
                (query_index, self.engine.search(sub))
            })
            .collect();

        state.stats.searches_issued += 1;
        state.stats.windows_searched += sub_requests.len();

        let mut hits = ClassHits::empty(class, self.queries.len());
        for (query_index, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    state.stats.record_search_space(outcome.search_space);
                    for window in outcome.hits {
                        if let Some(slot) = hits.per_query.get_mut(window.query_index) {
                            slot.extend(window.alignments);
                        }
                        if let Some(record) = state.records.get_mut(window.query_index) {
                            record.messages.extend(window.messages);
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    log::error!("{} search aborted: {}", class, e);
                    return Err(PipelineError::Engine(e));
                }
                Err(e) => {
                    log::warn!("{} search degraded: {}", class, e);
                    if let Some(record) = state.records.get_mut(query_index) {
                        record.messages.push(format!("{class} search failed: {e}"));
                    }
                    state.degraded.insert(query_index);
                }
            }
        }

        for slot in &mut hits.per_query {
            sort_by_evalue(slot);
        }
        Ok(hits)
    }

    fn assemble(&self, state: RunState, lists: ClassLists) -> AnnotationResultSet {
        let RunState {
            records,
            mut stats,
            degraded,
        } = state;

        stats.total_queries = records.len();
        stats.total_bases = self.queries.iter().map(|q| q.length).sum();
        stats.degraded_queries = degraded.len();
        stats.queries_with_v = records.iter().filter(|r| r.v.is_some()).count();
        stats.queries_with_d = records.iter().filter(|r| r.d.is_some()).count();
        stats.queries_with_j = records.iter().filter(|r| r.j.is_some()).count();
        stats.queries_with_c = records.iter().filter(|r| r.c.is_some()).count();
        stats.productive = records.iter().filter(|r| r.productive == Some(true)).count();

        let results = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let alignments = append_class_results(
                    &[
                        (GeneClass::V, lists.v.per_query[i].as_slice()),
                        (GeneClass::D, lists.d.per_query[i].as_slice()),
                        (GeneClass::J, lists.j.per_query[i].as_slice()),
                        (GeneClass::C, lists.c.per_query[i].as_slice()),
                    ],
                    &self.params,
                );
                QueryResult::new(record, alignments)
            })
            .collect();

        AnnotationResultSet {
            results,
            remote_job_id: None,
            statistics: stats,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
