//! Collaborator interfaces: the alignment search engine and the sequence
//! metadata provider.
//!
//! The pipeline never aligns anything itself. It builds `SearchRequest`s,
//! hands them to a `SearchEngine`, and consumes the `CandidateAlignment`s that
//! come back. Engine implementations report hits in plus-strand coordinates
//! of the full query, whatever window they were asked to search.

use super::types::{CandidateAlignment, GeneClass, GeneDatabaseHandle, MoleculeType, Span, Strand};
use super::vdj_opt::ClassSearchParams;

/// One query (or sub-window of a query) to search.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryWindow {
    pub query_index: usize,
    pub query_id: String,
    /// Window on the plus strand of the query.
    pub span: Span,
    /// Only report alignments on this strand when set.
    pub strand: Option<Strand>,
}

/// A batch of windows to search against a single database.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub database: GeneDatabaseHandle,
    pub params: ClassSearchParams,
    pub molecule: MoleculeType,
    pub windows: Vec<QueryWindow>,
}

impl SearchRequest {
    pub fn class(&self) -> GeneClass {
        self.params.class
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Split into one request per window. Each split request is the unit of
    /// parallel work handed to the engine.
    pub fn split_per_window(&self) -> Vec<SearchRequest> {
        self.windows
            .iter()
            .map(|window| SearchRequest {
                database: self.database.clone(),
                params: self.params.clone(),
                molecule: self.molecule,
                windows: vec![window.clone()],
            })
            .collect()
    }
}

/// Hits and diagnostics for one searched window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowHits {
    pub query_index: usize,
    pub alignments: Vec<CandidateAlignment>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub hits: Vec<WindowHits>,
    /// Effective search space reported by the engine, if any.
    pub search_space: Option<f64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The database cannot be searched at all; aborts the run.
    #[error("Database \"{database}\" is unavailable: {reason}")]
    Fatal { database: String, reason: String },

    /// The search failed for one query; only that query degrades.
    #[error("Search for query \"{query_id}\" failed: {reason}")]
    Query { query_id: String, reason: String },
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal { .. })
    }
}

/// Local-alignment search engine.
pub trait SearchEngine: Send + Sync {
    fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, EngineError>;

    /// Correlation identifier of the remote job, for engines that submit
    /// searches to a remote service.
    fn remote_job_id(&self) -> Option<String> {
        None
    }
}

/// Sequence storage and metadata lookup for queries and germline subjects.
pub trait SequenceProvider: Send + Sync {
    fn length(&self, id: &str) -> Option<usize>;

    fn label(&self, id: &str) -> Option<String> {
        self.length(id).map(|_| id.to_string())
    }

    /// Raw sequence, when the provider holds it.
    fn sequence(&self, _id: &str) -> Option<&[u8]> {
        None
    }
}
