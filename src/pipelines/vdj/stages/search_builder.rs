//! Search-stage builder
//!
//! Turns the query batch and the annotation accumulated so far into the
//! `SearchRequest` for one gene class. Windows are computed on the oriented
//! query and handed to the engine on the plus strand.
//!
//! ```text
//! V            [0, L)                           both strands (protein: plus)
//! D, J         [max(V start, V end - 20), L)    V strand
//! C            [J end (or V end), L)            V strand
//! no-overlap D [V end, J start)                 V strand
//! ```
//!
//! Windows shorter than the class word size cannot seed a hit and are left
//! out of the request.

use crate::defaults;
use crate::pipelines::vdj::annotation::AnnotationRecord;
use crate::pipelines::vdj::engine::{QueryWindow, SearchRequest};
use crate::pipelines::vdj::types::{
    GeneClass, GeneDatabaseHandle, GeneDatabases, MoleculeType, Query, Span, Strand,
};
use crate::pipelines::vdj::vdj_opt::SearchParameters;

/// V-stage requests: the V search proper and, when a separate organism V
/// set is configured, the domain-subject search.
#[derive(Debug, Clone)]
pub struct VRequests {
    pub primary: SearchRequest,
    pub domain: Option<SearchRequest>,
}

/// Oriented window for a no-overlap D search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DWindow {
    pub query_index: usize,
    pub span: Span,
    pub strand: Strand,
}

pub struct SearchStageBuilder<'a> {
    params: &'a SearchParameters,
    databases: &'a GeneDatabases,
    queries: &'a [Query],
}

impl<'a> SearchStageBuilder<'a> {
    pub fn new(
        params: &'a SearchParameters,
        databases: &'a GeneDatabases,
        queries: &'a [Query],
    ) -> Self {
        Self {
            params,
            databases,
            queries,
        }
    }

    fn request(
        &self,
        database: &GeneDatabaseHandle,
        class: GeneClass,
        windows: Vec<QueryWindow>,
    ) -> SearchRequest {
        SearchRequest {
            database: database.clone(),
            params: self.params.class_params(class),
            molecule: self.params.molecule,
            windows,
        }
    }

    fn min_window(&self, class: GeneClass) -> usize {
        self.params.class_params(class).word_size
    }

    /// Oriented window to plus-strand `QueryWindow`; `None` when too short.
    fn window(
        &self,
        query: &Query,
        oriented: Span,
        strand: Option<Strand>,
        min_len: usize,
    ) -> Option<QueryWindow> {
        let oriented = oriented.clamp_to(query.length);
        if oriented.is_empty() || oriented.len() < min_len {
            log::debug!(
                "Skipping {} window {} of query {} (minimum {})",
                strand.map_or('.', Strand::symbol),
                oriented,
                query.id,
                min_len
            );
            return None;
        }
        let span = match strand {
            Some(s) => oriented.to_plus_strand(s, query.length),
            None => oriented,
        };
        Some(QueryWindow {
            query_index: query.index,
            query_id: query.id.clone(),
            span,
            strand,
        })
    }

    fn full_windows(&self, strand: Option<Strand>) -> Vec<QueryWindow> {
        self.queries
            .iter()
            .filter_map(|q| self.window(q, Span::new(0, q.length), strand, 1))
            .collect()
    }

    pub fn v_requests(&self) -> Option<VRequests> {
        let strand = match self.params.molecule {
            MoleculeType::Nucleotide => None,
            MoleculeType::Protein => Some(Strand::Plus),
        };

        let (primary_db, domain_db) = match (&self.databases.user_v, &self.databases.domain_v) {
            (Some(user), Some(domain)) if user.name != domain.name => (user, Some(domain)),
            (Some(user), _) => (user, None),
            (None, Some(domain)) => (domain, None),
            (None, None) => return None,
        };

        let primary = self.request(primary_db, GeneClass::V, self.full_windows(strand));
        let domain = domain_db.map(|db| self.request(db, GeneClass::V, self.full_windows(strand)));
        Some(VRequests { primary, domain })
    }

    /// D/J window of one query: starts a little before the V end so that a
    /// short V-J junction still seeds.
    fn dj_window(&self, query: &Query, record: &AnnotationRecord, min_len: usize) -> Option<QueryWindow> {
        match (&record.v, record.strand) {
            (Some(v), Some(strand)) => {
                let start = v
                    .span
                    .end
                    .saturating_sub(defaults::DJ_WINDOW_BACKOFF)
                    .max(v.span.start);
                self.window(query, Span::new(start, query.length), Some(strand), min_len)
            }
            _ if self.params.search_without_v => {
                self.window(query, Span::new(0, query.length), None, min_len)
            }
            _ => None,
        }
    }

    fn class_request(
        &self,
        class: GeneClass,
        database: Option<&GeneDatabaseHandle>,
        records: &[AnnotationRecord],
        window: impl Fn(&Query, &AnnotationRecord, usize) -> Option<QueryWindow>,
    ) -> Option<SearchRequest> {
        let database = database?;
        let min_len = self.min_window(class);
        let windows: Vec<QueryWindow> = self
            .queries
            .iter()
            .zip(records)
            .filter_map(|(q, r)| window(q, r, min_len))
            .collect();

        log::debug!(
            "{} search: {} of {} queries have a window",
            class,
            windows.len(),
            self.queries.len()
        );
        (!windows.is_empty()).then(|| self.request(database, class, windows))
    }

    pub fn d_request(&self, records: &[AnnotationRecord]) -> Option<SearchRequest> {
        self.class_request(GeneClass::D, self.databases.user_d.as_ref(), records, |q, r, m| {
            self.dj_window(q, r, m)
        })
    }

    pub fn j_request(&self, records: &[AnnotationRecord]) -> Option<SearchRequest> {
        self.class_request(GeneClass::J, self.databases.user_j.as_ref(), records, |q, r, m| {
            self.dj_window(q, r, m)
        })
    }

    pub fn c_request(&self, records: &[AnnotationRecord]) -> Option<SearchRequest> {
        self.class_request(GeneClass::C, self.databases.c.as_ref(), records, |q, r, m| {
            let start = r.j.as_ref().or(r.v.as_ref()).map(|g| g.span.end);
            match (start, r.strand) {
                (Some(start), Some(strand)) => {
                    self.window(q, Span::new(start, q.length), Some(strand), m)
                }
                _ if self.params.search_without_v => {
                    self.window(q, Span::new(0, q.length), None, m)
                }
                _ => None,
            }
        })
    }

    pub fn no_overlap_d_request(&self, windows: &[DWindow]) -> Option<SearchRequest> {
        let database = self.databases.user_d.as_ref()?;
        let min_len = self.params.min_d_match;
        let windows: Vec<QueryWindow> = windows
            .iter()
            .filter_map(|w| {
                let query = self.queries.get(w.query_index)?;
                self.window(query, w.span, Some(w.strand), min_len)
            })
            .collect();
        (!windows.is_empty()).then(|| self.request(database, GeneClass::D, windows))
    }
}

// ============================================================================
// TESTS
// ============================================================================
