//! Run results: one `QueryResult` per input query, in input order.

use super::PipelineStatistics;
use crate::pipelines::vdj::annotation::AnnotationRecord;
use crate::pipelines::vdj::types::{GeneClass, TaggedAlignment};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub record: AnnotationRecord,
    /// Retained alignments, V then D then J then C.
    pub alignments: Vec<TaggedAlignment>,
    /// Engine warnings and resolver notes for this query.
    pub messages: Vec<String>,
}

impl QueryResult {
    pub fn new(record: AnnotationRecord, alignments: Vec<TaggedAlignment>) -> Self {
        let messages = record.messages.clone();
        Self {
            record,
            alignments,
            messages,
        }
    }

    pub fn query_id(&self) -> &str {
        &self.record.query_id
    }

    pub fn alignments_for(&self, class: GeneClass) -> impl Iterator<Item = &TaggedAlignment> {
        self.alignments.iter().filter(move |a| a.class == class)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationResultSet {
    pub results: Vec<QueryResult>,
    /// Correlation id of the remote search job, for remote runs.
    pub remote_job_id: Option<String>,
    pub statistics: PipelineStatistics,
}

impl AnnotationResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryResult> {
        self.results.iter()
    }

    pub fn get(&self, query_index: usize) -> Option<&QueryResult> {
        self.results.get(query_index)
    }

    pub fn find(&self, query_id: &str) -> Option<&QueryResult> {
        self.results.iter().find(|r| r.query_id() == query_id)
    }
}

impl<'a> IntoIterator for &'a AnnotationResultSet {
    type Item = &'a QueryResult;
    type IntoIter = std::slice::Iter<'a, QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
