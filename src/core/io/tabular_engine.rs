//! `SearchEngine` over a table of precomputed hits.
//!
//! Lets the pipeline run from hits produced by an external aligner. One row
//! per hit, tab-separated, `#` comment lines, no header:
//!
//! ```text
//! database query_id subject_id strand q_start q_end s_start s_end bit_score evalue length [cigar]
//! ```
//!
//! Coordinates are 1-based inclusive; query coordinates are on the plus
//! strand of the query whatever the hit strand.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::path::Path;

use super::open_maybe_gz;
use crate::pipelines::vdj::coordinates::parse_cigar;
use crate::pipelines::vdj::engine::{
    EngineError, QueryWindow, SearchEngine, SearchOutcome, SearchRequest, WindowHits,
};
use crate::pipelines::vdj::types::{CandidateAlignment, Strand};

#[derive(Debug, Clone, Deserialize)]
struct HitRow {
    database: String,
    query_id: String,
    subject_id: String,
    strand: String,
    q_start: usize,
    q_end: usize,
    s_start: usize,
    s_end: usize,
    bit_score: f64,
    evalue: f64,
    length: usize,
    #[serde(default)]
    cigar: Option<String>,
}

impl HitRow {
    fn into_alignment(self) -> Result<CandidateAlignment, String> {
        let strand = Strand::parse(&self.strand).ok_or_else(|| format!("bad strand {:?}", self.strand))?;
        if self.q_start == 0 || self.q_start > self.q_end || self.s_start == 0 || self.s_start > self.s_end {
            return Err(format!(
                "bad coordinates {}-{} / {}-{}",
                self.q_start, self.q_end, self.s_start, self.s_end
            ));
        }
        let cigar = match self.cigar.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                parse_cigar(text).map_err(|e| format!("bad cigar {:?}: {}", text, e))?
            }
            _ => Vec::new(),
        };
        Ok(CandidateAlignment {
            subject_id: self.subject_id,
            strand,
            query_start: self.q_start - 1,
            query_end: self.q_end,
            subject_start: self.s_start - 1,
            subject_end: self.s_end,
            bit_score: self.bit_score,
            evalue: self.evalue,
            align_length: self.length,
            cigar,
        })
    }
}

/// Hits per database, then per query id.
#[derive(Debug, Default)]
pub struct TabularSearchEngine {
    hits: HashMap<String, HashMap<String, Vec<CandidateAlignment>>>,
    databases: HashSet<String>,
}

impl TabularSearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        let mut engine = Self::new();
        let n = engine.load_reader(open_maybe_gz(path)?)?;
        log::info!("Loaded {} precomputed hits from {}", n, path.display());
        Ok(engine)
    }

    /// Load rows; returns the number of hits read.
    pub fn load_reader<R: Read>(&mut self, reader: R) -> io::Result<usize> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut n = 0;
        for (line, row) in rdr.deserialize::<HitRow>().enumerate() {
            let row = row.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let database = row.database.clone();
            let query_id = row.query_id.clone();
            let alignment = row.into_alignment().map_err(|reason| {
                io::Error::new(io::ErrorKind::InvalidData, format!("hit row {}: {}", line + 1, reason))
            })?;
            self.insert(&database, &query_id, alignment);
            n += 1;
        }
        Ok(n)
    }

    pub fn insert(&mut self, database: &str, query_id: &str, alignment: CandidateAlignment) {
        self.register_database(database);
        self.hits
            .entry(database.to_string())
            .or_default()
            .entry(query_id.to_string())
            .or_default()
            .push(alignment);
    }

    /// Make a database searchable even when the table holds no hits for it.
    pub fn register_database(&mut self, database: &str) {
        self.databases.insert(database.to_string());
    }

    fn window_hits(
        &self,
        table: Option<&HashMap<String, Vec<CandidateAlignment>>>,
        window: &QueryWindow,
        request: &SearchRequest,
    ) -> WindowHits {
        let params = &request.params;
        let mut alignments: Vec<CandidateAlignment> = table
            .and_then(|t| t.get(&window.query_id))
            .into_iter()
            .flatten()
            .filter(|h| window.strand.is_none_or(|s| s == h.strand))
            .filter(|h| h.query_start >= window.span.start && h.query_end <= window.span.end)
            .filter(|h| h.align_length >= params.word_size && h.evalue <= params.evalue)
            .cloned()
            .collect();

        alignments.sort_by(|a, b| a.evalue.total_cmp(&b.evalue));
        alignments.truncate(params.max_hits);

        WindowHits {
            query_index: window.query_index,
            alignments,
            messages: Vec::new(),
        }
    }
}

impl SearchEngine for TabularSearchEngine {
    fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, EngineError> {
        let name = &request.database.name;
        if !self.databases.contains(name) {
            return Err(EngineError::Fatal {
                database: name.clone(),
                reason: "no hit table loaded for this database".to_string(),
            });
        }
        let table = self.hits.get(name);
        Ok(SearchOutcome {
            hits: request
                .windows
                .iter()
                .map(|w| self.window_hits(table, w, request))
                .collect(),
            search_space: None,
        })
    }
}
