// FASTA reader module using bio::io::fasta
//
// Holds query and germline sequences in memory and serves them to the
// pipeline through `SequenceProvider`. Gzip input is detected by the .gz
// extension. Sequences are upper-cased on load.

use bio::io::fasta;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::Path;

use super::open_maybe_gz;
use crate::pipelines::vdj::engine::SequenceProvider;
use crate::pipelines::vdj::types::Query;

/// In-memory FASTA store keyed by record id.
#[derive(Debug, Default)]
pub struct FastaSequenceProvider {
    sequences: HashMap<String, Vec<u8>>,
}

impl FastaSequenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every record of a FASTA file (.fa, .fasta, .fa.gz).
    ///
    /// Returns the ids of the newly loaded records in file order. An id that
    /// is already present, from this file or an earlier one, is an error:
    /// every query must map to exactly one record.
    pub fn load(&mut self, path: &Path) -> io::Result<Vec<String>> {
        let reader = open_maybe_gz(path)?;
        let ids = self.load_reader(reader)?;
        log::debug!("Loaded {} sequences from {}", ids.len(), path.display());
        Ok(ids)
    }

    pub fn load_reader<R: Read>(&mut self, reader: R) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();
        for record in fasta::Reader::new(reader).records() {
            let record = record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let id = record.id().to_string();
            if self.sequences.contains_key(&id) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate sequence id {}", id),
                ));
            }
            self.sequences.insert(id.clone(), record.seq().to_ascii_uppercase());
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn insert(&mut self, id: impl Into<String>, seq: &[u8]) {
        self.sequences.insert(id.into(), seq.to_ascii_uppercase());
    }

    /// Build the query batch for `ids`, in the given order.
    pub fn queries(&self, ids: &[String]) -> Vec<Query> {
        ids.iter()
            .enumerate()
            .filter_map(|(i, id)| self.length(id).map(|len| Query::new(i, id.as_str(), len)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl SequenceProvider for FastaSequenceProvider {
    fn length(&self, id: &str) -> Option<usize> {
        self.sequences.get(id).map(Vec::len)
    }

    fn sequence(&self, id: &str) -> Option<&[u8]> {
        self.sequences.get(id).map(Vec::as_slice)
    }
}
