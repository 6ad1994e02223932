//! Input/output adapters: FASTA sequences, precomputed hit tables and the
//! tab-separated annotation report.

pub mod fasta_reader; // FASTA reader using bio::io::fasta (queries and germline subjects)
pub mod report; // Tab-separated annotation report
pub mod tabular_engine; // SearchEngine over a TSV of precomputed hits

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Open a file for reading, decompressing when the name ends in `.gz`.
pub fn open_maybe_gz(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(reader)
}
