//! Tab-separated annotation report.
//!
//! One summary row per query, plus an optional alignment table with one row
//! per retained alignment. Positions are written 1-based inclusive; unknown
//! values are left empty.

use serde::Serialize;
use std::io::{self, Write};

use crate::pipelines::vdj::annotation::{AnnotationRecord, Domain};
use crate::pipelines::vdj::orchestrator::{AnnotationResultSet, QueryResult};
use crate::pipelines::vdj::types::{GeneClass, Span};

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    query_id: &'a str,
    length: usize,
    strand: Option<char>,
    chain: Option<String>,
    v_gene: Option<&'a str>,
    d_gene: Option<&'a str>,
    j_gene: Option<&'a str>,
    c_gene: Option<&'a str>,
    v_start: Option<usize>,
    v_end: Option<usize>,
    d_start: Option<usize>,
    d_end: Option<usize>,
    d_frame: Option<u8>,
    j_start: Option<usize>,
    j_end: Option<usize>,
    domain_subject: Option<&'a str>,
    fwr1: Option<String>,
    cdr1: Option<String>,
    fwr2: Option<String>,
    cdr2: Option<String>,
    fwr3: Option<String>,
    cdr3: Option<String>,
    fwr4: Option<String>,
    cdr3_aa: Option<&'a str>,
    vj_frame: Option<&'static str>,
    stop_codon: Option<bool>,
    productive: Option<bool>,
    messages: String,
}

#[derive(Debug, Serialize)]
struct AlignmentRow<'a> {
    query_id: &'a str,
    class: char,
    subject_id: &'a str,
    strand: char,
    q_start: usize,
    q_end: usize,
    s_start: usize,
    s_end: usize,
    bit_score: f64,
    evalue: f64,
    length: usize,
}

fn one_based(span: Option<Span>) -> (Option<usize>, Option<usize>) {
    match span {
        Some(s) if !s.is_empty() => (Some(s.start + 1), Some(s.end)),
        _ => (None, None),
    }
}

fn range(span: Option<Span>) -> Option<String> {
    match one_based(span) {
        (Some(start), Some(end)) => Some(format!("{start}-{end}")),
        _ => None,
    }
}

fn summary_row<'a>(result: &'a QueryResult) -> SummaryRow<'a> {
    let r: &AnnotationRecord = &result.record;
    let (v_start, v_end) = one_based(r.gene_span(GeneClass::V));
    let (d_start, d_end) = one_based(r.gene_span(GeneClass::D));
    let (j_start, j_end) = one_based(r.gene_span(GeneClass::J));

    SummaryRow {
        query_id: &r.query_id,
        length: r.query_length,
        strand: r.strand.map(|s| s.symbol()),
        chain: r.query_chain.map(|c| c.label()),
        v_gene: r.top_gene_id(GeneClass::V),
        d_gene: r.top_gene_id(GeneClass::D),
        j_gene: r.top_gene_id(GeneClass::J),
        c_gene: r.top_gene_id(GeneClass::C),
        v_start,
        v_end,
        d_start,
        d_end,
        d_frame: r.d_frame,
        j_start,
        j_end,
        domain_subject: r.domain_subject.as_deref(),
        fwr1: range(r.query_domains.get(Domain::Fwr1)),
        cdr1: range(r.query_domains.get(Domain::Cdr1)),
        fwr2: range(r.query_domains.get(Domain::Fwr2)),
        cdr2: range(r.query_domains.get(Domain::Cdr2)),
        fwr3: range(r.query_domains.get(Domain::Fwr3)),
        cdr3: range(r.cdr3),
        fwr4: range(r.fwr4),
        cdr3_aa: r.cdr3_translation.as_deref(),
        vj_frame: r.vj_frame().map(|f| f.label()),
        stop_codon: r.stop_codon,
        productive: r.productive,
        messages: result.messages.join("; "),
    }
}

fn tsv_writer<W: Write>(output: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_writer(output)
}

/// Write one summary row per query, in input order.
pub fn write_summary<W: Write>(results: &AnnotationResultSet, output: W) -> io::Result<()> {
    let mut writer = tsv_writer(output);
    for result in results {
        writer.serialize(summary_row(result))?;
    }
    writer.flush()
}

/// Write every retained alignment, grouped by query.
pub fn write_alignments<W: Write>(results: &AnnotationResultSet, output: W) -> io::Result<()> {
    let mut writer = tsv_writer(output);
    for result in results {
        for tagged in &result.alignments {
            let a = &tagged.alignment;
            writer.serialize(AlignmentRow {
                query_id: result.query_id(),
                class: tagged.class.letter(),
                subject_id: &a.subject_id,
                strand: a.strand.symbol(),
                q_start: a.query_start + 1,
                q_end: a.query_end,
                s_start: a.subject_start + 1,
                s_end: a.subject_end,
                bit_score: a.bit_score,
                evalue: a.evalue,
                length: a.align_length,
            })?;
        }
    }
    writer.flush()
}
