//! Coordinate projection between germline subjects and the oriented query.
//!
//! Domain layouts and coding frames are defined on the germline subject. To
//! place them on the query we walk the alignment's operations; when the
//! engine reports no traceback we fall back to linear interpolation between
//! the alignment's end points, which spreads the net indel length evenly.
//!
//! All query positions returned here are on the oriented query (the strand of
//! the alignment).

use super::types::{CandidateAlignment, Span};

/// Project a subject position onto the oriented query.
///
/// Returns `None` when `subject_pos` lies outside `[subject_start,
/// subject_end]`. A subject position inside a deletion maps to the query
/// base following the deletion.
pub fn project_subject_pos(
    aln: &CandidateAlignment,
    query_len: usize,
    subject_pos: usize,
) -> Option<usize> {
    if subject_pos < aln.subject_start || subject_pos > aln.subject_end {
        return None;
    }

    let oriented = aln.oriented_query_span(query_len);

    if aln.cigar.is_empty() {
        let s_len = aln.subject_end - aln.subject_start;
        if s_len == 0 {
            return Some(oriented.start);
        }
        let q_len = oriented.len();
        let offset = subject_pos - aln.subject_start;
        return Some(oriented.start + (offset * q_len + s_len / 2) / s_len);
    }

    let mut q = oriented.start;
    let mut s = aln.subject_start;
    for &(op, len) in &aln.cigar {
        let len = len as usize;
        match op {
            b'M' | b'=' | b'X' => {
                if subject_pos < s + len {
                    return Some(q + (subject_pos - s));
                }
                q += len;
                s += len;
            }
            b'D' | b'N' => {
                if subject_pos < s + len {
                    return Some(q);
                }
                s += len;
            }
            b'I' => q += len,
            _ => {}
        }
    }

    // subject_pos == subject_end
    Some(q.min(oriented.end))
}

/// Project a subject span onto the oriented query, clipped to the aligned
/// part of the subject. Returns `None` when nothing of the span is aligned.
pub fn project_subject_span(
    aln: &CandidateAlignment,
    query_len: usize,
    span: Span,
) -> Option<Span> {
    let start = span.start.max(aln.subject_start);
    let end = span.end.min(aln.subject_end);
    if start >= end {
        return None;
    }
    let q_start = project_subject_pos(aln, query_len, start)?;
    let q_end = project_subject_pos(aln, query_len, end)?;
    Some(Span::new(q_start, q_end.max(q_start)))
}

/// First subject codon start at or after the alignment start, given the
/// germline's coding frame offset (0-2). `None` when it falls outside the
/// aligned subject.
pub fn first_codon_start(aln: &CandidateAlignment, frame_offset: u8) -> Option<usize> {
    let shift = (frame_offset as i64 - aln.subject_start as i64).rem_euclid(3) as usize;
    let codon = aln.subject_start + shift;
    (codon < aln.subject_end).then_some(codon)
}

/// Parse a CIGAR string such as `12M1I40M`.
pub fn parse_cigar(cigar: &str) -> Result<Vec<(u8, u32)>, String> {
    let mut ops = Vec::new();
    let mut len: Option<u32> = None;

    for b in cigar.bytes() {
        match b {
            b'0'..=b'9' => {
                let digit = (b - b'0') as u32;
                len = Some(
                    len.unwrap_or(0)
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(digit))
                        .ok_or_else(|| format!("CIGAR length overflow in \"{cigar}\""))?,
                );
            }
            b'M' | b'=' | b'X' | b'I' | b'D' | b'N' => {
                let n = len
                    .take()
                    .ok_or_else(|| format!("CIGAR op '{}' without length in \"{cigar}\"", b as char))?;
                ops.push((b, n));
            }
            _ => return Err(format!("Invalid CIGAR op '{}' in \"{cigar}\"", b as char)),
        }
    }

    if len.is_some() {
        return Err(format!("Trailing length without op in \"{cigar}\""));
    }
    Ok(ops)
}
