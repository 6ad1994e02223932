//! Domain annotation
//!
//! Maps the germline domain layout of the chosen V gene onto the query and
//! derives the coding frames, CDR3 and FWR4.
//!
//! # Domain subject
//!
//! 1. the top V gene, when it has a layout;
//! 2. the chain-type default layout for the query chain (projected through
//!    the top V alignment);
//! 3. the best hit from the organism V set that has a layout, lies on the V
//!    strand and belongs to the same chain.
//!
//! Without a domain subject the domain and frame fields stay unknown; CDR3
//! and FWR4 are still derived from the V and J boundaries.

use bio::alphabets::dna;
use rayon::prelude::*;

use super::{PipelineStage, StageContext, StageError, check_batch};
use crate::pipelines::vdj::annotation::{
    AssignedGene, Domain, DomainAnnotation, DomainSpans, FramePositions, FrameStatus,
};
use crate::pipelines::vdj::coordinates::{first_codon_start, project_subject_pos, project_subject_span};
use crate::pipelines::vdj::domain_table::{DomainLayoutTable, VDomainLayout};
use crate::pipelines::vdj::engine::SequenceProvider;
use crate::pipelines::vdj::translate::{has_stop_codon, translate};
use crate::pipelines::vdj::types::{
    CandidateAlignment, ChainType, GeneClass, MoleculeType, Query, Span, Strand,
};

/// Everything the annotator needs for one query.
#[derive(Debug, Clone, Default)]
pub struct DomainQuery {
    pub v: Option<AssignedGene>,
    pub d: Option<AssignedGene>,
    pub j: Option<AssignedGene>,
    pub query_chain: Option<ChainType>,
    /// Ranked hits from the organism V set.
    pub domain_hits: Vec<CandidateAlignment>,
}

struct DomainSubject<'a> {
    id: String,
    layout: &'a VDomainLayout,
    alignment: &'a CandidateAlignment,
}

fn same_locus(a: Option<ChainType>, b: Option<ChainType>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.locus == b.locus,
        _ => true,
    }
}

fn select_domain_subject<'a>(
    input: &'a DomainQuery,
    v: &'a AssignedGene,
    layouts: &'a DomainLayoutTable,
) -> Option<DomainSubject<'a>> {
    if let Some(layout) = layouts.v_layout(&v.id) {
        return Some(DomainSubject {
            id: v.id.clone(),
            layout,
            alignment: &v.alignment,
        });
    }

    let chain = input.query_chain.or(v.chain);
    if let Some(chain) = chain {
        let key = ChainType::new(GeneClass::V, chain.locus);
        if let Some(layout) = layouts.chain_default(key) {
            return Some(DomainSubject {
                id: key.label(),
                layout,
                alignment: &v.alignment,
            });
        }
    }

    input.domain_hits.iter().find_map(|hit| {
        let layout = layouts.v_layout(&hit.subject_id)?;
        let hit_chain = layout.chain.or_else(|| ChainType::from_gene_id(&hit.subject_id));
        (hit.strand == v.strand() && same_locus(chain, hit_chain)).then(|| DomainSubject {
            id: hit.subject_id.clone(),
            layout,
            alignment: hit,
        })
    })
}

/// Project the layout onto the query, widening FWR1 and FWR3 over germline
/// bases the alignment missed.
fn project_domains(
    subject: &DomainSubject,
    query_len: usize,
) -> (DomainSpans, DomainSpans) {
    let aln = subject.alignment;
    let mut query_domains = DomainSpans::new();
    let mut subject_domains = DomainSpans::new();

    for (domain, layout_span) in subject.layout.domains.iter() {
        let Some(layout_span) = layout_span else {
            continue;
        };
        let Some(mut q) = project_subject_span(aln, query_len, layout_span) else {
            continue;
        };
        let s = Span::new(
            layout_span.start.max(aln.subject_start),
            layout_span.end.min(aln.subject_end),
        );

        match domain {
            Domain::Fwr1 if s.start > layout_span.start => {
                q.start = q.start.saturating_sub(s.start - layout_span.start);
            }
            Domain::Fwr3 if layout_span.end > s.end => {
                q.end = (q.end + (layout_span.end - s.end)).min(query_len);
            }
            _ => {}
        }
        query_domains.set(domain, Some(q));
        subject_domains.set(domain, Some(s));
    }

    (query_domains, subject_domains)
}

fn frame_positions(
    subject: &DomainSubject,
    v: &AssignedGene,
    j: Option<&AssignedGene>,
    query_len: usize,
    layouts: &DomainLayoutTable,
) -> FramePositions {
    let aln = subject.alignment;
    let v_start = first_codon_start(aln, subject.layout.frame_offset)
        .and_then(|s| project_subject_pos(aln, query_len, s));

    // last complete codon inside V
    let v_end = v_start.and_then(|q0| {
        let ve = v.span.end;
        (ve >= q0 + 3).then(|| q0 + ((ve - q0) / 3 - 1) * 3)
    });

    let j_start = j.and_then(|j| j_frame_start(j, query_len, layouts));

    FramePositions {
        v_start,
        v_end,
        j_start,
    }
}

fn j_frame_start(j: &AssignedGene, query_len: usize, layouts: &DomainLayoutTable) -> Option<usize> {
    let layout = layouts.j_layout(&j.id)?;
    let codon = first_codon_start(&j.alignment, layout.frame_offset)?;
    project_subject_pos(&j.alignment, query_len, codon)
}

/// Query bases on the V-oriented strand.
fn oriented_sequence(
    sequences: &dyn SequenceProvider,
    query: &Query,
    strand: Strand,
) -> Option<Vec<u8>> {
    let seq = sequences.sequence(&query.id)?;
    Some(match strand {
        Strand::Plus => seq.to_vec(),
        Strand::Minus => dna::revcomp(seq),
    })
}

/// Annotate one query.
pub fn annotate_domains(
    input: &DomainQuery,
    query: &Query,
    layouts: &DomainLayoutTable,
    sequences: &dyn SequenceProvider,
    translate_cdr3: bool,
) -> DomainAnnotation {
    let mut out = DomainAnnotation::default();
    let Some(v) = input.v.as_ref() else {
        return out;
    };
    let query_len = query.length;
    let j = input.j.as_ref();

    if let Some(subject) = select_domain_subject(input, v, layouts) {
        let (query_domains, subject_domains) = project_domains(&subject, query_len);
        out.frames = frame_positions(&subject, v, j, query_len, layouts);
        out.domain_subject = Some(subject.id);
        out.query_domains = query_domains;
        out.subject_domains = subject_domains;

        if let (Some(d), Some(vf)) = (input.d.as_ref(), out.frames.v_start) {
            let shift = (3 - (d.span.start as i64 - vf as i64).rem_euclid(3)) % 3;
            out.d_frame = Some(((d.alignment.subject_start as i64 + shift) % 3) as u8);
        }
    } else {
        log::debug!("No domain layout for {} (query {})", v.id, query.id);
    }

    if let Some(j) = j {
        let cdr3_start = out
            .query_domains
            .get(Domain::Fwr3)
            .map_or(v.span.end, |fwr3| fwr3.end);
        let j_layout = layouts.j_layout(&j.id);
        let cdr3_end = j_layout
            .and_then(|l| l.cdr3_end)
            .and_then(|pos| project_subject_pos(&j.alignment, query_len, pos))
            .or_else(|| j_frame_start(j, query_len, layouts))
            .unwrap_or(j.span.start);

        if cdr3_end > cdr3_start {
            let cdr3 = Span::new(cdr3_start, cdr3_end);
            out.cdr3 = Some(cdr3);
            if j.span.end > cdr3.end {
                let fwr4 = Span::new(cdr3.end, j.span.end);
                out.fwr4 = Some(fwr4);
                out.fwr4_extra_bases = Some(
                    j_layout
                        .and_then(|l| l.extra_bases)
                        .unwrap_or((fwr4.len() % 3) as u8),
                );
            }
        }
    }

    if let Some(v_frame) = out.frames.v_start {
        if let Some(seq) = oriented_sequence(sequences, query, v.strand()) {
            let coding_end = j.map_or(v.span.end, |j| j.span.end).min(seq.len());
            if let Some(coding) = seq.get(v_frame..coding_end) {
                let stop = has_stop_codon(coding);
                out.stop_codon = Some(stop);
                out.productive = out
                    .frames
                    .vj_status()
                    .map(|status| status == FrameStatus::InFrame && !stop);
            }
            if translate_cdr3 {
                out.cdr3_translation = out
                    .cdr3
                    .and_then(|cdr3| seq.get(cdr3.start..cdr3.end.min(seq.len())))
                    .map(translate);
            }
        }
    }

    out
}

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct DomainStage;

impl DomainStage {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for DomainStage {
    type Input = Vec<DomainQuery>;
    type Output = Vec<DomainAnnotation>;

    fn process(&self, input: Self::Input, ctx: &StageContext) -> Result<Self::Output, StageError> {
        check_batch(self.name(), input.len(), ctx)?;

        let translate_cdr3 = ctx.params.translate;
        let protein = matches!(ctx.params.molecule, MoleculeType::Protein);
        let output: Vec<DomainAnnotation> = input
            .par_iter()
            .zip(ctx.queries.par_iter())
            .map(|(q, query)| {
                let mut annotation = annotate_domains(q, query, ctx.layouts, ctx.sequences, translate_cdr3);
                if protein {
                    // Residue coordinates carry no reading frame
                    annotation.frames = FramePositions::default();
                    annotation.d_frame = None;
                    annotation.fwr4_extra_bases = None;
                    annotation.stop_codon = None;
                    annotation.productive = None;
                    annotation.cdr3_translation = None;
                }
                annotation
            })
            .collect();

        log::debug!(
            "Domain annotation: {} of {} queries have a domain subject",
            output.iter().filter(|d| d.domain_subject.is_some()).count(),
            output.len()
        );
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "Domain"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::domain_table::JLayout;
    use crate::pipelines::vdj::stages::test_support::{MapProvider, hit};
    use crate::pipelines::vdj::types::Locus;

    fn vh() -> ChainType {
        ChainType::new(GeneClass::V, Locus::Igh)
    }

    /// IMGT-like heavy-chain layout on a 296-base germline.
    fn heavy_layout() -> VDomainLayout {
        VDomainLayout {
            domains: DomainSpans::from_array([
                Some(Span::new(0, 75)),
                Some(Span::new(75, 99)),
                Some(Span::new(99, 150)),
                Some(Span::new(150, 174)),
                Some(Span::new(174, 288)),
            ]),
            chain: Some(vh()),
            frame_offset: 0,
        }
    }

    fn gene(aln: CandidateAlignment, len: usize) -> AssignedGene {
        let chain = ChainType::from_gene_id(&aln.subject_id);
        AssignedGene::new(&aln, len, chain)
    }

    fn heavy_query(len: usize) -> (Query, DomainQuery) {
        let v = hit("IGHV3-23*01", Strand::Plus, (10, 296), (6, 292), 450.0);
        let j = hit("IGHJ4*02", Strand::Plus, (330, 372), (6, 48), 80.0);
        (
            Query::new(0, "q0", len),
            DomainQuery {
                v: Some(gene(v, len)),
                j: Some(gene(j, len)),
                query_chain: Some(vh()),
                ..DomainQuery::default()
            },
        )
    }

    #[test]
    fn test_projection_and_extension() {
        let mut layouts = DomainLayoutTable::new();
        layouts.insert_v("IGHV3-23*01", heavy_layout());
        let (query, input) = heavy_query(400);
        let provider = MapProvider::default();

        let out = annotate_domains(&input, &query, &layouts, &provider, false);
        assert_eq!(out.domain_subject.as_deref(), Some("IGHV3-23*01"));
        // FWR1 starts at subject 6 -> query 10, widened by six missed bases
        assert_eq!(out.query_domains.get(Domain::Fwr1), Some(Span::new(4, 79)));
        assert_eq!(out.subject_domains.get(Domain::Fwr1), Some(Span::new(6, 75)));
        assert_eq!(out.query_domains.get(Domain::Cdr1), Some(Span::new(79, 103)));
        assert_eq!(out.query_domains.get(Domain::Fwr3), Some(Span::new(178, 292)));
        assert!(out.query_domains.is_monotonic());

        // CDR3 from FWR3 end to J start (J not in the table)
        assert_eq!(out.cdr3, Some(Span::new(292, 330)));
        assert_eq!(out.fwr4, Some(Span::new(330, 372)));
        assert_eq!(out.fwr4_extra_bases, Some(0));
        assert_eq!(out.frames.j_start, None);
        assert_eq!(out.frames.vj_status(), None);
    }

    #[test]
    fn test_frames_with_j_layout() {
        let mut layouts = DomainLayoutTable::new();
        layouts.insert_v("IGHV3-23*01", heavy_layout());
        layouts.insert_j(
            "IGHJ4*02",
            JLayout {
                frame_offset: 1,
                chain: None,
                cdr3_end: None,
                extra_bases: Some(1),
            },
        );
        let (query, input) = heavy_query(400);
        let provider = MapProvider::default();

        let out = annotate_domains(&input, &query, &layouts, &provider, false);
        // V subject 6 is a codon start (frame 0) -> query 10
        assert_eq!(out.frames.v_start, Some(10));
        // V ends at 296: last complete codon starts at 10 + (286 / 3 - 1) * 3
        assert_eq!(out.frames.v_end, Some(292));
        // J subject codons at 1, 4, 7 -> first at or after 6 is 7 -> query 331
        assert_eq!(out.frames.j_start, Some(331));
        // 331 - 10 = 321 = 3 * 107
        assert_eq!(out.frames.vj_status(), Some(FrameStatus::InFrame));
        assert_eq!(out.cdr3, Some(Span::new(292, 331)));
        assert_eq!(out.fwr4_extra_bases, Some(1));
    }

    #[test]
    fn test_unknown_v_keeps_boundaries() {
        let layouts = DomainLayoutTable::new();
        let (query, input) = heavy_query(400);
        let provider = MapProvider::default();

        let out = annotate_domains(&input, &query, &layouts, &provider, false);
        assert!(out.domain_subject.is_none());
        assert!(out.query_domains.is_empty());
        assert_eq!(out.frames, FramePositions::default());
        assert_eq!(out.cdr3, Some(Span::new(296, 330)));
    }

    #[test]
    fn test_chain_default_and_domain_hit_fallbacks() {
        let (query, mut input) = heavy_query(400);
        let provider = MapProvider::default();

        let mut with_default = DomainLayoutTable::new();
        with_default.insert_chain_default(vh(), heavy_layout());
        let out = annotate_domains(&input, &query, &with_default, &provider, false);
        assert_eq!(out.domain_subject.as_deref(), Some("VH"));

        let mut with_domain_db = DomainLayoutTable::new();
        with_domain_db.insert_v("IGHV3-23*04", heavy_layout());
        with_domain_db.insert_v("IGKV1-39*01", VDomainLayout {
            chain: Some(ChainType::new(GeneClass::V, Locus::Igk)),
            ..heavy_layout()
        });
        input.domain_hits = vec![
            hit("IGKV1-39*01", Strand::Plus, (10, 290), (6, 286), 300.0),
            hit("IGHV3-23*04", Strand::Minus, (10, 290), (6, 286), 290.0),
            hit("IGHV3-23*04", Strand::Plus, (10, 296), (6, 292), 280.0),
        ];
        let out = annotate_domains(&input, &query, &with_domain_db, &provider, false);
        assert_eq!(out.domain_subject.as_deref(), Some("IGHV3-23*04"));
        assert_eq!(out.query_domains.get(Domain::Fwr1), Some(Span::new(4, 79)));
    }

    #[test]
    fn test_productive_with_sequence() {
        let mut layouts = DomainLayoutTable::new();
        layouts.insert_v(
            "IGHV_toy",
            VDomainLayout {
                domains: DomainSpans::from_array([
                    Some(Span::new(0, 6)),
                    Some(Span::new(6, 9)),
                    Some(Span::new(9, 12)),
                    Some(Span::new(12, 15)),
                    Some(Span::new(15, 18)),
                ]),
                chain: Some(vh()),
                frame_offset: 0,
            },
        );
        layouts.insert_j(
            "IGHJ_toy",
            JLayout {
                frame_offset: 0,
                chain: None,
                cdr3_end: None,
                extra_bases: None,
            },
        );

        // V 0..18, CDR3 18..24 (TGT GCG), J 24..33
        let seq = b"GAGGTGCAGCTGGTGGAGTGTGCGTGGGGCCAG".to_vec();
        let mut provider = MapProvider::default();
        provider.sequences.insert("toy".to_string(), seq.clone());
        let query = Query::new(0, "toy", seq.len());
        let input = DomainQuery {
            v: Some(gene(hit("IGHV_toy", Strand::Plus, (0, 18), (0, 18), 36.0), seq.len())),
            j: Some(gene(hit("IGHJ_toy", Strand::Plus, (24, 33), (0, 9), 18.0), seq.len())),
            query_chain: Some(vh()),
            ..DomainQuery::default()
        };

        let out = annotate_domains(&input, &query, &layouts, &provider, true);
        assert_eq!(out.frames.vj_status(), Some(FrameStatus::InFrame));
        assert_eq!(out.stop_codon, Some(false));
        assert_eq!(out.productive, Some(true));
        assert_eq!(out.cdr3, Some(Span::new(18, 24)));
        assert_eq!(out.cdr3_translation.as_deref(), Some("CA"));
    }

    #[test]
    fn test_d_frame() {
        let mut layouts = DomainLayoutTable::new();
        layouts.insert_v("IGHV3-23*01", heavy_layout());
        let (query, mut input) = heavy_query(400);
        // D at query 300 is two bases past the V frame (10 + 3k + 2);
        // one base to the next codon, subject start 4 -> frame (4 + 1) % 3
        input.d = Some(gene(hit("IGHD3-10*01", Strand::Plus, (300, 312), (4, 16), 24.0), 400));
        let provider = MapProvider::default();

        let out = annotate_domains(&input, &query, &layouts, &provider, false);
        assert_eq!(out.d_frame, Some(2));
    }
}
