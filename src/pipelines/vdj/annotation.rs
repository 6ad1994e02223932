//! Per-query annotation records.
//!
//! Each stage returns a stage-scoped partial annotation (`VAnnotation`,
//! `DjAnnotation`, `CAnnotation`, `DomainAnnotation`); the orchestrator folds
//! them into the query's `AnnotationRecord`. Unknown values are `None`.
//!
//! Coordinates are on the oriented query (see `types`).

use super::types::{CandidateAlignment, ChainType, GeneClass, Query, Span, Strand};

// ============================================================================
// DOMAINS AND FRAMES
// ============================================================================

/// Framework / complementarity-determining regions delineated from the V
/// germline layout, in sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Fwr1,
    Cdr1,
    Fwr2,
    Cdr2,
    Fwr3,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Fwr1,
        Domain::Cdr1,
        Domain::Fwr2,
        Domain::Cdr2,
        Domain::Fwr3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Domain::Fwr1 => "FWR1",
            Domain::Cdr1 => "CDR1",
            Domain::Fwr2 => "FWR2",
            Domain::Cdr2 => "CDR2",
            Domain::Fwr3 => "FWR3",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// FWR1..FWR3 spans, any of which may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainSpans {
    spans: [Option<Span>; 5],
}

impl DomainSpans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_array(spans: [Option<Span>; 5]) -> Self {
        Self { spans }
    }

    #[inline]
    pub fn get(&self, domain: Domain) -> Option<Span> {
        self.spans[domain.index()]
    }

    #[inline]
    pub fn set(&mut self, domain: Domain, span: Option<Span>) {
        self.spans[domain.index()] = span;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Domain, Option<Span>)> + '_ {
        Domain::ALL.iter().map(move |&d| (d, self.get(d)))
    }

    pub fn is_empty(&self) -> bool {
        self.spans.iter().all(Option::is_none)
    }

    /// Known boundaries never decrease along FWR1 -> FWR3.
    pub fn is_monotonic(&self) -> bool {
        let mut last = 0usize;
        for span in self.spans.iter().flatten() {
            if span.start < last || span.end < span.start {
                return false;
            }
            last = span.end;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    InFrame,
    OutOfFrame,
}

impl FrameStatus {
    pub fn label(self) -> &'static str {
        match self {
            FrameStatus::InFrame => "In-frame",
            FrameStatus::OutOfFrame => "Out-of-frame",
        }
    }
}

/// Query positions of codon starts at the V start, the V end and the J start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePositions {
    pub v_start: Option<usize>,
    pub v_end: Option<usize>,
    pub j_start: Option<usize>,
}

impl FramePositions {
    /// V-J frame agreement, when both frames are known.
    pub fn vj_status(&self) -> Option<FrameStatus> {
        let v = self.v_start?;
        let j = self.j_start?;
        if v.abs_diff(j) % 3 == 0 {
            Some(FrameStatus::InFrame)
        } else {
            Some(FrameStatus::OutOfFrame)
        }
    }
}

// ============================================================================
// STAGE-SCOPED PARTIAL ANNOTATIONS
// ============================================================================

/// A germline gene assigned to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedGene {
    pub id: String,
    /// Span on the oriented query.
    pub span: Span,
    pub chain: Option<ChainType>,
    pub alignment: CandidateAlignment,
}

impl AssignedGene {
    pub fn new(alignment: &CandidateAlignment, query_len: usize, chain: Option<ChainType>) -> Self {
        Self {
            id: alignment.subject_id.clone(),
            span: alignment.oriented_query_span(query_len),
            chain,
            alignment: alignment.clone(),
        }
    }

    pub fn strand(&self) -> Strand {
        self.alignment.strand
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VAnnotation {
    pub strand: Strand,
    pub gene: AssignedGene,
    pub query_chain: Option<ChainType>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DjAnnotation {
    pub d: Option<AssignedGene>,
    pub j: Option<AssignedGene>,
    /// Query chain after alpha/delta disambiguation.
    pub query_chain: Option<ChainType>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CAnnotation {
    pub gene: AssignedGene,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainAnnotation {
    /// Germline whose layout was projected onto the query.
    pub domain_subject: Option<String>,
    pub query_domains: DomainSpans,
    pub subject_domains: DomainSpans,
    pub frames: FramePositions,
    pub d_frame: Option<u8>,
    pub cdr3: Option<Span>,
    pub fwr4: Option<Span>,
    pub fwr4_extra_bases: Option<u8>,
    pub stop_codon: Option<bool>,
    pub productive: Option<bool>,
    pub cdr3_translation: Option<String>,
}

// ============================================================================
// ANNOTATION RECORD
// ============================================================================

/// Everything the pipeline learned about one query.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub query_id: String,
    pub query_length: usize,
    /// Strand of the top V hit.
    pub strand: Option<Strand>,
    pub query_chain: Option<ChainType>,
    pub v: Option<AssignedGene>,
    pub d: Option<AssignedGene>,
    pub j: Option<AssignedGene>,
    pub c: Option<AssignedGene>,
    pub frames: FramePositions,
    pub d_frame: Option<u8>,
    pub domain_subject: Option<String>,
    pub query_domains: DomainSpans,
    pub subject_domains: DomainSpans,
    pub cdr3: Option<Span>,
    pub fwr4: Option<Span>,
    pub fwr4_extra_bases: Option<u8>,
    pub stop_codon: Option<bool>,
    pub productive: Option<bool>,
    pub cdr3_translation: Option<String>,
    pub messages: Vec<String>,
}

impl AnnotationRecord {
    pub fn new(query: &Query) -> Self {
        Self {
            query_id: query.id.clone(),
            query_length: query.length,
            strand: None,
            query_chain: None,
            v: None,
            d: None,
            j: None,
            c: None,
            frames: FramePositions::default(),
            d_frame: None,
            domain_subject: None,
            query_domains: DomainSpans::new(),
            subject_domains: DomainSpans::new(),
            cdr3: None,
            fwr4: None,
            fwr4_extra_bases: None,
            stop_codon: None,
            productive: None,
            cdr3_translation: None,
            messages: Vec::new(),
        }
    }

    pub fn gene(&self, class: GeneClass) -> Option<&AssignedGene> {
        match class {
            GeneClass::V => self.v.as_ref(),
            GeneClass::D => self.d.as_ref(),
            GeneClass::J => self.j.as_ref(),
            GeneClass::C => self.c.as_ref(),
        }
    }

    pub fn top_gene_id(&self, class: GeneClass) -> Option<&str> {
        self.gene(class).map(|g| g.id.as_str())
    }

    pub fn gene_span(&self, class: GeneClass) -> Option<Span> {
        self.gene(class).map(|g| g.span)
    }

    pub fn vj_frame(&self) -> Option<FrameStatus> {
        self.frames.vj_status()
    }

    pub fn apply_v(&mut self, v: VAnnotation) {
        self.strand = Some(v.strand);
        self.query_chain = v.query_chain;
        self.v = Some(v.gene);
    }

    pub fn apply_dj(&mut self, dj: DjAnnotation) {
        if dj.query_chain.is_some() {
            self.query_chain = dj.query_chain;
        }
        if self.strand.is_none() {
            self.strand = dj.j.as_ref().map(AssignedGene::strand);
        }
        self.d = dj.d;
        self.j = dj.j;
        self.messages.extend(dj.messages);
    }

    /// Replace D after a narrower D-only search.
    pub fn apply_d(&mut self, d: Option<AssignedGene>) {
        if d.is_some() {
            self.d = d;
        }
    }

    pub fn apply_c(&mut self, c: CAnnotation) {
        self.c = Some(c.gene);
    }

    pub fn apply_domain(&mut self, domain: DomainAnnotation) {
        self.domain_subject = domain.domain_subject;
        self.query_domains = domain.query_domains;
        self.subject_domains = domain.subject_domains;
        self.frames = domain.frames;
        self.d_frame = domain.d_frame;
        self.cdr3 = domain.cdr3;
        self.fwr4 = domain.fwr4;
        self.fwr4_extra_bases = domain.fwr4_extra_bases;
        self.stop_codon = domain.stop_codon;
        self.productive = domain.productive;
        self.cdr3_translation = domain.cdr3_translation;
    }
}
