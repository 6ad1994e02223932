//! Core value types shared by every stage of the V(D)J pipeline.
//!
//! Coordinates are 0-based and half-open throughout. Candidate alignments
//! carry query coordinates on the plus strand of the full query; annotation
//! records carry coordinates on the *oriented* query, i.e. the query as read
//! along the strand of its top V hit. `Span::flip` converts between the two.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ============================================================================
// SPANS AND STRANDS
// ============================================================================

/// Half-open interval `[start, end)` on a query or subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[inline]
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} > end {end}");
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Number of positions shared with `other`.
    pub fn overlap(&self, other: &Span) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }

    /// Mirror the span onto the opposite strand of a sequence of `len` bases.
    pub fn flip(&self, len: usize) -> Span {
        Span::new(len.saturating_sub(self.end), len.saturating_sub(self.start))
    }

    /// Map an oriented span back onto plus-strand coordinates.
    pub fn to_plus_strand(&self, strand: Strand, len: usize) -> Span {
        match strand {
            Strand::Plus => *self,
            Strand::Minus => self.flip(len),
        }
    }

    /// Clip the span to `[0, len)`.
    pub fn clamp_to(&self, len: usize) -> Span {
        let end = self.end.min(len);
        Span::new(self.start.min(end), end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    #[inline]
    pub fn is_minus(self) -> bool {
        self == Strand::Minus
    }

    pub fn symbol(self) -> char {
        match self {
            Strand::Plus => '+',
            Strand::Minus => '-',
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "+" | "plus" | "1" => Some(Strand::Plus),
            "-" | "minus" | "-1" => Some(Strand::Minus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MoleculeType {
    #[default]
    Nucleotide,
    Protein,
}

// ============================================================================
// GENE CLASSES AND CHAIN TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GeneClass {
    V,
    D,
    J,
    C,
}

impl GeneClass {
    pub const ALL: [GeneClass; 4] = [GeneClass::V, GeneClass::D, GeneClass::J, GeneClass::C];

    pub fn letter(self) -> char {
        match self {
            GeneClass::V => 'V',
            GeneClass::D => 'D',
            GeneClass::J => 'J',
            GeneClass::C => 'C',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'V' => Some(GeneClass::V),
            'D' => Some(GeneClass::D),
            'J' => Some(GeneClass::J),
            'C' => Some(GeneClass::C),
            _ => None,
        }
    }
}

impl fmt::Display for GeneClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Receptor locus: heavy/kappa/lambda for Ig, alpha/beta/gamma/delta for TCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locus {
    Igh,
    Igk,
    Igl,
    Tra,
    Trb,
    Trg,
    Trd,
}

impl Locus {
    pub fn letter(self) -> char {
        match self {
            Locus::Igh => 'H',
            Locus::Igk => 'K',
            Locus::Igl => 'L',
            Locus::Tra => 'A',
            Locus::Trb => 'B',
            Locus::Trg => 'G',
            Locus::Trd => 'D',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'H' => Some(Locus::Igh),
            'K' => Some(Locus::Igk),
            'L' => Some(Locus::Igl),
            'A' => Some(Locus::Tra),
            'B' => Some(Locus::Trb),
            'G' => Some(Locus::Trg),
            'D' => Some(Locus::Trd),
            _ => None,
        }
    }

    /// Loci whose rearrangements include a D segment.
    pub fn has_d(self) -> bool {
        matches!(self, Locus::Igh | Locus::Trb | Locus::Trd)
    }

    pub fn is_tcr(self) -> bool {
        matches!(self, Locus::Tra | Locus::Trb | Locus::Trg | Locus::Trd)
    }

    /// TRAV/TRDV genes are shared between the alpha and delta loci.
    pub fn is_alpha_delta(self) -> bool {
        matches!(self, Locus::Tra | Locus::Trd)
    }
}

/// Chain type label of a gene or query, e.g. `VH`, `JK`, `DB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainType {
    pub class: GeneClass,
    pub locus: Locus,
}

impl ChainType {
    pub fn new(class: GeneClass, locus: Locus) -> Self {
        Self { class, locus }
    }

    /// Parse a two-letter label such as `VH` or `JA`.
    pub fn parse(label: &str) -> Option<Self> {
        let mut chars = label.trim().chars();
        let class = GeneClass::from_letter(chars.next()?)?;
        let locus = Locus::from_letter(chars.next()?)?;
        if chars.next().is_some() {
            return None;
        }
        Some(Self { class, locus })
    }

    /// Infer the chain type from an IMGT-style gene name (`IGHV3-23*01`,
    /// `TRAV29/DV5*01`). Returns `None` for names outside that scheme.
    pub fn from_gene_id(gene_id: &str) -> Option<Self> {
        let name = gene_id.rsplit('|').next().unwrap_or(gene_id).trim();
        let bytes = name.as_bytes();
        if bytes.len() < 4 {
            return None;
        }
        let prefix = name.get(..2)?;
        if !prefix.eq_ignore_ascii_case("IG") && !prefix.eq_ignore_ascii_case("TR") {
            return None;
        }
        let locus = Locus::from_letter(bytes[2] as char)?;
        if prefix.eq_ignore_ascii_case("IG") == locus.is_tcr() {
            return None;
        }
        let class = match GeneClass::from_letter(bytes[3] as char) {
            // IGHD alone is the delta constant gene, IGHD1-26 a D segment
            Some(GeneClass::D)
                if locus == Locus::Igh && !bytes.get(4).is_some_and(u8::is_ascii_digit) =>
            {
                GeneClass::C
            }
            Some(class) => class,
            // Constant genes are named by isotype (IGHG1, IGHM, TRBC1, ...)
            None if locus == Locus::Igh => GeneClass::C,
            None => return None,
        };
        Some(Self { class, locus })
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.class.letter(), self.locus.letter())
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.letter(), self.locus.letter())
    }
}

// ============================================================================
// QUERIES AND DATABASES
// ============================================================================

/// Handle on one query of the batch. The sequence itself stays with the
/// sequence provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub index: usize,
    pub id: String,
    pub length: usize,
}

impl Query {
    pub fn new(index: usize, id: impl Into<String>, length: usize) -> Self {
        Self {
            index,
            id: id.into(),
            length,
        }
    }
}

/// The five database slots a run may configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseSlot {
    UserV,
    UserD,
    UserJ,
    /// Organism V germline set used for domain annotation.
    DomainV,
    C,
}

impl DatabaseSlot {
    pub fn gene_class(self) -> GeneClass {
        match self {
            DatabaseSlot::UserV | DatabaseSlot::DomainV => GeneClass::V,
            DatabaseSlot::UserD => GeneClass::D,
            DatabaseSlot::UserJ => GeneClass::J,
            DatabaseSlot::C => GeneClass::C,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Local(PathBuf),
    Remote(String),
}

/// Opaque handle on a searchable germline collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneDatabaseHandle {
    pub name: String,
    pub slot: DatabaseSlot,
    pub location: DatabaseLocation,
}

impl GeneDatabaseHandle {
    pub fn local(name: impl Into<String>, slot: DatabaseSlot, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            slot,
            location: DatabaseLocation::Local(path.into()),
        }
    }

    pub fn remote(name: impl Into<String>, slot: DatabaseSlot) -> Self {
        let name = name.into();
        Self {
            location: DatabaseLocation::Remote(name.clone()),
            name,
            slot,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, DatabaseLocation::Remote(_))
    }
}

/// Databases configured for a run, one optional handle per slot.
#[derive(Debug, Clone, Default)]
pub struct GeneDatabases {
    pub user_v: Option<GeneDatabaseHandle>,
    pub user_d: Option<GeneDatabaseHandle>,
    pub user_j: Option<GeneDatabaseHandle>,
    pub domain_v: Option<GeneDatabaseHandle>,
    pub c: Option<GeneDatabaseHandle>,
}

impl GeneDatabases {
    pub fn get(&self, slot: DatabaseSlot) -> Option<&GeneDatabaseHandle> {
        match slot {
            DatabaseSlot::UserV => self.user_v.as_ref(),
            DatabaseSlot::UserD => self.user_d.as_ref(),
            DatabaseSlot::UserJ => self.user_j.as_ref(),
            DatabaseSlot::DomainV => self.domain_v.as_ref(),
            DatabaseSlot::C => self.c.as_ref(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneDatabaseHandle> {
        [
            &self.user_v,
            &self.user_d,
            &self.user_j,
            &self.domain_v,
            &self.c,
        ]
        .into_iter()
        .flatten()
    }

    pub fn any_remote(&self) -> bool {
        self.iter().any(GeneDatabaseHandle::is_remote)
    }
}

// ============================================================================
// CANDIDATE ALIGNMENTS
// ============================================================================

/// One scored alignment between a query and a germline subject, as returned
/// by the search engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAlignment {
    pub subject_id: String,
    pub strand: Strand,
    /// Query start on the plus strand of the full query.
    pub query_start: usize,
    /// Query end (exclusive) on the plus strand of the full query.
    pub query_end: usize,
    pub subject_start: usize,
    pub subject_end: usize,
    pub bit_score: f64,
    pub evalue: f64,
    pub align_length: usize,
    /// Alignment operations in the aligned orientation (`M`, `=`, `X`, `I`,
    /// `D`). Empty when the engine does not report a traceback.
    pub cigar: Vec<(u8, u32)>,
}

impl CandidateAlignment {
    #[inline]
    pub fn query_span(&self) -> Span {
        Span::new(self.query_start, self.query_end)
    }

    #[inline]
    pub fn subject_span(&self) -> Span {
        Span::new(self.subject_start, self.subject_end)
    }

    /// Query span expressed along the alignment strand.
    pub fn oriented_query_span(&self, query_len: usize) -> Span {
        self.query_span().to_plus_strand(self.strand, query_len)
    }
}

/// Candidate alignment tagged with its gene class, as shown in the merged
/// per-query result set.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedAlignment {
    pub class: GeneClass,
    pub alignment: CandidateAlignment,
}
