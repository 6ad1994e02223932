//! V(D)J annotation pipeline.
//!
//! Assigns germline V, D, J and C genes to immune-receptor sequences and
//! derives the framework/CDR layout, reading frames and CDR3 of each query.
//! Alignment itself is delegated to a `SearchEngine`; this pipeline decides
//! what to search, ranks what comes back and resolves the gene calls.
//!
//! # Module Organization
//!
//! - `orchestrator/` - Pipeline coordination
//!   - `AnnotationPipeline` - V, D/J, C and domain stages over one query batch
//!
//! - `stages/` - Individual pipeline stages
//!   - `SearchStageBuilder` - Per-class search windows
//!   - `RankingStage` - Candidate ordering and deduplication
//!   - `RefineStage` - Edge extension and length screening
//!   - `VAnnotationStage`, `DjResolverStage`, `CAnnotationStage` - Gene calls
//!   - `DomainStage` - FWR/CDR projection, frames, CDR3
//!
//! # Entry Point
//!
//! The command-line entry point is `annotate::main_annotate()`.

// === Core types ===
pub mod annotation; // Per-query annotation record
pub mod coordinates; // Subject-to-query projection
pub mod domain_table; // Germline domain layouts (.ndm / aux files)
pub mod engine; // Search engine and sequence provider interfaces
pub mod translate; // Codon translation
pub mod types; // Spans, strands, gene classes, databases, alignments
pub mod vdj_opt; // Search parameters

// === Stage-based architecture ===
pub mod orchestrator; // Pipeline orchestrator
pub mod stages; // Pipeline stage implementations

pub mod annotate; // Command-line entry point

pub use annotation::AnnotationRecord;
pub use engine::{SearchEngine, SequenceProvider};
pub use orchestrator::{AnnotationPipeline, AnnotationResultSet, PipelineError};
pub use vdj_opt::SearchParameters;
