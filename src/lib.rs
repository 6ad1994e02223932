pub mod core; // Reusable I/O adapters (FASTA, hit tables, reports)
pub mod defaults;
pub mod pipelines; // Annotation pipelines
