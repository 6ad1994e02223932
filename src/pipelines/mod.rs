//! Annotation pipelines.
//!
//! - `vdj`: germline V(D)J(C) gene assignment for immune-receptor sequences

pub mod vdj;
