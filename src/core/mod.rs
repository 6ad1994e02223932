//! Core reusable components shared by the annotation pipelines.

pub mod io;
