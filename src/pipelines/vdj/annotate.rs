// src/pipelines/vdj/annotate.rs
//
// Main entry point for V(D)J annotation
// Loads sequences, hits and domain layouts, runs the pipeline and writes the report

use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use crate::core::io::fasta_reader::FastaSequenceProvider;
use crate::core::io::report::{write_alignments, write_summary};
use crate::core::io::tabular_engine::TabularSearchEngine;
use crate::pipelines::vdj::domain_table::{DomainConfigLoader, DomainLayoutTable, FileDomainLoader};
use crate::pipelines::vdj::orchestrator::AnnotationPipeline;
use crate::pipelines::vdj::types::GeneDatabases;
use crate::pipelines::vdj::vdj_opt::SearchParameters;

/// Files and databases for one annotation run.
#[derive(Debug, Clone, Default)]
pub struct AnnotateInputs {
    /// Query FASTA
    pub queries: PathBuf,
    /// Germline FASTA files (subject lengths and sequences)
    pub germline: Vec<PathBuf>,
    /// Precomputed hit table
    pub hits: PathBuf,
    pub databases: GeneDatabases,
    /// Directory holding `<species>/<species>.ndm.<system>`
    pub domain_dir: Option<PathBuf>,
    /// Directory holding `<species>_gl.aux`
    pub aux_dir: Option<PathBuf>,
    /// Summary report (stdout when unset)
    pub output: Option<PathBuf>,
    /// Per-alignment table
    pub alignments_output: Option<PathBuf>,
}

fn create_writer(path: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Error creating output file {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

fn load_layouts(inputs: &AnnotateInputs, params: &SearchParameters) -> Result<DomainLayoutTable> {
    let Some(dir) = &inputs.domain_dir else {
        log::warn!("No domain directory given; FWR/CDR and frames will not be annotated");
        return Ok(DomainLayoutTable::new());
    };

    let mut loader = FileDomainLoader::new(dir);
    if let Some(aux) = &inputs.aux_dir {
        loader = loader.with_aux_dir(aux);
    }
    let layouts = loader
        .load(&params.species, params.domain_system, params.chain_sequence_type)
        .context("Error loading domain layouts")?;
    log::info!(
        "Domain layouts: {} V genes, {} J genes ({} system)",
        layouts.num_v(),
        layouts.num_j(),
        params.domain_system
    );
    Ok(layouts)
}

pub fn main_annotate(inputs: &AnnotateInputs, params: SearchParameters) -> Result<()> {
    let mut sequences = FastaSequenceProvider::new();
    let query_ids = sequences
        .load(&inputs.queries)
        .with_context(|| format!("Error reading queries from {}", inputs.queries.display()))?;
    if query_ids.is_empty() {
        return Err(anyhow!("No query sequences in {}", inputs.queries.display()));
    }
    log::info!("Read {} queries from {}", query_ids.len(), inputs.queries.display());

    for path in &inputs.germline {
        let ids = sequences
            .load(path)
            .with_context(|| format!("Error reading germline sequences from {}", path.display()))?;
        log::info!("Read {} germline sequences from {}", ids.len(), path.display());
    }

    let mut engine = TabularSearchEngine::from_path(&inputs.hits)
        .with_context(|| format!("Error reading hit table {}", inputs.hits.display()))?;
    for database in inputs.databases.iter() {
        engine.register_database(&database.name);
    }

    let layouts = load_layouts(inputs, &params)?;
    let queries = sequences.queries(&query_ids);

    let mut pipeline = AnnotationPipeline::new(
        queries,
        inputs.databases.clone(),
        params,
        &layouts,
        &engine,
        &sequences,
    );
    let results = pipeline.run().context("Annotation failed")?;

    let mut writer = create_writer(inputs.output.as_ref())?;
    write_summary(&results, &mut writer).context("Error writing annotation report")?;
    writer.flush()?;

    if let Some(path) = &inputs.alignments_output {
        let mut writer = create_writer(Some(path))?;
        write_alignments(&results, &mut writer).context("Error writing alignment table")?;
        writer.flush()?;
    }

    if let Some(job_id) = &results.remote_job_id {
        log::info!("Remote job: {}", job_id);
    }
    log::info!("Annotated {} queries", results.len());
    Ok(())
}
