use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ferrous_vdj::defaults;
use ferrous_vdj::pipelines::vdj::annotate::{AnnotateInputs, main_annotate};
use ferrous_vdj::pipelines::vdj::types::{DatabaseSlot, GeneDatabaseHandle, GeneDatabases, MoleculeType};
use ferrous_vdj::pipelines::vdj::vdj_opt::{ChainSequenceType, DomainSystem, SearchParameters};

#[derive(Parser)]
#[command(name = "ferrous-vdj")]
#[command(about = "FerrousVDJ - V(D)J gene annotation for immune-receptor sequences", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate query sequences from precomputed germline hits
    Annotate {
        /// Query FASTA file
        #[arg(value_name = "QUERY.FA")]
        queries: PathBuf,

        /// Precomputed hit table (TSV)
        #[arg(long, value_name = "HITS.TSV")]
        hits: PathBuf,

        /// Germline FASTA files, for subject lengths
        #[arg(short = 'g', long, value_name = "GERMLINE.FA")]
        germline: Vec<PathBuf>,

        // ===== Databases =====
        /// V germline database name
        #[arg(long, value_name = "NAME")]
        germline_db_v: Option<String>,

        /// D germline database name
        #[arg(long, value_name = "NAME")]
        germline_db_d: Option<String>,

        /// J germline database name
        #[arg(long, value_name = "NAME")]
        germline_db_j: Option<String>,

        /// Organism V database used for domain annotation
        #[arg(long, value_name = "NAME")]
        organism_db_v: Option<String>,

        /// Constant-region database name
        #[arg(long, value_name = "NAME")]
        c_region_db: Option<String>,

        /// Databases are searched remotely
        #[arg(long)]
        remote: bool,

        // ===== Domain annotation =====
        /// Organism
        #[arg(long, value_name = "STR", default_value = defaults::SPECIES)]
        organism: String,

        /// Domain system (imgt or kabat)
        #[arg(long, value_name = "STR", default_value = "imgt")]
        domain_system: String,

        /// Sequence type (ig or tcr)
        #[arg(long, value_name = "STR", default_value = "ig")]
        ig_seqtype: String,

        /// Directory with domain layout (.ndm) files
        #[arg(long, value_name = "DIR")]
        domain_dir: Option<PathBuf>,

        /// Directory with germline auxiliary (.aux) files
        #[arg(long, value_name = "DIR")]
        aux_dir: Option<PathBuf>,

        /// Queries are protein sequences
        #[arg(long)]
        protein: bool,

        // ===== Search options =====
        /// Minimum D gene match length
        #[arg(long, value_name = "INT", default_value_t = defaults::MIN_D_MATCH)]
        min_d_match: usize,

        /// V gene mismatch penalty
        #[arg(long, value_name = "INT", default_value_t = defaults::V_PENALTY, allow_hyphen_values = true)]
        v_penalty: i32,

        /// D gene mismatch penalty
        #[arg(long, value_name = "INT", default_value_t = defaults::D_PENALTY, allow_hyphen_values = true)]
        d_penalty: i32,

        /// J gene mismatch penalty
        #[arg(long, value_name = "INT", default_value_t = defaults::J_PENALTY, allow_hyphen_values = true)]
        j_penalty: i32,

        /// C gene mismatch penalty
        #[arg(long, value_name = "INT", default_value_t = defaults::C_PENALTY, allow_hyphen_values = true)]
        c_penalty: i32,

        /// E-value threshold for V and C hits
        #[arg(short = 'e', long, value_name = "FLOAT", default_value_t = defaults::EVALUE)]
        evalue: f64,

        /// E-value threshold for D hits
        #[arg(long, value_name = "FLOAT", default_value_t = defaults::D_EVALUE)]
        d_evalue: f64,

        /// E-value threshold for J hits
        #[arg(long, value_name = "FLOAT", default_value_t = defaults::J_EVALUE)]
        j_evalue: f64,

        /// V alignments to report
        #[arg(long, value_name = "INT", default_value_t = defaults::NUM_ALIGNMENTS_V)]
        num_alignments_v: usize,

        /// D alignments to report
        #[arg(long, value_name = "INT", default_value_t = defaults::NUM_ALIGNMENTS_D)]
        num_alignments_d: usize,

        /// J alignments to report
        #[arg(long, value_name = "INT", default_value_t = defaults::NUM_ALIGNMENTS_J)]
        num_alignments_j: usize,

        /// C alignments to report
        #[arg(long, value_name = "INT", default_value_t = defaults::NUM_ALIGNMENTS_C)]
        num_alignments_c: usize,

        /// Annotate the V gene only
        #[arg(long)]
        focus_on_v_genes: bool,

        /// Translate CDR3
        #[arg(long)]
        show_translation: bool,

        /// Extend V alignments to the germline 5' end
        #[arg(long)]
        extend_align5end: bool,

        /// Extend J alignments to the germline 3' end
        #[arg(long)]
        extend_align3end: bool,

        /// Maximum germline bases added by 5'/3' extension
        #[arg(long, value_name = "INT", default_value_t = defaults::MAX_EDGE_EXTENSION)]
        max_edge_extension: usize,

        /// Minimum V alignment length
        #[arg(long, value_name = "INT", default_value_t = defaults::MIN_V_LENGTH)]
        min_v_length: usize,

        /// Minimum J alignment length
        #[arg(long, value_name = "INT", default_value_t = defaults::MIN_J_LENGTH)]
        min_j_length: usize,

        /// Report D genes overlapping V or J instead of searching between them
        #[arg(long)]
        detect_overlap: bool,

        /// Accept D genes that overlap V or J
        #[arg(long)]
        allow_vdj_overlap: bool,

        /// Search D and J in queries without a V hit
        #[arg(long)]
        search_without_v: bool,

        // ===== Output =====
        /// Output report file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Per-alignment table
        #[arg(long, value_name = "FILE")]
        alignments: Option<PathBuf>,

        /// Verbosity level (1=error, 2=warning, 3=message, 4+=debugging)
        #[arg(short = 'v', long, value_name = "INT", default_value_t = defaults::VERBOSITY)]
        verbosity: i32,

        // ===== Processing =====
        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,
    },
}

fn database(name: Option<String>, slot: DatabaseSlot, remote: bool) -> Option<GeneDatabaseHandle> {
    name.map(|name| {
        if remote {
            GeneDatabaseHandle::remote(name, slot)
        } else {
            let path = PathBuf::from(&name);
            GeneDatabaseHandle::local(name, slot, path)
        }
    })
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Annotate {
            queries,
            hits,
            germline,
            germline_db_v,
            germline_db_d,
            germline_db_j,
            organism_db_v,
            c_region_db,
            remote,
            organism,
            domain_system,
            ig_seqtype,
            domain_dir,
            aux_dir,
            protein,
            min_d_match,
            v_penalty,
            d_penalty,
            j_penalty,
            c_penalty,
            evalue,
            d_evalue,
            j_evalue,
            num_alignments_v,
            num_alignments_d,
            num_alignments_j,
            num_alignments_c,
            focus_on_v_genes,
            show_translation,
            extend_align5end,
            extend_align3end,
            max_edge_extension,
            min_v_length,
            min_j_length,
            detect_overlap,
            allow_vdj_overlap,
            search_without_v,
            output,
            alignments,
            verbosity,
            threads,
        } => {
            // Map verbosity (1=error, 2=warning, 3=message, 4=debug, 5+=trace)
            // to Rust log levels
            let log_level = match verbosity {
                v if v <= 1 => log::LevelFilter::Error,
                2 => log::LevelFilter::Warn,
                3 => log::LevelFilter::Info,
                4 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace, // 5+ = trace
            };

            env_logger::Builder::from_default_env()
                .filter_level(log_level)
                .format_timestamp(None) // Don't show timestamps
                .format_target(false) // Don't show module names
                .init();

            log::info!("Annotating queries: {}", queries.display());

            let mut params = SearchParameters::default();

            match DomainSystem::parse(&domain_system) {
                Ok(system) => params.domain_system = system,
                Err(e) => {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            }
            match ChainSequenceType::parse(&ig_seqtype) {
                Ok(seqtype) => params.chain_sequence_type = seqtype,
                Err(e) => {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            }

            params.species = organism;
            params.molecule = if protein {
                MoleculeType::Protein
            } else {
                MoleculeType::Nucleotide
            };

            // Search options
            params.min_d_match = min_d_match;
            params.v_penalty = v_penalty;
            params.d_penalty = d_penalty;
            params.j_penalty = j_penalty;
            params.c_penalty = c_penalty;
            params.evalue = evalue;
            params.d_evalue = d_evalue;
            params.j_evalue = j_evalue;
            params.num_alignments_v = num_alignments_v;
            params.num_alignments_d = num_alignments_d;
            params.num_alignments_j = num_alignments_j;
            params.num_alignments_c = num_alignments_c;

            // Refinement
            params.max_edge_extension = max_edge_extension;
            params.min_v_length = min_v_length;
            params.min_j_length = min_j_length;

            // Flags
            params.v_only = focus_on_v_genes;
            params.translate = show_translation;
            params.extend_5_end = extend_align5end;
            params.extend_3_end = extend_align3end;
            params.detect_overlap = detect_overlap;
            params.allow_vdj_overlap = allow_vdj_overlap;
            params.search_without_v = search_without_v;

            // Default to number of CPU cores if not specified
            let mut num_threads = threads.unwrap_or_else(num_cpus::get);

            if num_threads < 1 {
                log::warn!("Invalid thread count {}, using 1 thread", num_threads);
                num_threads = 1;
            }

            // Reasonable upper bound to prevent accidental resource exhaustion
            let max_threads = num_cpus::get() * 2;
            if num_threads > max_threads {
                log::warn!(
                    "Thread count {} exceeds recommended maximum {}, capping at {}",
                    num_threads,
                    max_threads,
                    max_threads
                );
                num_threads = max_threads;
            }
            params.n_threads = num_threads;

            let thread_word = if num_threads == 1 {
                "thread"
            } else {
                "threads"
            };
            log::info!("Using {} {}", num_threads, thread_word);

            if verbosity >= 3 {
                log::info!("Search parameters:");
                log::info!("  Organism: {}, domain system: {}", params.species, params.domain_system);
                log::info!("  Min D match: {}", params.min_d_match);
                log::info!(
                    "  Mismatch penalties: V {}, D {}, J {}",
                    params.v_penalty,
                    params.d_penalty,
                    params.j_penalty
                );
                log::info!(
                    "  Alignments shown: V {}, D {}, J {}, C {}",
                    params.num_alignments_v,
                    params.num_alignments_d,
                    params.num_alignments_j,
                    params.num_alignments_c
                );
            }

            let inputs = AnnotateInputs {
                queries,
                germline,
                hits,
                databases: GeneDatabases {
                    user_v: database(germline_db_v, DatabaseSlot::UserV, remote),
                    user_d: database(germline_db_d, DatabaseSlot::UserD, remote),
                    user_j: database(germline_db_j, DatabaseSlot::UserJ, remote),
                    domain_v: database(organism_db_v, DatabaseSlot::DomainV, remote),
                    c: database(c_region_db, DatabaseSlot::C, remote),
                },
                domain_dir,
                aux_dir,
                output,
                alignments_output: alignments,
            };

            if let Err(e) = main_annotate(&inputs, params) {
                log::error!("{:#}", e);
                std::process::exit(1);
            }
        }
    }
}
