//! Germline domain layouts.
//!
//! A `DomainLayoutTable` is built once per run and shared read-only by every
//! query's domain annotation. Missing keys are normal: a V or J gene without
//! a layout simply leaves the corresponding fields unknown.
//!
//! # File formats
//!
//! ```text
//! <dir>/<species>/<species>[_TR].ndm.<imgt|kabat>
//!     gene  fwr1_s fwr1_e cdr1_s cdr1_e fwr2_s fwr2_e cdr2_s cdr2_e fwr3_s fwr3_e  chain  frame
//! <dir>/<species>_gl.aux                                     (optional)
//!     gene  frame  chain  cdr3_end  [extra_bases]
//! ```
//!
//! Both are tab-separated with `#` comments. Coordinates are 1-based
//! inclusive, `-1` marks an unknown position. A `.ndm` entry keyed by a bare
//! chain label (`VH`, `VK`, ...) is a chain default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::annotation::{Domain, DomainSpans};
use super::types::{ChainType, GeneClass, Span};
use super::vdj_opt::{ChainSequenceType, DomainSystem};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Invalid entry for \"{gene}\" in {path}: {reason}")]
    Parse {
        path: PathBuf,
        gene: String,
        reason: String,
    },
}

/// Domain layout of one V germline, in subject coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct VDomainLayout {
    pub domains: DomainSpans,
    pub chain: Option<ChainType>,
    /// Offset (0-2) of the first codon start in the germline.
    pub frame_offset: u8,
}

/// Coding-frame information for one J germline.
#[derive(Debug, Clone, PartialEq)]
pub struct JLayout {
    pub frame_offset: u8,
    pub chain: Option<ChainType>,
    /// Subject position where CDR3 ends.
    pub cdr3_end: Option<usize>,
    /// Bases past the last complete codon of the J germline.
    pub extra_bases: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainLayoutTable {
    v: HashMap<String, VDomainLayout>,
    j: HashMap<String, JLayout>,
    chain_defaults: HashMap<ChainType, VDomainLayout>,
}

impl DomainLayoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_v(&mut self, gene: impl Into<String>, layout: VDomainLayout) {
        self.v.insert(gene.into(), layout);
    }

    pub fn insert_j(&mut self, gene: impl Into<String>, layout: JLayout) {
        self.j.insert(gene.into(), layout);
    }

    pub fn insert_chain_default(&mut self, chain: ChainType, layout: VDomainLayout) {
        self.chain_defaults.insert(chain, layout);
    }

    pub fn v_layout(&self, gene: &str) -> Option<&VDomainLayout> {
        self.v.get(gene)
    }

    pub fn j_layout(&self, gene: &str) -> Option<&JLayout> {
        self.j.get(gene)
    }

    pub fn chain_default(&self, chain: ChainType) -> Option<&VDomainLayout> {
        self.chain_defaults.get(&chain)
    }

    /// Chain type of a gene: table entry first, then the IMGT name.
    pub fn chain_of(&self, gene: &str, class: GeneClass) -> Option<ChainType> {
        let from_table = match class {
            GeneClass::V => self.v.get(gene).and_then(|l| l.chain),
            GeneClass::J => self.j.get(gene).and_then(|l| l.chain),
            _ => None,
        };
        from_table.or_else(|| ChainType::from_gene_id(gene))
    }

    pub fn num_v(&self) -> usize {
        self.v.len()
    }

    pub fn num_j(&self) -> usize {
        self.j.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty() && self.j.is_empty() && self.chain_defaults.is_empty()
    }
}

/// Source of the domain layout table for a run.
pub trait DomainConfigLoader {
    fn load(
        &self,
        species: &str,
        system: DomainSystem,
        chain_type: ChainSequenceType,
    ) -> Result<DomainLayoutTable, LoadError>;
}

// ============================================================================
// FILE LOADER
// ============================================================================

#[derive(Debug, Deserialize)]
struct NdmRecord {
    gene: String,
    fwr1_start: i64,
    fwr1_end: i64,
    cdr1_start: i64,
    cdr1_end: i64,
    fwr2_start: i64,
    fwr2_end: i64,
    cdr2_start: i64,
    cdr2_end: i64,
    fwr3_start: i64,
    fwr3_end: i64,
    chain_type: String,
    frame_offset: i64,
}

#[derive(Debug, Deserialize)]
struct AuxRecord {
    gene: String,
    frame_offset: i64,
    chain_type: String,
    cdr3_end: i64,
    #[serde(default)]
    extra_bases: Option<i64>,
}

/// Loads layouts from the `internal_data` / `optional_file` directory pair.
#[derive(Debug, Clone)]
pub struct FileDomainLoader {
    ndm_dir: PathBuf,
    aux_dir: Option<PathBuf>,
}

impl FileDomainLoader {
    pub fn new(ndm_dir: impl Into<PathBuf>) -> Self {
        Self {
            ndm_dir: ndm_dir.into(),
            aux_dir: None,
        }
    }

    pub fn with_aux_dir(mut self, aux_dir: impl Into<PathBuf>) -> Self {
        self.aux_dir = Some(aux_dir.into());
        self
    }

    pub fn ndm_path(&self, species: &str, system: DomainSystem, chain_type: ChainSequenceType) -> PathBuf {
        let tcr = match chain_type {
            ChainSequenceType::Ig => "",
            ChainSequenceType::Tcr => "_TR",
        };
        self.ndm_dir
            .join(species)
            .join(format!("{species}{tcr}.ndm.{}", system.file_suffix()))
    }

    pub fn aux_path(&self, species: &str) -> Option<PathBuf> {
        self.aux_dir
            .as_ref()
            .map(|dir| dir.join(format!("{species}_gl.aux")))
    }
}

impl DomainConfigLoader for FileDomainLoader {
    fn load(
        &self,
        species: &str,
        system: DomainSystem,
        chain_type: ChainSequenceType,
    ) -> Result<DomainLayoutTable, LoadError> {
        let mut table = DomainLayoutTable::new();

        let ndm_path = self.ndm_path(species, system, chain_type);
        read_ndm(&ndm_path, &mut table)?;

        if let Some(aux_path) = self.aux_path(species) {
            if aux_path.exists() {
                read_aux(&aux_path, &mut table)?;
            } else {
                log::warn!("Auxiliary J file {} not found", aux_path.display());
            }
        }

        log::info!(
            "Loaded domain layouts for {} V and {} J germlines ({})",
            table.num_v(),
            table.num_j(),
            system
        );
        Ok(table)
    }
}

fn tab_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

/// 1-based inclusive pair to a half-open span; `-1` on either side is unknown.
fn one_based_span(start: i64, end: i64) -> Option<Span> {
    if start < 1 || end < start {
        return None;
    }
    Some(Span::new(start as usize - 1, end as usize))
}

fn frame_offset(value: i64, path: &Path, gene: &str) -> Result<u8, LoadError> {
    if !(0..=2).contains(&value) {
        return Err(LoadError::Parse {
            path: path.to_path_buf(),
            gene: gene.to_string(),
            reason: format!("frame offset {value} is not in 0..=2"),
        });
    }
    Ok(value as u8)
}

fn parse_chain(label: &str) -> Option<ChainType> {
    match label {
        "" | "N/A" | "NA" => None,
        other => ChainType::parse(other),
    }
}

fn read_ndm(path: &Path, table: &mut DomainLayoutTable) -> Result<(), LoadError> {
    let mut rdr = tab_reader(path)?;

    for result in rdr.deserialize::<NdmRecord>() {
        let rec = result.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

        let pairs = [
            (rec.fwr1_start, rec.fwr1_end),
            (rec.cdr1_start, rec.cdr1_end),
            (rec.fwr2_start, rec.fwr2_end),
            (rec.cdr2_start, rec.cdr2_end),
            (rec.fwr3_start, rec.fwr3_end),
        ];
        let mut domains = DomainSpans::new();
        for (domain, (s, e)) in Domain::ALL.iter().zip(pairs) {
            domains.set(*domain, one_based_span(s, e));
        }
        if !domains.is_monotonic() {
            return Err(LoadError::Parse {
                path: path.to_path_buf(),
                gene: rec.gene,
                reason: "domain boundaries are not in FWR1..FWR3 order".to_string(),
            });
        }

        let layout = VDomainLayout {
            domains,
            chain: parse_chain(&rec.chain_type),
            frame_offset: frame_offset(rec.frame_offset, path, &rec.gene)?,
        };

        match ChainType::parse(&rec.gene) {
            Some(chain) if chain.class == GeneClass::V => table.insert_chain_default(chain, layout),
            _ => table.insert_v(rec.gene, layout),
        }
    }
    Ok(())
}

fn read_aux(path: &Path, table: &mut DomainLayoutTable) -> Result<(), LoadError> {
    let mut rdr = tab_reader(path)?;

    for result in rdr.deserialize::<AuxRecord>() {
        let rec = result.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let extra_bases = match rec.extra_bases {
            Some(v) if (0..=2).contains(&v) => Some(v as u8),
            _ => None,
        };
        let layout = JLayout {
            frame_offset: frame_offset(rec.frame_offset, path, &rec.gene)?,
            chain: parse_chain(&rec.chain_type),
            cdr3_end: (rec.cdr3_end >= 1).then(|| rec.cdr3_end as usize),
            extra_bases,
        };
        table.insert_j(rec.gene, layout);
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::types::Locus;
    use std::fs;

    const NDM: &str = "\
# gene\tFWR1\t\tCDR1\t\tFWR2\t\tCDR2\t\tFWR3\t\tchain\tframe
IGHV3-23*01\t1\t75\t76\t99\t100\t150\t151\t174\t175\t288\tVH\t0
IGHV1-2*02\t1\t75\t76\t99\t100\t150\t-1\t-1\t175\t288\tVH\t0
VH\t1\t75\t76\t99\t100\t150\t151\t174\t175\t288\tVH\t0
";

    const AUX: &str = "\
IGHJ4*02\t2\tJH\t34\t0
IGKJ1*01\t1\tJK\t29
";

    fn write_fixture(dir: &Path) {
        fs::create_dir_all(dir.join("human")).unwrap();
        fs::write(dir.join("human").join("human.ndm.imgt"), NDM).unwrap();
        fs::write(dir.join("human_gl.aux"), AUX).unwrap();
    }

    #[test]
    fn test_file_loader_reads_layouts() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let loader = FileDomainLoader::new(dir.path()).with_aux_dir(dir.path());
        let table = loader
            .load("human", DomainSystem::Imgt, ChainSequenceType::Ig)
            .unwrap();

        assert_eq!(table.num_v(), 2);
        assert_eq!(table.num_j(), 2);

        let v = table.v_layout("IGHV3-23*01").unwrap();
        assert_eq!(v.domains.get(Domain::Fwr1), Some(Span::new(0, 75)));
        assert_eq!(v.domains.get(Domain::Fwr3), Some(Span::new(174, 288)));
        assert_eq!(v.chain, Some(ChainType::new(GeneClass::V, Locus::Igh)));

        let partial = table.v_layout("IGHV1-2*02").unwrap();
        assert_eq!(partial.domains.get(Domain::Cdr2), None);

        let vh = ChainType::new(GeneClass::V, Locus::Igh);
        assert!(table.chain_default(vh).is_some());
        assert!(table.v_layout("VH").is_none());

        let j = table.j_layout("IGHJ4*02").unwrap();
        assert_eq!(j.frame_offset, 2);
        assert_eq!(j.cdr3_end, Some(34));
        assert_eq!(j.extra_bases, Some(0));
        assert_eq!(table.j_layout("IGKJ1*01").unwrap().extra_bases, None);
    }

    #[test]
    fn test_missing_aux_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let aux_dir = tempfile::tempdir().unwrap();

        let loader = FileDomainLoader::new(dir.path()).with_aux_dir(aux_dir.path());
        let table = loader
            .load("human", DomainSystem::Imgt, ChainSequenceType::Ig)
            .unwrap();
        assert_eq!(table.num_j(), 0);
    }

    #[test]
    fn test_missing_ndm_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileDomainLoader::new(dir.path());
        let err = loader
            .load("mouse", DomainSystem::Kabat, ChainSequenceType::Ig)
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_tcr_path() {
        let loader = FileDomainLoader::new("/data/internal_data");
        assert_eq!(
            loader.ndm_path("human", DomainSystem::Imgt, ChainSequenceType::Tcr),
            PathBuf::from("/data/internal_data/human/human_TR.ndm.imgt")
        );
    }

    #[test]
    fn test_bad_frame_offset_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("human")).unwrap();
        fs::write(
            dir.path().join("human").join("human.ndm.imgt"),
            "IGHV3-23*01\t1\t75\t76\t99\t100\t150\t151\t174\t175\t288\tVH\t5\n",
        )
        .unwrap();

        let loader = FileDomainLoader::new(dir.path());
        let err = loader
            .load("human", DomainSystem::Imgt, ChainSequenceType::Ig)
            .unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn test_chain_of_falls_back_to_gene_name() {
        let table = DomainLayoutTable::new();
        assert_eq!(
            table.chain_of("TRBJ2-7*01", GeneClass::J),
            Some(ChainType::new(GeneClass::J, Locus::Trb))
        );
        assert_eq!(table.chain_of("custom", GeneClass::V), None);
    }
}
