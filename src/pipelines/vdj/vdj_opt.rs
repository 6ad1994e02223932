// src/pipelines/vdj/vdj_opt.rs
//
// Run-wide search and annotation parameters.

use std::fmt;

use crate::defaults;
use crate::pipelines::vdj::types::{DatabaseSlot, GeneClass, GeneDatabases, MoleculeType};

/// Domain numbering system used for FWR/CDR delineation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainSystem {
    #[default]
    Imgt,
    Kabat,
}

impl DomainSystem {
    /// Parse a command-line value (`imgt` or `kabat`, any case).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "imgt" => Ok(DomainSystem::Imgt),
            "kabat" => Ok(DomainSystem::Kabat),
            _ => Err(format!("Unknown domain system '{value}' (expected imgt or kabat)")),
        }
    }

    pub fn file_suffix(self) -> &'static str {
        match self {
            DomainSystem::Imgt => "imgt",
            DomainSystem::Kabat => "kabat",
        }
    }
}

impl fmt::Display for DomainSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_suffix())
    }
}

/// Whether queries are immunoglobulin or T-cell-receptor chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChainSequenceType {
    #[default]
    Ig,
    Tcr,
}

impl ChainSequenceType {
    /// Parse a command-line value (`ig` or `tcr`/`tr`, any case).
    pub fn parse(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "ig" => Ok(ChainSequenceType::Ig),
            "tcr" | "tr" => Ok(ChainSequenceType::Tcr),
            _ => Err(format!("Unknown sequence type '{value}' (expected ig or tcr)")),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No V germline database configured (need a user V or a domain V database)")]
    MissingVDatabase,

    #[error("D/J search requested but no {class} germline database is configured")]
    MissingDjDatabase { class: GeneClass },

    #[error("Database \"{name}\" is configured in the {expected:?} slot but declares {found:?}")]
    SlotMismatch {
        name: String,
        expected: DatabaseSlot,
        found: DatabaseSlot,
    },

    #[error("Minimum D match {value} is below the supported minimum of {min}")]
    MinDMatchTooSmall { value: usize, min: usize },

    #[error("Mismatch penalty for {class} genes must be negative, got {value}")]
    NonNegativePenalty { class: GeneClass, value: i32 },

    #[error("At least one V alignment must be retained")]
    NoVAlignments,

    #[error("Thread count must be at least 1")]
    InvalidThreadCount,

    #[error("The Kabat domain system is only defined for immunoglobulin sequences")]
    KabatForTcr,
}

/// Search parameters for one run. Immutable once the pipeline starts.
#[derive(Debug, Clone)]
pub struct SearchParameters {
    pub molecule: MoleculeType,
    pub species: String,
    pub domain_system: DomainSystem,
    pub chain_sequence_type: ChainSequenceType,

    // Per-class search settings
    pub min_d_match: usize,
    pub v_penalty: i32,
    pub d_penalty: i32,
    pub j_penalty: i32,
    pub c_penalty: i32,
    pub evalue: f64,
    pub d_evalue: f64,
    pub j_evalue: f64,

    // Alignments retained per class
    pub num_alignments_v: usize,
    pub num_alignments_d: usize,
    pub num_alignments_j: usize,
    pub num_alignments_c: usize,

    // Flags
    pub v_only: bool,           // Restrict the search to the V region
    pub translate: bool,        // Translate CDR3 in the output
    pub extend_5_end: bool,     // Extend V alignments to the germline 5' end
    pub extend_3_end: bool,     // Extend J alignments to the germline 3' end
    pub detect_overlap: bool,   // Report overlapping D instead of re-searching
    pub allow_vdj_overlap: bool, // Accept D candidates overlapping V or J
    pub search_without_v: bool, // Search D/J/C unrestricted for queries without a V hit

    // Refinement
    pub max_edge_extension: usize,
    pub min_v_length: usize,
    pub min_j_length: usize,

    // Processing
    pub n_threads: usize,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            molecule: MoleculeType::Nucleotide,
            species: defaults::SPECIES.to_string(),
            domain_system: DomainSystem::Imgt,
            chain_sequence_type: ChainSequenceType::Ig,
            min_d_match: defaults::MIN_D_MATCH,
            v_penalty: defaults::V_PENALTY,
            d_penalty: defaults::D_PENALTY,
            j_penalty: defaults::J_PENALTY,
            c_penalty: defaults::C_PENALTY,
            evalue: defaults::EVALUE,
            d_evalue: defaults::D_EVALUE,
            j_evalue: defaults::J_EVALUE,
            num_alignments_v: defaults::NUM_ALIGNMENTS_V,
            num_alignments_d: defaults::NUM_ALIGNMENTS_D,
            num_alignments_j: defaults::NUM_ALIGNMENTS_J,
            num_alignments_c: defaults::NUM_ALIGNMENTS_C,
            v_only: false,
            translate: false,
            extend_5_end: false,
            extend_3_end: false,
            detect_overlap: false,
            allow_vdj_overlap: false,
            search_without_v: false,
            max_edge_extension: defaults::MAX_EDGE_EXTENSION,
            min_v_length: defaults::MIN_V_LENGTH,
            min_j_length: defaults::MIN_J_LENGTH,
            n_threads: 1,
        }
    }
}

// ============================================================================
// STAGE-SPECIFIC PARAMETER BUNDLES
// ============================================================================

/// Parameters handed to the search engine for one gene class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSearchParams {
    pub class: GeneClass,
    pub mismatch_penalty: i32,
    pub word_size: usize,
    pub evalue: f64,
    pub max_hits: usize,
    pub ungapped: bool,
}

/// Parameters for the alignment refinement passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineParams {
    pub extend_5_end: bool,
    pub extend_3_end: bool,
    pub max_edge_extension: usize,
    pub min_v_length: usize,
    pub min_j_length: usize,
}

/// Parameters for D/J reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverParams {
    pub allow_overlap: bool,
    pub detect_overlap: bool,
    pub min_d_match: usize,
}

impl SearchParameters {
    /// Check the parameters against the configured databases. Runs before any
    /// search is issued.
    pub fn validate(&self, databases: &GeneDatabases) -> Result<(), ConfigError> {
        for slot in [
            DatabaseSlot::UserV,
            DatabaseSlot::UserD,
            DatabaseSlot::UserJ,
            DatabaseSlot::DomainV,
            DatabaseSlot::C,
        ] {
            if let Some(handle) = databases.get(slot) {
                if handle.slot != slot {
                    return Err(ConfigError::SlotMismatch {
                        name: handle.name.clone(),
                        expected: slot,
                        found: handle.slot,
                    });
                }
            }
        }

        if databases.user_v.is_none() && databases.domain_v.is_none() {
            return Err(ConfigError::MissingVDatabase);
        }

        if self.searches_dj() {
            if databases.user_d.is_none() {
                return Err(ConfigError::MissingDjDatabase { class: GeneClass::D });
            }
            if databases.user_j.is_none() {
                return Err(ConfigError::MissingDjDatabase { class: GeneClass::J });
            }
        }

        if self.min_d_match < defaults::MIN_D_MATCH_FLOOR {
            return Err(ConfigError::MinDMatchTooSmall {
                value: self.min_d_match,
                min: defaults::MIN_D_MATCH_FLOOR,
            });
        }

        for (class, value) in [
            (GeneClass::V, self.v_penalty),
            (GeneClass::D, self.d_penalty),
            (GeneClass::J, self.j_penalty),
            (GeneClass::C, self.c_penalty),
        ] {
            if value >= 0 {
                return Err(ConfigError::NonNegativePenalty { class, value });
            }
        }

        if self.num_alignments_v == 0 {
            return Err(ConfigError::NoVAlignments);
        }
        if self.n_threads == 0 {
            return Err(ConfigError::InvalidThreadCount);
        }
        if self.domain_system == DomainSystem::Kabat
            && self.chain_sequence_type == ChainSequenceType::Tcr
        {
            return Err(ConfigError::KabatForTcr);
        }

        Ok(())
    }

    /// D/J search runs for nucleotide queries unless restricted to V.
    pub fn searches_dj(&self) -> bool {
        !self.v_only && self.molecule == MoleculeType::Nucleotide
    }

    pub fn searches_c(&self, databases: &GeneDatabases) -> bool {
        self.searches_dj() && databases.c.is_some()
    }

    pub fn num_alignments(&self, class: GeneClass) -> usize {
        match class {
            GeneClass::V => self.num_alignments_v,
            GeneClass::D => self.num_alignments_d,
            GeneClass::J => self.num_alignments_j,
            GeneClass::C => self.num_alignments_c,
        }
    }

    pub fn class_params(&self, class: GeneClass) -> ClassSearchParams {
        let (mismatch_penalty, word_size, evalue, ungapped) = match class {
            GeneClass::V => {
                let word = match self.molecule {
                    MoleculeType::Nucleotide => defaults::V_WORD_SIZE,
                    MoleculeType::Protein => defaults::V_WORD_SIZE_PROTEIN,
                };
                (self.v_penalty, word, self.evalue, false)
            }
            // D segments are short; search them ungapped with a word the
            // size of the minimum match
            GeneClass::D => (self.d_penalty, self.min_d_match, self.d_evalue, true),
            GeneClass::J => (self.j_penalty, defaults::J_WORD_SIZE, self.j_evalue, false),
            GeneClass::C => (self.c_penalty, defaults::C_WORD_SIZE, self.evalue, false),
        };

        ClassSearchParams {
            class,
            mismatch_penalty,
            word_size,
            evalue,
            max_hits: self.num_alignments(class).max(defaults::HITLIST_SIZE),
            ungapped,
        }
    }

    pub fn refine_params(&self) -> RefineParams {
        RefineParams {
            extend_5_end: self.extend_5_end,
            extend_3_end: self.extend_3_end,
            max_edge_extension: self.max_edge_extension,
            min_v_length: self.min_v_length,
            min_j_length: self.min_j_length,
        }
    }

    pub fn resolver_params(&self) -> ResolverParams {
        ResolverParams {
            allow_overlap: self.allow_vdj_overlap,
            detect_overlap: self.detect_overlap,
            min_d_match: self.min_d_match,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::vdj::types::GeneDatabaseHandle;

    fn full_databases() -> GeneDatabases {
        GeneDatabases {
            user_v: Some(GeneDatabaseHandle::local("v", DatabaseSlot::UserV, "v.fa")),
            user_d: Some(GeneDatabaseHandle::local("d", DatabaseSlot::UserD, "d.fa")),
            user_j: Some(GeneDatabaseHandle::local("j", DatabaseSlot::UserJ, "j.fa")),
            domain_v: None,
            c: None,
        }
    }

    #[test]
    fn test_parse_command_line_values() {
        assert_eq!(DomainSystem::parse("KABAT"), Ok(DomainSystem::Kabat));
        assert_eq!(ChainSequenceType::parse("TR"), Ok(ChainSequenceType::Tcr));
        assert!(DomainSystem::parse("chothia").is_err());
    }

    #[test]
    fn test_default_parameters_validate() {
        let params = SearchParameters::default();
        assert_eq!(params.validate(&full_databases()), Ok(()));
    }

    #[test]
    fn test_dj_search_requires_j_database() {
        let params = SearchParameters::default();
        let mut dbs = full_databases();
        dbs.user_j = None;
        assert_eq!(
            params.validate(&dbs),
            Err(ConfigError::MissingDjDatabase { class: GeneClass::J })
        );

        // Restricting to V lifts the requirement
        let v_only = SearchParameters {
            v_only: true,
            ..SearchParameters::default()
        };
        assert_eq!(v_only.validate(&dbs), Ok(()));
    }

    #[test]
    fn test_missing_v_database() {
        let params = SearchParameters::default();
        let mut dbs = full_databases();
        dbs.user_v = None;
        assert_eq!(params.validate(&dbs), Err(ConfigError::MissingVDatabase));
    }

    #[test]
    fn test_slot_mismatch_detected() {
        let params = SearchParameters::default();
        let mut dbs = full_databases();
        dbs.user_d = Some(GeneDatabaseHandle::local("d", DatabaseSlot::UserJ, "d.fa"));
        assert!(matches!(
            params.validate(&dbs),
            Err(ConfigError::SlotMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_numeric_settings() {
        let dbs = full_databases();
        let small_d = SearchParameters {
            min_d_match: 2,
            ..SearchParameters::default()
        };
        assert!(matches!(
            small_d.validate(&dbs),
            Err(ConfigError::MinDMatchTooSmall { value: 2, .. })
        ));

        let positive = SearchParameters {
            j_penalty: 1,
            ..SearchParameters::default()
        };
        assert_eq!(
            positive.validate(&dbs),
            Err(ConfigError::NonNegativePenalty {
                class: GeneClass::J,
                value: 1
            })
        );

        let kabat_tcr = SearchParameters {
            domain_system: DomainSystem::Kabat,
            chain_sequence_type: ChainSequenceType::Tcr,
            ..SearchParameters::default()
        };
        assert_eq!(kabat_tcr.validate(&dbs), Err(ConfigError::KabatForTcr));
    }

    #[test]
    fn test_class_params() {
        let params = SearchParameters {
            min_d_match: 7,
            ..SearchParameters::default()
        };
        let d = params.class_params(GeneClass::D);
        assert_eq!(d.word_size, 7);
        assert_eq!(d.mismatch_penalty, defaults::D_PENALTY);
        assert!(d.ungapped);

        let v = params.class_params(GeneClass::V);
        assert_eq!(v.word_size, defaults::V_WORD_SIZE);
        assert!(v.max_hits >= params.num_alignments_v);

        let protein = SearchParameters {
            molecule: MoleculeType::Protein,
            ..SearchParameters::default()
        };
        assert_eq!(
            protein.class_params(GeneClass::V).word_size,
            defaults::V_WORD_SIZE_PROTEIN
        );
        assert!(!protein.searches_dj());
    }
}
