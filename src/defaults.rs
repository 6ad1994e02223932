// src/defaults.rs

// Search Constants
pub const SPECIES: &str = "human";
pub const MIN_D_MATCH: usize = 5;
pub const MIN_D_MATCH_FLOOR: usize = 4;
pub const V_PENALTY: i32 = -1;
pub const D_PENALTY: i32 = -4;
pub const J_PENALTY: i32 = -3;
pub const C_PENALTY: i32 = -1;
pub const V_WORD_SIZE: usize = 11;
pub const V_WORD_SIZE_PROTEIN: usize = 3;
pub const J_WORD_SIZE: usize = 7;
pub const C_WORD_SIZE: usize = 11;
pub const EVALUE: f64 = 20.0;
pub const D_EVALUE: f64 = 1000.0;
pub const J_EVALUE: f64 = 1000.0;
pub const HITLIST_SIZE: usize = 20;

// Alignments to show per gene class
pub const NUM_ALIGNMENTS_V: usize = 3;
pub const NUM_ALIGNMENTS_D: usize = 3;
pub const NUM_ALIGNMENTS_J: usize = 3;
pub const NUM_ALIGNMENTS_C: usize = 1;

// Refinement Constants
pub const MAX_EDGE_EXTENSION: usize = 30;
pub const MIN_V_LENGTH: usize = 9;
pub const MIN_J_LENGTH: usize = 0;

// Ranking Constants
pub const J_POSITION_OVERRIDE_DISTANCE: usize = 100;
pub const J_POSITION_SCORE_RATIO: f64 = 0.5;

// Windowing Constants
/// D/J windows open this many bases before the V end.
pub const DJ_WINDOW_BACKOFF: usize = 20;

// Other Constants
pub const VERBOSITY: i32 = 3;
