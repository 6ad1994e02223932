//! Codon translation with the standard genetic code.

/// Amino acids for codons in TCAG order (TTT, TTC, TTA, TTG, TCT, ...).
const STANDARD_CODE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

#[inline]
fn base_index(b: u8) -> Option<usize> {
    match b.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Amino acid for one codon; `X` for codons with ambiguous bases.
pub fn translate_codon(codon: &[u8]) -> u8 {
    if codon.len() != 3 {
        return b'X';
    }
    match (base_index(codon[0]), base_index(codon[1]), base_index(codon[2])) {
        (Some(a), Some(b), Some(c)) => STANDARD_CODE[a * 16 + b * 4 + c],
        _ => b'X',
    }
}

/// Translate complete codons from the start of `seq`; a trailing partial
/// codon is dropped.
pub fn translate(seq: &[u8]) -> String {
    seq.chunks_exact(3)
        .map(|codon| translate_codon(codon) as char)
        .collect()
}

/// Whether any complete codon of `seq` is a stop codon.
pub fn has_stop_codon(seq: &[u8]) -> bool {
    seq.chunks_exact(3).any(|codon| translate_codon(codon) == b'*')
}
