//! Nucleotide helpers shared by every stage.

/// Alphabet accepted in a loaded sequence.
pub const DNA_ALPHABET: [u8; 5] = [b'A', b'C', b'G', b'T', b'N'];

/// Strip whitespace and upper-case.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn is_dna_base(base: u8) -> bool {
    DNA_ALPHABET.contains(&base)
}

/// Offsets of every character outside the DNA alphabet.
pub fn invalid_positions(seq: &str) -> Vec<(usize, char)> {
    seq.char_indices()
        .filter(|(_, c)| !c.is_ascii() || !is_dna_base(*c as u8))
        .collect()
}

pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        other => other,
    }
}

pub fn reverse_complement(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| complement(b) as char)
        .collect()
}

/// Fraction of G/C bases in `seq`, 0.0 for an empty slice.
pub fn gc_fraction(seq: &str) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let gc = seq.bytes().filter(|b| matches!(b, b'G' | b'C')).count();
    gc as f64 / seq.len() as f64
}

/// Whether two bases can pair (Watson-Crick only).
pub fn pairs(a: u8, b: u8) -> bool {
    a != b'N' && complement(a) == b
}

/// Bases an IUPAC symbol stands for. `None` for characters that are not IUPAC codes.
pub fn iupac_bases(symbol: u8) -> Option<&'static [u8]> {
    let bases: &'static [u8] = match symbol.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' | b'U' => b"T",
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"CG",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        b'N' => b"ACGTN",
        _ => return None,
    };
    Some(bases)
}

/// IUPAC complement of a motif symbol.
pub fn iupac_complement(symbol: u8) -> u8 {
    match symbol.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        other => other,
    }
}

/// Length of the longest run of `base` in `seq`.
pub fn longest_run(seq: &str, base: u8) -> usize {
    let mut best = 0;
    let mut current = 0;
    for b in seq.bytes() {
        if b == base {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}
