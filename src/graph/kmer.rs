//! Binary k-mer codec.
//!
//! Packs DNA strings into fixed-width binary k-mers of `⌈k/32⌉` 64-bit
//! words, two bits per base (A=0, C=1, G=2, T=3), highest bases in the
//! most-significant word. The word count is a const generic so the hot
//! loops compile to straight-line code for each supported width; the
//! kmer size itself stays a runtime value, the way the command layer
//! dispatches it (see `dispatch_kmer_words!`).
//!
//! Only odd kmer sizes are accepted, so a kmer and its reverse
//! complement can never be equal and canonicalization never ties.

use std::fmt;

use crate::error::CtxError;

/// Smallest supported kmer size.
pub const MIN_KMER_SIZE: usize = 3;
/// Largest supported kmer size (8 words of 32 bases, minus one for oddness).
pub const MAX_KMER_SIZE: usize = 255;
/// Largest supported word count.
pub const MAX_KMER_WORDS: usize = 8;

/// The four base codes in encoding order.
pub const BASES: [u8; 4] = [0, 1, 2, 3];

/// Encode an ASCII base to its 2-bit code. Case-insensitive; returns
/// `None` for anything outside `ACGT` (including `N`).
#[inline]
pub fn encode_base(b: u8) -> Option<u8> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Decode a 2-bit base code to its ASCII letter.
#[inline]
pub fn decode_base(code: u8) -> u8 {
    b"ACGT"[(code & 3) as usize]
}

/// Complement of a 2-bit base code (A<->T, C<->G is `3 - code`).
#[inline]
pub fn complement_code(code: u8) -> u8 {
    3 - (code & 3)
}

/// Number of 64-bit words needed to hold a kmer of size `k`.
#[inline]
pub const fn words_for_k(k: usize) -> usize {
    k.div_ceil(32)
}

/// Validate a kmer size: odd, within `[MIN_KMER_SIZE, MAX_KMER_SIZE]`.
pub fn validate_kmer_size(k: usize) -> Result<(), CtxError> {
    if k < MIN_KMER_SIZE || k > MAX_KMER_SIZE {
        return Err(CtxError::InvalidInput(format!(
            "kmer size {k} out of range [{MIN_KMER_SIZE}, {MAX_KMER_SIZE}]"
        )));
    }
    if k % 2 == 0 {
        return Err(CtxError::InvalidInput(format!(
            "kmer size must be odd, got {k}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Which strand a stored (canonical) kmer is being read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Read the stored kmer as-is.
    Forward,
    /// Read the stored kmer as its reverse complement.
    Reverse,
}

impl Orientation {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reverse,
            Orientation::Reverse => Orientation::Forward,
        }
    }

    #[inline]
    pub fn is_forward(self) -> bool {
        matches!(self, Orientation::Forward)
    }
}

// ---------------------------------------------------------------------------
// BinaryKmer
// ---------------------------------------------------------------------------

/// A fixed-width binary kmer of `W` 64-bit words.
///
/// `words[0]` is the most-significant word; the kmer occupies the low
/// `2k` bits of the `64·W`-bit register, so array comparison order equals
/// base-by-base comparison from the 5' end. Bits above `2k` are always
/// zero, which the hash table relies on for its reserved bucket markers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinaryKmer<const W: usize> {
    words: [u64; W],
}

impl<const W: usize> BinaryKmer<W> {
    /// The all-zero kmer (`AAA...A`).
    #[inline]
    pub fn zero() -> Self {
        Self { words: [0u64; W] }
    }

    /// Wrap raw words. The caller guarantees bits above `2k` are clear.
    #[inline]
    pub fn from_words(words: [u64; W]) -> Self {
        Self { words }
    }

    /// The raw word array, most-significant word first.
    #[inline]
    pub fn words(&self) -> &[u64; W] {
        &self.words
    }

    /// Mask covering the used bits of the most-significant word.
    #[inline]
    fn top_word_mask(k: usize) -> u64 {
        let used = 2 * k - 64 * (W - 1);
        debug_assert!(used >= 1 && used <= 62, "k must be odd and fit W words");
        (1u64 << used) - 1
    }

    /// Pack a DNA string of exactly `k` bases.
    pub fn from_seq(seq: &[u8], k: usize) -> Result<Self, CtxError> {
        if seq.len() != k {
            return Err(CtxError::InvalidInput(format!(
                "sequence length {} does not match kmer size {}",
                seq.len(),
                k
            )));
        }
        let mut kmer = Self::zero();
        for &b in seq {
            let code = encode_base(b).ok_or_else(|| {
                CtxError::InvalidInput(format!("invalid base {:?}", b as char))
            })?;
            kmer = kmer.shift_left_append(code, k);
        }
        Ok(kmer)
    }

    /// The base code at position `i` counted from the 5' end (0 = leftmost).
    #[inline]
    pub fn base_at(&self, i: usize, k: usize) -> u8 {
        debug_assert!(i < k);
        let bit = 2 * (k - 1 - i);
        let word = W - 1 - bit / 64;
        ((self.words[word] >> (bit % 64)) & 3) as u8
    }

    /// The leftmost (5') base code.
    #[inline]
    pub fn first_base(&self, k: usize) -> u8 {
        self.base_at(0, k)
    }

    /// The rightmost (3') base code.
    #[inline]
    pub fn last_base(&self) -> u8 {
        (self.words[W - 1] & 3) as u8
    }

    /// Drop the leftmost base and append `base` on the right.
    #[inline]
    pub fn shift_left_append(self, base: u8, k: usize) -> Self {
        let mut words = self.words;
        let mut carry = (base & 3) as u64;
        for i in (0..W).rev() {
            let w = words[i];
            words[i] = (w << 2) | carry;
            carry = w >> 62;
        }
        words[0] &= Self::top_word_mask(k);
        Self { words }
    }

    /// Drop the rightmost base and prepend `base` on the left.
    #[inline]
    pub fn shift_right_prepend(self, base: u8, k: usize) -> Self {
        let mut words = self.words;
        let mut carry = 0u64;
        for i in 0..W {
            let w = words[i];
            words[i] = (w >> 2) | carry;
            carry = w << 62;
        }
        let bit = 2 * (k - 1);
        let word = W - 1 - bit / 64;
        words[word] |= ((base & 3) as u64) << (bit % 64);
        Self { words }
    }

    /// Reverse complement.
    #[inline]
    pub fn reverse_complement(self, k: usize) -> Self {
        let mut out = [0u64; W];
        for i in 0..W {
            out[W - 1 - i] = revcomp_word(self.words[i]);
        }
        // The reversed value sits in the high 2k bits; re-align it.
        let shift = (64 * W - 2 * k) as u32;
        if shift > 0 {
            let mut carry = 0u64;
            for w in out.iter_mut() {
                let v = *w;
                *w = (v >> shift) | carry;
                carry = v << (64 - shift);
            }
        }
        Self { words: out }
    }

    /// The canonical form: the smaller of this kmer and its reverse
    /// complement, compared base-by-base from the 5' end.
    #[inline]
    pub fn canonical(self, k: usize) -> Self {
        let rc = self.reverse_complement(k);
        if self.words <= rc.words { self } else { rc }
    }

    /// Canonical form plus the orientation in which `self` reads it.
    ///
    /// `Forward` means `self` already is canonical; `Reverse` means the
    /// canonical form is `self`'s reverse complement.
    #[inline]
    pub fn canonical_with_orientation(self, k: usize) -> (Self, Orientation) {
        let rc = self.reverse_complement(k);
        if self.words <= rc.words {
            (self, Orientation::Forward)
        } else {
            (rc, Orientation::Reverse)
        }
    }

    /// Append the DNA string of this kmer to a byte buffer.
    pub fn append_dna(&self, k: usize, out: &mut Vec<u8>) {
        for i in 0..k {
            out.push(decode_base(self.base_at(i, k)));
        }
    }

    /// The DNA string of this kmer.
    pub fn to_dna_string(&self, k: usize) -> String {
        let mut buf = Vec::with_capacity(k);
        self.append_dna(k, &mut buf);
        String::from_utf8(buf).unwrap()
    }
}

impl<const W: usize> fmt::Debug for BinaryKmer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinaryKmer<{}>({:016x?})", W, self.words)
    }
}

/// Complement and reverse the 2-bit groups of one word.
#[inline]
fn revcomp_word(x: u64) -> u64 {
    // A<->T and C<->G are both two-bit complements under this encoding.
    let mut x = !x;
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    x.swap_bytes()
}

/// Dispatch a generic function over the word count required by a runtime
/// kmer size. `$func` must be callable as `$func::<N>($($args),*)` for
/// `N` in `1..=8`.
#[macro_export]
macro_rules! dispatch_kmer_words {
    ($k:expr, $func:ident $(, $args:expr)* $(,)?) => {
        match $crate::graph::kmer::words_for_k($k) {
            1 => $func::<1>($($args),*),
            2 => $func::<2>($($args),*),
            3 => $func::<3>($($args),*),
            4 => $func::<4>($($args),*),
            5 => $func::<5>($($args),*),
            6 => $func::<6>($($args),*),
            7 => $func::<7>($($args),*),
            8 => $func::<8>($($args),*),
            w => ::anyhow::bail!("unsupported kmer width: {} words", w),
        }
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let k = 21;
        let seq = b"ACGTACGTACGTACGTACGTA";
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(seq, k).unwrap();
        assert_eq!(kmer.to_dna_string(k), "ACGTACGTACGTACGTACGTA");
        assert_eq!(kmer.first_base(k), 0);
        assert_eq!(kmer.last_base(), 0);
    }

    #[test]
    fn test_pack_rejects_bad_input() {
        assert!(BinaryKmer::<1>::from_seq(b"ACGTN", 5).is_err());
        assert!(BinaryKmer::<1>::from_seq(b"ACGT", 5).is_err());
    }

    #[test]
    fn test_reverse_complement() {
        let k = 5;
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(b"ACGTG", k).unwrap();
        assert_eq!(kmer.reverse_complement(k).to_dna_string(k), "CACGT");
    }

    #[test]
    fn test_reverse_complement_involution() {
        let k = 21;
        let kmer: BinaryKmer<1> =
            BinaryKmer::from_seq(b"AACCGGTTACGTAGCTAGCTA", k).unwrap();
        assert_eq!(kmer.reverse_complement(k).reverse_complement(k), kmer);
    }

    #[test]
    fn test_multiword_reverse_complement() {
        let k = 33;
        let seq = b"ACGTACGTACGTACGTACGTACGTACGTACGTA";
        let kmer: BinaryKmer<2> = BinaryKmer::from_seq(seq, k).unwrap();
        let rc = kmer.reverse_complement(k);
        assert_eq!(rc.to_dna_string(k), "TACGTACGTACGTACGTACGTACGTACGTACGT");
        assert_eq!(rc.reverse_complement(k), kmer);
    }

    #[test]
    fn test_canonical_idempotence() {
        let k = 21;
        let kmer: BinaryKmer<1> =
            BinaryKmer::from_seq(b"TTGCAGCTAGCTAGCTAGCTT", k).unwrap();
        let canon = kmer.canonical(k);
        assert_eq!(canon.canonical(k), canon);
    }

    #[test]
    fn test_canonical_never_ties() {
        // k odd means a kmer can never equal its own reverse complement:
        // the middle base would have to be its own complement.
        let k = 5;
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(b"ACGCG", k).unwrap();
        assert_ne!(kmer, kmer.reverse_complement(k));
    }

    #[test]
    fn test_shift_left_append() {
        let k = 5;
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(b"ACGTG", k).unwrap();
        let shifted = kmer.shift_left_append(1, k);
        assert_eq!(shifted.to_dna_string(k), "CGTGC");
    }

    #[test]
    fn test_shift_right_prepend() {
        let k = 5;
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(b"ACGTG", k).unwrap();
        let shifted = kmer.shift_right_prepend(3, k);
        assert_eq!(shifted.to_dna_string(k), "TACGT");
    }

    #[test]
    fn test_multiword_shifts() {
        let k = 33;
        let seq = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAC";
        let kmer: BinaryKmer<2> = BinaryKmer::from_seq(seq, k).unwrap();
        let shifted = kmer.shift_left_append(3, k);
        assert_eq!(
            shifted.to_dna_string(k),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAACT"
        );
        let back = shifted.shift_right_prepend(0, k);
        assert_eq!(back.to_dna_string(k), seq.iter().map(|&b| b as char).collect::<String>());
    }

    #[test]
    fn test_base_at() {
        let k = 7;
        let kmer: BinaryKmer<1> = BinaryKmer::from_seq(b"GATTACA", k).unwrap();
        let decoded: Vec<u8> = (0..k).map(|i| decode_base(kmer.base_at(i, k))).collect();
        assert_eq!(&decoded, b"GATTACA");
    }

    #[test]
    fn test_words_for_k() {
        assert_eq!(words_for_k(21), 1);
        assert_eq!(words_for_k(31), 1);
        assert_eq!(words_for_k(33), 2);
        assert_eq!(words_for_k(63), 2);
        assert_eq!(words_for_k(255), 8);
    }

    #[test]
    fn test_validate_kmer_size() {
        assert!(validate_kmer_size(21).is_ok());
        assert!(validate_kmer_size(20).is_err());
        assert!(validate_kmer_size(1).is_err());
        assert!(validate_kmer_size(257).is_err());
    }
}
