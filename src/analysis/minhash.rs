use std::collections::BTreeSet;

use once_cell::sync::OnceCell;

use crate::error::{AnalysisError, Result};

/// Deployment defaults; all three are frozen at startup.
pub const DEFAULT_SIGNATURE_LEN: usize = 512;
pub const DEFAULT_DICT_SIZE: u32 = 16_777_216;
pub const DEFAULT_SEED: u64 = 123_456_789;

/// Modulus of the universal hash family. Small enough that every
/// per-function minimum fits an i32 in the packed signature.
const LARGE_PRIME: u64 = 433_494_437;

static ENGINE: OnceCell<MinHash> = OnceCell::new();

/// Fixed-seed MinHash engine.
///
/// The coefficient table is derived deterministically from the seed, so the
/// same deployment parameters always produce byte-identical signatures.
pub struct MinHash {
    coefficients: Vec<(u64, u64)>,
    dict_size: u32,
    seed: u64,
}

impl MinHash {
    pub fn new(signature_len: usize, dict_size: u32, seed: u64) -> Self {
        let mut state = seed;
        let coefficients = (0..signature_len)
            .map(|_| {
                let a = 1 + splitmix64(&mut state) % (LARGE_PRIME - 1);
                let b = splitmix64(&mut state) % LARGE_PRIME;
                (a, b)
            })
            .collect();
        Self { coefficients, dict_size, seed }
    }

    /// Installs the process-wide engine. Later calls with different
    /// parameters are ignored; the engine is fixed for the process lifetime.
    pub fn init(signature_len: usize, dict_size: u32, seed: u64) -> &'static MinHash {
        ENGINE.get_or_init(|| MinHash::new(signature_len, dict_size, seed))
    }

    /// The process-wide engine, installed with defaults if `init` never ran.
    pub fn global() -> &'static MinHash {
        ENGINE.get_or_init(|| {
            MinHash::new(DEFAULT_SIGNATURE_LEN, DEFAULT_DICT_SIZE, DEFAULT_SEED)
        })
    }

    pub fn signature_len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn dict_size(&self) -> u32 {
        self.dict_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Maps a string to a token in `[0, dict_size)` with a stable 32-bit hash.
    pub fn token(&self, s: &str) -> u32 {
        crc32fast::hash(s.as_bytes()) % self.dict_size
    }

    /// Unique token set for a list of strings.
    pub fn tokenize<'a, I>(&self, strings: I) -> BTreeSet<u32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        strings.into_iter().map(|s| self.token(s)).collect()
    }

    /// Per-function minima over the token set. The empty set signs to
    /// `i32::MAX` in every slot.
    pub fn signature(&self, tokens: &BTreeSet<u32>) -> Vec<i32> {
        self.coefficients
            .iter()
            .map(|&(a, b)| {
                tokens
                    .iter()
                    .map(|&t| ((a * u64::from(t) + b) % LARGE_PRIME) as i32)
                    .min()
                    .unwrap_or(i32::MAX)
            })
            .collect()
    }

    /// Jaccard estimate: the fraction of signature slots that agree.
    pub fn similarity(&self, a: &[i32], b: &[i32]) -> Result<f64> {
        if a.len() != b.len() {
            return Err(AnalysisError::InvalidArgument(format!(
                "signature lengths differ: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        if a.is_empty() {
            return Err(AnalysisError::InvalidArgument(
                "signatures must not be empty".into(),
            ));
        }
        let matching = a.iter().zip(b).filter(|(x, y)| x == y).count();
        Ok(matching as f64 / a.len() as f64)
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_strings_collapse_to_one_token() {
        let engine = MinHash::new(128, 50_000, DEFAULT_SEED);
        let tokens = engine.tokenize(["abc", "def", "abc"]);
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|&t| t < 50_000));
    }

    #[test]
    fn signatures_are_deterministic() {
        let engine = MinHash::new(DEFAULT_SIGNATURE_LEN, DEFAULT_DICT_SIZE, DEFAULT_SEED);
        let tokens = engine.tokenize(["abc", "def", "abc"]);
        let first = engine.signature(&tokens);
        let second = engine.signature(&tokens);
        assert_eq!(first.len(), DEFAULT_SIGNATURE_LEN);
        assert_eq!(first, second);
        assert_eq!(engine.seed(), DEFAULT_SEED);

        // a fresh engine with the same parameters agrees bit for bit
        let other = MinHash::new(DEFAULT_SIGNATURE_LEN, DEFAULT_DICT_SIZE, DEFAULT_SEED);
        assert_eq!(first, other.signature(&tokens));
    }

    #[test]
    fn identical_signatures_estimate_full_similarity() {
        let engine = MinHash::new(128, 50_000, DEFAULT_SEED);
        let sig = engine.signature(&engine.tokenize(["/bin/sh", "libc.so.6"]));
        assert_eq!(engine.similarity(&sig, &sig).unwrap(), 1.0);
    }

    #[test]
    fn disjoint_sets_estimate_low_similarity() {
        let engine = MinHash::new(512, DEFAULT_DICT_SIZE, DEFAULT_SEED);
        let a = engine.signature(&engine.tokenize(["alpha", "beta", "gamma"]));
        let b = engine.signature(&engine.tokenize(["delta", "epsilon", "zeta"]));
        let sim = engine.similarity(&a, &b).unwrap();
        assert!((0.0..0.2).contains(&sim));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let engine = MinHash::new(128, 50_000, DEFAULT_SEED);
        assert!(engine.similarity(&[1, 2, 3], &[1, 2]).is_err());
    }

    #[test]
    fn empty_token_set_signs_to_sentinel() {
        let engine = MinHash::new(16, 50_000, DEFAULT_SEED);
        let sig = engine.signature(&BTreeSet::new());
        assert!(sig.iter().all(|&v| v == i32::MAX));
    }
}
