//! MinHash signatures
//!
//! Hash function `i` is `xxh3_64_with_seed(bytes, seeds[i])`. Seeds are drawn
//! from a SplitMix64 stream over a fixed base seed, so a given
//! `(num_perm, scheme version)` always yields the same hash family across
//! processes and runs.

use neardup_core::{Error, Result, Signature};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Version of the seed scheme. Stored with every corpus.
pub const SIGNATURE_SCHEME_VERSION: u32 = 1;

/// Base seed of the SplitMix64 stream.
const BASE_SEED: u64 = 0x6e65_6172_6475_7031;

/// Builds fixed-length MinHash signatures from shingle sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBuilder {
    num_perm: usize,
    scheme_version: u32,
    seeds: Vec<u64>,
}

impl SignatureBuilder {
    /// Create a builder for signatures of length `num_perm`.
    pub fn new(num_perm: usize) -> Result<Self> {
        if num_perm == 0 {
            return Err(Error::configuration("num_perm", "must be positive"));
        }
        Ok(SignatureBuilder {
            num_perm,
            scheme_version: SIGNATURE_SCHEME_VERSION,
            seeds: seed_stream(BASE_SEED).take(num_perm).collect(),
        })
    }

    /// Signature length.
    pub fn num_perm(&self) -> usize {
        self.num_perm
    }

    /// Seed scheme version this builder was created with.
    pub fn scheme_version(&self) -> u32 {
        self.scheme_version
    }

    /// Verify a deserialized builder matches the current hash family.
    pub fn check_compatible(&self) -> Result<()> {
        if self.scheme_version != SIGNATURE_SCHEME_VERSION {
            return Err(Error::corruption(
                "corpus",
                format!(
                    "signature scheme version {} is not supported (expected {})",
                    self.scheme_version, SIGNATURE_SCHEME_VERSION
                ),
            ));
        }
        let expected = SignatureBuilder::new(self.num_perm)?;
        if expected.seeds != self.seeds {
            return Err(Error::corruption("corpus", "signature seeds do not match"));
        }
        Ok(())
    }

    /// MinHash of a shingle sequence.
    ///
    /// An empty sequence yields all `u64::MAX`.
    pub fn signature<S: AsRef<str>>(&self, shingles: &[S]) -> Signature {
        let mut values = vec![u64::MAX; self.num_perm];
        for shingle in shingles {
            let bytes = shingle.as_ref().as_bytes();
            for (slot, &seed) in values.iter_mut().zip(self.seeds.iter()) {
                let hash = xxh3_64_with_seed(bytes, seed);
                if hash < *slot {
                    *slot = hash;
                }
            }
        }
        Signature::from_values(values)
    }

    /// Estimated Jaccard similarity between two signatures.
    pub fn jaccard(a: &Signature, b: &Signature) -> f64 {
        a.jaccard(b)
    }
}

/// SplitMix64 stream.
fn seed_stream(mut state: u64) -> impl Iterator<Item = u64> {
    std::iter::repeat_with(move || {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    })
}
