//! Password-seeded pseudo-random sequences.
//!
//! Every password is expanded with ChaCha20 (`rand_chacha::ChaCha20Rng`,
//! seeded through `seed_from_u64`). rand_chacha guarantees value-stable output,
//! so embed and extract agree bit for bit across processes and platforms.
//!
//! Permutations use a Fisher-Yates shuffle that draws `u32` ranges rather than
//! `usize` ranges, which keeps the amount of entropy consumed per step the same
//! on 32-bit and 64-bit targets.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A deterministic stream of permutations and polarity bits for one password.
///
/// Draws are consumed in call order: two streams built from the same password
/// and queried in the same order yield identical sequences.
pub struct KeyStream {
    rng: ChaCha20Rng,
}

impl KeyStream {
    /// Create a stream seeded from `password`.
    #[must_use]
    pub fn new(password: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(password),
        }
    }

    /// Derive a fresh [`Scramble`] of `length` entries from `password`.
    ///
    /// Equivalent to `KeyStream::new(password)` followed by
    /// [`permutation`](Self::permutation) and [`polarity`](Self::polarity).
    #[must_use]
    pub fn derive(password: u64, length: usize) -> Scramble {
        let mut stream = Self::new(password);
        let permutation = stream.permutation(length);
        let polarity = stream.polarity(length);
        Scramble {
            permutation,
            polarity,
        }
    }

    /// Draw a permutation of `0..length`.
    pub fn permutation(&mut self, length: usize) -> Vec<usize> {
        let mut values: Vec<usize> = (0..length).collect();
        for i in (1..length).rev() {
            #[allow(clippy::cast_possible_truncation)]
            let j = self.rng.gen_range(0..=i as u32) as usize;
            values.swap(i, j);
        }
        values
    }

    /// Draw `length` independent fair bits.
    pub fn polarity(&mut self, length: usize) -> Vec<bool> {
        (0..length).map(|_| self.rng.gen::<bool>()).collect()
    }
}

/// A keyed reordering plus XOR mask applied to the payload bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scramble {
    /// Position `i` of the scrambled stream takes payload bit `permutation[i]`.
    pub permutation: Vec<usize>,
    /// Bits XOR-ed onto the stream after reordering.
    pub polarity: Vec<bool>,
}

impl Scramble {
    /// Reorder and mask `bits`.
    ///
    /// `bits` must have the length the scramble was derived for.
    #[must_use]
    pub fn apply(&self, bits: &[bool]) -> Vec<bool> {
        debug_assert_eq!(bits.len(), self.permutation.len());
        self.permutation
            .iter()
            .zip(&self.polarity)
            .map(|(&source, &flip)| bits[source] ^ flip)
            .collect()
    }

    /// Undo [`apply`](Self::apply).
    #[must_use]
    pub fn revert(&self, stream: &[bool]) -> Vec<bool> {
        debug_assert_eq!(stream.len(), self.permutation.len());
        let mut bits = vec![false; stream.len()];
        for ((&target, &flip), &bit) in self.permutation.iter().zip(&self.polarity).zip(stream) {
            bits[target] = bit ^ flip;
        }
        bits
    }
}
