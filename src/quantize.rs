//! Singular-value quantization of a single coefficient block.
//!
//! A block's coefficients are reordered by a keyed shuffle, viewed as a square
//! matrix and decomposed with an SVD. The two largest singular values are
//! moved onto a lattice of step `d`: the lower quarter of each cell encodes
//! `false`, the upper quarter `true`. Reading compares the residue `s mod d`
//! against `d / 2`.

use nalgebra::DMatrix;

use crate::error::{Error, Result};

/// Default lattice step for the largest singular value.
pub const DEFAULT_PRIMARY_STEP: f64 = 36.0;
/// Default lattice step for the second-largest singular value.
pub const DEFAULT_SECONDARY_STEP: f64 = 20.0;

/// Quantizes the two dominant singular values of a block to carry one bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    primary_step: f64,
    secondary_step: f64,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self {
            primary_step: DEFAULT_PRIMARY_STEP,
            secondary_step: DEFAULT_SECONDARY_STEP,
        }
    }
}

impl Quantizer {
    /// Create a quantizer with explicit lattice steps.
    ///
    /// Larger steps survive heavier distortion at the cost of visibility.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if either step is not a positive finite number.
    pub fn new(primary_step: f64, secondary_step: f64) -> Result<Self> {
        for (name, step) in [("primary", primary_step), ("secondary", secondary_step)] {
            if !step.is_finite() || step <= 0.0 {
                return Err(Error::InvalidOption(format!(
                    "{name} quantization step must be positive, got {step}"
                )));
            }
        }
        Ok(Self {
            primary_step,
            secondary_step,
        })
    }

    fn steps(&self) -> [f64; 2] {
        [self.primary_step, self.secondary_step]
    }

    /// Write `bit` into `block`, whose coefficients are visited in `order`.
    ///
    /// `order` must be a permutation of `0..block.len()` and `block.len()`
    /// must be a perfect square.
    pub fn embed_block(&self, block: &mut [f64], order: &[usize], bit: bool) {
        self.embed_block_shifted(block, order, bit, 0);
    }

    /// Like [`embed_block`](Self::embed_block), but lands the largest singular
    /// value `shift` whole lattice cells away from its nearest cell.
    ///
    /// The residue, and so the bit read back, is the same for every shift.
    /// A shift that would push the largest value below the second is ignored.
    pub fn embed_block_shifted(&self, block: &mut [f64], order: &[usize], bit: bool, shift: i32) {
        let n = side(block.len());
        let matrix = shuffled_matrix(block, order, n);
        let svd = matrix.svd(true, true);
        let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
            return;
        };

        let mut singular = svd.singular_values;
        let offset = if bit { 0.75 } else { 0.25 };
        let [first, second] = dominant(singular.as_slice());

        let secondary = lattice(singular[second], self.secondary_step, offset);
        let nearest = lattice(singular[first], self.primary_step, offset);
        let shifted = nearest + f64::from(shift) * self.primary_step;
        singular[first] = if shifted > secondary { shifted } else { nearest };
        singular[second] = secondary;

        let rebuilt = u * DMatrix::from_diagonal(&singular) * v_t;
        for (slot, &position) in order.iter().enumerate() {
            block[position] = rebuilt[(slot / n, slot % n)];
        }
    }

    /// Largest singular value of `block` visited in `order`.
    #[must_use]
    pub fn primary_value(block: &[f64], order: &[usize]) -> f64 {
        let n = side(block.len());
        shuffled_matrix(block, order, n)
            .singular_values()
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }

    /// Soft reading of the bit carried by `block`, in `[0, 1]`.
    ///
    /// The largest singular value weighs three times as much as the second.
    #[must_use]
    pub fn read_block(&self, block: &[f64], order: &[usize]) -> f64 {
        let n = side(block.len());
        let singular = shuffled_matrix(block, order, n).singular_values();

        let mut votes = [0.0f64; 2];
        for ((vote, index), step) in votes
            .iter_mut()
            .zip(dominant(singular.as_slice()))
            .zip(self.steps())
        {
            if singular[index].rem_euclid(step) > step / 2.0 {
                *vote = 1.0;
            }
        }
        (3.0 * votes[0] + votes[1]) / 4.0
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn side(len: usize) -> usize {
    (len as f64).sqrt().round() as usize
}

/// Centre of the quarter-cell that `offset` selects in the cell holding `value`.
fn lattice(value: f64, step: f64, offset: f64) -> f64 {
    ((value / step).floor() + offset) * step
}

fn shuffled_matrix(block: &[f64], order: &[usize], n: usize) -> DMatrix<f64> {
    debug_assert_eq!(order.len(), block.len());
    DMatrix::from_row_iterator(n, n, order.iter().map(|&position| block[position]))
}

/// Indices of the largest and second-largest singular values.
fn dominant(singular: &[f64]) -> [usize; 2] {
    let mut indices: Vec<usize> = (0..singular.len()).collect();
    indices.sort_by(|&a, &b| singular[b].total_cmp(&singular[a]));
    [indices[0], indices[1]]
}
