//! Keyed assignment of payload bits to blocks.

use crate::error::{Error, Result};
use crate::key::KeyStream;

/// Which block carries which bit, and in what coefficient order.
///
/// Built from `password_img`: the stream first draws a placement permutation
/// over all blocks, then one coefficient shuffle per block in raster order.
/// Placement slot `j` carries stream bit `j % payload_len` for every
/// `j < redundancy * payload_len`; blocks beyond that are left alone.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    carriers: Vec<Option<usize>>,
    orders: Vec<Vec<usize>>,
    redundancy: usize,
}

impl BlockLayout {
    /// Lay out `payload_len` bits over `total_blocks` blocks of `block_len` coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPayload`] if `payload_len` is zero and
    /// [`Error::Capacity`] if it exceeds `total_blocks`.
    pub fn new(
        password_img: u64,
        total_blocks: usize,
        block_len: usize,
        payload_len: usize,
    ) -> Result<Self> {
        if payload_len == 0 {
            return Err(Error::EmptyPayload);
        }
        if payload_len > total_blocks {
            return Err(Error::Capacity {
                bits: payload_len,
                capacity: total_blocks,
            });
        }

        let mut stream = KeyStream::new(password_img);
        let placement = stream.permutation(total_blocks);
        let orders = (0..total_blocks)
            .map(|_| stream.permutation(block_len))
            .collect();

        let redundancy = total_blocks / payload_len;
        let mut carriers = vec![None; total_blocks];
        for (slot, &block) in placement.iter().take(redundancy * payload_len).enumerate() {
            carriers[block] = Some(slot % payload_len);
        }

        Ok(Self {
            carriers,
            orders,
            redundancy,
        })
    }

    /// Stream bit carried by `block`, if any.
    #[must_use]
    pub fn carrier(&self, block: usize) -> Option<usize> {
        self.carriers[block]
    }

    /// Coefficient visiting order for `block`.
    #[must_use]
    pub fn order(&self, block: usize) -> &[usize] {
        &self.orders[block]
    }

    /// Number of blocks carrying each bit.
    #[must_use]
    pub fn redundancy(&self) -> usize {
        self.redundancy
    }

    /// Number of blocks the layout covers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    /// Whether the layout covers no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }
}
