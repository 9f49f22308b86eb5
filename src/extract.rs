//! Watermark extraction.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::key::KeyStream;
use crate::layout::BlockLayout;
use crate::quantize::Quantizer;
use crate::transform::{BlockTransformCodec, CHANNELS};

const KMEANS_MAX_ITERATIONS: usize = 300;
const KMEANS_TOLERANCE: f64 = 1e-6;
/// AC energy below which a block is flat and casts no vote.
const FLAT_ENERGY: f64 = 1e-6;

/// How the per-bit votes are turned into a bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// A bit is `true` when more than half of its vote weight says so.
    /// An exact tie yields `false`.
    #[default]
    Majority,
    /// Per-bit averages are split into two clusters by one-dimensional
    /// two-means; the upper cluster reads as `true`. Tolerates a uniform bias
    /// such as a global brightness change.
    KMeans,
}

/// Reads a bit sequence back out of a possibly distorted image.
#[derive(Clone)]
pub struct WatermarkExtractor {
    codec: BlockTransformCodec,
    quantizer: Quantizer,
    decision: Decision,
}

impl WatermarkExtractor {
    /// Create an extractor. `codec` and `quantizer` must match the embedder's.
    #[must_use]
    pub fn new(codec: BlockTransformCodec, quantizer: Quantizer, decision: Decision) -> Self {
        Self {
            codec,
            quantizer,
            decision,
        }
    }

    /// The vote combination rule in use.
    #[must_use]
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Extract `length` bits from `image`.
    ///
    /// Always returns `length` bits for an image of sufficient size; heavy
    /// distortion or wrong passwords show up as bit errors, never as an error.
    ///
    /// Perfectly flat blocks, such as the fill pasted around a recovered
    /// crop, abstain. A bit left without any vote carries no information.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] when `length` exceeds the image's capacity.
    pub fn extract(
        &self,
        image: &RgbImage,
        length: usize,
        password_img: u64,
        password_wm: u64,
    ) -> Result<Vec<bool>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let (width, height) = image.dimensions();
        let capacity = self.codec.capacity(width, height);
        if length > capacity {
            return Err(Error::Shape(format!(
                "cannot extract {length} bits from a {width}x{height} image holding {capacity}"
            )));
        }

        let layout = BlockLayout::new(password_img, capacity, self.codec.block_len(), length)?;
        let averages = self.vote(image, &layout, length);
        let stream = match self.decision {
            Decision::Majority => majority(&averages),
            Decision::KMeans => two_means(&averages),
        };

        Ok(KeyStream::derive(password_wm, length).revert(&stream))
    }

    /// Average soft score per stream bit over all carrier blocks and channels.
    fn vote(&self, image: &RgbImage, layout: &BlockLayout, length: usize) -> Vec<f64> {
        let grid = self.codec.forward(image);
        let block_len = self.codec.block_len();

        let mut sums = vec![0.0f64; length];
        let mut counts = vec![0usize; length];
        for channel in 0..CHANNELS {
            let blocks = grid.channel_blocks(channel);
            for (bit, score) in self.read_channel(blocks, block_len, layout) {
                sums[bit] += score;
                counts[bit] += 1;
            }
        }

        sums.iter()
            .zip(&counts)
            .map(|(&sum, &count)| mean(sum, count).unwrap_or(0.0))
            .collect()
    }

    fn read_channel(
        &self,
        blocks: &[f64],
        block_len: usize,
        layout: &BlockLayout,
    ) -> Vec<(usize, f64)> {
        let read_one = |(index, block): (usize, &[f64])| {
            let bit = layout.carrier(index)?;
            if is_flat(block) {
                return None;
            }
            Some((bit, self.quantizer.read_block(block, layout.order(index))))
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            blocks
                .par_chunks(block_len)
                .enumerate()
                .filter_map(read_one)
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            blocks
                .chunks(block_len)
                .enumerate()
                .filter_map(read_one)
                .collect()
        }
    }
}

/// Whether every coefficient but the DC term of a transformed block is zero.
fn is_flat(block: &[f64]) -> bool {
    block.iter().skip(1).map(|v| v * v).sum::<f64>() < FLAT_ENERGY
}

#[allow(clippy::cast_precision_loss)]
fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

/// Each average is a vote share; strictly more than half reads `true`.
fn majority(averages: &[f64]) -> Vec<bool> {
    averages.iter().map(|&avg| avg > 0.5).collect()
}

/// Split `values` into a low and a high cluster; `true` marks the high one.
///
/// Centres start at the minimum and maximum. A cluster that empties keeps its
/// previous centre.
fn two_means(values: &[f64]) -> Vec<bool> {
    let Some(mut low) = values.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let Some(mut high) = values.iter().copied().reduce(f64::max) else {
        return Vec::new();
    };
    let mut threshold = (low + high) / 2.0;

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let (mut low_sum, mut low_n, mut high_sum, mut high_n) = (0.0, 0usize, 0.0, 0usize);
        for &v in values {
            if v > threshold {
                high_sum += v;
                high_n += 1;
            } else {
                low_sum += v;
                low_n += 1;
            }
        }
        low = mean(low_sum, low_n).unwrap_or(low);
        high = mean(high_sum, high_n).unwrap_or(high);
        let next = (low + high) / 2.0;
        let converged = (next - threshold).abs() < KMEANS_TOLERANCE;
        threshold = next;
        if converged {
            break;
        }
    }

    values.iter().map(|&v| v > threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::WatermarkEmbedder;
    use image::Rgb;

    fn codec() -> BlockTransformCodec {
        BlockTransformCodec::new(4).unwrap()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 5 + y * 11 + (x * y) % 13) % 89;
            Rgb([(70 + v) as u8, (100 + v / 2) as u8, (150 - v / 2) as u8])
        })
    }

    #[test]
    fn zero_length_extracts_nothing() {
        let extractor = WatermarkExtractor::new(codec(), Quantizer::default(), Decision::Majority);
        let bits = extractor.extract(&textured(8, 8), 0, 1, 2).unwrap();
        assert!(bits.is_empty());
    }

    #[test]
    fn length_over_capacity_is_shape_error() {
        let extractor = WatermarkExtractor::new(codec(), Quantizer::default(), Decision::Majority);
        let result = extractor.extract(&textured(32, 32), 17, 1, 2);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn roundtrip_with_both_decisions() {
        let image = textured(96, 80);
        let bits: Vec<bool> = (0..30).map(|i| (i * 7) % 3 == 1).collect();
        let embedder = WatermarkEmbedder::new(codec(), Quantizer::default());
        let marked = embedder.embed(&image, &bits, 17, 23).unwrap();

        for decision in [Decision::Majority, Decision::KMeans] {
            let extractor = WatermarkExtractor::new(codec(), Quantizer::default(), decision);
            let out = extractor.extract(&marked, bits.len(), 17, 23).unwrap();
            assert_eq!(out, bits, "decision {decision:?}");
        }
    }

    #[test]
    fn two_means_separates_biased_scores() {
        let values = [0.55, 0.9, 0.58, 0.95, 0.6, 0.88];
        assert_eq!(
            two_means(&values),
            vec![false, true, false, true, false, true]
        );
    }

    #[test]
    fn two_means_on_constant_input_is_all_false() {
        assert_eq!(two_means(&[0.5, 0.5, 0.5]), vec![false; 3]);
        assert!(two_means(&[]).is_empty());
    }

    #[test]
    fn majority_tie_reads_false() {
        assert_eq!(
            majority(&[0.5, 0.500_001, 0.499_999, 1.0, 0.0]),
            vec![false, true, false, true, false]
        );
    }

    #[test]
    fn flat_blocks_abstain() {
        let mut block = vec![0.0f64; 16];
        block[0] = 1024.0;
        assert!(is_flat(&block));
        block[5] = 0.1;
        assert!(!is_flat(&block));
    }

    #[test]
    fn gray_fill_does_not_outvote_surviving_blocks() {
        let image = textured(256, 256);
        let bits: Vec<bool> = (0..16).map(|i| i % 4 == 1 || i % 5 == 0).collect();
        let embedder = WatermarkEmbedder::new(codec(), Quantizer::default());
        let mut marked = embedder.embed(&image, &bits, 7, 8).unwrap();

        // Keep a cell-aligned 96x96 corner, about 14% of the area.
        for (x, y, px) in marked.enumerate_pixels_mut() {
            if x >= 96 || y >= 96 {
                *px = Rgb([128, 128, 128]);
            }
        }
        let extractor = WatermarkExtractor::new(codec(), Quantizer::default(), Decision::Majority);
        assert_eq!(extractor.extract(&marked, bits.len(), 7, 8).unwrap(), bits);
    }
}
