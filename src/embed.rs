//! Watermark embedding.

use image::RgbImage;

use crate::error::{Error, Result};
use crate::key::KeyStream;
use crate::layout::BlockLayout;
use crate::quantize::Quantizer;
use crate::transform::{BlockTransformCodec, CoefficientGrid, CHANNELS};

/// Rounds of re-embedding for carriers whose bit was lost to sample clipping.
const SETTLE_PASSES: usize = 4;

/// Writes a bit sequence redundantly into the block coefficients of an image.
#[derive(Clone)]
pub struct WatermarkEmbedder {
    codec: BlockTransformCodec,
    quantizer: Quantizer,
}

impl WatermarkEmbedder {
    /// Create an embedder from a transform and a quantizer.
    #[must_use]
    pub fn new(codec: BlockTransformCodec, quantizer: Quantizer) -> Self {
        Self { codec, quantizer }
    }

    /// The block transform this embedder writes through.
    #[must_use]
    pub fn codec(&self) -> &BlockTransformCodec {
        &self.codec
    }

    /// Embed `bits` into a copy of `image`.
    ///
    /// Each bit is XOR-scrambled with `password_wm`, then written into every
    /// block the `password_img` layout assigns to it, in all three channels.
    ///
    /// Near black or white, rounding the result to 8-bit samples can clip a
    /// block's lattice move away. The marked image is therefore read back, and
    /// every carrier that lost its bit is re-embedded one lattice cell further
    /// from the clipped side, for a bounded number of passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPayload`] for an empty `bits` and
    /// [`Error::Capacity`] when `bits` is longer than the image has blocks.
    pub fn embed(
        &self,
        image: &RgbImage,
        bits: &[bool],
        password_img: u64,
        password_wm: u64,
    ) -> Result<RgbImage> {
        if bits.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let (width, height) = image.dimensions();
        let capacity = self.codec.capacity(width, height);
        if bits.len() > capacity {
            return Err(Error::Capacity {
                bits: bits.len(),
                capacity,
            });
        }

        let stream = KeyStream::derive(password_wm, bits.len()).apply(bits);
        let layout = BlockLayout::new(password_img, capacity, self.codec.block_len(), bits.len())?;

        let source = self.codec.forward(image);
        let mut shifts: [Vec<i32>; CHANNELS] = std::array::from_fn(|_| vec![0; capacity]);
        let mut grid = self.render(&source, &layout, &stream, &shifts);
        let mut marked = self.codec.inverse(&grid);

        for _ in 0..SETTLE_PASSES {
            let observed = self.codec.forward(&marked);
            if !self.settle(&grid, &observed, &layout, &stream, &mut shifts) {
                break;
            }
            grid = self.render(&source, &layout, &stream, &shifts);
            marked = self.codec.inverse(&grid);
        }

        Ok(marked)
    }

    /// Quantize every carrier of a fresh copy of `source`.
    fn render(
        &self,
        source: &CoefficientGrid,
        layout: &BlockLayout,
        stream: &[bool],
        shifts: &[Vec<i32>; CHANNELS],
    ) -> CoefficientGrid {
        let mut grid = source.clone();
        let block_len = self.codec.block_len();
        for (channel, channel_shifts) in shifts.iter().enumerate() {
            let blocks = grid.channel_blocks_mut(channel);
            self.embed_channel(blocks, block_len, layout, stream, channel_shifts);
        }
        grid
    }

    /// Compare what was written (`intended`) with what survived in the 8-bit
    /// image (`observed`) and step the lattice cell of every carrier that now
    /// reads the wrong bit. Returns whether any carrier moved.
    fn settle(
        &self,
        intended: &CoefficientGrid,
        observed: &CoefficientGrid,
        layout: &BlockLayout,
        stream: &[bool],
        shifts: &mut [Vec<i32>; CHANNELS],
    ) -> bool {
        let mut moved = false;
        for (channel, channel_shifts) in shifts.iter_mut().enumerate() {
            for (index, shift) in channel_shifts.iter_mut().enumerate() {
                let Some(bit) = layout.carrier(index) else {
                    continue;
                };
                let order = layout.order(index);
                let block = observed.block(channel, index);
                if (self.quantizer.read_block(block, order) > 0.5) == stream[bit] {
                    continue;
                }
                let written = Quantizer::primary_value(intended.block(channel, index), order);
                let survived = Quantizer::primary_value(block, order);
                *shift += if survived < written { -1 } else { 1 };
                moved = true;
            }
        }
        moved
    }

    fn embed_channel(
        &self,
        blocks: &mut [f64],
        block_len: usize,
        layout: &BlockLayout,
        stream: &[bool],
        shifts: &[i32],
    ) {
        let embed_one = |(index, block): (usize, &mut [f64])| {
            if let Some(bit) = layout.carrier(index) {
                self.quantizer.embed_block_shifted(
                    block,
                    layout.order(index),
                    stream[bit],
                    shifts[index],
                );
            }
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            blocks
                .par_chunks_mut(block_len)
                .enumerate()
                .for_each(embed_one);
        }

        #[cfg(not(feature = "parallel"))]
        {
            blocks.chunks_mut(block_len).enumerate().for_each(embed_one);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Decision, WatermarkExtractor};
    use image::Rgb;

    fn embedder() -> WatermarkEmbedder {
        WatermarkEmbedder::new(BlockTransformCodec::new(4).unwrap(), Quantizer::default())
    }

    fn flat(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([120, 130, 140]))
    }

    #[test]
    fn rejects_empty_payload() {
        let result = embedder().embed(&flat(32, 32), &[], 1, 2);
        assert!(matches!(result, Err(Error::EmptyPayload)));
    }

    #[test]
    fn rejects_payload_over_capacity() {
        // 32x32 with 4x4 blocks: 4x4 = 16 blocks.
        let bits = vec![true; 17];
        let result = embedder().embed(&flat(32, 32), &bits, 1, 2);
        assert!(matches!(
            result,
            Err(Error::Capacity {
                bits: 17,
                capacity: 16
            })
        ));
    }

    #[test]
    fn embedding_is_deterministic_and_leaves_input_alone() {
        let image = flat(64, 48);
        let copy = image.clone();
        let bits = [true, false, true, true, false];
        let a = embedder().embed(&image, &bits, 3, 4).unwrap();
        let b = embedder().embed(&image, &bits, 3, 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(image, copy);
        assert_ne!(a, image);
        assert_eq!(a.dimensions(), image.dimensions());
    }

    #[test]
    fn embedding_keeps_changes_small() {
        let image = flat(64, 64);
        let bits: Vec<bool> = (0..16).map(|i| i % 3 == 0).collect();
        let marked = embedder().embed(&image, &bits, 9, 10).unwrap();
        let max_diff = image
            .as_raw()
            .iter()
            .zip(marked.as_raw())
            .map(|(&a, &b)| (i16::from(a) - i16::from(b)).abs())
            .max()
            .unwrap_or(0);
        assert!(max_diff <= 60, "max pixel change {max_diff}");
    }

    #[test]
    fn saturated_carriers_keep_their_bits() {
        let bits: Vec<bool> = (0..64).map(|i| (i * 5) % 7 < 3).collect();
        let extractor = WatermarkExtractor::new(
            BlockTransformCodec::new(4).unwrap(),
            Quantizer::default(),
            Decision::Majority,
        );
        for color in [[255, 255, 255], [0, 0, 0], [255, 0, 0]] {
            let image = RgbImage::from_pixel(256, 256, Rgb(color));
            let marked = embedder().embed(&image, &bits, 5, 6).unwrap();
            let out = extractor.extract(&marked, bits.len(), 5, 6).unwrap();
            assert_eq!(out, bits, "color {color:?}");
        }
    }

    #[test]
    fn unclipped_image_needs_no_settling() {
        let image = flat(64, 64);
        let bits = [true, false, false, true];
        let embedder = embedder();
        let layout = BlockLayout::new(3, 64, 16, bits.len()).unwrap();
        let stream = KeyStream::derive(4, bits.len()).apply(&bits);
        let source = embedder.codec.forward(&image);
        let mut shifts: [Vec<i32>; CHANNELS] = std::array::from_fn(|_| vec![0; 64]);
        let grid = embedder.render(&source, &layout, &stream, &shifts);
        let observed = embedder.codec.forward(&embedder.codec.inverse(&grid));
        assert!(!embedder.settle(&grid, &observed, &layout, &stream, &mut shifts));
        assert!(shifts.iter().flatten().all(|&shift| shift == 0));
    }
}
