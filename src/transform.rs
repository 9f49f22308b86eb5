//! Block frequency transform used to carry the watermark.
//!
//! The chain, applied to each of the Y, U and V channels:
//! 1. **Color**: RGB to BT.601 YUV on a 0-255 float scale.
//! 2. **Haar DWT**: one orthonormal level; only the LL band is modified.
//! 3. **Block DCT**: LL is tiled into `block_size x block_size` blocks, each
//!    transformed with an orthonormal 2-D DCT-II.
//!
//! The block grid covers the largest region whose sides are multiples of
//! `2 * block_size`. Pixels outside that region are carried through untouched.

use std::sync::Arc;

use image::{Rgb, RgbImage};
use rustdct::{DctPlanner, TransformType2And3};

use crate::error::{Error, Result};

/// Number of color channels that carry the watermark (Y, U, V).
pub const CHANNELS: usize = 3;

const KR: f64 = 0.299;
const KG: f64 = 0.587;
const KB: f64 = 0.114;
const U_SCALE: f64 = 0.492;
const V_SCALE: f64 = 0.877;
const CHROMA_OFFSET: f64 = 128.0;

/// Forward/inverse block transform with a block size fixed at construction.
#[derive(Clone)]
pub struct BlockTransformCodec {
    block_size: usize,
    dct: Arc<dyn TransformType2And3<f64>>,
}

impl BlockTransformCodec {
    /// Create a codec for square blocks of `block_size` LL coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] when `block_size < 2`: the quantizer
    /// needs at least two singular values per block.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size < 2 {
            return Err(Error::InvalidOption(format!(
                "block size must be at least 2, got {block_size}"
            )));
        }
        let mut planner = DctPlanner::new();
        Ok(Self {
            block_size,
            dct: planner.plan_dct2(block_size),
        })
    }

    /// Side length of a block, in LL coefficients.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of coefficients in a block.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block_size * self.block_size
    }

    /// Side length, in pixels, of the image cell one block covers.
    fn cell(&self) -> usize {
        2 * self.block_size
    }

    /// Number of blocks per channel for an image of the given size.
    #[must_use]
    pub fn capacity(&self, width: u32, height: u32) -> usize {
        (width as usize / self.cell()) * (height as usize / self.cell())
    }

    /// Transform `image` into per-channel block coefficients.
    #[must_use]
    pub fn forward(&self, image: &RgbImage) -> CoefficientGrid {
        let (width, height) = image.dimensions();
        let blocks_wide = width as usize / self.cell();
        let blocks_tall = height as usize / self.cell();
        let band_width = blocks_wide * self.block_size;
        let band_height = blocks_tall * self.block_size;

        let planes = split_yuv(image);
        let channels = planes.map(|plane| {
            let (ll, details) = haar_forward(&plane, width as usize, band_width, band_height);
            let mut blocks = self.tile(&ll, band_width, blocks_wide, blocks_tall);
            for block in blocks.chunks_mut(self.block_len()) {
                self.forward_block(block);
            }
            ChannelCoefficients {
                blocks,
                details,
                plane,
            }
        });

        CoefficientGrid {
            width,
            height,
            block_size: self.block_size,
            blocks_wide,
            blocks_tall,
            channels,
        }
    }

    /// Rebuild an RGB image from (possibly modified) coefficients.
    ///
    /// Samples are rounded and clamped to `0..=255`.
    #[must_use]
    pub fn inverse(&self, grid: &CoefficientGrid) -> RgbImage {
        let width = grid.width as usize;
        let band_width = grid.blocks_wide * self.block_size;
        let band_height = grid.blocks_tall * self.block_size;

        let planes: [Vec<f64>; CHANNELS] = std::array::from_fn(|c| {
            let channel = &grid.channels[c];
            let mut blocks = channel.blocks.clone();
            for block in blocks.chunks_mut(self.block_len()) {
                self.inverse_block(block);
            }
            let ll = self.untile(&blocks, band_width, band_height, grid.blocks_wide);
            let mut plane = channel.plane.clone();
            haar_inverse(&mut plane, width, &ll, &channel.details, band_width, band_height);
            plane
        });

        merge_yuv(&planes, grid.width, grid.height)
    }

    /// Orthonormal 2-D DCT-II of one row-major block, in place.
    pub fn forward_block(&self, block: &mut [f64]) {
        let n = self.block_size;
        debug_assert_eq!(block.len(), n * n);
        let (dc_weight, ac_weight) = dct_weights(n);
        let mut line = vec![0.0f64; n];

        for pass in [Pass::Rows, Pass::Columns] {
            for i in 0..n {
                pass.gather(block, n, i, &mut line);
                self.dct.process_dct2(&mut line);
                line[0] *= dc_weight;
                for v in &mut line[1..] {
                    *v *= ac_weight;
                }
                pass.scatter(block, n, i, &line);
            }
        }
    }

    /// Inverse of [`forward_block`](Self::forward_block), in place.
    pub fn inverse_block(&self, block: &mut [f64]) {
        let n = self.block_size;
        debug_assert_eq!(block.len(), n * n);
        // DCT-III scaled so that it inverts the orthonormal DCT-II.
        #[allow(clippy::cast_precision_loss)]
        let size = n as f64;
        let dc_weight = 2.0 / size.sqrt();
        let ac_weight = (2.0 / size).sqrt();
        let mut line = vec![0.0f64; n];

        for pass in [Pass::Columns, Pass::Rows] {
            for i in 0..n {
                pass.gather(block, n, i, &mut line);
                line[0] *= dc_weight;
                for v in &mut line[1..] {
                    *v *= ac_weight;
                }
                self.dct.process_dct3(&mut line);
                pass.scatter(block, n, i, &line);
            }
        }
    }

    /// Cut the LL band into block-major, row-major-within-block order.
    fn tile(
        &self,
        ll: &[f64],
        band_width: usize,
        blocks_wide: usize,
        blocks_tall: usize,
    ) -> Vec<f64> {
        let n = self.block_size;
        let mut blocks = Vec::with_capacity(blocks_wide * blocks_tall * n * n);
        for bi in 0..blocks_tall {
            for bj in 0..blocks_wide {
                for u in 0..n {
                    let start = (bi * n + u) * band_width + bj * n;
                    blocks.extend_from_slice(&ll[start..start + n]);
                }
            }
        }
        blocks
    }

    /// Inverse of [`tile`](Self::tile).
    fn untile(
        &self,
        blocks: &[f64],
        band_width: usize,
        band_height: usize,
        blocks_wide: usize,
    ) -> Vec<f64> {
        let n = self.block_size;
        let mut ll = vec![0.0f64; band_width * band_height];
        for (index, block) in blocks.chunks(n * n).enumerate() {
            let bi = index / blocks_wide;
            let bj = index % blocks_wide;
            for (u, row) in block.chunks(n).enumerate() {
                let start = (bi * n + u) * band_width + bj * n;
                ll[start..start + n].copy_from_slice(row);
            }
        }
        ll
    }
}

/// Scale factors turning rustdct's unnormalized DCT-II into the orthonormal one.
fn dct_weights(n: usize) -> (f64, f64) {
    #[allow(clippy::cast_precision_loss)]
    let size = n as f64;
    ((1.0 / size).sqrt(), (2.0 / size).sqrt())
}

#[derive(Clone, Copy)]
enum Pass {
    Rows,
    Columns,
}

impl Pass {
    fn gather(self, block: &[f64], n: usize, i: usize, line: &mut [f64]) {
        match self {
            Pass::Rows => line.copy_from_slice(&block[i * n..(i + 1) * n]),
            Pass::Columns => {
                for (k, v) in line.iter_mut().enumerate() {
                    *v = block[k * n + i];
                }
            }
        }
    }

    fn scatter(self, block: &mut [f64], n: usize, i: usize, line: &[f64]) {
        match self {
            Pass::Rows => block[i * n..(i + 1) * n].copy_from_slice(line),
            Pass::Columns => {
                for (k, v) in line.iter().enumerate() {
                    block[k * n + i] = *v;
                }
            }
        }
    }
}

#[derive(Clone)]
struct ChannelCoefficients {
    blocks: Vec<f64>,
    /// LH, HL and HH per LL position.
    details: Vec<[f64; 3]>,
    /// Full-size channel plane; supplies the pixels outside the block grid.
    plane: Vec<f64>,
}

/// Block coefficients of all channels of one image.
///
/// Blocks are addressed by raster index over the block grid and coefficients
/// by row-major position inside the block.
#[derive(Clone)]
pub struct CoefficientGrid {
    width: u32,
    height: u32,
    block_size: usize,
    blocks_wide: usize,
    blocks_tall: usize,
    channels: [ChannelCoefficients; CHANNELS],
}

impl CoefficientGrid {
    /// Dimensions of the source image.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of blocks per channel.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks_wide * self.blocks_tall
    }

    /// Block grid size as `(blocks_wide, blocks_tall)`.
    #[must_use]
    pub fn grid_size(&self) -> (usize, usize) {
        (self.blocks_wide, self.blocks_tall)
    }

    fn block_len(&self) -> usize {
        self.block_size * self.block_size
    }

    /// Coefficients of block `index` in `channel`.
    #[must_use]
    pub fn block(&self, channel: usize, index: usize) -> &[f64] {
        let len = self.block_len();
        &self.channels[channel].blocks[index * len..(index + 1) * len]
    }

    /// Mutable coefficients of block `index` in `channel`.
    pub fn block_mut(&mut self, channel: usize, index: usize) -> &mut [f64] {
        let len = self.block_len();
        &mut self.channels[channel].blocks[index * len..(index + 1) * len]
    }

    /// Read one coefficient.
    #[must_use]
    pub fn coefficient(&self, channel: usize, index: usize, position: usize) -> f64 {
        self.block(channel, index)[position]
    }

    /// Overwrite one coefficient.
    pub fn set_coefficient(&mut self, channel: usize, index: usize, position: usize, value: f64) {
        self.block_mut(channel, index)[position] = value;
    }

    /// All blocks of `channel`, back to back.
    #[must_use]
    pub fn channel_blocks(&self, channel: usize) -> &[f64] {
        &self.channels[channel].blocks
    }

    /// All blocks of `channel`, back to back, mutably.
    pub fn channel_blocks_mut(&mut self, channel: usize) -> &mut [f64] {
        &mut self.channels[channel].blocks
    }
}

fn split_yuv(image: &RgbImage) -> [Vec<f64>; CHANNELS] {
    let len = image.as_raw().len() / CHANNELS;
    let mut planes: [Vec<f64>; CHANNELS] = std::array::from_fn(|_| Vec::with_capacity(len));
    for px in image.pixels() {
        let r = f64::from(px[0]);
        let g = f64::from(px[1]);
        let b = f64::from(px[2]);
        let y = KR * r + KG * g + KB * b;
        planes[0].push(y);
        planes[1].push(U_SCALE * (b - y) + CHROMA_OFFSET);
        planes[2].push(V_SCALE * (r - y) + CHROMA_OFFSET);
    }
    planes
}

fn merge_yuv(planes: &[Vec<f64>; CHANNELS], width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::new(width, height);
    for (i, px) in image.pixels_mut().enumerate() {
        let y = planes[0][i];
        let r = y + (planes[2][i] - CHROMA_OFFSET) / V_SCALE;
        let b = y + (planes[1][i] - CHROMA_OFFSET) / U_SCALE;
        let g = (y - KR * r - KB * b) / KG;
        *px = Rgb([to_sample(r), to_sample(g), to_sample(b)]);
    }
    image
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_sample(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// One-level Haar analysis of the top-left `2*band_width x 2*band_height` region.
fn haar_forward(
    plane: &[f64],
    width: usize,
    band_width: usize,
    band_height: usize,
) -> (Vec<f64>, Vec<[f64; 3]>) {
    let mut ll = Vec::with_capacity(band_width * band_height);
    let mut details = Vec::with_capacity(band_width * band_height);
    for r in 0..band_height {
        let top = 2 * r * width;
        let bottom = top + width;
        for c in 0..band_width {
            let a = plane[top + 2 * c];
            let b = plane[top + 2 * c + 1];
            let d0 = plane[bottom + 2 * c];
            let d1 = plane[bottom + 2 * c + 1];
            ll.push((a + b + d0 + d1) / 2.0);
            details.push([
                (a + b - d0 - d1) / 2.0,
                (a - b + d0 - d1) / 2.0,
                (a - b - d0 + d1) / 2.0,
            ]);
        }
    }
    (ll, details)
}

/// Haar synthesis written back into `plane`.
fn haar_inverse(
    plane: &mut [f64],
    width: usize,
    ll: &[f64],
    details: &[[f64; 3]],
    band_width: usize,
    band_height: usize,
) {
    for r in 0..band_height {
        let top = 2 * r * width;
        let bottom = top + width;
        for c in 0..band_width {
            let i = r * band_width + c;
            let low = ll[i];
            let [lh, hl, hh] = details[i];
            plane[top + 2 * c] = (low + lh + hl + hh) / 2.0;
            plane[top + 2 * c + 1] = (low + lh - hl - hh) / 2.0;
            plane[bottom + 2 * c] = (low - lh + hl - hh) / 2.0;
            plane[bottom + 2 * c + 1] = (low - lh - hl + hh) / 2.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = (x * 7 + y * 13) % 97;
            Rgb([(60 + v) as u8, (90 + (v * 3) % 80) as u8, (140 - v / 2) as u8])
        })
    }

    #[test]
    fn rejects_degenerate_block_size() {
        assert!(BlockTransformCodec::new(0).is_err());
        assert!(BlockTransformCodec::new(1).is_err());
        assert!(BlockTransformCodec::new(2).is_ok());
    }

    #[test]
    fn block_roundtrip_is_exact_within_float_error() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let original: Vec<f64> = (0..16).map(|i| f64::from(i) * 10.0 + 3.0).collect();
        let mut block = original.clone();
        codec.forward_block(&mut block);
        codec.inverse_block(&mut block);
        for (a, b) in original.iter().zip(&block) {
            assert!((a - b).abs() < 1e-9, "Expected {a}, got {b}");
        }
    }

    #[test]
    fn block_roundtrip_for_8x8_blocks() {
        let codec = BlockTransformCodec::new(8).unwrap();
        let original: Vec<f64> = (0..64).map(|i| f64::from((i * 37) % 255)).collect();
        let mut block = original.clone();
        codec.forward_block(&mut block);
        codec.inverse_block(&mut block);
        for (a, b) in original.iter().zip(&block) {
            assert!((a - b).abs() < 1e-9, "Expected {a}, got {b}");
        }
    }

    #[test]
    fn constant_block_has_only_dc() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let mut block = vec![150.0f64; 16];
        codec.forward_block(&mut block);
        assert!((block[0] - 600.0).abs() < 1e-9, "DC should be 600, got {}", block[0]);
        for (i, v) in block.iter().enumerate().skip(1) {
            assert!(v.abs() < 1e-9, "AC coefficient {i} should be 0, got {v}");
        }
    }

    #[test]
    fn forward_transform_preserves_energy() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let original: Vec<f64> = (0..16).map(|i| f64::from((i * 29) % 17) - 8.0).collect();
        let mut block = original.clone();
        codec.forward_block(&mut block);
        let before: f64 = original.iter().map(|v| v * v).sum();
        let after: f64 = block.iter().map(|v| v * v).sum();
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn capacity_counts_whole_cells_only() {
        let codec = BlockTransformCodec::new(4).unwrap();
        assert_eq!(codec.capacity(256, 256), 32 * 32);
        assert_eq!(codec.capacity(263, 257), 32 * 32);
        assert_eq!(codec.capacity(7, 100), 0);
    }

    #[test]
    fn image_roundtrip_without_modification() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let image = textured(67, 45);
        let grid = codec.forward(&image);
        assert_eq!(grid.grid_size(), (8, 5));
        let back = codec.inverse(&grid);
        for (a, b) in image.pixels().zip(back.pixels()) {
            for ch in 0..3 {
                let diff = (i32::from(a[ch]) - i32::from(b[ch])).abs();
                assert!(diff == 0, "Pixel changed by {diff}");
            }
        }
    }

    #[test]
    fn pixels_outside_grid_are_untouched_by_modification() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let image = textured(44, 20);
        let mut grid = codec.forward(&image);
        for index in 0..grid.block_count() {
            grid.set_coefficient(0, index, 0, grid.coefficient(0, index, 0) + 40.0);
        }
        let back = codec.inverse(&grid);
        for y in 0..20 {
            for x in 40..44 {
                assert_eq!(image.get_pixel(x, y), back.get_pixel(x, y));
            }
        }
        for y in 16..20 {
            for x in 0..44 {
                assert_eq!(image.get_pixel(x, y), back.get_pixel(x, y));
            }
        }
        assert_ne!(image.get_pixel(3, 3), back.get_pixel(3, 3));
    }

    #[test]
    fn block_accessors_address_the_same_storage() {
        let codec = BlockTransformCodec::new(4).unwrap();
        let mut grid = codec.forward(&textured(32, 32));
        grid.set_coefficient(2, 3, 5, 12.5);
        assert!((grid.block(2, 3)[5] - 12.5).abs() < f64::EPSILON);
        assert!((grid.channel_blocks(2)[3 * 16 + 5] - 12.5).abs() < f64::EPSILON);
        grid.block_mut(1, 0)[0] = -1.0;
        assert!((grid.channel_blocks_mut(1)[0] + 1.0).abs() < f64::EPSILON);
    }
}
