//! High-level watermarking entry point.

use image::{GrayImage, RgbImage};

use crate::embed::WatermarkEmbedder;
use crate::error::Result;
use crate::extract::{Decision, WatermarkExtractor};
use crate::payload::{bits_to_mark, bits_to_text, Payload};
use crate::quantize::{Quantizer, DEFAULT_PRIMARY_STEP, DEFAULT_SECONDARY_STEP};
use crate::transform::BlockTransformCodec;

/// Options controlling embedding strength and decoding.
///
/// Embedder and extractor must agree on `block_size` and both steps.
#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    /// Side length of a coefficient block; each block covers `2 * block_size` pixels per side.
    pub block_size: usize,
    /// Quantization step of the largest singular value.
    pub primary_step: f64,
    /// Quantization step of the second-largest singular value.
    pub secondary_step: f64,
    /// How redundant votes are combined at extraction.
    pub decision: Decision,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            block_size: 4,
            primary_step: DEFAULT_PRIMARY_STEP,
            secondary_step: DEFAULT_SECONDARY_STEP,
            decision: Decision::Majority,
        }
    }
}

/// A password pair bound to an embedder and extractor.
///
/// Create once with [`Watermarker::new()`] and reuse for many images.
pub struct Watermarker {
    password_img: u64,
    password_wm: u64,
    embedder: WatermarkEmbedder,
    extractor: WatermarkExtractor,
}

impl Watermarker {
    /// Create a watermarker with default options.
    ///
    /// `password_img` selects blocks and coefficient orders; `password_wm`
    /// scrambles the payload. Both must match at extraction time.
    ///
    /// # Errors
    ///
    /// Never fails with default options; returns `Result` to mirror
    /// [`with_options`](Self::with_options).
    pub fn new(password_img: u64, password_wm: u64) -> Result<Self> {
        Self::with_options(password_img, password_wm, &WatermarkOptions::default())
    }

    /// Create a watermarker with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`](crate::Error::InvalidOption) if the block size is
    /// below 2 or a quantization step is not positive.
    pub fn with_options(
        password_img: u64,
        password_wm: u64,
        opts: &WatermarkOptions,
    ) -> Result<Self> {
        let codec = BlockTransformCodec::new(opts.block_size)?;
        let quantizer = Quantizer::new(opts.primary_step, opts.secondary_step)?;
        Ok(Self {
            password_img,
            password_wm,
            embedder: WatermarkEmbedder::new(codec.clone(), quantizer),
            extractor: WatermarkExtractor::new(codec, quantizer, opts.decision),
        })
    }

    /// Maximum number of payload bits an image of this size can carry.
    #[must_use]
    pub fn capacity(&self, width: u32, height: u32) -> usize {
        self.embedder.codec().capacity(width, height)
    }

    /// Embed `payload` into a copy of `image`.
    ///
    /// Keep [`Payload::bit_len`] (and, for a mark, its dimensions) to extract later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPayload`](crate::Error::EmptyPayload) or
    /// [`Error::Capacity`](crate::Error::Capacity).
    pub fn embed(&self, image: &RgbImage, payload: &Payload) -> Result<RgbImage> {
        self.embedder
            .embed(image, &payload.to_bits(), self.password_img, self.password_wm)
    }

    /// Extract `length` raw bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`](crate::Error::Shape) when `length` exceeds the image's
    /// capacity.
    pub fn extract_bits(&self, image: &RgbImage, length: usize) -> Result<Vec<bool>> {
        self.extractor
            .extract(image, length, self.password_img, self.password_wm)
    }

    /// Extract `length` bits and decode them as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`](crate::Error::Shape) as [`extract_bits`](Self::extract_bits)
    /// does, or [`Error::Decode`](crate::Error::Decode) if the bits are not valid text.
    pub fn extract_text(&self, image: &RgbImage, length: usize) -> Result<String> {
        bits_to_text(&self.extract_bits(image, length)?)
    }

    /// Extract a `width x height` binary mark.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`](crate::Error::Shape) when the mark does not fit the image.
    pub fn extract_mark(&self, image: &RgbImage, width: u32, height: u32) -> Result<GrayImage> {
        let length = width as usize * height as usize;
        bits_to_mark(&self.extract_bits(image, length)?, width, height)
    }
}

/// Embed `bits` into `image` with default options.
///
/// # Errors
///
/// Returns [`Error::EmptyPayload`](crate::Error::EmptyPayload) or
/// [`Error::Capacity`](crate::Error::Capacity).
pub fn embed(
    image: &RgbImage,
    bits: &[bool],
    password_img: u64,
    password_wm: u64,
) -> Result<RgbImage> {
    Watermarker::new(password_img, password_wm)?.embed(image, &Payload::Bits(bits.to_vec()))
}

/// Extract `length` bits from `image` with default options.
///
/// # Errors
///
/// Returns [`Error::Shape`](crate::Error::Shape) when `length` exceeds the image's capacity.
pub fn extract(
    image: &RgbImage,
    length: usize,
    password_img: u64,
    password_wm: u64,
) -> Result<Vec<bool>> {
    Watermarker::new(password_img, password_wm)?.extract_bits(image, length)
}
