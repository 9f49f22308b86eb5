//! Watermark payloads and their bit encodings.
//!
//! Every payload kind is flattened to a plain bit sequence before embedding;
//! the codec itself only ever sees bits.

use image::{GrayImage, Luma};

use crate::error::{Error, Result};

/// Pixels at or above this level are `true` bits of a mark.
pub const MARK_THRESHOLD: u8 = 128;

/// The data to hide in an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A raw bit sequence.
    Bits(Vec<bool>),
    /// UTF-8 text, 8 bits per byte, most significant bit first.
    Text(String),
    /// A binary logo, row-major, one bit per pixel.
    Mark(GrayImage),
}

impl Payload {
    /// Flatten the payload into the bits the embedder writes.
    #[must_use]
    pub fn to_bits(&self) -> Vec<bool> {
        match self {
            Payload::Bits(bits) => bits.clone(),
            Payload::Text(text) => text_to_bits(text),
            Payload::Mark(mark) => mark_to_bits(mark),
        }
    }

    /// Number of bits the extractor must be told to read back.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        match self {
            Payload::Bits(bits) => bits.len(),
            Payload::Text(text) => text.len() * 8,
            Payload::Mark(mark) => mark.width() as usize * mark.height() as usize,
        }
    }
}

impl From<Vec<bool>> for Payload {
    fn from(bits: Vec<bool>) -> Self {
        Payload::Bits(bits)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<GrayImage> for Payload {
    fn from(mark: GrayImage) -> Self {
        Payload::Mark(mark)
    }
}

/// Encode `text` as UTF-8 bytes, most significant bit first.
#[must_use]
pub fn text_to_bits(text: &str) -> Vec<bool> {
    let mut bits = Vec::with_capacity(text.len() * 8);
    for byte in text.bytes() {
        for j in (0..8).rev() {
            bits.push((byte >> j) & 1 == 1);
        }
    }
    bits
}

/// Decode bits produced by [`text_to_bits`].
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bit count is not a multiple of 8 or the
/// bytes are not valid UTF-8.
pub fn bits_to_text(bits: &[bool]) -> Result<String> {
    if bits.len() % 8 != 0 {
        return Err(Error::Decode(format!(
            "{} bits do not form whole bytes",
            bits.len()
        )));
    }
    let bytes: Vec<u8> = bits
        .chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit)))
        .collect();
    String::from_utf8(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Threshold a gray logo into row-major bits.
#[must_use]
pub fn mark_to_bits(mark: &GrayImage) -> Vec<bool> {
    mark.pixels().map(|p| p[0] >= MARK_THRESHOLD).collect()
}

/// Rebuild a `width x height` black-and-white logo from bits.
///
/// # Errors
///
/// Returns [`Error::Shape`] if `bits.len()` is not `width * height`.
pub fn bits_to_mark(bits: &[bool], width: u32, height: u32) -> Result<GrayImage> {
    let expected = width as usize * height as usize;
    if bits.len() != expected {
        return Err(Error::Shape(format!(
            "{} bits cannot fill a {width}x{height} mark",
            bits.len()
        )));
    }
    let mut mark = GrayImage::new(width, height);
    for (pixel, &bit) in mark.pixels_mut().zip(bits) {
        *pixel = Luma([if bit { 255 } else { 0 }]);
    }
    Ok(mark)
}
