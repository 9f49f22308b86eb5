//! Shared fixtures and attack simulators for integration tests.

#![allow(dead_code)]

use blind_watermark::CropRect;
use image::{imageops, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Smooth, non-periodic scene with every sample inside `50..=200`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scene(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (f64::from(x), f64::from(y));
        let a = 35.0 * (0.043 * fx + 0.017 * fy).sin();
        let b = 25.0 * (0.029 * fy - 0.000_21 * fx * fy).cos();
        let c = 12.0 * (0.000_09 * ((fx - 110.0).powi(2) + (fy - 75.0).powi(2))).sin();
        let v = 125.0 + a + b + c;
        Rgb([v.round() as u8, (0.5 * v + 62.0).round() as u8, (250.0 - v).round() as u8])
    })
}

/// Deterministic pseudo-random bits.
pub fn random_bits(len: usize, seed: u64) -> Vec<bool> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen::<bool>()).collect()
}

/// Fraction of positions where `a` and `b` differ.
#[allow(clippy::cast_precision_loss)]
pub fn bit_error_rate(a: &[bool], b: &[bool]) -> f64 {
    assert_eq!(a.len(), b.len());
    let errors = a.iter().zip(b).filter(|(x, y)| x != y).count();
    errors as f64 / a.len() as f64
}

/// Cut `rect` out of `image`.
pub fn crop(image: &RgbImage, rect: CropRect) -> RgbImage {
    rect.crop(image).unwrap()
}

/// Resample `image` to `width x height`.
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}

/// Set a `ratio` share of pixels to black or white.
///
/// Every pixel draws the same numbers whatever the ratio, so for one seed the
/// pixels hit at a lower ratio are also hit at every higher one.
pub fn salt_pepper(image: &RgbImage, ratio: f64, seed: u64) -> RgbImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = image.clone();
    for px in out.pixels_mut() {
        let hit = rng.gen::<f64>() < ratio;
        let white = rng.gen::<bool>();
        if hit {
            let v = if white { 255 } else { 0 };
            *px = Rgb([v, v, v]);
        }
    }
    out
}

/// Paint `rect` of `image` with a solid `color`.
pub fn paint(image: &mut RgbImage, rect: CropRect, color: [u8; 3]) {
    for y in rect.y1..rect.y2 {
        for x in rect.x1..rect.x2 {
            image.put_pixel(x, y, Rgb(color));
        }
    }
}

/// Multiply every sample by `factor`, clamping to `0..=255`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn brightness(image: &RgbImage, factor: f64) -> RgbImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        for c in &mut px.0 {
            *c = (f64::from(*c) * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
