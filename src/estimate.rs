//! Crop and scale estimation by coarse-to-fine template matching.
//!
//! A candidate image believed to be a rescaled crop of a reference is matched
//! back onto the reference in two passes:
//! 1. **Coarse**: the reference is shrunk to at most `coarse_size` pixels per
//!    side; every scale hypothesis is tried at every offset.
//! 2. **Fine**: the reference is shrunk to at most `fine_size` pixels per side;
//!    a narrow band of scales around the coarse winner is tried in a small
//!    window around the coarse offset.
//!
//! Similarity is zero-mean normalized cross-correlation of luminance, with
//! window statistics taken from summed-area tables.

use std::cmp::Ordering;

use image::{imageops, ImageBuffer, Luma, RgbImage};

use crate::error::{Error, Result};
use crate::recover::CropRect;

/// Templates smaller than this (per side) are too small to score.
const MIN_TEMPLATE: u32 = 4;
/// Extra fine-level pixels searched around the mapped coarse offset.
const FINE_MARGIN: usize = 2;
/// Denominators below this yield a score of zero.
const MIN_ENERGY: f64 = 1e-9;

type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Tuning for [`CropParameterEstimator`].
#[derive(Debug, Clone)]
pub struct EstimatorOptions {
    /// Longest side of the reference during the exhaustive coarse pass.
    pub coarse_size: u32,
    /// Longest side of the reference during the fine pass.
    pub fine_size: u32,
    /// Number of scales tried in the fine pass.
    pub refine_steps: usize,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            coarse_size: 96,
            fine_size: 512,
            refine_steps: 11,
        }
    }
}

/// Best-found crop hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct CropEstimate {
    /// Crop rectangle in reference pixels.
    pub rect: CropRect,
    /// Size of the original canvas, `(width, height)`.
    pub canvas: (u32, u32),
    /// Normalized cross-correlation of the best match, in `[-1, 1]`.
    ///
    /// Values above roughly `0.8` indicate a confident match.
    pub score: f64,
    /// Candidate pixels per reference pixel.
    pub scale: f64,
}

/// Infers the crop rectangle and scale that turned a reference into a candidate.
#[derive(Debug, Clone, Default)]
pub struct CropParameterEstimator {
    options: EstimatorOptions,
}

impl CropParameterEstimator {
    /// Create an estimator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if `coarse_size` is smaller than the
    /// minimum template size, `fine_size < coarse_size`, or `refine_steps` is zero.
    pub fn new(options: EstimatorOptions) -> Result<Self> {
        if options.coarse_size < MIN_TEMPLATE {
            return Err(Error::InvalidOption(format!(
                "coarse size must be at least {MIN_TEMPLATE}, got {}",
                options.coarse_size
            )));
        }
        if options.fine_size < options.coarse_size {
            return Err(Error::InvalidOption(format!(
                "fine size {} is smaller than coarse size {}",
                options.fine_size, options.coarse_size
            )));
        }
        if options.refine_steps == 0 {
            return Err(Error::InvalidOption("refine steps must be non-zero".into()));
        }
        Ok(Self { options })
    }

    /// Estimate where `candidate` was cut from `reference` and how it was scaled.
    ///
    /// `scale_range` bounds the candidate-per-reference pixel ratio and is
    /// sampled at `search_steps` evenly spaced points, ends included. A poor
    /// match is not an error; check [`CropEstimate::score`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for an empty or non-positive
    /// `scale_range` or zero `search_steps`, and [`Error::Shape`] when no
    /// scale in the range fits the candidate inside the reference.
    pub fn estimate(
        &self,
        reference: &RgbImage,
        candidate: &RgbImage,
        scale_range: (f64, f64),
        search_steps: usize,
    ) -> Result<CropEstimate> {
        let (min_scale, max_scale) = scale_range;
        if !(min_scale.is_finite() && max_scale.is_finite()) || min_scale <= 0.0 {
            return Err(Error::InvalidOption(format!(
                "scale range ({min_scale}, {max_scale}) must be positive"
            )));
        }
        if min_scale > max_scale {
            return Err(Error::InvalidOption(format!(
                "scale range ({min_scale}, {max_scale}) is reversed"
            )));
        }
        if search_steps == 0 {
            return Err(Error::InvalidOption("search steps must be non-zero".into()));
        }

        let canvas = reference.dimensions();
        let candidate_plane = luminance(candidate);
        let candidate_size = candidate.dimensions();
        let reference_plane = luminance(reference);

        let coarse_factor = shrink_factor(canvas, self.options.coarse_size);
        let coarse = Level::new(&reference_plane, coarse_factor);
        let coarse_scales = linspace(min_scale, max_scale, search_steps);
        let Some(winner) = search(&coarse, &candidate_plane, &coarse_scales, Window::Full) else {
            return Err(Error::Shape(format!(
                "a {}x{} candidate does not fit a {}x{} reference at any scale in \
                 ({min_scale}, {max_scale})",
                candidate_size.0, candidate_size.1, canvas.0, canvas.1
            )));
        };

        let fine_factor = shrink_factor(canvas, self.options.fine_size);
        let fine = Level::new(&reference_plane, fine_factor);
        let ratio = fine_factor / coarse_factor;
        let step = if search_steps > 1 {
            #[allow(clippy::cast_precision_loss)]
            let gaps = (search_steps - 1) as f64;
            (max_scale - min_scale) / gaps
        } else {
            0.0
        };
        let fine_scales = linspace(
            (winner.scale - step).max(min_scale),
            (winner.scale + step).min(max_scale),
            self.options.refine_steps,
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let radius = ratio.ceil() as usize + FINE_MARGIN;
        let window = Window::Around {
            x: scale_offset(winner.x, ratio),
            y: scale_offset(winner.y, ratio),
            radius,
        };
        let best = search(&fine, &candidate_plane, &fine_scales, window).unwrap_or(Hypothesis {
            x: scale_offset(winner.x, ratio),
            y: scale_offset(winner.y, ratio),
            ..winner
        });

        Ok(CropEstimate {
            rect: crop_rect(&best, fine_factor, candidate_size, canvas),
            canvas,
            score: best.score,
            scale: best.scale,
        })
    }
}

/// Estimate the crop of `reference` that `candidate` was made from, with default options.
///
/// See [`CropParameterEstimator::estimate`].
///
/// # Errors
///
/// Same as [`CropParameterEstimator::estimate`].
pub fn estimate_crop_parameters(
    reference: &RgbImage,
    candidate: &RgbImage,
    scale_range: (f64, f64),
    search_steps: usize,
) -> Result<CropEstimate> {
    CropParameterEstimator::default().estimate(reference, candidate, scale_range, search_steps)
}

/// Luminance in `[0, 1]`: `0.299*R + 0.587*G + 0.114*B`.
fn luminance(image: &RgbImage) -> Plane {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let lum = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        Luma([lum / 255.0])
    })
}

/// Factor that brings the longest side of `size` down to at most `limit`.
fn shrink_factor((width, height): (u32, u32), limit: u32) -> f64 {
    let longest = width.max(height).max(1);
    (f64::from(limit) / f64::from(longest)).min(1.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(length: u32, factor: f64) -> u32 {
    (f64::from(length) * factor).round().max(0.0) as u32
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scale_offset(offset: usize, factor: f64) -> usize {
    (offset as f64 * factor).round() as usize
}

/// `count` evenly spaced values over `[start, end]`; a single value is the midpoint.
fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![(start + end) / 2.0],
        _ => {
            #[allow(clippy::cast_precision_loss)]
            let gaps = (count - 1) as f64;
            (0..count)
                .map(|i| {
                    #[allow(clippy::cast_precision_loss)]
                    let t = i as f64 / gaps;
                    start + (end - start) * t
                })
                .collect()
        }
    }
}

/// Map a fine-level hypothesis back to a rectangle in reference pixels.
fn crop_rect(
    best: &Hypothesis,
    factor: f64,
    (candidate_w, candidate_h): (u32, u32),
    (canvas_w, canvas_h): (u32, u32),
) -> CropRect {
    let x1 = scale_offset(best.x, 1.0 / factor);
    let y1 = scale_offset(best.y, 1.0 / factor);
    let x1 = u32::try_from(x1).unwrap_or(u32::MAX).min(canvas_w);
    let y1 = u32::try_from(y1).unwrap_or(u32::MAX).min(canvas_h);
    let width = scaled(candidate_w, 1.0 / best.scale);
    let height = scaled(candidate_h, 1.0 / best.scale);
    CropRect::new(
        x1,
        y1,
        x1.saturating_add(width).min(canvas_w),
        y1.saturating_add(height).min(canvas_h),
    )
}

/// A reference plane at one resolution, with summed-area tables.
struct Level {
    plane: Plane,
    factor: f64,
    /// `(width + 1) x (height + 1)` prefix sums of values.
    sum: Vec<f64>,
    /// `(width + 1) x (height + 1)` prefix sums of squared values.
    sum_sq: Vec<f64>,
}

impl Level {
    fn new(reference: &Plane, factor: f64) -> Self {
        let plane = if factor < 1.0 {
            imageops::resize(
                reference,
                scaled(reference.width(), factor).max(1),
                scaled(reference.height(), factor).max(1),
                imageops::FilterType::Triangle,
            )
        } else {
            reference.clone()
        };

        let width = plane.width() as usize;
        let height = plane.height() as usize;
        let stride = width + 1;
        let mut sum = vec![0.0f64; stride * (height + 1)];
        let mut sum_sq = vec![0.0f64; stride * (height + 1)];
        for (y, row) in plane.as_raw().chunks(width.max(1)).enumerate() {
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for (x, &v) in row.iter().enumerate() {
                let v = f64::from(v);
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
            }
        }

        Self {
            plane,
            factor,
            sum,
            sum_sq,
        }
    }

    fn width(&self) -> usize {
        self.plane.width() as usize
    }

    fn height(&self) -> usize {
        self.plane.height() as usize
    }

    /// Sum and sum of squares over the `w x h` window at `(x, y)`.
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let stride = self.width() + 1;
        let area = |table: &[f64]| {
            table[(y + h) * stride + x + w] - table[y * stride + x + w]
                - table[(y + h) * stride + x]
                + table[y * stride + x]
        };
        (area(&self.sum), area(&self.sum_sq))
    }
}

/// Which offsets to try.
#[derive(Debug, Clone, Copy)]
enum Window {
    Full,
    Around { x: usize, y: usize, radius: usize },
}

impl Window {
    /// Inclusive offset range along one axis, given the largest valid offset.
    fn range(self, center: usize, max: usize, radius: usize) -> (usize, usize) {
        match self {
            Window::Full => (0, max),
            Window::Around { .. } => {
                let center = center.min(max);
                (center.saturating_sub(radius), (center + radius).min(max))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hypothesis {
    index: usize,
    scale: f64,
    x: usize,
    y: usize,
    score: f64,
}

impl Hypothesis {
    /// Higher score wins; equal scores keep the earlier scale.
    fn better(self, other: Self) -> Self {
        match other.score.total_cmp(&self.score) {
            Ordering::Greater => other,
            Ordering::Equal if other.index < self.index => other,
            _ => self,
        }
    }
}

/// Best hypothesis over `scales`, each scored independently.
fn search(level: &Level, candidate: &Plane, scales: &[f64], window: Window) -> Option<Hypothesis> {
    let score =
        |(index, &scale): (usize, &f64)| match_scale(level, candidate, index, scale, window);

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        scales
            .par_iter()
            .enumerate()
            .filter_map(score)
            .reduce_with(Hypothesis::better)
    }

    #[cfg(not(feature = "parallel"))]
    {
        scales
            .iter()
            .enumerate()
            .filter_map(score)
            .reduce(Hypothesis::better)
    }
}

/// Slide the candidate, resampled for `scale`, over `level` within `window`.
fn match_scale(
    level: &Level,
    candidate: &Plane,
    index: usize,
    scale: f64,
    window: Window,
) -> Option<Hypothesis> {
    let factor = level.factor / scale;
    let tw = scaled(candidate.width(), factor);
    let th = scaled(candidate.height(), factor);
    if tw < MIN_TEMPLATE || th < MIN_TEMPLATE {
        return None;
    }
    let (w, h) = (tw as usize, th as usize);
    if w > level.width() || h > level.height() {
        return None;
    }

    let template = imageops::resize(candidate, tw, th, imageops::FilterType::Triangle);
    let (centered, norm) = zero_mean(template.as_raw());

    let (cx, cy, radius) = match window {
        Window::Full => (0, 0, 0),
        Window::Around { x, y, radius } => (x, y, radius),
    };
    let (x_lo, x_hi) = window.range(cx, level.width() - w, radius);
    let (y_lo, y_hi) = window.range(cy, level.height() - h, radius);

    #[allow(clippy::cast_precision_loss)]
    let n = (w * h) as f64;
    let data = level.plane.as_raw();
    let stride = level.width();

    let mut best: Option<Hypothesis> = None;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let mut numerator = 0.0f64;
            for (t_row, row) in centered.chunks(w).enumerate() {
                let start = (y + t_row) * stride + x;
                for (&t, &v) in row.iter().zip(&data[start..start + w]) {
                    numerator += f64::from(t) * f64::from(v);
                }
            }
            let (s, s2) = level.window(x, y, w, h);
            let energy = (s2 - s * s / n).max(0.0).sqrt() * norm;
            let score = if energy < MIN_ENERGY {
                0.0
            } else {
                numerator / energy
            };
            if best.is_none_or(|b| score > b.score) {
                best = Some(Hypothesis {
                    index,
                    scale,
                    x,
                    y,
                    score,
                });
            }
        }
    }
    best
}

/// Subtract the mean; returns the centered values and their L2 norm.
fn zero_mean(values: &[f32]) -> (Vec<f32>, f64) {
    if values.is_empty() {
        return (Vec::new(), 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    #[allow(clippy::cast_possible_truncation)]
    let centered: Vec<f32> = values
        .iter()
        .map(|&v| (f64::from(v) - mean) as f32)
        .collect();
    let norm = centered
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    (centered, norm)
}
