//! Undo crops by pasting the surviving content back onto a full-size canvas.
//!
//! The missing area is filled with mid-gray. Blocks that land there are flat,
//! so extraction skips them and decides each bit from the copies that
//! survived the crop.

use image::{imageops, Rgb, RgbImage};

use crate::error::{Error, Result};

/// Fill value for canvas area not covered by the recovered content.
pub const NEUTRAL_FILL: Rgb<u8> = Rgb([128, 128, 128]);

/// A crop rectangle `[x1, x2) x [y1, y2)` in original-canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge, inclusive.
    pub x1: u32,
    /// Top edge, inclusive.
    pub y1: u32,
    /// Right edge, exclusive.
    pub x2: u32,
    /// Bottom edge, exclusive.
    pub y2: u32,
}

impl CropRect {
    /// Create a rectangle from its corners.
    #[must_use]
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a rectangle from fractional corners of a `width x height` canvas.
    ///
    /// Each coordinate is `floor(side * ratio)`, so `(0.1, 0.1, 0.5, 0.5)` of a
    /// 1000x800 canvas is `(100, 80)-(500, 400)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if a ratio lies outside `[0, 1]` or the
    /// resulting rectangle is empty.
    pub fn from_ratios(
        (width, height): (u32, u32),
        (x1, y1, x2, y2): (f64, f64, f64, f64),
    ) -> Result<Self> {
        if [x1, y1, x2, y2]
            .iter()
            .any(|r| !r.is_finite() || !(0.0..=1.0).contains(r))
        {
            return Err(Error::Shape(format!(
                "crop ratios ({x1}, {y1}, {x2}, {y2}) must lie in [0, 1]"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scale = |side: u32, ratio: f64| (f64::from(side) * ratio).floor() as u32;
        let rect = Self::new(
            scale(width, x1),
            scale(height, y1),
            scale(width, x2),
            scale(height, y2),
        );
        if rect.is_empty() {
            return Err(Error::Shape(format!("crop {rect:?} is empty")));
        }
        Ok(rect)
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Whether the rectangle covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Whether the rectangle lies inside a `width x height` canvas.
    #[must_use]
    pub fn fits(&self, (width, height): (u32, u32)) -> bool {
        !self.is_empty() && self.x2 <= width && self.y2 <= height
    }

    /// Cut this rectangle out of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shape`] if the rectangle does not fit `image`.
    pub fn crop(&self, image: &RgbImage) -> Result<RgbImage> {
        if !self.fits(image.dimensions()) {
            return Err(outside(self, image.dimensions()));
        }
        Ok(imageops::crop_imm(image, self.x1, self.y1, self.width(), self.height()).to_image())
    }
}

fn outside(rect: &CropRect, (width, height): (u32, u32)) -> Error {
    Error::Shape(format!(
        "rectangle ({}, {})-({}, {}) does not fit a {width}x{height} canvas",
        rect.x1, rect.y1, rect.x2, rect.y2
    ))
}

/// Place `distorted` at `rect` on a `canvas`-sized image of [`NEUTRAL_FILL`].
///
/// `distorted` is resampled to the rectangle's size first when the two differ,
/// which undoes a resize that followed the crop.
///
/// # Errors
///
/// Returns [`Error::Shape`] if `rect` does not fit inside `canvas`.
pub fn recover_crop(distorted: &RgbImage, rect: CropRect, canvas: (u32, u32)) -> Result<RgbImage> {
    if !rect.fits(canvas) {
        return Err(outside(&rect, canvas));
    }

    let mut out = RgbImage::from_pixel(canvas.0, canvas.1, NEUTRAL_FILL);
    if distorted.dimensions() == (rect.width(), rect.height()) {
        imageops::replace(&mut out, distorted, i64::from(rect.x1), i64::from(rect.y1));
    } else {
        let resized = imageops::resize(
            distorted,
            rect.width(),
            rect.height(),
            imageops::FilterType::Triangle,
        );
        imageops::replace(&mut out, &resized, i64::from(rect.x1), i64::from(rect.y1));
    }
    Ok(out)
}

/// Pad an image that lost its right and/or bottom edge back to `canvas` size.
///
/// # Errors
///
/// Returns [`Error::Shape`] if `image` is larger than `canvas` or empty.
pub fn restore_canvas(image: &RgbImage, canvas: (u32, u32)) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    recover_crop(image, CropRect::new(0, 0, width, height), canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn from_ratios_floors_coordinates() {
        let rect = CropRect::from_ratios((1000, 800), (0.1, 0.1, 0.5, 0.5)).unwrap();
        assert_eq!(rect, CropRect::new(100, 80, 500, 400));
        let rect = CropRect::from_ratios((99, 99), (0.0, 0.0, 0.5, 1.0)).unwrap();
        assert_eq!(rect, CropRect::new(0, 0, 49, 99));
    }

    #[test]
    fn from_ratios_rejects_bad_input() {
        assert!(CropRect::from_ratios((100, 100), (0.5, 0.0, 0.4, 1.0)).is_err());
        assert!(CropRect::from_ratios((100, 100), (0.0, 0.0, 1.2, 1.0)).is_err());
        assert!(CropRect::from_ratios((100, 100), (f64::NAN, 0.0, 1.0, 1.0)).is_err());
    }

    #[test]
    fn crop_then_recover_restores_covered_pixels() {
        let image = gradient(64, 48);
        let rect = CropRect::new(10, 5, 50, 40);
        let cropped = rect.crop(&image).unwrap();
        assert_eq!(cropped.dimensions(), (40, 35));

        let recovered = recover_crop(&cropped, rect, (64, 48)).unwrap();
        assert_eq!(recovered.dimensions(), (64, 48));
        for (x, y, px) in recovered.enumerate_pixels() {
            let inside = (10..50).contains(&x) && (5..40).contains(&y);
            if inside {
                assert_eq!(px, image.get_pixel(x, y));
            } else {
                assert_eq!(*px, NEUTRAL_FILL);
            }
        }
    }

    #[test]
    fn recover_resamples_to_rectangle_size() {
        let small = RgbImage::from_pixel(20, 10, Rgb([10, 200, 30]));
        let rect = CropRect::new(4, 4, 44, 24);
        let recovered = recover_crop(&small, rect, (50, 30)).unwrap();
        assert_eq!(*recovered.get_pixel(20, 12), Rgb([10, 200, 30]));
        assert_eq!(*recovered.get_pixel(2, 2), NEUTRAL_FILL);
        assert_eq!(*recovered.get_pixel(45, 25), NEUTRAL_FILL);
    }

    #[test]
    fn rectangle_outside_canvas_is_shape_error() {
        let image = gradient(10, 10);
        let result = recover_crop(&image, CropRect::new(5, 5, 15, 15), (12, 12));
        assert!(matches!(result, Err(Error::Shape(_))));
        let result = recover_crop(&image, CropRect::new(5, 5, 5, 8), (12, 12));
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn restore_canvas_pads_right_and_bottom() {
        let image = gradient(30, 20);
        let restored = restore_canvas(&image, (40, 25)).unwrap();
        assert_eq!(restored.dimensions(), (40, 25));
        assert_eq!(restored.get_pixel(29, 19), image.get_pixel(29, 19));
        assert_eq!(*restored.get_pixel(35, 10), NEUTRAL_FILL);
        assert!(restore_canvas(&image, (20, 25)).is_err());
    }
}
