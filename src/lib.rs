//! Blind, password-keyed image watermarking that survives common attacks.
//!
//! A payload (bits, UTF-8 text or a small binary logo) is written into the
//! singular values of DCT blocks taken from the Haar LL band of every YUV
//! channel. Each bit is repeated in as many blocks as the image allows and is
//! read back by majority vote, so extraction needs neither the original image
//! nor anything but the two passwords and the payload length.
//!
//! # Quick Start
//!
//! ```no_run
//! use blind_watermark::{Payload, Watermarker};
//!
//! # fn main() -> blind_watermark::Result<()> {
//! let wm = Watermarker::new(1, 1)?;
//! let img = image::open("photo.png").unwrap().to_rgb8();
//! let payload = Payload::from("@guofei9987");
//! let marked = wm.embed(&img, &payload)?;
//! marked.save("marked.png").unwrap();
//!
//! let text = wm.extract_text(&marked, payload.bit_len())?;
//! assert_eq!(text, "@guofei9987");
//! # Ok(())
//! # }
//! ```
//!
//! # Crop recovery
//!
//! When an image was cropped and rescaled by an unknown amount, estimate the
//! crop against the marked original and paste the content back before
//! extracting.
//!
//! ```no_run
//! use blind_watermark::{estimate_crop_parameters, extract, recover_crop};
//!
//! # fn main() -> blind_watermark::Result<()> {
//! let marked = image::open("marked.png").unwrap().to_rgb8();
//! let attacked = image::open("attacked.png").unwrap().to_rgb8();
//! let estimate = estimate_crop_parameters(&marked, &attacked, (0.5, 2.0), 31)?;
//! println!("score {:.3}, scale {:.3}", estimate.score, estimate.scale);
//! let restored = recover_crop(&attacked, estimate.rect, estimate.canvas)?;
//! let bits = extract(&restored, 64, 1, 1)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod embed;
mod engine;
pub mod error;
pub mod estimate;
pub mod extract;
pub mod key;
pub mod layout;
pub mod payload;
pub mod quantize;
pub mod recover;
pub mod transform;

pub use engine::{embed, extract, WatermarkOptions, Watermarker};
pub use error::{Error, Result};
pub use estimate::{
    estimate_crop_parameters, CropEstimate, CropParameterEstimator, EstimatorOptions,
};
pub use extract::Decision;
pub use payload::Payload;
pub use recover::{recover_crop, restore_canvas, CropRect, NEUTRAL_FILL};
