//! Error types for the blind-watermark crate.

/// Errors that can occur while embedding, extracting or recovering a watermark.
///
/// Wrong passwords are deliberately not represented here: extracting with the
/// wrong key succeeds and yields uncorrelated bits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload needs more blocks than the image provides.
    #[error("payload of {bits} bits exceeds capacity of {capacity} blocks")]
    Capacity {
        /// Number of payload bits requested.
        bits: usize,
        /// Number of blocks available in the image.
        capacity: usize,
    },

    /// A length, rectangle or dimension does not fit the image it refers to.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Extracted bits could not be decoded into the requested payload kind.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// Embedding was asked to carry zero bits.
    #[error("watermark payload is empty")]
    EmptyPayload,

    /// A configuration value was rejected at construction.
    #[error("invalid option: {0}")]
    InvalidOption(String),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
