//! Error taxonomy for the watermarking core.
//!
//! The extractor's "no usable side-info" branches are *not* errors (see
//! [`crate::extract::ExtractOutcome`]) — only the kinds below represent an
//! actual failure to perform the requested operation.

use thiserror::Error;

/// Unified error type returned by fallible core operations.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// A caller-supplied parameter is out of range or otherwise malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A DWT/SVD transform step failed after inputs were already validated.
    #[error("transform error: {0}")]
    Transform(String),

    /// An artifact store or catalog operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// Image decode/encode failure from the `image` crate.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// SideInfo JSON could not be parsed or serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fetching a side-info record over HTTP(S) failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A filesystem operation failed.
    #[error("filesystem error: {0}")]
    Fs(#[from] std::io::Error),

    /// Base64 payload could not be decoded.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
