//! Error type shared by the viewer library.

use thiserror::Error;

/// Errors raised by decoding, slicing, annotation and the service clients.
#[derive(Error, Debug)]
pub enum ViewerError {
    /// The bytes are not a decodable volume.
    #[error("format error: {0}")]
    Format(String),

    /// A slice index or coordinate is outside the volume.
    #[error("range error: {0}")]
    Range(String),

    /// Transport failure or non-2xx backend response. The message is shown
    /// to the user as-is.
    #[error("{0}")]
    Network(String),

    /// A request was refused locally before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// No audio output, or the clip could not be played.
    #[error("audio error: {0}")]
    Audio(String),

    /// Local file access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ViewerError {
    fn from(e: reqwest::Error) -> Self {
        ViewerError::Network(e.to_string())
    }
}

impl From<image::ImageError> for ViewerError {
    fn from(e: image::ImageError) -> Self {
        ViewerError::Format(format!("image: {e}"))
    }
}

/// Result alias for library operations.
pub type ViewerResult<T> = Result<T, ViewerError>;
