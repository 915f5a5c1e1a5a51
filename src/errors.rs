use std::path::PathBuf;
use thiserror::Error;

/// Boxed error source carried across the blocking inference pool.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the segmentation server and the diagnosis CLI.
///
/// Each variant captures context specific to its error domain (request input,
/// image processing, model runtime, checkpoint artifacts). The HTTP layer maps
/// variants to status codes through [`LeafSamError::is_client_error`].
#[derive(Error, Debug)]
pub enum LeafSamError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Network error: {operation} failed")]
    Network {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No file uploaded")]
    MissingUpload,

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Uploaded file is not a readable image: {source}")]
    UnreadableImage {
        #[source]
        source: image::ImageError,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed: {source}")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Accelerator resources exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Artifact error: {path:?} {reason}")]
    Artifact { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, LeafSamError>;

impl LeafSamError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn model(operation: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Errors caused by what the caller sent rather than by the backend.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingUpload | Self::Validation { .. } | Self::UnreadableImage { .. }
        )
    }
}

/// Messages the runtimes emit when device memory runs out.
const EXHAUSTION_MARKERS: [&str; 2] = ["out of memory", "failed to allocate"];

fn is_exhaustion_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    EXHAUSTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Convert anyhow errors raised by the raster helpers in `imageops`.
impl From<anyhow::Error> for LeafSamError {
    fn from(err: anyhow::Error) -> Self {
        Self::ImageProcessing {
            operation: "raster operation".to_string(),
            source: err.into(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should construct
/// `LeafSamError::FileSystem` directly.
impl From<std::io::Error> for LeafSamError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for LeafSamError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ONNX Runtime errors, splitting out allocation failures so the
/// server can report them as resource exhaustion.
impl From<ort::Error> for LeafSamError {
    fn from(err: ort::Error) -> Self {
        let message = err.to_string();
        if is_exhaustion_message(&message) {
            Self::ResourceExhausted { message }
        } else {
            Self::Model {
                operation: "ort operation".to_string(),
                source: Box::new(err),
            }
        }
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// model errors.
impl From<ndarray::ShapeError> for LeafSamError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<reqwest::Error> for LeafSamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Artifact {
            path: err
                .url()
                .map(|url| PathBuf::from(url.as_str()))
                .unwrap_or_else(|| PathBuf::from("unknown")),
            reason: format!("download failed: {err}"),
        }
    }
}
