use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("unsupported bit-width {0}, expected 1..=8 or 16")]
    UnsupportedBitWidth(u8),

    #[error("unknown quantization mode `{0}`")]
    UnknownMode(String),

    #[error("layer `{0}` is already quantized")]
    AlreadyQuantized(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("malformed model file: {0}")]
    Format(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("input has {actual} values, model expects {expected}")]
    InputShape { expected: usize, actual: usize },

    #[error("sample data: {0}")]
    SampleData(String),

    #[error("plot: {0}")]
    Plot(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
