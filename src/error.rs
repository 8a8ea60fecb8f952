//! Error types for the library.
//!
//! Binaries wrap these in `anyhow` and add file context at the call site.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while loading, transforming or training.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A raw buffer does not reshape into whole rows.
    #[error("{path}: {values} values do not form whole rows of {cols} columns")]
    ShapeMismatch {
        path: PathBuf,
        values: usize,
        cols: usize,
    },

    /// Malformed text input.
    #[error("{location}: {message}")]
    Parse { location: String, message: String },

    /// Matrix/vector dimensions don't match for the operation.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    /// Invalid hyperparameter value provided.
    #[error("invalid value {value} for {param}: {constraint}")]
    InvalidHyperparameter {
        param: &'static str,
        value: String,
        constraint: &'static str,
    },

    #[error("dataset has no samples")]
    EmptyDataset,

    #[error("unsupported file extension: .{0}")]
    UnsupportedFormat(String),

    /// A compressed block could not be decoded.
    #[error("corrupt compressed block: {0}")]
    CorruptBlock(String),

    /// Sealing or opening an encrypted block failed.
    #[error("block cipher failure: {0}")]
    Crypto(String),

    /// Reading a CSV table failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Reading a Parquet file failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A config file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A quantized delta does not fit the widest block layout.
    #[error("compressed delta {delta} at value {index} needs more than 31 bits")]
    DeltaOverflow { index: usize, delta: i64 },

    /// A required environment variable is unset.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// An external command exited unsuccessfully.
    #[error("`{command}` failed: {status}")]
    Command { command: String, status: String },
}

impl Error {
    pub(crate) fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn hyperparameter(
        param: &'static str,
        value: impl ToString,
        constraint: &'static str,
    ) -> Self {
        Error::InvalidHyperparameter {
            param,
            value: value.to_string(),
            constraint,
        }
    }
}
