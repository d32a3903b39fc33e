//! Error type shared by the kernels and the convolution engine.

use thiserror::Error;

/// Errors from configuring or running a binarized convolution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvError {
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    Shape {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Cached binary weights do not match geometry: expected {expected}, cached {actual}")]
    WeightCacheMismatch { expected: String, actual: String },

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl ConvError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn shape(what: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        Self::Shape {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvError>;
