use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CbilError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Classification of utterance {utterance_index} timed out after {timeout_ms}ms")]
    ClassificationTimeout {
        utterance_index: usize,
        timeout_ms: u128,
    },

    #[error("Classifier backend {backend} is unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("Classifier backend {backend} returned an unusable response: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),
}

impl CbilError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CbilError>;
