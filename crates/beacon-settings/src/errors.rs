//! Settings error types.

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON, or does not match the settings shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// The merged settings break a constraint.
    #[error("invalid setting: {0}")]
    InvalidValue(String),
}

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
