//! Error handling for the position sizing pipeline.

use thiserror::Error;

/// Main error type for the position sizing pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (non-positive capital, bad risk target, ...)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data-related errors (e.g. missing or malformed market data)
    #[error("Data error: {0}")]
    DataError(String),

    /// A per-instrument value required by a stage is absent
    #[error("Missing {field} for instrument {instrument}")]
    MissingInstrumentData { instrument: String, field: &'static str },

    /// Covariance or risk estimate is unusable (NaN, singular, too few rows)
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// CSV read/write errors
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Audit log database errors
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn missing(instrument: &str, field: &'static str) -> Self {
        Error::MissingInstrumentData { instrument: instrument.to_string(), field }
    }

    /// True for the data-error family (missing rows, missing fields, malformed files).
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Error::DataError(_) | Error::MissingInstrumentData { .. } | Error::CsvError(_)
        )
    }
}

/// Result type for the position sizing pipeline
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
