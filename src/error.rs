//! Error types for manpa

use thiserror::Error;

/// Result type alias for manpa operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in manpa
#[derive(Debug, Error)]
pub enum Error {
    /// Settings or CLI configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Narrative script could not be used
    #[error("Script error: {0}")]
    Script(String),

    /// Microphone missing, denied, or stream could not start
    #[error("Microphone unavailable: {0}")]
    SensorUnavailable(String),

    /// Audio output or decoding failure
    #[error("Audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
