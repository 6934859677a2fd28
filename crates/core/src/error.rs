//! Error types for everything outside the GPU layer.

use thiserror::Error;

/// Error type for windowing, configuration and I/O failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value that parses but cannot be honored
    #[error("Invalid config value for `{key}`: {message}")]
    InvalidConfig {
        /// Dotted key of the offending value.
        key: &'static str,
        /// Human-readable reason.
        message: String,
    },
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
