//! Error types for the Linux spidev backend

use thiserror::Error;

/// Errors from backend option parsing
#[derive(Debug, Error)]
pub enum LinuxSpiError {
    /// Option value could not be parsed
    #[error("Invalid {key} value: {value}")]
    InvalidOption { key: String, value: String },
}

/// Result type for Linux SPI operations
pub type Result<T> = std::result::Result<T, LinuxSpiError>;
