//! Error types for spidev sessions

use std::fmt;
use thiserror::Error;

/// Session parameter touched by a configuration ioctl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// `SPI_IOC_*_MODE`
    Mode,
    /// `SPI_IOC_*_BITS_PER_WORD`
    BitsPerWord,
    /// `SPI_IOC_*_MAX_SPEED_HZ`
    MaxSpeedHz,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mode => write!(f, "spi mode"),
            Self::BitsPerWord => write!(f, "bits per word"),
            Self::MaxSpeedHz => write!(f, "max speed hz"),
        }
    }
}

/// Whether a configuration ioctl was the write or the read-back half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `SPI_IOC_WR_*`
    Write,
    /// `SPI_IOC_RD_*`
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "set"),
            Self::Read => write!(f, "get"),
        }
    }
}

/// Errors surfaced by sessions and session tables
#[derive(Debug, Error)]
pub enum Error {
    /// The device node could not be opened
    #[error("can't open device {path}: {source}")]
    Open {
        /// Device node path
        path: String,
        /// OS error from `open(2)`
        #[source]
        source: std::io::Error,
    },

    /// A mode, bits-per-word or speed ioctl was rejected
    #[error("can't {direction} {param} (requested {value}): {source}")]
    Configure {
        /// Parameter being configured
        param: Param,
        /// Write or read-back half
        direction: Direction,
        /// Requested value
        value: u32,
        /// OS error from `ioctl(2)`
        #[source]
        source: std::io::Error,
    },

    /// Transfer data or arguments had the wrong shape
    #[error("invalid transfer data: {0}")]
    InvalidData(String),

    /// `SPI_IOC_MESSAGE` failed
    #[error("can't send spi message: {0}")]
    Transfer(#[source] std::io::Error),

    /// `SPI_IOC_MESSAGE` returned without moving a byte
    #[error("can't send spi message: no bytes transferred")]
    NoBytesTransferred,

    /// The request is larger than the backend accepts in one message
    #[error("transfer of {len} bytes exceeds the {max} byte limit")]
    TransferTooLong {
        /// Requested length
        len: usize,
        /// Largest accepted length
        max: usize,
    },

    /// The session was closed, or the handle never referred to one
    #[error("session not open")]
    NotOpen,
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
