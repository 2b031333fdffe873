//! spiscript-linux-spi - Linux spidev backend
//!
//! This crate talks to SPI controllers through the kernel's `spidev`
//! character devices at `/dev/spidevX.Y`, where X is the bus number and Y
//! is the chip select.
//!
//! # Example
//!
//! ```no_run
//! use spiscript_core::{OpenParams, Session};
//! use spiscript_linux_spi::LinuxConnector;
//!
//! let params = OpenParams::new("/dev/spidev0.0").with_speed(1_000_000);
//! let mut session = Session::open(&LinuxConnector::default(), &params)?;
//!
//! let rx = session.transfer(&[0xFF, 0x00, 0xFA])?;
//! println!("received {:02X?}", rx);
//! session.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - Read/write access to `/dev/spidevX.Y` device
//! - May require adding user to `spi` group or using udev rules

pub mod device;
pub mod error;

// Re-exports
pub use device::{parse_options, LinuxConnector, LinuxSpi};
pub use error::{LinuxSpiError, Result};

/// Build a boxed connector from `key=value` backend options
///
/// This is a convenience function for the CLI backend dispatch.
pub fn open_linux_spi(
    options: &[(&str, &str)],
) -> std::result::Result<spiscript_core::BoxedConnector, Box<dyn std::error::Error>> {
    let connector = parse_options(options)?;
    Ok(Box::new(connector))
}
