//! spiscript-core - Device sessions for Linux spidev
//!
//! This crate holds everything that sits between a caller (a script, the
//! CLI) and the kernel's `spidev` ioctl surface:
//!
//! - [`Session`] owns one open device and the parameters the kernel
//!   actually accepted for it
//! - [`SpidevBackend`] is the ioctl surface itself, implemented by
//!   `spiscript-linux-spi` for real hardware and `spiscript-dummy` for tests
//! - [`SessionTable`] hands out integer handles for bindings that cannot
//!   hold Rust values
//!
//! # Example
//!
//! ```ignore
//! use spiscript_core::{OpenParams, Session, SpiMode};
//!
//! let params = OpenParams::new("/dev/spidev0.0")
//!     .with_mode(SpiMode::Mode0)
//!     .with_speed(1_000_000);
//! let mut session = Session::open(&connector, &params)?;
//! println!("negotiated {} Hz", session.params().speed_hz);
//!
//! let rx = session.transfer(&[0x9F, 0x00, 0x00, 0x00])?;
//! session.close()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod error;
pub mod mode;
pub mod session;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BoxedBackend, BoxedConnector, Connector, SpidevBackend, TransferSegment};
pub use error::{Direction, Error, Param, Result};
pub use mode::{ModeFlags, SpiMode};
pub use session::{OpenParams, Session, SessionParams, TransferParams};
pub use table::{SessionInfo, SessionTable};
