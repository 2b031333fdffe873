//! Device sessions
//!
//! A [`Session`] is an open spidev node plus the parameters the kernel
//! accepted for it. Sessions move through three states:
//!
//! ```text
//! Unopened --open--> Open --close--> Closed
//! ```
//!
//! Transfers are only valid while open; there is no reopen.

use crate::backend::{Connector, SpidevBackend, TransferSegment};
use crate::error::{Direction, Error, Param, Result};
use crate::mode::SpiMode;

use std::fmt;
use std::io;

/// Device opened when the caller names none
pub const DEFAULT_DEVICE: &str = "/dev/spidev0.0";

/// Default word size
pub const DEFAULT_BITS_PER_WORD: u8 = 8;

/// Default clock speed in Hz (500 kHz)
pub const DEFAULT_SPEED_HZ: u32 = 500_000;

/// Default inter-transfer delay in microseconds
pub const DEFAULT_DELAY_USECS: u16 = 0;

/// Parameters requested when opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenParams {
    /// Device path (e.g., "/dev/spidev0.0")
    pub device: String,
    /// Clock mode
    pub mode: SpiMode,
    /// Word size
    pub bits_per_word: u8,
    /// Requested maximum clock speed in Hz
    pub speed_hz: u32,
    /// Delay applied after every transfer, in microseconds
    pub delay_usecs: u16,
}

impl Default for OpenParams {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            mode: SpiMode::Mode0,
            bits_per_word: DEFAULT_BITS_PER_WORD,
            speed_hz: DEFAULT_SPEED_HZ,
            delay_usecs: DEFAULT_DELAY_USECS,
        }
    }
}

impl OpenParams {
    /// Default parameters for the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the clock mode
    pub fn with_mode(mut self, mode: SpiMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the word size
    pub fn with_bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = bits;
        self
    }

    /// Set the clock speed in Hz
    pub fn with_speed(mut self, speed_hz: u32) -> Self {
        self.speed_hz = speed_hz;
        self
    }

    /// Set the per-transfer delay in microseconds
    pub fn with_delay(mut self, delay_usecs: u16) -> Self {
        self.delay_usecs = delay_usecs;
        self
    }

    /// Set the mode from a script integer (0..=3, anything else is mode 0)
    pub fn with_wide_mode(self, mode: i64) -> Self {
        self.with_mode(SpiMode::from_index(mode))
    }

    /// Set the word size from a script integer, keeping the low 8 bits
    pub fn with_wide_bits_per_word(self, bits: i64) -> Self {
        self.with_bits_per_word(truncated("bits", bits, bits as u8))
    }

    /// Set the speed from a script integer, keeping the low 32 bits
    pub fn with_wide_speed(self, speed_hz: i64) -> Self {
        self.with_speed(truncated("speed", speed_hz, speed_hz as u32))
    }

    /// Set the delay from a script integer, keeping the low 16 bits
    pub fn with_wide_delay(self, delay_usecs: i64) -> Self {
        self.with_delay(truncated("delay", delay_usecs, delay_usecs as u16))
    }
}

/// Narrowing conversion that keeps the kernel ABI's silent truncation but
/// says so in the log.
pub(crate) fn truncated<T>(name: &str, requested: i64, value: T) -> T
where
    T: Into<i64> + Copy + fmt::Display,
{
    if value.into() != requested {
        log::warn!("{} value {} truncated to {}", name, requested, value);
    }
    value
}

/// Parameters in effect for an open session
///
/// These are the values read back from the kernel, which may differ from
/// what was requested (speed in particular is often rounded down).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Raw mode byte from `SPI_IOC_RD_MODE`
    pub mode: u8,
    /// Word size from `SPI_IOC_RD_BITS_PER_WORD`
    pub bits_per_word: u8,
    /// Clock speed from `SPI_IOC_RD_MAX_SPEED_HZ`
    pub speed_hz: u32,
    /// Per-transfer delay (not negotiated)
    pub delay_usecs: u16,
}

impl SessionParams {
    /// Clock mode encoded in the raw mode byte
    pub fn spi_mode(&self) -> SpiMode {
        SpiMode::from_bits(self.mode)
    }
}

/// Per-transfer overrides of the session parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferParams {
    /// Clock speed for this transfer
    pub speed_hz: Option<u32>,
    /// Word size for this transfer
    pub bits_per_word: Option<u8>,
    /// Delay after this transfer
    pub delay_usecs: Option<u16>,
}

/// An open spidev device and its negotiated parameters
pub struct Session<B: SpidevBackend> {
    /// `None` once closed
    backend: Option<B>,
    device: String,
    params: SessionParams,
}

impl Session<crate::backend::BoxedBackend> {
    /// Open `params.device` through `connector` and configure it
    pub fn open<C: Connector + ?Sized>(connector: &C, params: &OpenParams) -> Result<Self> {
        log::debug!("{}: Opening device {}", connector.name(), params.device);

        let backend = connector
            .connect(&params.device)
            .map_err(|source| Error::Open {
                path: params.device.clone(),
                source,
            })?;

        Self::open_with(backend, params)
    }
}

impl<B: SpidevBackend> Session<B> {
    /// Configure an already opened backend
    ///
    /// Mode, bits-per-word and speed are each written and then read back,
    /// in that order. The read-back values become the session parameters.
    pub fn open_with(mut backend: B, params: &OpenParams) -> Result<Self> {
        let mode = negotiate(
            &mut backend,
            Param::Mode,
            params.mode.bits(),
            B::write_mode,
            B::read_mode,
        )?;
        let bits_per_word = negotiate(
            &mut backend,
            Param::BitsPerWord,
            params.bits_per_word,
            B::write_bits_per_word,
            B::read_bits_per_word,
        )?;
        let speed_hz = negotiate(
            &mut backend,
            Param::MaxSpeedHz,
            params.speed_hz,
            B::write_max_speed_hz,
            B::read_max_speed_hz,
        )?;

        let negotiated = SessionParams {
            mode,
            bits_per_word,
            speed_hz,
            delay_usecs: params.delay_usecs,
        };

        log::info!(
            "Opened {} ({}, {} bits, {} kHz, delay {} us)",
            params.device,
            negotiated.spi_mode(),
            bits_per_word,
            speed_hz / 1000,
            negotiated.delay_usecs
        );

        Ok(Self {
            backend: Some(backend),
            device: params.device.clone(),
            params: negotiated,
        })
    }

    /// Device path this session was opened on
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Negotiated parameters
    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// Whether the session can still transfer
    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// The underlying backend, while open
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Full-duplex transfer with the session parameters
    ///
    /// Returns a new buffer of `tx.len()` received bytes. `tx` is never
    /// written, so the same request can be sent repeatedly.
    pub fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        self.transfer_with(tx, &TransferParams::default())
    }

    /// Full-duplex transfer with per-transfer overrides
    pub fn transfer_with(&mut self, tx: &[u8], overrides: &TransferParams) -> Result<Vec<u8>> {
        let backend = self.backend.as_mut().ok_or(Error::NotOpen)?;

        if tx.is_empty() {
            return Ok(Vec::new());
        }

        // The segment length field is 32 bits wide
        let max = backend
            .max_transfer_len()
            .unwrap_or(u32::MAX as usize)
            .min(u32::MAX as usize);
        if tx.len() > max {
            return Err(Error::TransferTooLong { len: tx.len(), max });
        }

        let mut rx = vec![0u8; tx.len()];
        log::trace!("{}: tx {:02x?}", self.device, tx);

        let moved = {
            let mut segments = [TransferSegment {
                tx,
                rx: &mut rx,
                speed_hz: overrides.speed_hz.unwrap_or(self.params.speed_hz),
                delay_usecs: overrides.delay_usecs.unwrap_or(self.params.delay_usecs),
                bits_per_word: overrides.bits_per_word.unwrap_or(self.params.bits_per_word),
                cs_change: false,
            }];
            backend.message(&mut segments).map_err(Error::Transfer)?
        };

        if moved < 1 {
            return Err(Error::NoBytesTransferred);
        }

        log::trace!("{}: rx {:02x?}", self.device, rx);
        Ok(rx)
    }

    /// Release the device
    ///
    /// Closing twice reports [`Error::NotOpen`] rather than touching the
    /// descriptor again.
    pub fn close(&mut self) -> Result<()> {
        let backend = self.backend.take().ok_or(Error::NotOpen)?;
        drop(backend);
        log::info!("Closed {}", self.device);
        Ok(())
    }
}

impl<B: SpidevBackend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("open", &self.is_open())
            .field("params", &self.params)
            .finish()
    }
}

/// Write a parameter, then read back what the kernel made of it
fn negotiate<B, T>(
    backend: &mut B,
    param: Param,
    requested: T,
    write: fn(&mut B, T) -> io::Result<()>,
    read: fn(&mut B) -> io::Result<T>,
) -> Result<T>
where
    B: SpidevBackend,
    T: Copy + PartialEq + fmt::Display + Into<u32>,
{
    let configure_err = |direction: Direction| {
        move |source: io::Error| Error::Configure {
            param,
            direction,
            value: requested.into(),
            source,
        }
    };

    write(backend, requested).map_err(configure_err(Direction::Write))?;
    let actual = read(backend).map_err(configure_err(Direction::Read))?;

    if actual != requested {
        log::warn!(
            "Kernel adjusted {} from {} to {}",
            param,
            requested,
            actual
        );
    }

    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeSpi};

    #[test]
    fn test_open_negotiates_in_order() {
        let session = Session::open_with(FakeSpi::new(), &OpenParams::default()).unwrap();
        let calls = session.backend().unwrap().calls.clone();
        assert_eq!(
            calls,
            vec![
                Call::WriteMode(0),
                Call::ReadMode,
                Call::WriteBits(8),
                Call::ReadBits,
                Call::WriteSpeed(500_000),
                Call::ReadSpeed,
            ]
        );
    }

    #[test]
    fn test_open_reports_read_back_values() {
        let fake = FakeSpi::new().with_speed_limit(8_000_000);
        let params = OpenParams::default()
            .with_mode(SpiMode::Mode3)
            .with_speed(10_000_000)
            .with_delay(25);
        let session = Session::open_with(fake, &params).unwrap();

        assert_eq!(session.params().mode, 0x03);
        assert_eq!(session.params().spi_mode(), SpiMode::Mode3);
        assert_eq!(session.params().speed_hz, 8_000_000);
        assert_eq!(session.params().delay_usecs, 25);
    }

    #[test]
    fn test_configure_failure_names_parameter() {
        let fake = FakeSpi::new().failing_on(Call::WriteBits(16));
        let params = OpenParams::default().with_bits_per_word(16);
        let err = Session::open_with(fake, &params).unwrap_err();

        match err {
            Error::Configure {
                param,
                direction,
                value,
                ..
            } => {
                assert_eq!(param, Param::BitsPerWord);
                assert_eq!(direction, Direction::Write);
                assert_eq!(value, 16);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_transfer_uses_session_parameters() {
        let params = OpenParams::default().with_speed(1_000_000).with_delay(10);
        let mut session = Session::open_with(FakeSpi::new(), &params).unwrap();

        let rx = session.transfer(&[0xAA, 0x55]).unwrap();
        assert_eq!(rx, vec![0xAA, 0x55]);

        let seen = session.backend().unwrap().segments.clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len, 2);
        assert_eq!(seen[0].speed_hz, 1_000_000);
        assert_eq!(seen[0].delay_usecs, 10);
        assert_eq!(seen[0].bits_per_word, 8);
        assert!(!seen[0].cs_change);
    }

    #[test]
    fn test_transfer_overrides() {
        let mut session = Session::open_with(FakeSpi::new(), &OpenParams::default()).unwrap();
        let overrides = TransferParams {
            speed_hz: Some(250_000),
            bits_per_word: None,
            delay_usecs: Some(100),
        };
        session.transfer_with(&[1], &overrides).unwrap();

        let seen = &session.backend().unwrap().segments[0];
        assert_eq!(seen.speed_hz, 250_000);
        assert_eq!(seen.bits_per_word, 8);
        assert_eq!(seen.delay_usecs, 100);
    }

    #[test]
    fn test_empty_transfer_skips_ioctl() {
        let mut session = Session::open_with(FakeSpi::new(), &OpenParams::default()).unwrap();
        assert!(session.transfer(&[]).unwrap().is_empty());
        assert!(session.backend().unwrap().segments.is_empty());
    }

    #[test]
    fn test_zero_bytes_moved_is_an_error() {
        let fake = FakeSpi::new().reporting_moved(0);
        let mut session = Session::open_with(fake, &OpenParams::default()).unwrap();
        assert!(matches!(
            session.transfer(&[1, 2]),
            Err(Error::NoBytesTransferred)
        ));
    }

    #[test]
    fn test_oversized_transfer_rejected() {
        let fake = FakeSpi::new().with_max_len(4);
        let mut session = Session::open_with(fake, &OpenParams::default()).unwrap();
        assert!(session.transfer(&[0; 4]).is_ok());
        assert!(matches!(
            session.transfer(&[0; 5]),
            Err(Error::TransferTooLong { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_close_then_transfer_fails() {
        let mut session = Session::open_with(FakeSpi::new(), &OpenParams::default()).unwrap();
        session.close().unwrap();
        assert!(!session.is_open());
        assert!(matches!(session.transfer(&[1]), Err(Error::NotOpen)));
        assert!(matches!(session.close(), Err(Error::NotOpen)));
    }

    #[test]
    fn test_wide_parameters_truncate() {
        let params = OpenParams::default()
            .with_wide_mode(9)
            .with_wide_bits_per_word(500)
            .with_wide_speed(0x1_0000_0001)
            .with_wide_delay(70_000);

        assert_eq!(params.mode, SpiMode::Mode0);
        assert_eq!(params.bits_per_word, 244);
        assert_eq!(params.speed_hz, 1);
        assert_eq!(params.delay_usecs, 4_464);
    }
}
