//! The spidev ioctl surface as a trait
//!
//! A [`SpidevBackend`] is one open device node. Every method maps to exactly
//! one ioctl; implementations must not retry, cache or validate beyond what
//! the kernel does. This is the seam where tests swap in a loopback device.

use std::io;

/// One `struct spi_ioc_transfer` in a `SPI_IOC_MESSAGE(n)` request
///
/// `tx` and `rx` always have the same length, which is the segment length.
#[derive(Debug)]
pub struct TransferSegment<'a> {
    /// Bytes clocked out
    pub tx: &'a [u8],
    /// Bytes clocked in
    pub rx: &'a mut [u8],
    /// Clock override for this segment
    pub speed_hz: u32,
    /// Delay after the segment before the next one or chip-select release
    pub delay_usecs: u16,
    /// Word size override for this segment
    pub bits_per_word: u8,
    /// Deselect the device before the next segment
    pub cs_change: bool,
}

impl TransferSegment<'_> {
    /// Segment length in bytes
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the segment moves no data
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// An open spidev device
pub trait SpidevBackend {
    /// `SPI_IOC_WR_MODE`
    fn write_mode(&mut self, mode: u8) -> io::Result<()>;

    /// `SPI_IOC_RD_MODE`
    fn read_mode(&mut self) -> io::Result<u8>;

    /// `SPI_IOC_WR_BITS_PER_WORD`
    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()>;

    /// `SPI_IOC_RD_BITS_PER_WORD`
    fn read_bits_per_word(&mut self) -> io::Result<u8>;

    /// `SPI_IOC_WR_MAX_SPEED_HZ`
    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()>;

    /// `SPI_IOC_RD_MAX_SPEED_HZ`
    fn read_max_speed_hz(&mut self) -> io::Result<u32>;

    /// `SPI_IOC_MESSAGE(segments.len())`
    ///
    /// Returns the byte count the kernel reports as transferred.
    fn message(&mut self, segments: &mut [TransferSegment<'_>]) -> io::Result<usize>;

    /// Largest segment the device accepts, if known
    fn max_transfer_len(&self) -> Option<usize> {
        None
    }
}

impl<B: SpidevBackend + ?Sized> SpidevBackend for Box<B> {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        (**self).write_mode(mode)
    }

    fn read_mode(&mut self) -> io::Result<u8> {
        (**self).read_mode()
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        (**self).write_bits_per_word(bits)
    }

    fn read_bits_per_word(&mut self) -> io::Result<u8> {
        (**self).read_bits_per_word()
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        (**self).write_max_speed_hz(speed_hz)
    }

    fn read_max_speed_hz(&mut self) -> io::Result<u32> {
        (**self).read_max_speed_hz()
    }

    fn message(&mut self, segments: &mut [TransferSegment<'_>]) -> io::Result<usize> {
        (**self).message(segments)
    }

    fn max_transfer_len(&self) -> Option<usize> {
        (**self).max_transfer_len()
    }
}

/// Boxed backend for dynamic dispatch
pub type BoxedBackend = Box<dyn SpidevBackend + Send>;

/// Opens backends by device path
///
/// Bindings and the CLI hold one connector and ask it for a backend on
/// every open, so the same script runs against hardware or a loopback.
pub trait Connector {
    /// Short name used in logs and `list-backends`
    fn name(&self) -> &'static str;

    /// Open `path` read-write
    fn connect(&self, path: &str) -> io::Result<BoxedBackend>;
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn connect(&self, path: &str) -> io::Result<BoxedBackend> {
        (**self).connect(path)
    }
}

/// Boxed connector for dynamic dispatch
pub type BoxedConnector = Box<dyn Connector + Send>;
