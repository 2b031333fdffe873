//! Linux spidev device implementation
//!
//! This module provides [`LinuxSpi`], which implements `SpidevBackend` on top
//! of the `/dev/spidevX.Y` ioctl interface, and [`LinuxConnector`], which
//! opens such devices by path.

use crate::error::{LinuxSpiError, Result};

use spiscript_core::{BoxedBackend, Connector, SpidevBackend, TransferSegment};

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;

/// Path to kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// Linux spidev ioctl constants
mod ioctl {
    use nix::ioctl_read;
    use nix::ioctl_write_ptr;

    // SPI ioctl magic number
    pub const SPI_IOC_MAGIC: u8 = b'k';

    // SPI ioctl type numbers
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_read!(spi_ioc_rd_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_read!(
        spi_ioc_rd_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_read!(
        spi_ioc_rd_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// The size field of an ioctl request is 14 bits wide
    const IOC_SIZE_MAX: usize = (1 << 14) - 1;

    /// Calculate ioctl number for SPI_IOC_MESSAGE(n)
    ///
    /// SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[n * sizeof(struct spi_ioc_transfer)])
    pub fn spi_ioc_message(n: usize) -> Option<libc::c_ulong> {
        let size = n.checked_mul(std::mem::size_of::<super::SpiIocTransfer>())?;
        if size > IOC_SIZE_MAX {
            return None;
        }
        // _IOC(dir, type, nr, size) = ((dir)<<30)|((size)<<16)|((type)<<8)|(nr), _IOC_WRITE = 1
        Some(((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong)
    }
}

/// SPI transfer structure for ioctl
/// This must match the kernel's struct spi_ioc_transfer layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,          // __u64 tx_buf
    rx_buf: u64,          // __u64 rx_buf
    len: u32,             // __u32 len
    speed_hz: u32,        // __u32 speed_hz
    delay_usecs: u16,     // __u16 delay_usecs
    bits_per_word: u8,    // __u8 bits_per_word
    cs_change: u8,        // __u8 cs_change
    tx_nbits: u8,         // __u8 tx_nbits
    rx_nbits: u8,         // __u8 rx_nbits
    word_delay_usecs: u8, // __u8 word_delay_usecs
    _pad: u8,             // padding
}

impl SpiIocTransfer {
    fn from_segment(segment: &mut TransferSegment<'_>) -> Self {
        Self {
            tx_buf: segment.tx.as_ptr() as u64,
            rx_buf: segment.rx.as_mut_ptr() as u64,
            len: segment.len() as u32,
            speed_hz: segment.speed_hz,
            delay_usecs: segment.delay_usecs,
            bits_per_word: segment.bits_per_word,
            cs_change: segment.cs_change as u8,
            ..Default::default()
        }
    }
}

fn ioctl_error(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// An open `/dev/spidevX.Y` node
///
/// Dropping it closes the descriptor.
#[derive(Debug)]
pub struct LinuxSpi {
    /// File handle for spidev device
    file: File,
    /// Maximum kernel buffer size
    max_kernel_buf_size: usize,
}

impl LinuxSpi {
    /// Open a spidev node read-write, sizing transfers from sysfs
    pub fn open(path: &str) -> io::Result<Self> {
        Self::open_with_bufsiz(path, None)
    }

    /// Open a spidev node with an explicit transfer size limit
    pub fn open_with_bufsiz(path: &str, bufsiz: Option<usize>) -> io::Result<Self> {
        log::debug!("linux_spi: Opening device {}", path);

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let max_kernel_buf_size = bufsiz.unwrap_or_else(get_max_kernel_buf_size);
        log::debug!(
            "linux_spi: Max kernel buffer size: {} bytes",
            max_kernel_buf_size
        );

        Ok(Self {
            file,
            max_kernel_buf_size,
        })
    }
}

impl SpidevBackend for LinuxSpi {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_mode(self.file.as_raw_fd(), &mode) }.map_err(ioctl_error)?;
        Ok(())
    }

    fn read_mode(&mut self) -> io::Result<u8> {
        let mut mode: u8 = 0;
        unsafe { ioctl::spi_ioc_rd_mode(self.file.as_raw_fd(), &mut mode) }
            .map_err(ioctl_error)?;
        Ok(mode)
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_bits_per_word(self.file.as_raw_fd(), &bits) }
            .map_err(ioctl_error)?;
        Ok(())
    }

    fn read_bits_per_word(&mut self) -> io::Result<u8> {
        let mut bits: u8 = 0;
        unsafe { ioctl::spi_ioc_rd_bits_per_word(self.file.as_raw_fd(), &mut bits) }
            .map_err(ioctl_error)?;
        Ok(bits)
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        unsafe { ioctl::spi_ioc_wr_max_speed_hz(self.file.as_raw_fd(), &speed_hz) }
            .map_err(ioctl_error)?;
        Ok(())
    }

    fn read_max_speed_hz(&mut self) -> io::Result<u32> {
        let mut speed_hz: u32 = 0;
        unsafe { ioctl::spi_ioc_rd_max_speed_hz(self.file.as_raw_fd(), &mut speed_hz) }
            .map_err(ioctl_error)?;
        Ok(speed_hz)
    }

    fn message(&mut self, segments: &mut [TransferSegment<'_>]) -> io::Result<usize> {
        let request = ioctl::spi_ioc_message(segments.len())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;

        let transfers: Vec<SpiIocTransfer> = segments
            .iter_mut()
            .map(SpiIocTransfer::from_segment)
            .collect();

        // The buffers referenced by `transfers` are borrowed from `segments`
        // and outlive the call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request, transfers.as_ptr()) };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(ret as usize)
    }

    fn max_transfer_len(&self) -> Option<usize> {
        Some(self.max_kernel_buf_size)
    }
}

/// Opens [`LinuxSpi`] devices by path
#[derive(Debug, Clone, Default)]
pub struct LinuxConnector {
    /// Overrides the sysfs buffer size when set
    pub bufsiz: Option<usize>,
}

impl Connector for LinuxConnector {
    fn name(&self) -> &'static str {
        "linux_spi"
    }

    fn connect(&self, path: &str) -> io::Result<BoxedBackend> {
        Ok(Box::new(LinuxSpi::open_with_bufsiz(path, self.bufsiz)?))
    }
}

/// Read the maximum kernel buffer size from sysfs, or use page size as fallback
fn get_max_kernel_buf_size() -> usize {
    if let Ok(content) = std::fs::read_to_string(BUF_SIZE_SYSFS) {
        if let Ok(size) = content.trim().parse::<usize>() {
            if size > 0 {
                log::debug!("linux_spi: Using buffer size {} from sysfs", size);
                return size;
            }
        }
        log::warn!("linux_spi: Invalid buffer size in {}", BUF_SIZE_SYSFS);
    } else {
        log::debug!("linux_spi: Cannot read {}, using page size", BUF_SIZE_SYSFS);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    log::debug!("linux_spi: Using page size {} as buffer size", page_size);
    page_size
}

/// Parse backend options from a list of key-value pairs
///
/// - `bufsiz=<bytes>` - override the transfer size limit
pub fn parse_options(options: &[(&str, &str)]) -> Result<LinuxConnector> {
    let mut connector = LinuxConnector::default();

    for (key, value) in options {
        match *key {
            "bufsiz" => {
                let size: usize = value
                    .parse()
                    .ok()
                    .filter(|&size| size > 0)
                    .ok_or_else(|| LinuxSpiError::InvalidOption {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                connector.bufsiz = Some(size);
            }
            _ => {
                log::warn!("linux_spi: Unknown option: {}={}", key, value);
            }
        }
    }

    Ok(connector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_struct_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<SpiIocTransfer>(), 32);
    }

    #[test]
    fn test_message_request_numbers() {
        assert_eq!(ioctl::spi_ioc_message(1), Some(0x4020_6b00));
        assert_eq!(ioctl::spi_ioc_message(2), Some(0x4040_6b00));
        assert_eq!(ioctl::spi_ioc_message(1024), None);
    }

    #[test]
    fn test_segment_conversion() {
        let tx = [1u8, 2, 3];
        let mut rx = [0u8; 3];
        let mut segment = TransferSegment {
            tx: &tx,
            rx: &mut rx,
            speed_hz: 1_000_000,
            delay_usecs: 5,
            bits_per_word: 8,
            cs_change: false,
        };
        let raw = SpiIocTransfer::from_segment(&mut segment);

        assert_eq!(raw.tx_buf, tx.as_ptr() as u64);
        assert_eq!(raw.len, 3);
        assert_eq!(raw.speed_hz, 1_000_000);
        assert_eq!(raw.delay_usecs, 5);
        assert_eq!(raw.bits_per_word, 8);
        assert_eq!(raw.cs_change, 0);
    }

    #[test]
    fn test_parse_options() {
        let connector = parse_options(&[("bufsiz", "8192")]).unwrap();
        assert_eq!(connector.bufsiz, Some(8192));

        assert!(parse_options(&[("bufsiz", "0")]).is_err());
        assert!(parse_options(&[("bufsiz", "lots")]).is_err());
        assert!(parse_options(&[("colour", "blue")]).unwrap().bufsiz.is_none());
    }
}
