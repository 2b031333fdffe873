//! SPI clock modes and spidev mode bits

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Bits of the byte exchanged by `SPI_IOC_WR_MODE` / `SPI_IOC_RD_MODE`
    ///
    /// Only `CPHA` and `CPOL` are ever requested by a session, but the
    /// read-back value may carry any of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u8 {
        /// Clock phase
        const CPHA       = 0x01;
        /// Clock polarity
        const CPOL       = 0x02;
        /// Chip select active high
        const CS_HIGH    = 0x04;
        /// Least significant bit first
        const LSB_FIRST  = 0x08;
        /// Shared SI/SO signal
        const THREE_WIRE = 0x10;
        /// Loopback mode
        const LOOP       = 0x20;
        /// No chip select
        const NO_CS      = 0x40;
        /// Slave pulls low to pause
        const READY      = 0x80;
    }
}

/// The four clock polarity/phase combinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0 = 0,
    /// CPOL=0, CPHA=1
    Mode1 = 1,
    /// CPOL=1, CPHA=0
    Mode2 = 2,
    /// CPOL=1, CPHA=1
    Mode3 = 3,
}

impl SpiMode {
    /// Map a caller-supplied mode number onto a kernel mode
    ///
    /// Anything outside 0..=3 selects mode 0.
    pub fn from_index(index: i64) -> Self {
        match index {
            0 => Self::Mode0,
            1 => Self::Mode1,
            2 => Self::Mode2,
            3 => Self::Mode3,
            other => {
                log::warn!("Invalid SPI mode {}, falling back to mode 0", other);
                Self::Mode0
            }
        }
    }

    /// Recover the clock mode from a raw mode byte, ignoring other bits
    pub fn from_bits(bits: u8) -> Self {
        let flags = ModeFlags::from_bits_truncate(bits);
        match (
            flags.contains(ModeFlags::CPOL),
            flags.contains(ModeFlags::CPHA),
        ) {
            (false, false) => Self::Mode0,
            (false, true) => Self::Mode1,
            (true, false) => Self::Mode2,
            (true, true) => Self::Mode3,
        }
    }

    /// Kernel flags for this mode
    pub fn flags(self) -> ModeFlags {
        match self {
            Self::Mode0 => ModeFlags::empty(),
            Self::Mode1 => ModeFlags::CPHA,
            Self::Mode2 => ModeFlags::CPOL,
            Self::Mode3 => ModeFlags::CPOL | ModeFlags::CPHA,
        }
    }

    /// Raw mode byte as passed to `SPI_IOC_WR_MODE`
    pub fn bits(self) -> u8 {
        self.flags().bits()
    }
}

impl fmt::Display for SpiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {}", *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_indices_map_to_kernel_flags() {
        assert_eq!(SpiMode::from_index(0).bits(), 0x00);
        assert_eq!(SpiMode::from_index(1).bits(), 0x01);
        assert_eq!(SpiMode::from_index(2).bits(), 0x02);
        assert_eq!(SpiMode::from_index(3).bits(), 0x03);
    }

    #[test]
    fn test_out_of_range_indices_fall_back_to_mode_0() {
        for index in [4, 7, 255, 256, -1, i64::MAX, i64::MIN] {
            assert_eq!(SpiMode::from_index(index), SpiMode::Mode0, "index {}", index);
        }
    }

    #[test]
    fn test_from_bits_ignores_extra_flags() {
        let raw = (ModeFlags::CPOL | ModeFlags::CS_HIGH | ModeFlags::LSB_FIRST).bits();
        assert_eq!(SpiMode::from_bits(raw), SpiMode::Mode2);
        assert_eq!(SpiMode::from_bits(0xFF), SpiMode::Mode3);
    }
}
