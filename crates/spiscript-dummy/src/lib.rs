//! spiscript-dummy - Loopback spidev emulator for testing
//!
//! This crate provides a backend that behaves like a spidev node with MOSI
//! wired to MISO. It's useful for testing scripts and for CI, where no SPI
//! controller is present.

use spiscript_core::{BoxedBackend, Connector, SpidevBackend, TransferSegment};

use std::io;

/// What the emulated device clocks back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Response {
    /// Received bytes equal transmitted bytes
    #[default]
    Echo,
    /// Every received byte is this value (0xFF is a floating MISO line)
    Fill(u8),
}

/// Configuration for the loopback device
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Fastest clock the "controller" supports; faster requests round down
    pub max_speed_hz: Option<u32>,
    /// Largest accepted segment
    pub max_len: Option<usize>,
    /// Received data pattern
    pub response: Response,
    /// Only these paths exist; any path opens when `None`
    pub devices: Option<Vec<String>>,
}

impl LoopbackConfig {
    /// Clamp requested speeds to `max_speed_hz`
    pub fn with_max_speed(mut self, max_speed_hz: u32) -> Self {
        self.max_speed_hz = Some(max_speed_hz);
        self
    }

    /// Reject segments longer than `max_len`
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Set the received data pattern
    pub fn with_response(mut self, response: Response) -> Self {
        self.response = response;
        self
    }

    /// Restrict the set of device paths that can be opened
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }
}

/// Emulated spidev node
#[derive(Debug)]
pub struct LoopbackSpi {
    config: LoopbackConfig,
    mode: u8,
    bits_per_word: u8,
    speed_hz: u32,
    messages: usize,
}

impl LoopbackSpi {
    /// Create a loopback device with the given configuration
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            mode: 0,
            bits_per_word: 8,
            speed_hz: 500_000,
            messages: 0,
        }
    }

    /// Create a plain echoing device
    pub fn new_default() -> Self {
        Self::new(LoopbackConfig::default())
    }

    /// Number of `SPI_IOC_MESSAGE` requests served
    pub fn messages(&self) -> usize {
        self.messages
    }
}

impl SpidevBackend for LoopbackSpi {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn read_mode(&mut self) -> io::Result<u8> {
        Ok(self.mode)
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        // spidev treats 0 as "default", which is 8
        self.bits_per_word = if bits == 0 { 8 } else { bits };
        Ok(())
    }

    fn read_bits_per_word(&mut self) -> io::Result<u8> {
        Ok(self.bits_per_word)
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        self.speed_hz = match self.config.max_speed_hz {
            Some(max) if speed_hz > max => {
                log::debug!("loopback: Rounding {} Hz down to {} Hz", speed_hz, max);
                max
            }
            _ => speed_hz,
        };
        Ok(())
    }

    fn read_max_speed_hz(&mut self) -> io::Result<u32> {
        Ok(self.speed_hz)
    }

    fn message(&mut self, segments: &mut [TransferSegment<'_>]) -> io::Result<usize> {
        let mut total = 0;

        for segment in segments.iter_mut() {
            if let Some(max) = self.config.max_len {
                if segment.len() > max {
                    return Err(io::Error::from_raw_os_error(90)); // EMSGSIZE
                }
            }

            match self.config.response {
                Response::Echo => segment.rx.copy_from_slice(segment.tx),
                Response::Fill(byte) => segment.rx.fill(byte),
            }
            total += segment.len();
        }

        self.messages += 1;
        log::trace!("loopback: Moved {} bytes", total);
        Ok(total)
    }

    fn max_transfer_len(&self) -> Option<usize> {
        self.config.max_len
    }
}

/// Opens [`LoopbackSpi`] devices
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    config: LoopbackConfig,
}

impl LoopbackConnector {
    /// Connector handing out devices built from `config`
    pub fn new(config: LoopbackConfig) -> Self {
        Self { config }
    }

    /// The configuration used for new devices
    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }
}

impl Connector for LoopbackConnector {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn connect(&self, path: &str) -> io::Result<BoxedBackend> {
        if let Some(devices) = &self.config.devices {
            if !devices.iter().any(|d| d == path) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no loopback device at {}", path),
                ));
            }
        }
        log::debug!("loopback: Connected {}", path);
        Ok(Box::new(LoopbackSpi::new(self.config.clone())))
    }
}

/// Parse backend options from a list of key-value pairs
///
/// - `max_speed=<Hz>` - round faster requests down to this speed
/// - `max_len=<bytes>` - reject longer segments
/// - `fill=<byte>` - answer every byte with this value instead of echoing
pub fn parse_options(options: &[(&str, &str)]) -> Result<LoopbackConfig, String> {
    let mut config = LoopbackConfig::default();

    for (key, value) in options {
        match *key {
            "max_speed" => {
                let speed: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid max_speed value: {}", value))?;
                config.max_speed_hz = Some(speed);
            }
            "max_len" => {
                let len: usize = value
                    .parse()
                    .map_err(|_| format!("Invalid max_len value: {}", value))?;
                config.max_len = Some(len);
            }
            "fill" => {
                let byte = parse_byte(value)
                    .ok_or_else(|| format!("Invalid fill value: {}", value))?;
                config.response = Response::Fill(byte);
            }
            _ => {
                log::warn!("loopback: Unknown option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

fn parse_byte(s: &str) -> Option<u8> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Build a boxed connector from `key=value` backend options
pub fn open_loopback(
    options: &[(&str, &str)],
) -> Result<spiscript_core::BoxedConnector, Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    Ok(Box::new(LoopbackConnector::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment<'a>(tx: &'a [u8], rx: &'a mut [u8]) -> TransferSegment<'a> {
        TransferSegment {
            tx,
            rx,
            speed_hz: 500_000,
            delay_usecs: 0,
            bits_per_word: 8,
            cs_change: false,
        }
    }

    #[test]
    fn test_echo() {
        let mut spi = LoopbackSpi::new_default();
        let tx = [0xDE, 0xAD];
        let mut rx = [0u8; 2];
        let moved = spi.message(&mut [segment(&tx, &mut rx)]).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(rx, tx);
        assert_eq!(spi.messages(), 1);
    }

    #[test]
    fn test_fill() {
        let mut spi = LoopbackSpi::new(LoopbackConfig::default().with_response(Response::Fill(0xFF)));
        let tx = [1, 2, 3];
        let mut rx = [0u8; 3];
        spi.message(&mut [segment(&tx, &mut rx)]).unwrap();
        assert_eq!(rx, [0xFF; 3]);
    }

    #[test]
    fn test_speed_clamp() {
        let mut spi = LoopbackSpi::new(LoopbackConfig::default().with_max_speed(8_000_000));
        spi.write_max_speed_hz(10_000_000).unwrap();
        assert_eq!(spi.read_max_speed_hz().unwrap(), 8_000_000);
        spi.write_max_speed_hz(1_000_000).unwrap();
        assert_eq!(spi.read_max_speed_hz().unwrap(), 1_000_000);
    }

    #[test]
    fn test_oversized_segment() {
        let mut spi = LoopbackSpi::new(LoopbackConfig::default().with_max_len(2));
        let tx = [0u8; 3];
        let mut rx = [0u8; 3];
        let err = spi.message(&mut [segment(&tx, &mut rx)]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(90));
    }

    #[test]
    fn test_connector_device_list() {
        let connector =
            LoopbackConnector::new(LoopbackConfig::default().with_devices(["/dev/spidev0.0"]));
        assert!(connector.connect("/dev/spidev0.0").is_ok());
        let err = connector.connect("/dev/spidev0.1").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_parse_options() {
        let config =
            parse_options(&[("max_speed", "8000000"), ("max_len", "4096"), ("fill", "0xA5")])
                .unwrap();
        assert_eq!(config.max_speed_hz, Some(8_000_000));
        assert_eq!(config.max_len, Some(4096));
        assert_eq!(config.response, Response::Fill(0xA5));

        assert!(parse_options(&[("max_speed", "fast")]).is_err());
        assert!(parse_options(&[("fill", "300")]).is_err());
    }
}
