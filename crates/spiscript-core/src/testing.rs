//! Recording fake backend for unit tests

use crate::backend::{BoxedBackend, Connector, SpidevBackend, TransferSegment};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    WriteMode(u8),
    ReadMode,
    WriteBits(u8),
    ReadBits,
    WriteSpeed(u32),
    ReadSpeed,
}

#[derive(Debug, Clone)]
pub(crate) struct SeenSegment {
    pub len: usize,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: bool,
}

/// Echoes tx into rx and records every ioctl
#[derive(Debug, Default)]
pub(crate) struct FakeSpi {
    pub calls: Vec<Call>,
    pub segments: Vec<SeenSegment>,
    mode: u8,
    bits: u8,
    speed: u32,
    speed_limit: Option<u32>,
    max_len: Option<usize>,
    fail_on: Option<Call>,
    moved: Option<usize>,
}

impl FakeSpi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed_limit(mut self, limit: u32) -> Self {
        self.speed_limit = Some(limit);
        self
    }

    pub fn with_max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    pub fn failing_on(mut self, call: Call) -> Self {
        self.fail_on = Some(call);
        self
    }

    pub fn reporting_moved(mut self, moved: usize) -> Self {
        self.moved = Some(moved);
        self
    }

    fn record(&mut self, call: Call) -> io::Result<()> {
        self.calls.push(call);
        if self.fail_on == Some(call) {
            return Err(io::Error::from_raw_os_error(22));
        }
        Ok(())
    }
}

impl SpidevBackend for FakeSpi {
    fn write_mode(&mut self, mode: u8) -> io::Result<()> {
        self.record(Call::WriteMode(mode))?;
        self.mode = mode;
        Ok(())
    }

    fn read_mode(&mut self) -> io::Result<u8> {
        self.record(Call::ReadMode)?;
        Ok(self.mode)
    }

    fn write_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        self.record(Call::WriteBits(bits))?;
        self.bits = bits;
        Ok(())
    }

    fn read_bits_per_word(&mut self) -> io::Result<u8> {
        self.record(Call::ReadBits)?;
        Ok(self.bits)
    }

    fn write_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        self.record(Call::WriteSpeed(speed_hz))?;
        self.speed = match self.speed_limit {
            Some(limit) => speed_hz.min(limit),
            None => speed_hz,
        };
        Ok(())
    }

    fn read_max_speed_hz(&mut self) -> io::Result<u32> {
        self.record(Call::ReadSpeed)?;
        Ok(self.speed)
    }

    fn message(&mut self, segments: &mut [TransferSegment<'_>]) -> io::Result<usize> {
        let mut total = 0;
        for segment in segments.iter_mut() {
            self.segments.push(SeenSegment {
                len: segment.len(),
                speed_hz: segment.speed_hz,
                delay_usecs: segment.delay_usecs,
                bits_per_word: segment.bits_per_word,
                cs_change: segment.cs_change,
            });
            segment.rx.copy_from_slice(segment.tx);
            total += segment.len();
        }
        Ok(self.moved.unwrap_or(total))
    }

    fn max_transfer_len(&self) -> Option<usize> {
        self.max_len
    }
}

/// Hands out [`FakeSpi`]s for any path except "/missing"
pub(crate) struct FakeConnector;

impl Connector for FakeConnector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn connect(&self, path: &str) -> io::Result<BoxedBackend> {
        if path == "/missing" {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(Box::new(FakeSpi::new()))
    }
}
