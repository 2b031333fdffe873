//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal byte
fn parse_byte(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in a byte", s))
}

#[derive(Parser)]
#[command(name = "spiscript")]
#[command(author, version, about = "Scriptable Linux spidev access", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Backend to open devices with, optionally with options
    /// (e.g. "linux_spi:bufsiz=4096" or "loopback:max_speed=8000000")
    #[arg(short, long, global = true, default_value = "linux_spi")]
    pub backend: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Device and parameters for one session
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// spidev node to open
    #[arg(short, long, default_value = "/dev/spidev0.0")]
    pub device: String,

    /// SPI mode index (0-3); other values fall back to mode 0
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub mode: i64,

    /// Bits per word (only the low 8 bits reach the kernel)
    #[arg(short = 'B', long, default_value_t = 8, allow_negative_numbers = true)]
    pub bits: i64,

    /// Clock speed in Hz (decimal or 0x hex)
    #[arg(short, long, default_value = "500000", value_parser = parse_hex_u32)]
    pub speed: u32,

    /// Delay after the transfer in microseconds (low 16 bits)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub delay: i64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clock bytes out and print what came back
    Transfer {
        #[command(flatten)]
        device: DeviceArgs,

        /// Bytes to send (decimal or 0x hex)
        #[arg(required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },

    /// Open a device and print the parameters the kernel accepted
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Run a Scheme script
    Run {
        /// Script file
        script: PathBuf,
    },

    /// Start the interactive Scheme REPL
    Repl,

    /// List available backends
    ListBackends,
}
