//! spiscript - Scriptable access to Linux spidev devices
//!
//! Every command runs on top of a backend selected with `--backend`:
//! - **linux_spi** - the kernel's `/dev/spidevX.Y` nodes
//! - **loopback** - an emulator with MOSI wired to MISO, for trying
//!   scripts without hardware
//!
//! `transfer` and `info` are one-shot commands; `run` and `repl` hand the
//! backend to the embedded Scheme interpreter.

mod backends;
mod cli;

use clap::Parser;
use cli::{Cli, Commands, DeviceArgs};
use spiscript_core::{BoxedConnector, OpenParams, Session};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Transfer { device, bytes } => {
            let connector = backends::open_backend(&cli.backend)?;
            cmd_transfer(&connector, &device, &bytes)
        }
        Commands::Info { device } => {
            let connector = backends::open_backend(&cli.backend)?;
            cmd_info(&connector, &device)
        }
        Commands::Run { script } => {
            let connector = backends::open_backend(&cli.backend)?;
            let script = std::fs::read_to_string(&script)
                .map_err(|e| format!("Failed to read {}: {}", script.display(), e))?;
            cmd_run(connector, script)
        }
        Commands::Repl => {
            let connector = backends::open_backend(&cli.backend)?;
            cmd_repl(connector)
        }
        Commands::ListBackends => {
            print!("{}", backends::backend_help());
            Ok(())
        }
    }
}

fn open_params(args: &DeviceArgs) -> OpenParams {
    OpenParams::new(args.device.as_str())
        .with_wide_mode(args.mode)
        .with_wide_bits_per_word(args.bits)
        .with_speed(args.speed)
        .with_wide_delay(args.delay)
}

fn open_session(
    connector: &BoxedConnector,
    args: &DeviceArgs,
) -> Result<Session<spiscript_core::BoxedBackend>, Box<dyn std::error::Error>> {
    Ok(Session::open(connector, &open_params(args))?)
}

fn cmd_transfer(
    connector: &BoxedConnector,
    args: &DeviceArgs,
    bytes: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = open_session(connector, args)?;
    let rx = session.transfer(bytes)?;
    session.close()?;

    let hex: Vec<String> = rx.iter().map(|b| format!("{:02x}", b)).collect();
    println!("{}", hex.join(" "));
    Ok(())
}

fn cmd_info(
    connector: &BoxedConnector,
    args: &DeviceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = open_session(connector, args)?;
    let params = session.params();

    println!("Device:        {}", session.device());
    println!(
        "Mode:          {} (0x{:02x})",
        params.spi_mode(),
        params.mode
    );
    println!("Bits per word: {}", params.bits_per_word);
    println!("Speed:         {} Hz", params.speed_hz);
    println!("Delay:         {} us", params.delay_usecs);

    session.close()?;
    Ok(())
}

#[cfg(feature = "repl")]
fn cmd_run(connector: BoxedConnector, script: String) -> Result<(), Box<dyn std::error::Error>> {
    spiscript_repl::run_script(connector, script)?;
    Ok(())
}

#[cfg(feature = "repl")]
fn cmd_repl(connector: BoxedConnector) -> Result<(), Box<dyn std::error::Error>> {
    spiscript_repl::run_repl(connector)?;
    Ok(())
}

#[cfg(not(feature = "repl"))]
fn cmd_run(_connector: BoxedConnector, _script: String) -> Result<(), Box<dyn std::error::Error>> {
    Err("Scripting not available. Rebuild with --features repl".into())
}

#[cfg(not(feature = "repl"))]
fn cmd_repl(_connector: BoxedConnector) -> Result<(), Box<dyn std::error::Error>> {
    Err("REPL not available. Rebuild with --features repl".into())
}
