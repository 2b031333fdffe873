//! Steel Scheme REPL for scripting spidev devices
//!
//! This crate embeds a Scheme interpreter with a small set of SPI
//! functions. Scripts open any number of spidev nodes, run full-duplex
//! transfers on them, and close them again.
//!
//! # Example Session
//!
//! ```scheme
//! λ > (define radio (spi-open '(device "/dev/spidev0.0" speed 1000000)))
//! λ > radio
//! => (mode 0 bits 8 speed 1000000 delay 0 handle 1 device "/dev/spidev0.0")
//!
//! λ > (spi-transfer radio '(#x07 #xFF))
//! => (14 14)
//!
//! λ > (spi-close radio)
//! ```

mod error;
pub mod highlight;
mod spi_module;

pub use error::ReplError;
pub use spi_module::{create_modes_module, create_spi_module, SharedTable};

use crate::highlight::ReplHelper;
use colored::Colorize;
use directories::ProjectDirs;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::Editor;
use spiscript_core::{BoxedConnector, SessionTable};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use steel::rvals::SteelVal;
use steel::steel_vm::engine::Engine;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names offered for completion
const KNOWN_NAMES: &[&str] = &[
    "spi-open",
    "spi-open-with",
    "spi-transfer",
    "spi-close",
    "spi-info-ref",
    "spi-sessions",
    "make-bytes",
    "bytes-length",
    "bytes->hex",
    "hex->bytes",
    "spiscript-help",
    "SPI_MODE_0",
    "SPI_MODE_1",
    "SPI_MODE_2",
    "SPI_MODE_3",
    "SPI_CPHA",
    "SPI_CPOL",
    "SPI_CS_HIGH",
    "SPI_LSB_FIRST",
    "SPI_3WIRE",
    "SPI_LOOP",
    "SPI_NO_CS",
    "SPI_READY",
];

/// Get the ASCII art banner
fn get_banner(backend: &str) -> String {
    format!(
        r#"
             _               _       _
   ___ _ __ (_)___  ___ _ __(_)_ __ | |_
  / __| '_ \| / __|/ __| '__| | '_ \| __|   Version {}
  \__ \ |_) | \__ \ (__| |  | | |_) | |_    backend: {}
  |___/ .__/|_|___/\___|_|  |_| .__/ \__|   :? for help
      |_|                     |_|
"#,
        VERSION, backend
    )
    .bright_yellow()
    .bold()
    .to_string()
}

/// Get the history file path
fn get_history_path() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "spiscript") {
        let mut path = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&path).ok();
        path.push("repl_history");
        path
    } else {
        PathBuf::from(".spiscript_history")
    }
}

/// Create an engine with the SPI and mode modules loaded
///
/// Sessions opened by scripts live in `table`.
pub fn create_engine(table: SharedTable) -> Result<Engine, ReplError> {
    let mut engine = Engine::new();

    engine.register_module(create_spi_module(table));
    engine.register_module(create_modes_module());

    engine
        .run(
            r#"
        (require-builtin spiscript/spi)
        (require-builtin spiscript/modes)

        (define (spi-open . opts)
          (spi-open-with (if (null? opts) '() (car opts))))
    "#,
        )
        .map_err(|e| ReplError::SteelError(format!("{}", e)))?;

    Ok(engine)
}

fn new_table(connector: BoxedConnector) -> SharedTable {
    Arc::new(Mutex::new(SessionTable::new(connector)))
}

/// Close whatever the script left open
fn close_leftovers(table: &SharedTable) {
    match table.lock() {
        Ok(mut table) => {
            let closed = table.close_all();
            if closed > 0 {
                log::info!("Closed {} session(s) left open", closed);
            }
        }
        Err(e) => log::warn!("Could not close sessions: {}", e),
    }
}

fn print_results(results: Vec<SteelVal>) {
    for result in results {
        if !matches!(result, SteelVal::Void) {
            print!("{} ", "=>".bright_blue().bold());
            println!("{}", result);
        }
    }
}

/// Run the interactive REPL on top of the given connector
pub fn run_repl(connector: BoxedConnector) -> Result<(), ReplError> {
    let backend = connector.name();
    let table = new_table(connector);
    let mut engine = create_engine(Arc::clone(&table))?;

    let globals = Arc::new(KNOWN_NAMES.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>());
    let mut rl = Editor::<ReplHelper, FileHistory>::new()
        .map_err(|e| ReplError::IoError(std::io::Error::other(e)))?;
    rl.set_helper(Some(ReplHelper::new(globals)));
    rl.set_check_cursor_position(true);

    let history_path = get_history_path();
    if rl.load_history(&history_path).is_err() {
        log::debug!("No history at {}", history_path.display());
    }

    println!("{}", get_banner(backend));
    println!(
        "Type {} for available commands, {} or {} to exit.",
        "(spiscript-help)".bright_cyan(),
        "(quit)".bright_cyan(),
        "(exit)".bright_cyan()
    );
    println!();

    let prompt = format!("{} ", "λ >".bright_green().bold());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(&line);

                match input {
                    "(quit)" | "(exit)" | ":q" | ":quit" => {
                        println!("Goodbye!");
                        break;
                    }
                    ":?" | ":help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                match engine.run(line.clone()) {
                    Ok(results) => print_results(results),
                    Err(e) => eprintln!("{}: {}", "Error".bright_red().bold(), e),
                }

                let _ = std::io::stdout().flush();
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "Error".bright_red().bold(), err);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        eprintln!(
            "{}: Failed to save history: {}",
            "Warning".bright_yellow(),
            e
        );
    }

    close_leftovers(&table);
    Ok(())
}

/// Print help message
fn print_help() {
    println!(
        "
    {} -- displays help dialog
    {}    -- exits the REPL

    {}   -- show SPI commands
    ",
        ":? | :help".bright_cyan(),
        ":q | :quit".bright_cyan(),
        "(spiscript-help)".bright_cyan(),
    );
}

/// Run a script on top of the given connector
///
/// Sessions the script leaves open are closed afterwards, also when the
/// script fails.
pub fn run_script(connector: BoxedConnector, script: String) -> Result<(), ReplError> {
    run_script_in(&new_table(connector), script)
}

/// Run a script with sessions kept in `table`
///
/// The table is empty again when this returns.
pub fn run_script_in(table: &SharedTable, script: String) -> Result<(), ReplError> {
    let outcome = create_engine(Arc::clone(table)).and_then(|mut engine| {
        engine
            .run(script)
            .map(print_results)
            .map_err(|e| ReplError::SteelError(format!("{}", e)))
    });

    close_leftovers(table);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use spiscript_dummy::{LoopbackConfig, LoopbackConnector};

    fn loopback_table(config: LoopbackConfig) -> SharedTable {
        new_table(Box::new(LoopbackConnector::new(config)))
    }

    #[test]
    fn test_script_transfer() {
        let table = loopback_table(LoopbackConfig::default());
        let mut engine = create_engine(Arc::clone(&table)).unwrap();

        let results = engine
            .run(
                r#"
            (define dev (spi-open '(speed 1000000 mode 3)))
            (spi-transfer dev '(1 2 3))
        "#,
            )
            .unwrap();

        let expected = SteelVal::ListV(
            vec![SteelVal::IntV(1), SteelVal::IntV(2), SteelVal::IntV(3)]
                .into_iter()
                .collect(),
        );
        assert_eq!(results.last(), Some(&expected));
        assert_eq!(table.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_script_info_ref_and_constants() {
        let table = loopback_table(LoopbackConfig::default().with_max_speed(8_000_000));
        let mut engine = create_engine(table).unwrap();

        let results = engine
            .run(
                r#"
            (define dev (spi-open (list 'speed 10000000 'mode SPI_MODE_2)))
            (list (spi-info-ref dev 'speed) (spi-info-ref dev 'mode) SPI_CPOL)
        "#,
            )
            .unwrap();

        let expected = SteelVal::ListV(
            vec![
                SteelVal::IntV(8_000_000),
                SteelVal::IntV(2),
                SteelVal::IntV(2),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(results.last(), Some(&expected));
    }

    #[test]
    fn test_script_error_is_catchable() {
        let table = loopback_table(LoopbackConfig::default());
        let mut engine = create_engine(table).unwrap();

        assert!(engine
            .run("(spi-transfer (spi-open '()) '(1 999))")
            .is_err());

        // The interpreter keeps working after a failed call
        let results = engine.run("(spi-sessions)").unwrap();
        assert_eq!(results.last(), Some(&SteelVal::IntV(1)));
    }

    #[test]
    fn test_run_script_closes_leftovers() {
        let table = loopback_table(LoopbackConfig::default());

        run_script_in(
            &table,
            r#"
            (spi-open '(device "/dev/spidev1.0"))
            (spi-open '(device "/dev/spidev1.1"))
        "#
            .to_string(),
        )
        .unwrap();
        assert_eq!(table.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_failed_script_closes_leftovers() {
        let table = loopback_table(LoopbackConfig::default());

        let err = run_script_in(
            &table,
            r#"
            (define dev (spi-open '()))
            (spi-transfer dev '(1 999))
        "#
            .to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, ReplError::SteelError(_)));
        assert_eq!(table.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_close_leftovers_empties_table() {
        let table = loopback_table(LoopbackConfig::default());
        let mut engine = create_engine(Arc::clone(&table)).unwrap();
        engine.run("(spi-open '())").unwrap();
        assert_eq!(table.lock().unwrap().len(), 1);

        close_leftovers(&table);
        assert_eq!(table.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_spi_open_without_options() {
        let table = loopback_table(LoopbackConfig::default());
        let mut engine = create_engine(table).unwrap();

        let results = engine
            .run("(define dev (spi-open)) (list (spi-info-ref dev 'speed) (spi-info-ref dev 'bits))")
            .unwrap();
        let expected = SteelVal::ListV(
            vec![SteelVal::IntV(500_000), SteelVal::IntV(8)]
                .into_iter()
                .collect(),
        );
        assert_eq!(results.last(), Some(&expected));
    }
}
