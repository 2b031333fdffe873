//! SPI module for Steel Scheme
//!
//! This module exposes spidev sessions to the Scheme environment. Scripts
//! never see a descriptor: `spi-open` returns a property list
//!
//! ```scheme
//! (mode 0 bits 8 speed 500000 delay 0 handle 1 device "/dev/spidev0.0")
//! ```
//!
//! and every other call takes that list back.

use spiscript_core::{Error, ModeFlags, OpenParams, SessionInfo, SessionTable, TransferParams};
use std::sync::{Arc, Mutex};
use steel::rvals::SteelVal;
use steel::steel_vm::builtin::BuiltInModule;
use steel::steel_vm::register_fn::RegisterFn;

/// Session table shared between the registered functions
pub type SharedTable = Arc<Mutex<SessionTable>>;

/// Keys accepted in the `spi-open` option list
const OPEN_KEYS: &[&str] = &["device", "mode", "bits", "speed", "delay"];

/// Create the SPI module with functions bound to the given table
pub fn create_spi_module(table: SharedTable) -> BuiltInModule {
    let mut module = BuiltInModule::new("spiscript/spi");

    let t = Arc::clone(&table);
    module.register_fn("spi-open-with", move |opts: SteelVal| spi_open(&t, &opts));

    let t = Arc::clone(&table);
    module.register_fn("spi-transfer", move |info: SteelVal, data: SteelVal| {
        spi_transfer(&t, &info, &data)
    });

    let t = Arc::clone(&table);
    module.register_fn("spi-close", move |info: SteelVal| spi_close(&t, &info));

    let t = Arc::clone(&table);
    module.register_fn("spi-sessions", move || -> Result<isize, String> {
        let table = t.lock().map_err(|e| format!("lock error: {}", e))?;
        Ok(table.len() as isize)
    });

    module.register_fn(
        "spi-info-ref",
        |info: SteelVal, key: SteelVal| -> Result<SteelVal, String> {
            let key = key_name(&key).map_err(|e| e.to_string())?;
            lookup(&info, &key)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("spi-info-ref: no {} in session info", key))
        },
    );

    register_byte_utilities(&mut module);

    module.register_fn("spiscript-help", || {
        print_help();
        SteelVal::Void
    });

    module
}

/// Create the mode constants module
pub fn create_modes_module() -> BuiltInModule {
    let mut module = BuiltInModule::new("spiscript/modes");

    module.register_value("SPI_MODE_0", SteelVal::IntV(0));
    module.register_value("SPI_MODE_1", SteelVal::IntV(1));
    module.register_value("SPI_MODE_2", SteelVal::IntV(2));
    module.register_value("SPI_MODE_3", SteelVal::IntV(3));

    // Raw mode bits, as reported in the `mode` field of session info
    for (name, flag) in [
        ("SPI_CPHA", ModeFlags::CPHA),
        ("SPI_CPOL", ModeFlags::CPOL),
        ("SPI_CS_HIGH", ModeFlags::CS_HIGH),
        ("SPI_LSB_FIRST", ModeFlags::LSB_FIRST),
        ("SPI_3WIRE", ModeFlags::THREE_WIRE),
        ("SPI_LOOP", ModeFlags::LOOP),
        ("SPI_NO_CS", ModeFlags::NO_CS),
        ("SPI_READY", ModeFlags::READY),
    ] {
        module.register_value(name, SteelVal::IntV(flag.bits() as isize));
    }

    module
}

/// Register byte list helpers (independent of the table)
fn register_byte_utilities(module: &mut BuiltInModule) {
    module.register_fn(
        "make-bytes",
        |len: isize, fill: isize| -> Result<SteelVal, String> {
            make_bytes(len, fill)
                .map(|b| bytes_to_steel(&b))
                .map_err(|e| e.to_string())
        },
    );

    module.register_fn("bytes-length", |data: SteelVal| -> Result<isize, String> {
        let bytes = steel_to_bytes(&data).map_err(|e| e.to_string())?;
        Ok(bytes.len() as isize)
    });

    module.register_fn("bytes->hex", |data: SteelVal| -> Result<String, String> {
        let bytes = steel_to_bytes(&data).map_err(|e| e.to_string())?;
        Ok(bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" "))
    });

    module.register_fn("hex->bytes", |hex: String| -> Result<SteelVal, String> {
        parse_hex(&hex).map(|b| bytes_to_steel(&b))
    });
}

// =============================================================================
// Session functions
// =============================================================================

fn spi_open(table: &SharedTable, opts: &SteelVal) -> Result<SteelVal, String> {
    let params = open_params(opts).map_err(|e| format!("spi-open: {}", e))?;
    let mut table = table.lock().map_err(|e| format!("lock error: {}", e))?;
    let info = table
        .open(&params)
        .map_err(|e| format!("spi-open: {}", e))?;
    Ok(info_to_steel(&info))
}

fn spi_transfer(table: &SharedTable, info: &SteelVal, data: &SteelVal) -> Result<SteelVal, String> {
    let handle = handle_of(info).map_err(|e| format!("spi-transfer: {}", e))?;
    let overrides = transfer_overrides(info).map_err(|e| format!("spi-transfer: {}", e))?;
    let tx = steel_to_bytes(data).map_err(|e| format!("spi-transfer: {}", e))?;

    let mut table = table.lock().map_err(|e| format!("lock error: {}", e))?;
    let rx = table
        .transfer(handle, &tx, &overrides)
        .map_err(|e| format!("spi-transfer: {}", e))?;

    Ok(bytes_to_steel(&rx))
}

fn spi_close(table: &SharedTable, info: &SteelVal) -> Result<SteelVal, String> {
    let handle = handle_of(info).map_err(|e| format!("spi-close: {}", e))?;
    let mut table = table.lock().map_err(|e| format!("lock error: {}", e))?;
    table
        .close(handle)
        .map_err(|e| format!("spi-close: {}", e))?;
    Ok(SteelVal::Void)
}

// =============================================================================
// Conversions
// =============================================================================

/// Build open parameters from an option list such as `'(speed 1000000 mode 3)`
fn open_params(opts: &SteelVal) -> Result<OpenParams, Error> {
    let mut params = OpenParams::default();

    for (key, value) in plist_entries(opts)? {
        params = match key.as_str() {
            "device" => match &value {
                SteelVal::StringV(s) => OpenParams {
                    device: s.to_string(),
                    ..params
                },
                _ => return Err(Error::InvalidData("device must be a string".into())),
            },
            "mode" => params.with_wide_mode(integer(&key, &value)?),
            "bits" => params.with_wide_bits_per_word(integer(&key, &value)?),
            "speed" => params.with_wide_speed(integer(&key, &value)?),
            "delay" => params.with_wide_delay(integer(&key, &value)?),
            other => {
                return Err(Error::InvalidData(format!(
                    "unknown option {} (expected one of {})",
                    other,
                    OPEN_KEYS.join(", ")
                )))
            }
        };
    }

    Ok(params)
}

/// Session info as a property list
fn info_to_steel(info: &SessionInfo) -> SteelVal {
    let entries = [
        ("mode", SteelVal::IntV(info.mode as isize)),
        ("bits", SteelVal::IntV(info.bits_per_word as isize)),
        ("speed", SteelVal::IntV(info.speed_hz as isize)),
        ("delay", SteelVal::IntV(info.delay_usecs as isize)),
        ("handle", SteelVal::IntV(info.handle as isize)),
        ("device", SteelVal::StringV(info.device.as_str().into())),
    ];

    SteelVal::ListV(
        entries
            .into_iter()
            .flat_map(|(key, value)| [SteelVal::SymbolV(key.into()), value])
            .collect(),
    )
}

/// Handle from a session info list, or a bare integer handle
fn handle_of(info: &SteelVal) -> Result<u32, Error> {
    let value = match info {
        SteelVal::IntV(_) => info.clone(),
        _ => lookup(info, "handle")?
            .ok_or_else(|| Error::InvalidData("session info has no handle".into()))?,
    };
    let handle = integer("handle", &value)?;
    u32::try_from(handle).map_err(|_| Error::NotOpen)
}

/// Segment parameters carried by a session info list
///
/// A script that edits `speed`, `bits` or `delay` in its info list changes
/// the parameters of the next transfer made with it.
fn transfer_overrides(info: &SteelVal) -> Result<TransferParams, Error> {
    if let SteelVal::IntV(_) = info {
        return Ok(TransferParams::default());
    }

    let wide = |key: &str| -> Result<Option<i64>, Error> {
        lookup(info, key)?.map(|v| integer(key, &v)).transpose()
    };

    // Same narrowing as OpenParams::with_wide_*
    let narrowed = OpenParams::default();
    Ok(TransferParams {
        speed_hz: wide("speed")?.map(|v| narrowed.clone().with_wide_speed(v).speed_hz),
        bits_per_word: wide("bits")?
            .map(|v| narrowed.clone().with_wide_bits_per_word(v).bits_per_word),
        delay_usecs: wide("delay")?.map(|v| narrowed.clone().with_wide_delay(v).delay_usecs),
    })
}

/// Value stored under `key` in a property list
fn lookup(plist: &SteelVal, key: &str) -> Result<Option<SteelVal>, Error> {
    Ok(plist_entries(plist)?
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v))
}

/// Split a property list into (key, value) pairs
fn plist_entries(plist: &SteelVal) -> Result<Vec<(String, SteelVal)>, Error> {
    let items: Vec<SteelVal> = match plist {
        SteelVal::ListV(items) => items.iter().cloned().collect(),
        _ => return Err(Error::InvalidData("expected a property list".into())),
    };

    if items.len() % 2 != 0 {
        return Err(Error::InvalidData(
            "property list has a key without a value".into(),
        ));
    }

    items
        .chunks(2)
        .map(|pair| Ok((key_name(&pair[0])?, pair[1].clone())))
        .collect()
}

fn key_name(key: &SteelVal) -> Result<String, Error> {
    match key {
        SteelVal::SymbolV(s) | SteelVal::StringV(s) => Ok(s.to_string()),
        other => Err(Error::InvalidData(format!(
            "expected a symbol key, got {}",
            other
        ))),
    }
}

fn integer(key: &str, value: &SteelVal) -> Result<i64, Error> {
    match value {
        SteelVal::IntV(i) => Ok(*i as i64),
        other => Err(Error::InvalidData(format!(
            "{} must be an integer, got {}",
            key, other
        ))),
    }
}

fn to_byte(value: isize) -> Result<u8, Error> {
    u8::try_from(value)
        .map_err(|_| Error::InvalidData(format!("{} is not a byte (0-255)", value)))
}

/// Convert bytes to Steel value (as a list of integers)
fn bytes_to_steel(bytes: &[u8]) -> SteelVal {
    SteelVal::ListV(bytes.iter().map(|&b| SteelVal::IntV(b as isize)).collect())
}

/// Convert a Steel list of integers to bytes, rejecting anything that is
/// not an integer in 0..=255
fn steel_to_bytes(val: &SteelVal) -> Result<Vec<u8>, Error> {
    match val {
        SteelVal::ListV(items) => items
            .iter()
            .enumerate()
            .map(|(index, v)| match v {
                SteelVal::IntV(i) => to_byte(*i).map_err(|_| {
                    Error::InvalidData(format!("element {} ({}) is not a byte (0-255)", index, i))
                }),
                other => Err(Error::InvalidData(format!(
                    "element {} ({}) is not an integer",
                    index, other
                ))),
            })
            .collect(),
        _ => Err(Error::InvalidData("expected a list of bytes".into())),
    }
}

/// Byte list of `len` copies of `fill`, no longer than one segment can carry
fn make_bytes(len: isize, fill: isize) -> Result<Vec<u8>, Error> {
    let fill = to_byte(fill)?;
    let len = len.max(0) as usize;
    if len > u32::MAX as usize {
        return Err(Error::TransferTooLong {
            len,
            max: u32::MAX as usize,
        });
    }
    Ok(vec![fill; len])
}

fn parse_hex(hex: &str) -> Result<Vec<u8>, String> {
    let hex = hex.replace(' ', "").replace("0x", "").replace(',', "");
    if !hex.is_ascii() {
        return Err("invalid hex: non-ASCII character".to_string());
    }
    if hex.len() % 2 != 0 {
        return Err("hex string must have even length".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| format!("invalid hex: {}", e))
}

fn print_help() {
    println!(
        r#"
spiscript - Available Commands
==============================

SESSIONS
--------
(spi-open [opts])
    Open and configure a spidev device. opts is a property list with any
    of: device, mode, bits, speed, delay. Without opts (or with '()) the
    defaults are used (/dev/spidev0.0, mode 0, 8 bits, 500000 Hz, 0 us).
    Returns session info: (mode M bits B speed S delay D handle H device P).
    mode/bits/speed are the values the kernel accepted, not the request.

(spi-transfer info data)
    Full-duplex transfer of data (a list of bytes). Returns the received
    bytes as a new list of the same length. speed, bits and delay are
    taken from info.

(spi-close info)
    Close the session. Later transfers fail with "session not open".

(spi-info-ref info key)  Read one field of session info.
(spi-sessions)           Number of open sessions.

BYTE UTILITIES
--------------
(make-bytes len fill)   Create a byte list of len bytes, all set to fill.
(bytes-length data)     Return length of byte list.
(bytes->hex data)       Convert to hex string.
(hex->bytes str)        Parse hex string to bytes.

MODE CONSTANTS (from spiscript/modes module)
--------------------------------------------
SPI_MODE_0 .. SPI_MODE_3, SPI_CPHA, SPI_CPOL, SPI_CS_HIGH, SPI_LSB_FIRST,
SPI_3WIRE, SPI_LOOP, SPI_NO_CS, SPI_READY

EXAMPLES
--------
> (define dev (spi-open '(device "/dev/spidev0.0" speed 1000000)))
> (spi-info-ref dev 'speed)
1000000
> (spi-transfer dev '(#xFF #x00 #xFA))
(0 0 0)
> (spi-close dev)

(quit) or (exit) to exit the REPL.
"#
    );
}
