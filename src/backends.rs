//! Backend registration and dispatch
//!
//! Backends are feature-gated; the CLI selects one with a string of the
//! form `name` or `name:key1=value1,key2=value2`.

use spiscript_core::BoxedConnector;

/// Information about a backend
pub struct BackendInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available backends (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "linux-spi")]
    backends.push(BackendInfo {
        name: "linux_spi",
        aliases: &["linux-spi", "spidev"],
        description: "Linux spidev interface (bufsiz=<bytes>)",
    });

    #[cfg(feature = "loopback")]
    backends.push(BackendInfo {
        name: "loopback",
        aliases: &["dummy"],
        description: "MOSI-to-MISO emulator (max_speed=<Hz>,max_len=<bytes>,fill=<byte>)",
    });

    backends
}

/// Generate help text listing all available backends
pub fn backend_help() -> String {
    let backends = available_backends();

    if backends.is_empty() {
        return "No backends available (recompile with backend features enabled)".to_string();
    }

    let mut help = String::from("Available backends:\n");
    for b in &backends {
        help.push_str(&format!("  {:10} - {}\n", b.name, b.description));
        if !b.aliases.is_empty() {
            help.push_str(&format!("  {:10}   aliases: {}\n", "", b.aliases.join(", ")));
        }
    }
    help
}

/// Parsed backend selection
#[derive(Debug, PartialEq, Eq)]
pub struct BackendSpec<'a> {
    /// Name as given
    pub name: &'a str,
    /// Key-value options in the order given
    pub options: Vec<(&'a str, &'a str)>,
}

/// Split a backend string into name and options
pub fn parse_backend(s: &str) -> Result<BackendSpec<'_>, String> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut options = Vec::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            match opt.split_once('=') {
                Some((key, value)) => options.push((key, value)),
                None => {
                    return Err(format!(
                        "Invalid parameter format: '{}' (expected key=value)",
                        opt
                    ))
                }
            }
        }
    }

    Ok(BackendSpec { name, options })
}

/// Resolve an alias to the primary backend name
pub fn find_backend(name: &str) -> Option<&'static str> {
    available_backends()
        .into_iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .map(|b| b.name)
}

/// Build the connector selected by `backend`
pub fn open_backend(backend: &str) -> Result<BoxedConnector, Box<dyn std::error::Error>> {
    let spec = parse_backend(backend)?;
    let name = find_backend(spec.name).ok_or_else(|| {
        format!(
            "Unknown backend: {}\n{}",
            spec.name,
            backend_help()
        )
    })?;

    log::debug!("Using backend {} {:?}", name, spec.options);

    match name {
        #[cfg(feature = "linux-spi")]
        "linux_spi" => spiscript_linux_spi::open_linux_spi(&spec.options),

        #[cfg(feature = "loopback")]
        "loopback" => spiscript_dummy::open_loopback(&spec.options),

        _ => Err(format!("Backend {} is not enabled in this build", name).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        let spec = parse_backend("loopback:max_speed=8000000,fill=0xFF").unwrap();
        assert_eq!(spec.name, "loopback");
        assert_eq!(spec.options, vec![("max_speed", "8000000"), ("fill", "0xFF")]);

        let spec = parse_backend("linux_spi").unwrap();
        assert_eq!(spec.name, "linux_spi");
        assert!(spec.options.is_empty());

        assert!(parse_backend("loopback:fast").is_err());
    }

    #[test]
    fn test_unknown_backend() {
        assert!(find_backend("ch341a").is_none());
        assert!(open_backend("ch341a").is_err());
    }

    #[cfg(feature = "loopback")]
    #[test]
    fn test_open_loopback_alias() {
        assert_eq!(find_backend("dummy"), Some("loopback"));
        let connector = open_backend("dummy:max_len=16").unwrap();
        assert_eq!(connector.name(), "loopback");
    }
}
