//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). [`RelayConfig::from_lookup`] takes
//! any key lookup so the parsing rules can be exercised without touching
//! the process environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RelayError;

/// Default port when neither `LISTEN_ADDR` nor `PORT` is set.
pub const DEFAULT_PORT: u16 = 3000;

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the listener to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,

    /// Directory served for every non-WebSocket path.
    pub static_dir: PathBuf,

    /// Frames queued per connection before the peer counts as stalled.
    pub outbound_queue_capacity: usize,

    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,

    /// TLS termination settings.
    pub tls: TlsConfig,
}

/// Certificate material for TLS termination.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Master switch. When `false` the listener speaks plain TCP.
    pub enabled: bool,

    /// PEM certificate chain.
    pub cert_path: PathBuf,

    /// PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub key_path: PathBuf,

    /// Optional PEM CA bundle appended to the served chain.
    pub ca_bundle_path: Option<PathBuf>,

    /// Deadline for one client's TLS handshake.
    pub handshake_timeout: Duration,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: PathBuf::new(),
            key_path: PathBuf::new(),
            ca_bundle_path: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            ws_path: "/ws".to_string(),
            static_dir: PathBuf::from("public"),
            outbound_queue_capacity: 1024,
            max_message_bytes: 100 * 1024 * 1024,
            tls: TlsConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::from_lookup`].
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Falls back to defaults for unset or unparsable numeric values.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `LISTEN_ADDR` is not a socket
    /// address, `WS_PATH` does not start with `/`,
    /// `OUTBOUND_QUEUE_CAPACITY` is zero, or TLS is enabled without both
    /// `TLS_CERT_PATH` and `TLS_KEY_PATH`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_addr = match lookup("LISTEN_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| RelayError::Config(format!("LISTEN_ADDR {raw:?}: {e}")))?,
            None => {
                let port = parse_var(&lookup, "PORT", DEFAULT_PORT);
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let ws_path = lookup("WS_PATH").unwrap_or(defaults.ws_path);
        if !ws_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "WS_PATH must start with '/': {ws_path:?}"
            )));
        }

        let static_dir = lookup("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from);

        let outbound_queue_capacity = parse_var(
            &lookup,
            "OUTBOUND_QUEUE_CAPACITY",
            defaults.outbound_queue_capacity,
        );
        if outbound_queue_capacity == 0 {
            return Err(RelayError::Config(
                "OUTBOUND_QUEUE_CAPACITY must be positive".to_string(),
            ));
        }

        let max_message_bytes =
            parse_var(&lookup, "MAX_MESSAGE_BYTES", defaults.max_message_bytes);

        let tls = tls_from_lookup(&lookup)?;

        Ok(Self {
            listen_addr,
            ws_path,
            static_dir,
            outbound_queue_capacity,
            max_message_bytes,
            tls,
        })
    }
}

fn tls_from_lookup<F>(lookup: &F) -> Result<TlsConfig, RelayError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = TlsConfig::default();
    let enabled = parse_bool(lookup, "TLS_ENABLED", defaults.enabled);
    let cert_path = lookup("TLS_CERT_PATH").map(PathBuf::from);
    let key_path = lookup("TLS_KEY_PATH").map(PathBuf::from);
    let ca_bundle_path = lookup("TLS_CA_BUNDLE_PATH").map(PathBuf::from);
    let handshake_timeout = Duration::from_secs(parse_var(
        lookup,
        "TLS_HANDSHAKE_TIMEOUT_SECS",
        defaults.handshake_timeout.as_secs(),
    ));

    let (cert_path, key_path) = match (enabled, cert_path, key_path) {
        (true, Some(cert), Some(key)) => (cert, key),
        (true, _, _) => {
            return Err(RelayError::Config(
                "TLS_ENABLED requires TLS_CERT_PATH and TLS_KEY_PATH".to_string(),
            ));
        }
        (false, cert, key) => (cert.unwrap_or_default(), key.unwrap_or_default()),
    };

    Ok(TlsConfig {
        enabled,
        cert_path,
        key_path,
        ca_bundle_path,
        handshake_timeout,
    })
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
/// `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
