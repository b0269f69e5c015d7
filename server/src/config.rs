//! Configuration loading from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::time::{FIVE_SECONDS, ONE_HOUR};

pub const DEFAULT_MAX_CONTENT_CHARS: usize = 100_000;
pub const DEFAULT_DAILY_CREATE_LIMIT: u32 = 50;

/// Runtime configuration for the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub max_content_chars: usize,
    /// Upper bound on request bodies, checked before JSON parsing.
    pub max_body_bytes: usize,
    pub sweep_interval: Duration,
    pub storage_timeout: Duration,
    /// Creates allowed per client per UTC day; zero disables the limit.
    pub daily_create_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("database"),
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            max_body_bytes: 2 * 1024 * 1024,
            sweep_interval: ONE_HOUR,
            storage_timeout: FIVE_SECONDS,
            daily_create_limit: DEFAULT_DAILY_CREATE_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, keeping the default
    /// for anything missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let sweep_secs = parse_or(
            "BURNBIN_SWEEP_INTERVAL_SECS",
            lookup("BURNBIN_SWEEP_INTERVAL_SECS").as_deref(),
            defaults.sweep_interval.as_secs(),
        );
        let sweep_interval = if sweep_secs == 0 {
            warn!("BURNBIN_SWEEP_INTERVAL_SECS must be positive, using the default");
            defaults.sweep_interval
        } else {
            Duration::from_secs(sweep_secs)
        };

        Self {
            db_path: lookup("BURNBIN_DB_PATH")
                .filter(|path| !path.trim().is_empty())
                .map_or(defaults.db_path, PathBuf::from),
            bind: parse_or("BURNBIN_BIND", lookup("BURNBIN_BIND").as_deref(), defaults.bind),
            max_content_chars: parse_or(
                "BURNBIN_MAX_CONTENT_CHARS",
                lookup("BURNBIN_MAX_CONTENT_CHARS").as_deref(),
                defaults.max_content_chars,
            ),
            max_body_bytes: parse_or(
                "BURNBIN_MAX_BODY_BYTES",
                lookup("BURNBIN_MAX_BODY_BYTES").as_deref(),
                defaults.max_body_bytes,
            ),
            sweep_interval,
            storage_timeout: Duration::from_millis(parse_or(
                "BURNBIN_STORAGE_TIMEOUT_MS",
                lookup("BURNBIN_STORAGE_TIMEOUT_MS").as_deref(),
                u64::try_from(defaults.storage_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            daily_create_limit: parse_or(
                "BURNBIN_DAILY_CREATE_LIMIT",
                lookup("BURNBIN_DAILY_CREATE_LIMIT").as_deref(),
                defaults.daily_create_limit,
            ),
        }
    }
}

/// Parse `value` if present, warning about and ignoring garbage.
fn parse_or<T: FromStr>(name: &str, value: Option<&str>, default: T) -> T {
    match value.map(str::trim) {
        None | Some("") => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {}={:?}, using the default", name, raw);
            default
        }),
    }
}
