//! Gateway configuration, loaded entirely from the process environment.
//!
//! There is no config file for this service — every knob in §6 of the
//! design spec is an environment variable with a documented default, in
//! the same validate-after-parse style the donor's `Config::from_file`
//! uses for its TOML file: parse everything first, then run `validate()`
//! and fail the whole load on the first bad value with a message naming
//! the offending variable, rather than silently falling back to a default
//! for a variable that was set but unparseable.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which per-(tenant, camera) manifest/segment
    /// assets are written. `STREAM_STORAGE_DIR`, default `./stream-data`.
    pub storage_dir: PathBuf,
    /// Shared HMAC secret used to verify playback tokens.
    /// `STREAM_TOKEN_SECRET`, default `"dev-secret-change-me"`.
    pub token_secret: String,
    /// Probe Loop tick interval. `STREAM_PROBE_INTERVAL_MS`, default 5000.
    pub probe_interval: Duration,
    /// Session idle timeout before an active session is swept to `ended`.
    /// `STREAM_SESSION_IDLE_TTL_MS`, default 60000.
    pub session_idle_ttl: Duration,
    /// Sweep Loop tick interval. `STREAM_SESSION_SWEEP_MS`, default 5000.
    pub session_sweep_interval: Duration,
    /// Max retry attempts for a transient-missing asset read.
    /// `STREAM_PLAYBACK_READ_RETRIES`, default 0.
    pub read_retries: u32,
    /// Base retry delay. `STREAM_PLAYBACK_READ_RETRY_BASE_MS`, default 25.
    pub read_retry_base: Duration,
    /// Max retry delay (backoff cap). `STREAM_PLAYBACK_READ_RETRY_MAX_MS`, default 250.
    pub read_retry_max: Duration,
    /// HTTP bind port. `STREAM_GATEWAY_PORT`, default 8088.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./stream-data"),
            token_secret: "dev-secret-change-me".to_string(),
            probe_interval: Duration::from_millis(5000),
            session_idle_ttl: Duration::from_millis(60_000),
            session_sweep_interval: Duration::from_millis(5000),
            read_retries: 0,
            read_retry_base: Duration::from_millis(25),
            read_retry_max: Duration::from_millis(250),
            port: 8088,
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// the defaults documented in the design spec for anything unset, and
    /// rejecting anything set to a value that doesn't parse.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            storage_dir: std::env::var("STREAM_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            token_secret: std::env::var("STREAM_TOKEN_SECRET").unwrap_or(defaults.token_secret),
            probe_interval: env_millis("STREAM_PROBE_INTERVAL_MS", defaults.probe_interval)?,
            session_idle_ttl: env_millis("STREAM_SESSION_IDLE_TTL_MS", defaults.session_idle_ttl)?,
            session_sweep_interval: env_millis(
                "STREAM_SESSION_SWEEP_MS",
                defaults.session_sweep_interval,
            )?,
            read_retries: env_parse("STREAM_PLAYBACK_READ_RETRIES", defaults.read_retries)?,
            read_retry_base: env_millis(
                "STREAM_PLAYBACK_READ_RETRY_BASE_MS",
                defaults.read_retry_base,
            )?,
            read_retry_max: env_millis(
                "STREAM_PLAYBACK_READ_RETRY_MAX_MS",
                defaults.read_retry_max,
            )?,
            port: env_parse("STREAM_GATEWAY_PORT", defaults.port)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.token_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "STREAM_TOKEN_SECRET",
                value: String::new(),
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

fn env_millis(key: &'static str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue {
                var: key,
                value: raw,
                reason: "must be a non-negative integer number of milliseconds",
            }),
        Err(_) => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: key,
            value: raw,
            reason: "must be a valid integer",
        }),
        Err(_) => Ok(default),
    }
}
