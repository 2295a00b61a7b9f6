//! Runtime configuration from environment variables
//!
//! Binaries call `dotenv::dotenv()` first, so every variable can also come
//! from a `.env` file. Unset variables fall back to defaults; set but
//! unparsable ones are an error rather than being silently ignored.

use crate::pipeline::cutoff::CutoffOffset;
use crate::pipeline::producer::MalformedLinePolicy;
use crate::pipeline::supervisor::RetryPolicy;
use crate::store::DEFAULT_KEY_PREFIX;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Variable is set but empty where a value is required
    MissingVariable(&'static str),
    InvalidValue {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVariable(name) => write!(f, "{} must not be empty", name),
            ConfigError::InvalidValue { variable, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", variable, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where the hot tier lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotBackend {
    /// In-process map; only this process can query live counters
    Memory,
    /// Shared SQLite file; `stats_query` can read live counters
    Sqlite,
}

impl FromStr for HotBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(HotBackend::Memory),
            "sqlite" => Ok(HotBackend::Sqlite),
            other => Err(format!("unknown hot backend '{}' (expected memory|sqlite)", other)),
        }
    }
}

impl fmt::Display for HotBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotBackend::Memory => write!(f, "memory"),
            HotBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Transaction log replayed by the producer
    pub csv_path: PathBuf,
    /// Queue and cold tier database
    pub db_path: PathBuf,
    pub hot_backend: HotBackend,
    pub hot_db_path: PathBuf,
    pub key_prefix: String,
    pub queue_name: String,
    pub queue_pop_timeout: Duration,
    pub flush_interval: Duration,
    pub cutoff: CutoffOffset,
    pub retry: RetryPolicy,
    pub graceful_shutdown_timeout: Duration,
    pub forced_shutdown_timeout: Duration,
    pub malformed_lines: MalformedLinePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/transactions.csv"),
            db_path: PathBuf::from("data/txflow.db"),
            hot_backend: HotBackend::Sqlite,
            hot_db_path: PathBuf::from("data/txflow_hot.db"),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            queue_name: "transactions".to_string(),
            queue_pop_timeout: Duration::from_millis(1_000),
            flush_interval: Duration::from_millis(5_000),
            cutoff: CutoffOffset::default(),
            retry: RetryPolicy::default(),
            graceful_shutdown_timeout: Duration::from_secs(10),
            forced_shutdown_timeout: Duration::from_secs(2),
            malformed_lines: MalformedLinePolicy::Abort,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (defaults in parentheses):
    /// - `TXFLOW_CSV_PATH` (data/transactions.csv)
    /// - `TXFLOW_DB_PATH` (data/txflow.db)
    /// - `TXFLOW_HOT_BACKEND` (sqlite) - `memory` or `sqlite`
    /// - `TXFLOW_HOT_DB_PATH` (data/txflow_hot.db)
    /// - `TXFLOW_KEY_PREFIX` (agg)
    /// - `TXFLOW_QUEUE_NAME` (transactions)
    /// - `TXFLOW_QUEUE_POP_TIMEOUT_MS` (1000)
    /// - `TXFLOW_FLUSH_INTERVAL_MS` (5000)
    /// - `TXFLOW_CUTOFF_DAYS` / `_MINUTES` / `_SECONDS` (1 / 0 / 0)
    /// - `TXFLOW_RETRY_ATTEMPTS` (3)
    /// - `TXFLOW_RETRY_MULTIPLIER` (1.0)
    /// - `TXFLOW_RETRY_MIN_WAIT_MS` (1000)
    /// - `TXFLOW_RETRY_MAX_WAIT_MS` (10000)
    /// - `TXFLOW_GRACEFUL_SHUTDOWN_SECS` (10)
    /// - `TXFLOW_FORCE_SHUTDOWN_SECS` (2)
    /// - `TXFLOW_MALFORMED_LINES` (abort) - `abort` or `skip`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            csv_path: path_var(&lookup, "TXFLOW_CSV_PATH", defaults.csv_path)?,
            db_path: path_var(&lookup, "TXFLOW_DB_PATH", defaults.db_path)?,
            hot_backend: parse_var(&lookup, "TXFLOW_HOT_BACKEND", defaults.hot_backend)?,
            hot_db_path: path_var(&lookup, "TXFLOW_HOT_DB_PATH", defaults.hot_db_path)?,
            key_prefix: string_var(&lookup, "TXFLOW_KEY_PREFIX", defaults.key_prefix)?,
            queue_name: string_var(&lookup, "TXFLOW_QUEUE_NAME", defaults.queue_name)?,
            queue_pop_timeout: millis_var(
                &lookup,
                "TXFLOW_QUEUE_POP_TIMEOUT_MS",
                defaults.queue_pop_timeout,
            )?,
            flush_interval: millis_var(
                &lookup,
                "TXFLOW_FLUSH_INTERVAL_MS",
                defaults.flush_interval,
            )?,
            cutoff: CutoffOffset {
                days: parse_var(&lookup, "TXFLOW_CUTOFF_DAYS", defaults.cutoff.days)?,
                minutes: parse_var(&lookup, "TXFLOW_CUTOFF_MINUTES", defaults.cutoff.minutes)?,
                seconds: parse_var(&lookup, "TXFLOW_CUTOFF_SECONDS", defaults.cutoff.seconds)?,
            },
            retry: RetryPolicy {
                stop_attempt_count: parse_var(
                    &lookup,
                    "TXFLOW_RETRY_ATTEMPTS",
                    defaults.retry.stop_attempt_count,
                )?,
                multiplier: parse_var(
                    &lookup,
                    "TXFLOW_RETRY_MULTIPLIER",
                    defaults.retry.multiplier,
                )?,
                min_wait: millis_var(&lookup, "TXFLOW_RETRY_MIN_WAIT_MS", defaults.retry.min_wait)?,
                max_wait: millis_var(&lookup, "TXFLOW_RETRY_MAX_WAIT_MS", defaults.retry.max_wait)?,
            },
            graceful_shutdown_timeout: secs_var(
                &lookup,
                "TXFLOW_GRACEFUL_SHUTDOWN_SECS",
                defaults.graceful_shutdown_timeout,
            )?,
            forced_shutdown_timeout: secs_var(
                &lookup,
                "TXFLOW_FORCE_SHUTDOWN_SECS",
                defaults.forced_shutdown_timeout,
            )?,
            malformed_lines: parse_var(
                &lookup,
                "TXFLOW_MALFORMED_LINES",
                defaults.malformed_lines,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.stop_attempt_count == 0 {
            return Err(invalid("TXFLOW_RETRY_ATTEMPTS", "0", "must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 0.0 {
            return Err(invalid(
                "TXFLOW_RETRY_MULTIPLIER",
                &self.retry.multiplier.to_string(),
                "must be a non-negative number",
            ));
        }
        if self.retry.min_wait > self.retry.max_wait {
            return Err(invalid(
                "TXFLOW_RETRY_MIN_WAIT_MS",
                &self.retry.min_wait.as_millis().to_string(),
                "must not exceed TXFLOW_RETRY_MAX_WAIT_MS",
            ));
        }
        // Bounded so the offset always fits a chrono duration
        for (variable, value, max) in [
            ("TXFLOW_CUTOFF_DAYS", self.cutoff.days, 36_500),
            ("TXFLOW_CUTOFF_MINUTES", self.cutoff.minutes, 36_500 * 1_440),
            ("TXFLOW_CUTOFF_SECONDS", self.cutoff.seconds, 36_500 * 86_400),
        ] {
            if !(0..=max).contains(&value) {
                return Err(invalid(variable, &value.to_string(), "out of range"));
            }
        }
        if self.key_prefix.contains(':') || self.key_prefix.contains('*') {
            return Err(invalid(
                "TXFLOW_KEY_PREFIX",
                &self.key_prefix,
                "must not contain ':' or '*'",
            ));
        }
        Ok(())
    }
}

fn invalid(variable: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        variable,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &raw, &e.to_string())),
    }
}

fn string_var<F>(lookup: &F, name: &'static str, default: String) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::MissingVariable(name)),
        Some(raw) => Ok(raw.trim().to_string()),
    }
}

fn path_var<F>(lookup: &F, name: &'static str, default: PathBuf) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::MissingVariable(name)),
        Some(raw) => Ok(PathBuf::from(raw.trim())),
    }
}

fn millis_var<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_var(lookup, name, default_ms).map(Duration::from_millis)
}

fn secs_var<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var(lookup, name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.csv_path, PathBuf::from("data/transactions.csv"));
        assert_eq!(config.hot_backend, HotBackend::Sqlite);
        assert_eq!(config.key_prefix, "agg");
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.cutoff, CutoffOffset { days: 1, minutes: 0, seconds: 0 });
        assert_eq!(config.retry.stop_attempt_count, 3);
        assert_eq!(config.malformed_lines, MalformedLinePolicy::Abort);
    }

    #[test]
    fn test_custom_config() {
        let config = load(&[
            ("TXFLOW_CSV_PATH", "/tmp/tx.csv"),
            ("TXFLOW_HOT_BACKEND", "Memory"),
            ("TXFLOW_KEY_PREFIX", "stats"),
            ("TXFLOW_FLUSH_INTERVAL_MS", "250"),
            ("TXFLOW_CUTOFF_DAYS", "0"),
            ("TXFLOW_CUTOFF_MINUTES", "30"),
            ("TXFLOW_RETRY_ATTEMPTS", "5"),
            ("TXFLOW_RETRY_MULTIPLIER", "0.5"),
            ("TXFLOW_GRACEFUL_SHUTDOWN_SECS", "3"),
            ("TXFLOW_MALFORMED_LINES", "skip"),
        ])
        .unwrap();

        assert_eq!(config.csv_path, PathBuf::from("/tmp/tx.csv"));
        assert_eq!(config.hot_backend, HotBackend::Memory);
        assert_eq!(config.key_prefix, "stats");
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.cutoff, CutoffOffset { days: 0, minutes: 30, seconds: 0 });
        assert_eq!(config.retry.stop_attempt_count, 5);
        assert_eq!(config.retry.multiplier, 0.5);
        assert_eq!(config.graceful_shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.malformed_lines, MalformedLinePolicy::SkipAndLog);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("TXFLOW_FLUSH_INTERVAL_MS", "soon")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_FLUSH_INTERVAL_MS", .. })
        ));
        assert!(matches!(
            load(&[("TXFLOW_HOT_BACKEND", "redis")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_HOT_BACKEND", .. })
        ));
        assert!(matches!(
            load(&[("TXFLOW_RETRY_ATTEMPTS", "0")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_RETRY_ATTEMPTS", .. })
        ));
        assert!(matches!(
            load(&[("TXFLOW_RETRY_MIN_WAIT_MS", "20000")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_RETRY_MIN_WAIT_MS", .. })
        ));
        assert!(matches!(
            load(&[("TXFLOW_CUTOFF_DAYS", "-1")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_CUTOFF_DAYS", .. })
        ));
        assert!(matches!(
            load(&[("TXFLOW_KEY_PREFIX", "a:b")]),
            Err(ConfigError::InvalidValue { variable: "TXFLOW_KEY_PREFIX", .. })
        ));
        assert_eq!(
            load(&[("TXFLOW_QUEUE_NAME", "  ")]),
            Err(ConfigError::MissingVariable("TXFLOW_QUEUE_NAME"))
        );
    }
}
