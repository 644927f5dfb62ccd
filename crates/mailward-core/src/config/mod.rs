//! Configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Out-of-range values are clamped by [`Config::clamped`], which
//! [`Config::from_file`] applies before returning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `[database]`
    pub database: DatabaseConfig,
    /// `[storage]`
    pub storage: StorageConfig,
    /// `[watcher]`
    pub watcher: WatcherConfig,
    /// `[retry]`
    pub retry: RetryConfig,
    /// `[smtp]`
    pub smtp: SmtpListenerConfig,
    /// `[release]`
    pub release: ReleaseConfig,
}

impl Config {
    /// Reads and parses `path`, then clamps out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config.clamped())
    }

    /// Loads `explicit` if given, which must then exist. Otherwise loads
    /// `fallback` when present and uses defaults when it is not.
    ///
    /// # Errors
    ///
    /// Returns an error if a file that should be read cannot be parsed.
    pub fn load(explicit: Option<&Path>, fallback: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if fallback.exists() {
            Self::from_file(fallback)
        } else {
            info!(path = %fallback.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Returns a copy with every clamped field forced into range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let w = &mut self.watcher;
        w.connect_timeout_secs = clamp("watcher.connect_timeout_secs", w.connect_timeout_secs, 5, 60);
        w.poll_interval_secs = clamp("watcher.poll_interval_secs", w.poll_interval_secs, 5, 300);
        w.sweep_last_n = clamp("watcher.sweep_last_n", w.sweep_last_n, 10, 500);
        self
    }
}

fn clamp<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> T {
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        warn!(field = name, value = %value, clamped = %clamped, "config value out of range");
    }
    clamped
}

/// `[database]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "mailward.db".to_string() }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for extracted and staged attachments.
    pub attachments_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { attachments_root: PathBuf::from("data/attachments") }
    }
}

/// Which quarantine folder names to try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantinePreference {
    /// Top-level folder first.
    #[default]
    Auto,
    /// `INBOX`-nested variants first.
    Inbox,
}

/// `[watcher]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Connect plus login bound, seconds (5..=60).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Sleep between polling cycles, seconds (5..=300).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Outer bound on one IDLE session, seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Re-check interval while idling, seconds.
    #[serde(default = "default_idle_ping_secs")]
    pub idle_ping_secs: u64,
    /// Slice length for each IDLE wait, seconds.
    #[serde(default = "default_idle_check_secs")]
    pub idle_check_secs: u64,
    /// Use IDLE when the server supports it.
    #[serde(default = "default_true")]
    pub idle_enabled: bool,
    /// Consecutive IDLE failures before forcing polling.
    #[serde(default = "default_idle_failure_limit")]
    pub idle_failure_limit: u32,
    /// How long polling is forced after IDLE keeps failing, seconds.
    #[serde(default = "default_idle_cooldown_secs")]
    pub idle_cooldown_secs: u64,
    /// Most recent INBOX UIDs re-examined every cycle (10..=500).
    #[serde(default = "default_sweep_last_n")]
    pub sweep_last_n: usize,
    /// Skip UID MOVE and always copy, flag and expunge.
    #[serde(default)]
    pub force_copy_purge: bool,
    /// Quarantine folder name ordering.
    #[serde(default)]
    pub quarantine_preference: QuarantinePreference,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            idle_ping_secs: default_idle_ping_secs(),
            idle_check_secs: default_idle_check_secs(),
            idle_enabled: true,
            idle_failure_limit: default_idle_failure_limit(),
            idle_cooldown_secs: default_idle_cooldown_secs(),
            sweep_last_n: default_sweep_last_n(),
            force_copy_purge: false,
            quarantine_preference: QuarantinePreference::Auto,
        }
    }
}

impl WatcherConfig {
    /// Connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Polling interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// IDLE outer bound as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// IDLE re-check interval as a `Duration`.
    #[must_use]
    pub const fn idle_ping(&self) -> Duration {
        Duration::from_secs(self.idle_ping_secs)
    }

    /// IDLE wait slice as a `Duration`.
    #[must_use]
    pub const fn idle_check(&self) -> Duration {
        Duration::from_secs(self.idle_check_secs)
    }

    /// Forced-polling cooldown as a `Duration`.
    #[must_use]
    pub const fn idle_cooldown(&self) -> Duration {
        Duration::from_secs(self.idle_cooldown_secs)
    }
}

const fn default_connect_timeout_secs() -> u64 {
    15
}

const fn default_poll_interval_secs() -> u64 {
    30
}

const fn default_idle_timeout_secs() -> u64 {
    1500 // 25 minutes, under the 29 minute RFC 2177 limit
}

const fn default_idle_ping_secs() -> u64 {
    840
}

const fn default_idle_check_secs() -> u64 {
    30
}

const fn default_idle_failure_limit() -> u32 {
    3
}

const fn default_idle_cooldown_secs() -> u64 {
    900
}

const fn default_sweep_last_n() -> usize {
    50
}

const fn default_true() -> bool {
    true
}

/// `[retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First reconnect delay, milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Reconnect delay cap, milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Consecutive failures that trip the circuit.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
    /// Attempts for a store write that hits a busy database.
    #[serde(default = "default_store_write_attempts")]
    pub store_write_attempts: u32,
    /// Pause between those attempts, milliseconds.
    #[serde(default = "default_store_write_delay_ms")]
    pub store_write_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            circuit_threshold: default_circuit_threshold(),
            store_write_attempts: default_store_write_attempts(),
            store_write_delay_ms: default_store_write_delay_ms(),
        }
    }
}

const fn default_base_delay_ms() -> u64 {
    5000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_jitter_factor() -> f64 {
    0.2
}

const fn default_circuit_threshold() -> u32 {
    5
}

const fn default_store_write_attempts() -> u32 {
    5
}

const fn default_store_write_delay_ms() -> u64 {
    500
}

/// `[smtp]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpListenerConfig {
    /// Bind address.
    #[serde(default = "default_smtp_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Largest accepted message, bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Name announced in the greeting.
    #[serde(default = "default_smtp_hostname")]
    pub hostname: String,
}

impl Default for SmtpListenerConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            max_message_size: default_max_message_size(),
            hostname: default_smtp_hostname(),
        }
    }
}

impl SmtpListenerConfig {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_smtp_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_smtp_port() -> u16 {
    8587
}

const fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

fn default_smtp_hostname() -> String {
    "mailward".to_string()
}

/// `[release]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Folder released messages are appended to.
    #[serde(default = "default_target_folder")]
    pub target_folder: String,
    /// Age after which a release lock may be reclaimed, seconds.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
    /// INBOX cleanup passes after APPEND.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
    /// First cleanup backoff, milliseconds; doubles each pass.
    #[serde(default = "default_cleanup_base_delay_ms")]
    pub cleanup_base_delay_ms: u64,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            target_folder: default_target_folder(),
            lock_stale_secs: default_lock_stale_secs(),
            cleanup_attempts: default_cleanup_attempts(),
            cleanup_base_delay_ms: default_cleanup_base_delay_ms(),
        }
    }
}

impl ReleaseConfig {
    /// Lock stale age as a `Duration`.
    #[must_use]
    pub const fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }
}

fn default_target_folder() -> String {
    "INBOX".to_string()
}

const fn default_lock_stale_secs() -> u64 {
    300
}

const fn default_cleanup_attempts() -> u32 {
    3
}

const fn default_cleanup_base_delay_ms() -> u64 {
    400
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database.path, "mailward.db");
        assert_eq!(config.watcher.poll_interval_secs, 30);
        assert_eq!(config.watcher.idle_timeout_secs, 1500);
        assert!(config.watcher.idle_enabled);
        assert_eq!(config.retry.jitter_factor, 0.2);
        assert_eq!(config.smtp.bind_addr(), "127.0.0.1:8587");
        assert_eq!(config.smtp.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.release.target_folder, "INBOX");
        assert_eq!(config.release.lock_stale(), Duration::from_secs(300));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [watcher]
            idle_enabled = false
            quarantine_preference = "inbox"

            [smtp]
            port = 2525
            "#,
        )
        .unwrap();
        assert!(!config.watcher.idle_enabled);
        assert_eq!(config.watcher.quarantine_preference, QuarantinePreference::Inbox);
        assert_eq!(config.watcher.sweep_last_n, 50);
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.hostname, "mailward");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::from_toml(
            "[watcher]\nconnect_timeout_secs = 1\npoll_interval_secs = 9000\nsweep_last_n = 3\n",
        )
        .unwrap();
        assert_eq!(config.watcher.connect_timeout_secs, 5);
        assert_eq!(config.watcher.poll_interval_secs, 300);
        assert_eq!(config.watcher.sweep_last_n, 10);
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(matches!(Config::from_toml("[smtp]\nport = \"x\""), Err(Error::ConfigParse(_))));
        assert!(matches!(
            Config::from_toml("[watcher]\nquarantine_preference = \"elsewhere\""),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn load_requires_explicit_file() {
        let missing = Path::new("/nonexistent/mailward.toml");
        assert!(matches!(Config::load(Some(missing), missing), Err(Error::Config(_))));
        assert_eq!(Config::load(None, missing).unwrap(), Config::default());
    }
}
