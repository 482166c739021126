use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Maximum length of a rendered cache key.
pub const MAX_KEY_LEN: usize = 200;

/// Upper bound for every TTL and lifetime setting, in seconds (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound for every deadline and probe interval, in milliseconds (one day).
pub const MAX_DEADLINE_MS: u64 = 24 * 60 * 60 * 1000;

/// Complete configuration of the cache layer.
///
/// Loaded once at startup (see [`loader::load_config`]), validated, then
/// passed by reference into every constructor. Nothing reads configuration
/// from global state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Remote (L2) tier connection settings
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
    /// In-process (L1) cache settings
    #[serde(default)]
    pub local: LocalCacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        // Remote
        if self.remote.host.trim().is_empty() {
            return Err(invalid("remote.host must not be empty"));
        }
        if self.remote.port == 0 {
            return Err(invalid("remote.port must be > 0"));
        }
        // Keys
        let prefix = &self.keys.domain_prefix;
        if prefix.is_empty() {
            return Err(invalid("keys.domain_prefix must not be empty"));
        }
        if !prefix.is_ascii() || prefix.chars().any(char::is_whitespace) {
            return Err(invalid(
                "keys.domain_prefix must be ASCII without whitespace",
            ));
        }
        if prefix.len() > MAX_KEY_LEN / 2 {
            return Err(invalid(format!(
                "keys.domain_prefix must be at most {} characters",
                MAX_KEY_LEN / 2
            )));
        }
        // TTL
        if self.ttl.default_secs == 0 {
            return Err(invalid("ttl.default_secs must be > 0"));
        }
        if self.ttl.default_secs > MAX_TTL_SECS {
            return Err(invalid(format!(
                "ttl.default_secs must be <= {MAX_TTL_SECS}"
            )));
        }
        for (category, secs) in &self.ttl.overrides {
            if *secs == 0 || *secs > MAX_TTL_SECS {
                return Err(invalid(format!(
                    "ttl.overrides.{category} must be within 1..={MAX_TTL_SECS}"
                )));
            }
        }
        // Pool
        if self.pool.max_active == 0 {
            return Err(invalid("pool.max_active must be > 0"));
        }
        if self.pool.min_idle > self.pool.max_idle {
            return Err(invalid("pool.min_idle must be <= pool.max_idle"));
        }
        if self.pool.max_idle > self.pool.max_active {
            return Err(invalid("pool.max_idle must be <= pool.max_active"));
        }
        check_secs("pool.max_lifetime_secs", self.pool.max_lifetime_secs)?;
        // Timeouts
        check_ms("timeouts.dial_ms", self.timeouts.dial_ms)?;
        check_ms("timeouts.read_ms", self.timeouts.read_ms)?;
        check_ms("timeouts.write_ms", self.timeouts.write_ms)?;
        // Health
        let h = &self.health;
        check_ms("health.interval_ms", h.interval_ms)?;
        check_ms("health.timeout_ms", h.timeout_ms)?;
        if h.retry_ceiling == 0 {
            return Err(invalid("health.retry_ceiling must be > 0"));
        }
        check_secs("health.error_window_secs", h.error_window_secs)?;
        check_ms("health.max_response_time_ms", h.max_response_time_ms)?;
        if !(0.0..=1.0).contains(&h.max_error_rate) {
            return Err(invalid("health.max_error_rate must be within [0, 1]"));
        }
        // Local
        check_secs("local.ttl_secs", self.local.ttl_secs)?;
        if self.local.max_entries == 0 {
            return Err(invalid("local.max_entries must be > 0"));
        }
        // Logging
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// `now + ttl`, with `ttl` capped at [`MAX_TTL_SECS`] so the sum cannot
/// overflow for TTLs handed in outside of a validated config.
pub(crate) fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(Duration::from_secs(MAX_TTL_SECS));
    now.checked_add(ttl).unwrap_or(now)
}

fn invalid(message: impl Into<String>) -> CacheError {
    CacheError::validation(message)
}

fn check_secs(field: &str, secs: u64) -> Result<(), CacheError> {
    if secs == 0 || secs > MAX_TTL_SECS {
        return Err(invalid(format!("{field} must be within 1..={MAX_TTL_SECS}")));
    }
    Ok(())
}

fn check_ms(field: &str, ms: u64) -> Result<(), CacheError> {
    if ms == 0 || ms > MAX_DEADLINE_MS {
        return Err(invalid(format!("{field} must be within 1..={MAX_DEADLINE_MS}")));
    }
    Ok(())
}

/// Remote cache connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_host")]
    pub host: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// ACL username (Redis 6+). Optional.
    #[serde(default)]
    pub username: Option<String>,
    /// For security, prefer the LIBRIS__REMOTE__PASSWORD env var.
    #[serde(default)]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub database: u8,
}

fn default_remote_host() -> String {
    "localhost".into()
}
fn default_remote_port() -> u16 {
    6379
}

impl RemoteConfig {
    /// Returns the connection URL: `redis://[user][:password@]host:port/db`.
    pub fn connection_url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (None, Some(pass)) => format!(":{pass}@"),
            (Some(user), None) => format!("{user}@"),
            (None, None) => String::new(),
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            username: None,
            password: None,
            database: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Prefix shared by every key this service writes, e.g. `library:`.
    #[serde(default = "default_domain_prefix")]
    pub domain_prefix: String,
}

fn default_domain_prefix() -> String {
    "library:".into()
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            domain_prefix: default_domain_prefix(),
        }
    }
}

/// Time-to-live per cache category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_secs: u64,
    /// Category name (e.g. "homepage", "detail") to TTL in seconds.
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

fn default_ttl_secs() -> u64 {
    300
}

impl TtlConfig {
    pub fn ttl_for(&self, category: &str) -> Duration {
        let secs = self
            .overrides
            .get(category)
            .copied()
            .unwrap_or(self.default_secs);
        Duration::from_secs(secs)
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_secs: default_ttl_secs(),
            overrides: HashMap::new(),
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Idle-connection floor; the health monitor degrades below it. 0 disables.
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,
    /// Idle connections above this are released on each health cycle.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

fn default_min_idle() -> usize {
    0
}
fn default_max_idle() -> usize {
    8
}
fn default_max_active() -> usize {
    16
}
fn default_max_lifetime_secs() -> u64 {
    1800
}

impl PoolConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: default_min_idle(),
            max_idle: default_max_idle(),
            max_active: default_max_active(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection establishment deadline
    #[serde(default = "default_dial_ms")]
    pub dial_ms: u64,
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
}

fn default_dial_ms() -> u64 {
    2000
}
fn default_read_ms() -> u64 {
    500
}
fn default_write_ms() -> u64 {
    500
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: default_dial_ms(),
            read_ms: default_read_ms(),
            write_ms: default_write_ms(),
        }
    }
}

/// Remote tier health probing and degrade thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    /// Deadline of a single probe ping
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failed probes before the tier is marked degraded
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Trailing window over which the probe error rate is computed
    #[serde(default = "default_error_window_secs")]
    pub error_window_secs: u64,
    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: u64,
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    /// Remote memory ceiling in bytes. 0 disables.
    #[serde(default)]
    pub max_memory_bytes: u64,
}

fn default_health_interval_ms() -> u64 {
    10_000
}
fn default_health_timeout_ms() -> u64 {
    1000
}
fn default_retry_ceiling() -> u32 {
    3
}
fn default_error_window_secs() -> u64 {
    60
}
fn default_max_response_time_ms() -> u64 {
    100
}
fn default_max_error_rate() -> f64 {
    0.1
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn error_window(&self) -> Duration {
        Duration::from_secs(self.error_window_secs)
    }
    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            timeout_ms: default_health_timeout_ms(),
            retry_ceiling: default_retry_ceiling(),
            error_window_secs: default_error_window_secs(),
            max_response_time_ms: default_max_response_time_ms(),
            max_error_rate: default_max_error_rate(),
            max_memory_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    #[serde(default = "default_local_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_local_max_entries")]
    pub max_entries: usize,
}

fn default_local_ttl_secs() -> u64 {
    60
}
fn default_local_max_entries() -> usize {
    10_000
}

impl LocalCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_local_ttl_secs(),
            max_entries: default_local_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacheConfig;
    use crate::error::CacheError;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads `path` (or `libris.toml` when present) layered under
    /// `LIBRIS__SECTION__KEY` environment overrides, then validates.
    pub fn load_config(path: Option<&str>) -> Result<CacheConfig, CacheError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("libris.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(CacheError::validation(format!(
                "config file not found: {}",
                pathbuf.display()
            )));
        }
        // Environment variable overrides, e.g., LIBRIS__REMOTE__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("LIBRIS")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::validation(format!("config build error: {e}")))?;
        let merged: CacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::validation(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
