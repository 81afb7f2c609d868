use crate::core::{KernelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Idle window after which an untouched transaction is rolled back (3 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Environment variable overriding the transaction idle timeout, in milliseconds.
pub const TIMEOUT_ENV: &str = "REPOKERNEL_TX_TIMEOUT_MS";

/// Generic name for the same setting, used when `REPOKERNEL_TX_TIMEOUT_MS` is unset.
pub const TIMEOUT_ALIAS_ENV: &str = "TIMEOUT_DURATION";

/// Environment variable overriding the reaper sweep interval, in milliseconds.
pub const REAPER_INTERVAL_ENV: &str = "REPOKERNEL_REAPER_INTERVAL_MS";

/// Kernel configuration
///
/// Built with chained setters, optionally seeded from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Idle timeout of a transaction
    pub timeout: Duration,

    /// How often the reaper sweeps. Defaults to half the timeout.
    pub reaper_interval: Option<Duration>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            reaper_interval: None,
        }
    }

    /// Defaults, overridden by `REPOKERNEL_TX_TIMEOUT_MS` (or `TIMEOUT_DURATION`)
    /// and `REPOKERNEL_REAPER_INTERVAL_MS` when set. All values are milliseconds.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            config.timeout = parse_millis(TIMEOUT_ENV, &raw)?;
        } else if let Some(raw) = lookup(TIMEOUT_ALIAS_ENV) {
            config.timeout = parse_millis(TIMEOUT_ALIAS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(REAPER_INTERVAL_ENV) {
            config.reaper_interval = Some(parse_millis(REAPER_INTERVAL_ENV, &raw)?);
        }
        config.validate().map_err(KernelError::ConfigError)?;
        Ok(config)
    }

    /// Set the idle timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the reaper sweep interval
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = Some(interval);
        self
    }

    /// The interval the reaper starts with. Without a configured interval it
    /// tracks half the live timeout afterwards.
    pub fn effective_reaper_interval(&self) -> Duration {
        self.reaper_interval.unwrap_or(self.timeout / 2)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if let Some(interval) = self.reaper_interval {
            if interval.is_zero() {
                return Err("reaper_interval must be greater than 0".to_string());
            }
            if interval > self.timeout {
                return Err(format!(
                    "reaper_interval ({:?}) must not exceed timeout ({:?})",
                    interval, self.timeout
                ));
            }
        }

        Ok(())
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| KernelError::ConfigError(format!("{} = '{}': {}", key, raw, err)))
}

/// Live, shared idle-timeout setting.
///
/// Every clone sees the same value, so changing it through one handle
/// affects the next `begin`/`touch` of every unit of work.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    millis: Arc<AtomicU64>,
}

impl TimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(duration_millis(timeout))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(KernelError::ConfigError(
                "timeout must be greater than 0".to_string(),
            ));
        }
        self.millis.store(duration_millis(timeout), Ordering::SeqCst);
        Ok(())
    }

    /// `now` plus the timeout as configured at this moment.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let millis = i64::try_from(self.millis.load(Ordering::SeqCst)).unwrap_or(i64::MAX);
        now.checked_add_signed(chrono::Duration::milliseconds(millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
