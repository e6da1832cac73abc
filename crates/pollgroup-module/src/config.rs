//! Event-loop pool configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env()`)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use pollgroup_module::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .num_threads(4)
//!     .pin_threads(true);
//! ```

use std::time::Duration;

use pollgroup_core::env::{env_get, env_get_bool, env_get_micros};
use pollgroup_core::ConfigError;

/// Library defaults.
pub mod defaults {
    use std::time::Duration;

    /// Upper bound on the automatic thread count.
    pub const MAX_AUTO_THREADS: usize = 8;
    pub const PARK_TIMEOUT: Duration = Duration::from_micros(500);
    pub const MSG_BATCH: usize = 64;
    pub const PIN_THREADS: bool = false;
    pub const THREAD_NAME_PREFIX: &str = "pg-thread";
}

/// Hard limit on pool size.
pub const MAX_THREADS: usize = 256;

/// Event-loop pool configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of event-loop threads
    pub num_threads: usize,
    /// How long an idle thread parks before re-checking its mailbox
    pub park_timeout: Duration,
    /// Messages drained per loop iteration before pollers run
    pub msg_batch: usize,
    /// Pin thread N to CPU N (Linux only; ignored elsewhere)
    pub pin_threads: bool,
    /// Thread name prefix; threads are named `<prefix>-<index>`
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `PG_NUM_THREADS` - Number of event-loop threads
    /// - `PG_PARK_TIMEOUT_US` - Idle park timeout in microseconds
    /// - `PG_MSG_BATCH` - Messages per loop iteration
    /// - `PG_PIN_THREADS` - Pin threads to CPUs (0/1)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            num_threads: env_get("PG_NUM_THREADS", base.num_threads),
            park_timeout: env_get_micros("PG_PARK_TIMEOUT_US", base.park_timeout),
            msg_batch: env_get("PG_MSG_BATCH", base.msg_batch),
            pin_threads: env_get_bool("PG_PIN_THREADS", base.pin_threads),
            thread_name_prefix: base.thread_name_prefix,
        }
    }

    /// Library defaults only (no env override).
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            num_threads: cpus.clamp(1, defaults::MAX_AUTO_THREADS),
            park_timeout: defaults::PARK_TIMEOUT,
            msg_batch: defaults::MSG_BATCH,
            pin_threads: defaults::PIN_THREADS,
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
        }
    }

    // Builder methods

    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn msg_batch(mut self, n: usize) -> Self {
        self.msg_batch = n;
        self
    }

    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == 0 {
            return Err(ConfigError::InvalidValue("num_threads must be > 0"));
        }
        if self.num_threads > MAX_THREADS {
            return Err(ConfigError::InvalidValue("num_threads must be <= 256"));
        }
        if self.msg_batch == 0 {
            return Err(ConfigError::InvalidValue("msg_batch must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RuntimeConfig::new();
        assert!(config.num_threads >= 1);
        assert!(config.num_threads <= defaults::MAX_AUTO_THREADS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .num_threads(3)
            .msg_batch(8)
            .pin_threads(true)
            .thread_name_prefix("tgt");
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.msg_batch, 8);
        assert!(config.pin_threads);
        assert_eq!(config.thread_name_prefix, "tgt");
    }

    #[test]
    fn test_validation() {
        assert!(RuntimeConfig::new().num_threads(0).validate().is_err());
        assert!(RuntimeConfig::new().num_threads(1000).validate().is_err());
        assert!(RuntimeConfig::new().msg_batch(0).validate().is_err());
        assert!(RuntimeConfig::new()
            .park_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
