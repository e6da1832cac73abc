//! Target configuration
//!
//! Library defaults, overridable from the environment, then by builder
//! calls.
//!
//! ```rust,ignore
//! use pollgroup::{ConnSchedPolicy, TargetConfig};
//!
//! let config = TargetConfig::from_env()
//!     .conn_sched(ConnSchedPolicy::HostIp)
//!     .max_subsystems(64);
//! ```

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use pollgroup_core::env::{env_get, env_get_micros};
use pollgroup_core::ConfigError;

/// Library defaults.
pub mod defaults {
    use std::time::Duration;

    use super::ConnSchedPolicy;

    pub const NAME: &str = "nvmf_tgt";
    pub const CONN_SCHED: ConnSchedPolicy = ConnSchedPolicy::RoundRobin;
    pub const MAX_SUBSYSTEMS: u32 = 1024;
    /// 0 = unbounded
    pub const MAX_AFFINITY_ENTRIES: usize = 0;
    /// Zero runs the poll loop on every event-loop iteration.
    pub const POLL_PERIOD: Duration = Duration::ZERO;
}

/// How new qpairs are placed on poll groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnSchedPolicy {
    /// Strict rotation over live poll groups in creation order.
    #[default]
    RoundRobin,
    /// Qpairs from the same host address share a poll group.
    HostIp,
}

impl FromStr for ConnSchedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roundrobin" | "round_robin" | "rr" => Ok(Self::RoundRobin),
            "hostip" | "host_ip" => Ok(Self::HostIp),
            _ => Err(ConfigError::UnknownConnSched(s.to_string())),
        }
    }
}

impl fmt::Display for ConnSchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("roundrobin"),
            Self::HostIp => f.write_str("hostip"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Target name, used in log output
    pub name: String,
    /// Qpair placement policy
    pub conn_sched: ConnSchedPolicy,
    /// Size of the subsystem slot array, fixed for the target's lifetime
    pub max_subsystems: u32,
    /// Bound on affinity cache entries (0 = unbounded)
    pub max_affinity_entries: usize,
    /// Period of each poll group's poller
    pub poll_period: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TargetConfig {
    /// Defaults with environment overrides.
    ///
    /// - `PG_CONN_SCHED` - `roundrobin` or `hostip`
    /// - `PG_MAX_SUBSYSTEMS` - subsystem slots per target
    /// - `PG_MAX_AFFINITY_ENTRIES` - affinity cache bound (0 = unbounded)
    /// - `PG_POLL_PERIOD_US` - poller period in microseconds
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            name: base.name,
            conn_sched: env_get("PG_CONN_SCHED", base.conn_sched),
            max_subsystems: env_get("PG_MAX_SUBSYSTEMS", base.max_subsystems),
            max_affinity_entries: env_get("PG_MAX_AFFINITY_ENTRIES", base.max_affinity_entries),
            poll_period: env_get_micros("PG_POLL_PERIOD_US", base.poll_period),
        }
    }

    /// Library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            name: defaults::NAME.to_string(),
            conn_sched: defaults::CONN_SCHED,
            max_subsystems: defaults::MAX_SUBSYSTEMS,
            max_affinity_entries: defaults::MAX_AFFINITY_ENTRIES,
            poll_period: defaults::POLL_PERIOD,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn conn_sched(mut self, policy: ConnSchedPolicy) -> Self {
        self.conn_sched = policy;
        self
    }

    pub fn max_subsystems(mut self, n: u32) -> Self {
        self.max_subsystems = n;
        self
    }

    pub fn max_affinity_entries(mut self, n: usize) -> Self {
        self.max_affinity_entries = n;
        self
    }

    pub fn poll_period(mut self, d: Duration) -> Self {
        self.poll_period = d;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidValue("name must not be empty"));
        }
        if self.max_subsystems == 0 {
            return Err(ConfigError::InvalidValue("max_subsystems must be > 0"));
        }
        Ok(())
    }
}
