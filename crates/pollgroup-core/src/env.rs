//! Environment overrides for the configuration layers
//!
//! Every knob uses the `PG_` prefix. A variable that is unset, or set to
//! something that does not parse, leaves the library default in place.
//!
//! # Usage
//!
//! ```ignore
//! use pollgroup_core::env::{env_get, env_get_bool, env_get_micros};
//!
//! let threads: usize = env_get("PG_NUM_THREADS", 4);
//! let pin = env_get_bool("PG_PIN_THREADS", false);
//! let park = env_get_micros("PG_PARK_TIMEOUT_US", Duration::from_micros(500));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and well-formed.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read `key` as a boolean.
///
/// `1/true/yes/on` and `0/false/no/off` are recognised (case-insensitive).
/// Anything else keeps `default`.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Ok(val) = std::env::var(key) else {
        return default;
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Read `key` as a whole number of microseconds.
pub fn env_get_micros(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_micros)
        .unwrap_or(default)
}
