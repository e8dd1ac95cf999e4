//! # Runtime configuration for the retry core.
//!
//! [`Config`] centralizes the knobs governing backoff, per-attempt deadlines,
//! and shutdown drain grace. Every knob can also be supplied through the
//! environment (see [`Config::from_env`]), using the upper-cased knob name:
//!
//! | Variable | Default | Effect |
//! |---|---|---|
//! | `RPCS_SHUTDOWN_TIMEOUT_MS` | 15000 | Base grace for [`Rpcs::shutdown`](crate::Rpcs::shutdown) drain. |
//! | `RPCS_SHUTDOWN_EXTRA_DELAY_MS` | 5000 | Extra per-call slack beyond each call's deadline. |
//! | `RETRYABLE_RPC_SINGLE_CALL_TIMEOUT_MS` | 2500 | Default per-attempt deadline ceiling. |
//! | `MIN_BACKOFF_MS_EXPONENT` | 7 | Minimum exponent of the `1 << e` busy backoff (128 ms). |
//! | `MAX_BACKOFF_MS_EXPONENT` | 16 | Maximum exponent (caps backoff at ~65 s). |
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use rpcvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.shutdown_timeout = Duration::from_secs(5);
//! cfg.min_backoff_exponent = 4;
//!
//! assert_eq!(cfg.min_backoff_exponent, 4);
//! ```

use std::time::Duration;

/// Knobs for the retrier and the in-flight registry.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base grace period for a batch of in-flight commands to drain at shutdown.
    pub shutdown_timeout: Duration,
    /// Extra allowed time for a single command to complete after its deadline.
    pub shutdown_extra_delay: Duration,
    /// Default deadline ceiling for a single attempt of a retryable command.
    pub single_call_timeout: Duration,
    /// Minimum exponent of the `1 << e` millisecond backoff on busy servers.
    pub min_backoff_exponent: u32,
    /// Maximum exponent of the `1 << e` millisecond backoff on busy servers.
    pub max_backoff_exponent: u32,
    /// Capacity of the lifecycle event bus channel.
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Provides the stock configuration:
    /// - `shutdown_timeout = 15s`
    /// - `shutdown_extra_delay = 5s`
    /// - `single_call_timeout = 2.5s`
    /// - `min_backoff_exponent = 7` (128 ms)
    /// - `max_backoff_exponent = 16` (~65 s)
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_millis(15_000),
            shutdown_extra_delay: Duration::from_millis(5_000),
            single_call_timeout: Duration::from_millis(2_500),
            min_backoff_exponent: 7,
            max_backoff_exponent: 16,
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Builds a configuration from the process environment, falling back to
    /// the defaults for unset or unparsable variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            shutdown_timeout: lookup_ms(
                &lookup,
                "RPCS_SHUTDOWN_TIMEOUT_MS",
                defaults.shutdown_timeout,
            ),
            shutdown_extra_delay: lookup_ms(
                &lookup,
                "RPCS_SHUTDOWN_EXTRA_DELAY_MS",
                defaults.shutdown_extra_delay,
            ),
            single_call_timeout: lookup_ms(
                &lookup,
                "RETRYABLE_RPC_SINGLE_CALL_TIMEOUT_MS",
                defaults.single_call_timeout,
            ),
            min_backoff_exponent: lookup_parse(
                &lookup,
                "MIN_BACKOFF_MS_EXPONENT",
                defaults.min_backoff_exponent,
            ),
            max_backoff_exponent: lookup_parse(
                &lookup,
                "MAX_BACKOFF_MS_EXPONENT",
                defaults.max_backoff_exponent,
            ),
            bus_capacity: defaults.bus_capacity,
        }
    }
}

fn lookup_ms(lookup: impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    lookup(name)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn lookup_parse<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    lookup(name)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}
