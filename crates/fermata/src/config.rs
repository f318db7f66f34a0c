use serde::Deserialize;
use std::str::FromStr;

use crate::error::{PoolError, PoolResult};

/// Which idle connection a checkout hands out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    /// Oldest idle connection first. Spreads use evenly across the pool.
    #[default]
    Fifo,
    /// Most recently returned connection first. Lets rarely used connections
    /// age out instead of being handed out close to a server-side idle timeout.
    Lifo,
}

impl FromStr for ReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(ReusePolicy::Fifo),
            "lifo" => Ok(ReusePolicy::Lifo),
            other => Err(format!("unknown reuse policy: {other}")),
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections created and parked idle at construction (default: 0)
    pub initial_cap: usize,

    /// Upper bound on idle connections; extra returns are closed (default: 8)
    pub max_cap: usize,

    /// Idle reuse order (default: fifo)
    pub reuse: ReusePolicy,

    /// Readiness events drained per monitor wakeup (default: 128)
    pub event_batch: usize,

    /// Name of the liveness monitor thread (default: fermata-monitor)
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_cap: 0,
            max_cap: 8,
            reuse: ReusePolicy::Fifo,
            event_batch: 128,
            thread_name: "fermata-monitor".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn new(initial_cap: usize, max_cap: usize) -> Self {
        Self {
            initial_cap,
            max_cap,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables (with .env support).
    ///
    /// Unset or unparsable variables fall back to the defaults. The resulting
    /// capacities are validated.
    pub fn from_env() -> PoolResult<Self> {
        // Load .env file if present (ignore errors if missing)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = PoolConfig {
            initial_cap: env_parse("FERMATA_INITIAL_CAP").unwrap_or(defaults.initial_cap),
            max_cap: env_parse("FERMATA_MAX_CAP").unwrap_or(defaults.max_cap),
            reuse: env_parse("FERMATA_REUSE").unwrap_or(defaults.reuse),
            event_batch: env_parse("FERMATA_EVENT_BATCH").unwrap_or(defaults.event_batch),
            thread_name: std::env::var("FERMATA_THREAD_NAME").unwrap_or(defaults.thread_name),
        };
        config.validate()?;
        Ok(config)
    }

    /// `max_cap` must be positive and no smaller than `initial_cap`.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_cap == 0 || self.initial_cap > self.max_cap {
            return Err(PoolError::InvalidCapacity {
                initial_cap: self.initial_cap,
                max_cap: self.max_cap,
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
