//! # Configuration
//!
//! One root structure with per-component sections, loadable from YAML with
//! explicit validation. Defaults encode the operational constants the system
//! ships with; a deployment overrides only what it needs.
//!
//! ```rust
//! use gridsink::config::GridsinkConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GridsinkConfig::from_yaml_str(
//!     "queue:\n  max_queue_size: 500\n",
//! )?;
//! assert_eq!(config.queue.max_queue_size, 500);
//! assert_eq!(config.queue.max_retries, 3); // untouched defaults remain
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GridsinkError, Result};

/// Environment variable consulted by [`GridsinkConfig::load`] for a config
/// file path. Absent the variable, defaults are used.
pub const CONFIG_PATH_ENV: &str = "GRIDSINK_CONFIG_PATH";

/// Root configuration for the delivery core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridsinkConfig {
    pub queue: QueueConfig,
    pub health: HealthConfig,
    pub rate_limiter: RateLimiterConfig,
    pub cache: CacheConfig,
}

/// Operation queue and delivery loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum buffered operations; overflow evicts the oldest entry.
    pub max_queue_size: usize,
    /// Retry budget per operation. An item is attempted once plus this many
    /// retries before it is dropped.
    pub max_retries: u32,
    /// First retry backoff; doubles per subsequent retry.
    pub base_retry_delay_ms: u64,
    /// Floor of the adaptive inter-operation delay.
    pub base_delay_ms: u64,
    /// Ceiling of the adaptive inter-operation delay.
    pub max_delay_ms: u64,
    /// Multiplier applied to the adaptive delay on failure, divisor on success.
    pub delay_multiplier: f64,
    /// How long the loop sleeps before re-checking when paused or unhealthy.
    pub unhealthy_pause_ms: u64,
    /// Number of upcoming items included in status snapshots.
    pub status_preview: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            delay_multiplier: 2.0,
            unhealthy_pause_ms: 10_000,
            status_preview: 3,
        }
    }
}

impl QueueConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn unhealthy_pause(&self) -> Duration {
        Duration::from_millis(self.unhealthy_pause_ms)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Period of the background health-check task.
    pub check_interval_ms: u64,
    /// Trailing window over which recent failures are counted.
    pub failure_window_ms: u64,
    /// Recent-failure count above which a health check triggers recovery.
    pub failure_threshold: usize,
    /// Recovery attempts before the monitor goes sticky-unhealthy.
    pub max_recovery_attempts: u32,
    /// Attempt n of recovery waits this long times n before reconnecting.
    pub recovery_base_wait_ms: u64,
    /// Capacity of the bounded failure ring.
    pub failure_ring_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 120_000,
            failure_window_ms: 600_000,
            failure_threshold: 5,
            max_recovery_attempts: 3,
            recovery_base_wait_ms: 5_000,
            failure_ring_capacity: 50,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    pub fn recovery_base_wait(&self) -> Duration {
        Duration::from_millis(self.recovery_base_wait_ms)
    }
}

/// Adaptive rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Minimum spacing between outbound calls under healthy conditions.
    pub base_interval_ms: u64,
    /// Ceiling the spacing may escalate to under sustained failures.
    pub max_interval_ms: u64,
    /// Multiplier applied to the spacing on pressure-classified failures.
    pub escalation_multiplier: f64,
    /// Divisor applied to the spacing on success.
    pub decay_divisor: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 1_100,
            max_interval_ms: 30_000,
            escalation_multiplier: 2.0,
            decay_divisor: 1.5,
        }
    }
}

impl RateLimiterConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry time-to-live.
    pub ttl_ms: u64,
    /// Period of the background sweep task.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl GridsinkConfig {
    /// Load configuration from the path named by `GRIDSINK_CONFIG_PATH`,
    /// falling back to defaults when the variable is unset.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_yaml_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject nonsensical settings before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_queue_size == 0 {
            return Err(GridsinkError::Configuration(
                "queue.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.queue.max_retries > 20 {
            return Err(GridsinkError::Configuration(
                "queue.max_retries must be 20 or fewer (exponential backoff overflows beyond that)"
                    .to_string(),
            ));
        }
        if self.queue.delay_multiplier <= 1.0 {
            return Err(GridsinkError::Configuration(
                "queue.delay_multiplier must be greater than 1.0".to_string(),
            ));
        }
        if self.queue.max_delay_ms < self.queue.base_delay_ms {
            return Err(GridsinkError::Configuration(
                "queue.max_delay_ms must be at least queue.base_delay_ms".to_string(),
            ));
        }
        if self.health.failure_ring_capacity == 0 {
            return Err(GridsinkError::Configuration(
                "health.failure_ring_capacity must be at least 1".to_string(),
            ));
        }
        if self.health.max_recovery_attempts == 0 {
            return Err(GridsinkError::Configuration(
                "health.max_recovery_attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_limiter.escalation_multiplier <= 1.0 {
            return Err(GridsinkError::Configuration(
                "rate_limiter.escalation_multiplier must be greater than 1.0".to_string(),
            ));
        }
        if self.rate_limiter.decay_divisor <= 1.0 {
            return Err(GridsinkError::Configuration(
                "rate_limiter.decay_divisor must be greater than 1.0".to_string(),
            ));
        }
        if self.rate_limiter.max_interval_ms < self.rate_limiter.base_interval_ms {
            return Err(GridsinkError::Configuration(
                "rate_limiter.max_interval_ms must be at least rate_limiter.base_interval_ms"
                    .to_string(),
            ));
        }
        if self.cache.ttl_ms == 0 {
            return Err(GridsinkError::Configuration(
                "cache.ttl_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
