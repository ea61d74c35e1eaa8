//! Resource pool configuration structures.

use serde::{Deserialize, Serialize};

use crate::util::serde::{ResourceId, ResourceKind};

/// Type-specific resource settings, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// HTTP client connections.
    Http {
        /// Base URL requests are issued against.
        base_url: String,
        /// Keep-alive in seconds.
        #[serde(default = "default_keep_alive_secs")]
        keep_alive_secs: u64,
    },
    /// Database connections.
    Database {
        /// Connection string handed to the executor.
        connection_string: String,
    },
    /// Cache client connections.
    Cache {
        /// Cache host.
        host: String,
        /// Cache port.
        port: u16,
    },
    /// Rate-limited API clients.
    Api {
        /// API endpoint.
        endpoint: String,
        /// Requests per minute allowed per resource.
        #[serde(default = "default_rate_limit")]
        rate_limit_per_min: u32,
    },
}

const fn default_keep_alive_secs() -> u64 {
    30
}

const fn default_rate_limit() -> u32 {
    60
}

impl ResourceSpec {
    /// Kind tag of this spec.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Http { .. } => ResourceKind::Http,
            Self::Database { .. } => ResourceKind::Database,
            Self::Cache { .. } => ResourceKind::Cache,
            Self::Api { .. } => ResourceKind::Api,
        }
    }

    /// Connection info placed in the lease descriptor for `resource`.
    #[must_use]
    pub fn connection_info(&self, resource: &ResourceId) -> String {
        match self {
            Self::Http { base_url, keep_alive_secs } => {
                format!("{base_url}#conn={resource};keep_alive={keep_alive_secs}s")
            }
            Self::Database { connection_string } => {
                format!("{connection_string}#conn={resource}")
            }
            Self::Cache { host, port } => format!("{host}:{port}#conn={resource}"),
            Self::Api { endpoint, rate_limit_per_min } => {
                format!("{endpoint}#conn={resource};rpm={rate_limit_per_min}")
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        let empty = match self {
            Self::Http { base_url, .. } => base_url.is_empty(),
            Self::Database { connection_string } => connection_string.is_empty(),
            Self::Cache { host, .. } => host.is_empty(),
            Self::Api { endpoint, rate_limit_per_min } => {
                if *rate_limit_per_min == 0 {
                    return Err("rate_limit_per_min must be greater than 0".into());
                }
                endpoint.is_empty()
            }
        };
        if empty {
            return Err(format!("{} resource target must not be empty", self.kind()));
        }
        Ok(())
    }
}

/// Utilization thresholds and resize steps used by the health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Usage strictly above this marks the pool overloaded.
    pub overloaded_above: f64,
    /// Usage strictly below this marks the pool underutilized.
    pub underutilized_below: f64,
    /// Resources added when overloaded.
    pub grow_step: usize,
    /// Resources removed when underutilized.
    pub shrink_step: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            overloaded_above: 0.9,
            underutilized_below: 0.1,
            grow_step: 2,
            shrink_step: 1,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Initial number of resources.
    pub size: usize,
    /// Lower bound on total resources.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Upper bound on total resources.
    pub max_size: usize,
    /// Type-specific resource settings.
    #[serde(flatten)]
    pub resource: ResourceSpec,
    /// Default acquire timeout in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Upper bound on one condvar wait while acquiring, so releases made by
    /// other processes are noticed.
    #[serde(default = "default_acquire_poll_ms")]
    pub acquire_poll_ms: u64,
    /// Grow by one resource inside `acquire` when none is idle and the pool
    /// is below `max_size`.
    #[serde(default)]
    pub grow_on_demand: bool,
    /// Health check thresholds.
    #[serde(default)]
    pub health: HealthThresholds,
}

const fn default_min_size() -> usize {
    1
}

const fn default_acquire_timeout_ms() -> u64 {
    5_000
}

const fn default_acquire_poll_ms() -> u64 {
    50
}

impl PoolConfig {
    /// Create a config of one resource (bounds 1..=1) for `resource`.
    #[must_use]
    pub fn new(resource: ResourceSpec) -> Self {
        Self {
            size: 1,
            min_size: default_min_size(),
            max_size: 1,
            resource,
            acquire_timeout_ms: default_acquire_timeout_ms(),
            acquire_poll_ms: default_acquire_poll_ms(),
            grow_on_demand: false,
            health: HealthThresholds::default(),
        }
    }

    /// Set the initial size.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the `[min, max]` bounds.
    #[must_use]
    pub const fn with_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    /// Enable or disable growth inside `acquire`.
    #[must_use]
    pub const fn with_grow_on_demand(mut self, enabled: bool) -> Self {
        self.grow_on_demand = enabled;
        self
    }

    /// Replace the health thresholds.
    #[must_use]
    pub fn with_health(mut self, health: HealthThresholds) -> Self {
        self.health = health;
        self
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0".into());
        }
        if self.min_size > self.max_size {
            return Err(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            ));
        }
        if self.size < self.min_size || self.size > self.max_size {
            return Err(format!(
                "size {} outside [{}, {}]",
                self.size, self.min_size, self.max_size
            ));
        }
        if self.acquire_poll_ms == 0 {
            return Err("acquire_poll_ms must be greater than 0".into());
        }
        let h = &self.health;
        if !(0.0..=1.0).contains(&h.underutilized_below)
            || !(0.0..=1.0).contains(&h.overloaded_above)
            || h.underutilized_below >= h.overloaded_above
        {
            return Err(
                "health thresholds must satisfy 0 <= underutilized < overloaded <= 1".into(),
            );
        }
        if h.grow_step == 0 || h.shrink_step == 0 {
            return Err("grow_step and shrink_step must be greater than 0".into());
        }
        self.resource.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http() -> ResourceSpec {
        ResourceSpec::Http {
            base_url: "http://localhost:8080".into(),
            keep_alive_secs: 30,
        }
    }

    #[test]
    fn test_builder_and_validate() {
        let cfg = PoolConfig::new(http()).with_size(3).with_bounds(1, 5);
        assert!(cfg.validate().is_ok());
        assert!(PoolConfig::new(http()).with_size(6).with_bounds(1, 5).validate().is_err());
        assert!(PoolConfig::new(http()).with_size(0).with_bounds(1, 5).validate().is_err());
        assert!(PoolConfig::new(http()).with_size(2).with_bounds(3, 2).validate().is_err());
    }

    #[test]
    fn test_flattened_type_tag() {
        let json = r#"{"size": 2, "max_size": 4, "type": "cache", "host": "redis", "port": 6379}"#;
        let cfg: PoolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.min_size, 1);
        assert_eq!(cfg.resource.kind(), ResourceKind::Cache);
        assert_eq!(cfg.acquire_timeout_ms, 5_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_connection_info_mentions_resource() {
        let info = http().connection_info(&ResourceId::for_pool("web", 1));
        assert!(info.starts_with("http://localhost:8080"));
        assert!(info.contains("web-1"));
    }

    #[test]
    fn test_invalid_thresholds() {
        let cfg = PoolConfig::new(http()).with_health(HealthThresholds {
            overloaded_above: 0.2,
            underutilized_below: 0.5,
            grow_step: 1,
            shrink_step: 1,
        });
        assert!(cfg.validate().is_err());
    }
}
