//! Node and cluster configuration structures.
//!
//! Arena geometry (total size, block size, granularity) is deliberately
//! absent here: those are compile-time constants in
//! [`crate::constants`], shared by the allocator and its consumers, never
//! negotiated at runtime.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_COORD_PORT, DEFAULT_TABLET_COUNT, MAX_CLUSTER_SIZE, TABLET_BUCKET_COUNT,
};

/// Top-level configuration for a storage node.
///
/// # Example
///
/// ```rust
/// use opal_common::config::NodeConfig;
///
/// let config = NodeConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address of the cluster coordinator, `host:port`.
    pub coordinator_addr: String,

    /// Cluster configuration.
    pub cluster: ClusterConfig,

    /// Tablet configuration.
    pub tablet: TabletConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("127.0.0.1:{DEFAULT_COORD_PORT}"),
            cluster: ClusterConfig::default(),
            tablet: TabletConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        toml::from_str(&text).map_err(|e| e.to_string())
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    /// Creates a minimal configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cluster: ClusterConfig {
                cluster_size: 1,
                tablet_count: 2,
            },
            tablet: TabletConfig { bucket_count: 64 },
            ..Default::default()
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.cluster.validate()?;
        self.tablet.validate()?;

        if self.coordinator_addr.is_empty() {
            return Err("coordinator_addr must not be empty".to_string());
        }

        if self.cluster.tablet_count % self.cluster.cluster_size != 0 {
            return Err("tablet_count must be a multiple of cluster_size".to_string());
        }

        Ok(())
    }
}

/// Cluster formation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of storage nodes the coordinator waits for before it
    /// assigns tablets and lets the cluster serve traffic.
    pub cluster_size: usize,

    /// Number of tablets the key-hash space is split into. Must be a
    /// power of two and a multiple of `cluster_size`.
    pub tablet_count: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_size: 4,
            tablet_count: DEFAULT_TABLET_COUNT,
        }
    }
}

impl ClusterConfig {
    /// Validates the cluster configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster_size == 0 {
            return Err("cluster_size must be at least 1".to_string());
        }

        if self.cluster_size > MAX_CLUSTER_SIZE {
            return Err(format!("cluster_size must be at most {MAX_CLUSTER_SIZE}"));
        }

        if !self.tablet_count.is_power_of_two() {
            return Err("tablet_count must be a power of two".to_string());
        }

        Ok(())
    }
}

/// Per-tablet record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletConfig {
    /// Number of hash buckets. Must be a power of two.
    pub bucket_count: usize,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            bucket_count: TABLET_BUCKET_COUNT,
        }
    }
}

impl TabletConfig {
    /// Validates the tablet configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_count == 0 {
            return Err("bucket_count must be at least 1".to_string());
        }

        if !self.bucket_count.is_power_of_two() {
            return Err("bucket_count must be a power of two".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
        assert!(NodeConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_cluster() {
        let mut config = NodeConfig::default();
        config.cluster.cluster_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_power_of_two_tablets() {
        let mut config = NodeConfig::default();
        config.cluster.tablet_count = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_indivisible_tablets() {
        let mut config = NodeConfig::default();
        config.cluster.cluster_size = 3;
        config.cluster.tablet_count = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.cluster.cluster_size, config.cluster.cluster_size);
        assert_eq!(parsed.tablet.bucket_count, config.tablet.bucket_count);
    }
}
