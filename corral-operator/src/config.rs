//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::backup::Feature;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The operator's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The Kubernetes namespace this operator reconciles.
    pub namespace: String,
    /// Path to the desired-state YAML document list.
    pub desired_state_path: String,

    /// Seconds between reconciliation passes.
    #[serde(default = "Config::default_reconcile_interval")]
    pub reconcile_interval_seconds: u64,
    /// Run the teardown path instead of reconciling.
    #[serde(default)]
    pub destroy: bool,

    /// Enabled feature tags. Unknown tags fail validation at startup.
    #[serde(default = "Config::default_features", deserialize_with = "Config::parse_features")]
    pub features: Vec<Feature>,

    /// The cluster DNS zone used in certificate SANs.
    #[serde(default = "Config::default_cluster_dns")]
    pub cluster_dns: String,
    /// Generate a fresh CA when no node secret exists. Disabled environments
    /// treat an absent node secret as a hard error instead.
    #[serde(default = "Config::default_true")]
    pub generate_node_certs: bool,
    /// Reuse existing client certificate secrets instead of rederiving them
    /// on every pass.
    #[serde(default)]
    pub reuse_client_certs: bool,
}

impl Config {
    /// Create a new config instance.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The interval between reconciliation passes.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    /// Parse the comma-separated feature tag list.
    fn parse_features<'de, D: Deserializer<'de>>(val: D) -> Result<Vec<Feature>, D::Error> {
        let raw: String = Deserialize::deserialize(val).map_err(|err| DeError::custom(format!("error parsing FEATURES: {}", err)))?;
        let tags: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(String::from)
            .collect();
        Feature::parse_list(&tags).map_err(|err| DeError::custom(format!("error parsing FEATURES: {}", err)))
    }

    fn default_reconcile_interval() -> u64 {
        60
    }

    fn default_features() -> Vec<Feature> {
        vec![Feature::Database, Feature::Backup]
    }

    fn default_cluster_dns() -> String {
        "cluster.local".into()
    }

    fn default_true() -> bool {
        true
    }
}
