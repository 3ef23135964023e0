use crate::core::{Result, UpgradeError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Upgrade configuration
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Name of the flag raised for the duration of a run
    pub maintenance_flag: String,

    /// Name of the single-holder upgrade lease
    pub lease_name: String,

    /// Lease time-to-live in seconds
    pub lease_ttl_secs: u64,

    /// Identity written into the lease record
    pub lease_holder: String,

    /// Refuse to run when no lease store is configured
    pub require_lease: bool,
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self {
            maintenance_flag: "maintenance_mode".to_string(),
            lease_name: "upgrade".to_string(),
            lease_ttl_secs: 900, // 15 minutes
            lease_holder: format!("upgradekit-{}", Uuid::new_v4()),
            require_lease: true,
        }
    }

    /// Set the maintenance flag name
    pub fn maintenance_flag(mut self, flag: &str) -> Self {
        self.maintenance_flag = flag.to_string();
        self
    }

    /// Set the lease name
    pub fn lease_name(mut self, name: &str) -> Self {
        self.lease_name = name.to_string();
        self
    }

    /// Set the lease TTL in seconds
    pub fn lease_ttl_secs(mut self, secs: u64) -> Self {
        self.lease_ttl_secs = secs;
        self
    }

    /// Set the lease holder identity
    pub fn lease_holder(mut self, holder: &str) -> Self {
        self.lease_holder = holder.to_string();
        self
    }

    /// Allow runs without a lease store
    pub fn require_lease(mut self, required: bool) -> Self {
        self.require_lease = required;
        self
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        let secs = i64::try_from(self.lease_ttl_secs).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.maintenance_flag.trim().is_empty() {
            return Err(UpgradeError::ConfigError(
                "maintenance_flag cannot be empty".to_string(),
            ));
        }

        if self.lease_name.trim().is_empty() {
            return Err(UpgradeError::ConfigError(
                "lease_name cannot be empty".to_string(),
            ));
        }

        if self.lease_holder.trim().is_empty() {
            return Err(UpgradeError::ConfigError(
                "lease_holder cannot be empty".to_string(),
            ));
        }

        // chrono panics on durations past i64 milliseconds
        if self.lease_ttl_secs == 0 || self.lease_ttl_secs > i64::MAX as u64 / 1000 {
            return Err(UpgradeError::ConfigError(format!(
                "lease_ttl_secs out of range: {}",
                self.lease_ttl_secs
            )));
        }

        Ok(())
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpgradeError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self::new()
    }
}
