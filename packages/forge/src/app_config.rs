// ABOUTME: Application manifest types: quotas, buildpacks, environment layers, and bound services
// ABOUTME: Also holds the network settings used to publish the application port

use crate::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A bound service instance as exposed to the app in `VCAP_SERVICES`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub credentials: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub syslog_drain_url: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub volume_mounts: Option<Vec<String>>,
}

/// Service type → instances of that type
pub type Services = BTreeMap<String, Vec<Service>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    /// Start command; empty lets the droplet's staged command apply
    pub command: Option<String>,
    /// Memory quota such as `512m` or `1G`
    pub memory: Option<String>,
    /// Disk quota such as `512m` or `1G`
    pub disk_quota: Option<String>,
    pub buildpack: Option<String>,
    pub buildpacks: Vec<String>,
    pub staging_env: BTreeMap<String, String>,
    pub running_env: BTreeMap<String, String>,
    /// Applied on top of both the staging and the running layer
    pub env: BTreeMap<String, String>,
    pub services: Services,
}

impl AppConfig {
    /// Configured buildpack order, if any
    ///
    /// `buildpacks` wins over the single `buildpack` entry. `None` means
    /// detection picks among the available buildpacks.
    pub fn buildpack_order(&self) -> Option<Vec<String>> {
        if !self.buildpacks.is_empty() {
            return Some(self.buildpacks.clone());
        }
        self.buildpack.as_ref().map(|buildpack| vec![buildpack.clone()])
    }

    pub fn memory_mb(&self) -> Result<Option<u64>> {
        self.memory.as_deref().map(parse_megabytes).transpose()
    }

    pub fn disk_mb(&self) -> Result<Option<u64>> {
        self.disk_quota.as_deref().map(parse_megabytes).transpose()
    }

    /// Memory quota in bytes, as the container memory limit
    pub fn memory_limit_bytes(&self) -> Result<Option<i64>> {
        self.memory_mb()?
            .map(|mb| {
                mb.checked_mul(1024 * 1024)
                    .and_then(|bytes| i64::try_from(bytes).ok())
                    .ok_or_else(|| {
                        ForgeError::Config(format!("memory quota of {}MB is too large", mb))
                    })
            })
            .transpose()
    }
}

/// Host address the app's `8080/tcp` port is published on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host_ip: String,
    pub host_port: String,
}

/// Parse a quota like `512m`, `1G`, or `2048` into megabytes
pub fn parse_megabytes(quota: &str) -> Result<u64> {
    let invalid = || ForgeError::Config(format!("invalid quota {:?}", quota));
    let normalized = quota.trim().to_ascii_uppercase();
    let normalized = normalized.strip_suffix('B').unwrap_or(normalized.as_str());

    let (digits, multiplier) = if let Some(digits) = normalized.strip_suffix('G') {
        (digits, 1024)
    } else if let Some(digits) = normalized.strip_suffix('M') {
        (digits, 1)
    } else {
        (normalized, 1)
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}
