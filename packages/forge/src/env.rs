// ABOUTME: Container environment assembly from layered app configuration
// ABOUTME: Overlays the always layer and injects app name, quotas, and VCAP_SERVICES

use crate::app_config::AppConfig;
use crate::Result;
use std::collections::BTreeMap;

pub const PACK_APP_NAME: &str = "PACK_APP_NAME";
pub const PACK_APP_MEM: &str = "PACK_APP_MEM";
pub const PACK_APP_DISK: &str = "PACK_APP_DISK";
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";

/// Which workflow-specific layer forms the base of the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvLayer {
    Staging,
    Running,
}

/// Apply `top` over `base`; keys in `top` win
pub fn overlay(
    base: &BTreeMap<String, String>,
    top: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(top.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Build the sorted `KEY=value` environment for a workflow container
///
/// `quotas` controls whether the memory and disk quotas are exported.
pub fn build_env(app: &AppConfig, layer: EnvLayer, quotas: bool) -> Result<Vec<String>> {
    let base = match layer {
        EnvLayer::Staging => &app.staging_env,
        EnvLayer::Running => &app.running_env,
    };
    let mut env = overlay(base, &app.env);

    env.insert(PACK_APP_NAME.to_string(), app.name.clone());
    if quotas {
        if let Some(memory) = app.memory_mb()? {
            env.insert(PACK_APP_MEM.to_string(), memory.to_string());
        }
        if let Some(disk) = app.disk_mb()? {
            env.insert(PACK_APP_DISK.to_string(), disk.to_string());
        }
    }
    env.insert(VCAP_SERVICES.to_string(), serde_json::to_string(&app.services)?);

    Ok(env
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect())
}
