// ABOUTME: Engine tuning knobs for health polling, restarts, and log draining
// ABOUTME: Defaults match the runtime contract and can be overridden from the environment

use forge_config::{constants, env_u64};
use std::time::Duration;

/// Seconds between health polls
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 1;

/// Grace period the runtime gives the old process before killing it on restart
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 1;

/// How far before the new start time log following resumes after a restart
const DEFAULT_LOG_SINCE_OFFSET_MS: u64 = 100;

/// How long a finished container's log stream may take to reach EOF
const DEFAULT_LOG_DRAIN_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub health_check_interval: Duration,
    /// Grace period before a restart kills the app; Docker rounds it up to whole seconds
    pub restart_timeout: Duration,
    pub log_since_offset: Duration,
    pub log_drain_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            restart_timeout: Duration::from_secs(DEFAULT_RESTART_TIMEOUT_SECS),
            log_since_offset: Duration::from_millis(DEFAULT_LOG_SINCE_OFFSET_MS),
            log_drain_timeout: Duration::from_millis(DEFAULT_LOG_DRAIN_TIMEOUT_MS),
        }
    }
}

impl EngineSettings {
    /// Load settings from the environment, keeping defaults for anything unset
    /// or out of range
    pub fn from_env() -> Self {
        Self {
            health_check_interval: Duration::from_secs(env_u64(
                constants::FORGE_HEALTH_CHECK_INTERVAL_SECS,
                1..=3600,
                DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            )),
            restart_timeout: Duration::from_secs(env_u64(
                constants::FORGE_RESTART_TIMEOUT_SECS,
                0..=300,
                DEFAULT_RESTART_TIMEOUT_SECS,
            )),
            log_since_offset: Duration::from_millis(env_u64(
                constants::FORGE_LOG_SINCE_OFFSET_MS,
                0..=10_000,
                DEFAULT_LOG_SINCE_OFFSET_MS,
            )),
            log_drain_timeout: Duration::from_millis(env_u64(
                constants::FORGE_LOG_DRAIN_TIMEOUT_MS,
                0..=60_000,
                DEFAULT_LOG_DRAIN_TIMEOUT_MS,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var(constants::FORGE_HEALTH_CHECK_INTERVAL_SECS);
        std::env::remove_var(constants::FORGE_RESTART_TIMEOUT_SECS);
        std::env::remove_var(constants::FORGE_LOG_SINCE_OFFSET_MS);
        std::env::remove_var(constants::FORGE_LOG_DRAIN_TIMEOUT_MS);

        assert_eq!(EngineSettings::from_env(), EngineSettings::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var(constants::FORGE_RESTART_TIMEOUT_SECS, "5");
        std::env::set_var(constants::FORGE_LOG_SINCE_OFFSET_MS, "250");

        let settings = EngineSettings::from_env();
        assert_eq!(settings.restart_timeout, Duration::from_secs(5));
        assert_eq!(settings.log_since_offset, Duration::from_millis(250));
        assert_eq!(settings.health_check_interval, Duration::from_secs(1));

        std::env::remove_var(constants::FORGE_RESTART_TIMEOUT_SECS);
        std::env::remove_var(constants::FORGE_LOG_SINCE_OFFSET_MS);
    }
}
