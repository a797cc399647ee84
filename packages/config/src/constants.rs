// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Forge

// Container Health
pub const FORGE_HEALTH_CHECK_INTERVAL_SECS: &str = "FORGE_HEALTH_CHECK_INTERVAL_SECS";

// Restart Supervisor
pub const FORGE_RESTART_TIMEOUT_SECS: &str = "FORGE_RESTART_TIMEOUT_SECS";
pub const FORGE_LOG_SINCE_OFFSET_MS: &str = "FORGE_LOG_SINCE_OFFSET_MS";

// Log Streaming
pub const FORGE_LOG_DRAIN_TIMEOUT_MS: &str = "FORGE_LOG_DRAIN_TIMEOUT_MS";

// Docker Connection
pub const DOCKER_HOST: &str = "DOCKER_HOST";
