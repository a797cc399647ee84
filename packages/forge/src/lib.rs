// ABOUTME: Buildpack staging and droplet runtime workflows for Forge
// ABOUTME: Stages apps into droplets, runs them with restarts and live sync, and exports images

pub mod app_config;
pub mod env;
pub mod error;
pub mod runner;
pub mod stager;
pub mod workflow;

// Re-export commonly used types
pub use app_config::{parse_megabytes, AppConfig, NetworkConfig, Service, Services};
pub use env::{build_env, EnvLayer};
pub use error::{ForgeError, Result};
pub use runner::{ExportConfig, RunConfig, Runner};
pub use stager::{StageConfig, Stager};
pub use workflow::{plain, Color, Scripts};
