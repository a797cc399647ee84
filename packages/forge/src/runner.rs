// ABOUTME: Run and export workflows for staged droplets
// ABOUTME: Launches a droplet with optional live sync and restarts, or commits it into an image

use crate::app_config::{AppConfig, NetworkConfig};
use crate::env::{build_env, EnvLayer};
use crate::workflow::{log_prefix, plain, remove_container, Color, Scripts};
use crate::{ForgeError, Result};
use forge_engine::{Container, ContainerSpec, Engine, HostSpec, LogSink, PortBinding, Stream};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

const HOME_DIR: &str = "/home/vcap";
const APP_DIR: &str = "/home/vcap/app";
const SYNC_DIR: &str = "/tmp/local";
const APP_PORT: &str = "8080/tcp";

pub struct RunConfig {
    pub droplet: Stream,
    pub stack: String,
    /// Host directory bound into the container
    pub app_dir: Option<String>,
    /// Sync `app_dir` into the app instead of mounting it over the app directory
    pub rsync: bool,
    /// Each message restarts the app; closing the channel stops it
    pub restart: Option<mpsc::Receiver<()>>,
    pub color: Color,
    pub app_config: AppConfig,
    pub network_config: Option<NetworkConfig>,
}

pub struct ExportConfig {
    pub droplet: Stream,
    pub stack: String,
    /// Image reference such as `repo:tag`
    pub reference: String,
    pub app_config: AppConfig,
}

pub struct Runner {
    engine: Engine,
    logs: LogSink,
    scripts: Scripts,
}

impl Runner {
    pub fn new(engine: Engine, logs: LogSink, scripts: Scripts) -> Self {
        Self {
            engine,
            logs,
            scripts,
        }
    }

    fn entrypoint(script: &str, app_config: &AppConfig) -> Vec<String> {
        vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            script.to_string(),
            app_config.command.clone().unwrap_or_default(),
        ]
    }

    async fn create(
        &self,
        droplet: Stream,
        spec: ContainerSpec,
        host: Option<HostSpec>,
        name: &str,
    ) -> Result<(Container, Stream)> {
        match self.engine.new_container(name, spec, host).await {
            Ok(container) => Ok((container, droplet)),
            Err(e) => {
                if let Err(close_err) = droplet.close().await {
                    warn!("Failed to close droplet stream: {}", close_err);
                }
                Err(e.into())
            }
        }
    }

    /// Run the droplet until it exits, the restart source closes, or the
    /// engine's exit signal fires. The container is always removed.
    pub async fn run(&self, config: RunConfig) -> Result<i64> {
        let RunConfig {
            droplet,
            stack,
            app_dir,
            rsync,
            restart,
            color,
            app_config,
            network_config,
        } = config;

        let script = if rsync && app_dir.is_some() {
            &self.scripts.run_sync
        } else {
            &self.scripts.run
        };
        let spec = ContainerSpec {
            image: stack,
            hostname: Some(app_config.name.clone()),
            env: build_env(&app_config, EnvLayer::Running, true)?,
            entrypoint: Some(Self::entrypoint(script, &app_config)),
            working_dir: Some(APP_DIR.to_string()),
            exposed_ports: vec![APP_PORT.to_string()],
            ..Default::default()
        };

        let mut port_bindings = HashMap::new();
        if let Some(network) = network_config {
            port_bindings.insert(
                APP_PORT.to_string(),
                vec![PortBinding {
                    host_ip: network.host_ip,
                    host_port: network.host_port,
                }],
            );
        }
        let host = HostSpec {
            memory_bytes: app_config.memory_limit_bytes()?,
            binds: app_dir
                .map(|dir| {
                    let target = if rsync { SYNC_DIR } else { APP_DIR };
                    vec![format!("{}:{}", dir, target)]
                })
                .unwrap_or_default(),
            port_bindings,
            network_mode: None,
        };

        let (container, droplet) = self
            .create(droplet, spec, Some(host), &app_config.name)
            .await?;

        let prefix = log_prefix(&color, &app_config.name);
        let result: Result<i64> = async {
            container.stream_tar_to(droplet, HOME_DIR).await?;
            Ok(container.start(&prefix, self.logs.clone(), restart).await?)
        }
        .await;

        remove_container(&container).await;
        result
    }

    /// Bake the droplet into an image tagged `reference` and return its id
    pub async fn export(&self, config: ExportConfig) -> Result<String> {
        let ExportConfig {
            droplet,
            stack,
            reference,
            app_config,
        } = config;

        let spec = ContainerSpec {
            image: stack,
            hostname: Some(app_config.name.clone()),
            env: build_env(&app_config, EnvLayer::Running, false)?,
            entrypoint: Some(Self::entrypoint(&self.scripts.commit, &app_config)),
            working_dir: Some(APP_DIR.to_string()),
            ..Default::default()
        };

        let (container, droplet) = self.create(droplet, spec, None, &app_config.name).await?;

        let prefix = log_prefix(&plain(), &app_config.name);
        let result: Result<String> = async {
            container.stream_tar_to(droplet, HOME_DIR).await?;
            let status = container.start(&prefix, self.logs.clone(), None).await?;
            if status != 0 {
                return Err(ForgeError::ExportFailed { status });
            }
            Ok(container.commit(&reference).await?)
        }
        .await;

        remove_container(&container).await;
        if let Ok(image_id) = &result {
            info!("Exported {} as {} ({})", app_config.name, reference, image_id);
        }
        result
    }
}
