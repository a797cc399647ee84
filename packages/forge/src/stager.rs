// ABOUTME: Staging workflow that builds a droplet from app source with buildpacks
// ABOUTME: Copies inputs into a staging container, runs the builder, and streams the droplet out

use crate::app_config::AppConfig;
use crate::env::{build_env, EnvLayer};
use crate::workflow::{log_prefix, remove_container, Color};
use crate::{ForgeError, Result};
use forge_engine::{ByteReader, Container, ContainerSpec, Engine, HostSpec, LogSink, Stream};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const STAGING_DIR: &str = "/tmp/app";
const BUILDPACKS_DIR: &str = "/buildpacks";
const CACHE_DIR: &str = "/cache";
const OUTPUT_CACHE_PATH: &str = "/tmp/output-cache";
const DROPLET_PATH: &str = "/tmp/droplet";
const SYNC_DIR: &str = "/tmp/local";

pub struct StageConfig {
    /// Tar archive of the application source
    pub app_tar: ByteReader,
    /// Tar archive of a previous build cache
    pub cache: Option<ByteReader>,
    /// Receives the build cache produced by this staging run
    pub cache_sink: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Buildpack zips keyed by buildpack name
    pub buildpack_zips: BTreeMap<String, Stream>,
    pub stack: String,
    /// Host directory mounted at `/tmp/local` when `rsync` is set
    pub app_dir: Option<String>,
    pub rsync: bool,
    pub color: Color,
    pub app_config: AppConfig,
}

pub struct Stager {
    engine: Engine,
    logs: LogSink,
}

impl Stager {
    pub fn new(engine: Engine, logs: LogSink) -> Self {
        Self { engine, logs }
    }

    /// Stage the app and return its droplet
    ///
    /// The staging container is removed when the returned stream is closed,
    /// or right away when staging fails.
    pub async fn stage(&self, config: StageConfig) -> Result<Stream> {
        let StageConfig {
            app_tar,
            cache,
            cache_sink,
            buildpack_zips,
            stack,
            app_dir,
            rsync,
            color,
            app_config,
        } = config;

        let (order, skip_detect) = match app_config.buildpack_order() {
            Some(order) => (order, true),
            None => (buildpack_zips.keys().cloned().collect::<Vec<_>>(), false),
        };
        self.logs
            .write_all(format!("Buildpacks: {}\n", order.join(", ")).as_bytes())
            .await?;

        let spec = ContainerSpec {
            image: stack,
            hostname: Some(app_config.name.clone()),
            env: build_env(&app_config, EnvLayer::Staging, true)?,
            cmd: Some(vec![
                format!("-skipDetect={}", skip_detect),
                "-buildpackOrder".to_string(),
                order.join(","),
            ]),
            working_dir: Some(STAGING_DIR.to_string()),
            ..Default::default()
        };
        let host = HostSpec {
            memory_bytes: app_config.memory_limit_bytes()?,
            binds: match (&app_dir, rsync) {
                (Some(dir), true) => vec![format!("{}:{}", dir, SYNC_DIR)],
                _ => Vec::new(),
            },
            ..Default::default()
        };

        let name = format!("{}-staging", app_config.name);
        let container = match self.engine.new_container(&name, spec, Some(host)).await {
            Ok(container) => container,
            Err(e) => {
                for (_, zip) in buildpack_zips {
                    if let Err(close_err) = zip.close().await {
                        warn!("Failed to close buildpack stream: {}", close_err);
                    }
                }
                return Err(e.into());
            }
        };

        let prefix = log_prefix(&color, &app_config.name);
        match self
            .build(&container, &prefix, app_tar, cache, cache_sink, buildpack_zips)
            .await
        {
            Ok(droplet) => Ok(container.remove_after_close(droplet)),
            Err(e) => {
                remove_container(&container).await;
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        container: &Container,
        prefix: &str,
        app_tar: ByteReader,
        cache: Option<ByteReader>,
        cache_sink: Option<Box<dyn AsyncWrite + Send + Unpin>>,
        buildpack_zips: BTreeMap<String, Stream>,
    ) -> Result<Stream> {
        let buildpacks = try_join_all(buildpack_zips.into_iter().map(|(name, zip)| async move {
            let path = format!("{}/{}.zip", BUILDPACKS_DIR, name);
            container.stream_file_to(zip, &path).await
        }));
        let app = container.extract_to(app_tar, STAGING_DIR);
        let cache = async {
            match cache {
                Some(cache) => container.extract_to(cache, CACHE_DIR).await,
                None => Ok(()),
            }
        };
        tokio::try_join!(buildpacks, app, cache)?;
        debug!("Staging inputs copied into {}", container.name());

        let status = container.start(prefix, self.logs.clone(), None).await?;
        if status != 0 {
            return Err(ForgeError::StagingFailed { status });
        }
        info!("Staged {} successfully", container.name());

        if let Some(sink) = cache_sink {
            let output_cache = container.stream_file_from(OUTPUT_CACHE_PATH).await?;
            save_cache(output_cache, sink).await?;
        }

        Ok(container.stream_file_from(DROPLET_PATH).await?)
    }
}

async fn save_cache(mut cache: Stream, mut sink: Box<dyn AsyncWrite + Send + Unpin>) -> Result<()> {
    let copied = async {
        tokio::io::copy(&mut cache, &mut sink).await?;
        sink.flush().await
    }
    .await;
    let closed = cache.close().await;
    copied?;
    closed?;
    Ok(())
}
