// ABOUTME: Container handle covering creation, start, removal, health polling, shells, and commits
// ABOUTME: Also moves files and archives in and out of the container over the tar transport

use crate::archive::{basename, directory_archive, dirname, file_archive, find_entry, DEFAULT_MODE};
use crate::logs::{LogGeneration, LogQueue, LogSink};
use crate::restart::RestartSupervisor;
use crate::runtime::{
    ByteWriter, CommitSpec, ContainerRuntime, ContainerSpec, ExecSpec, HostSpec, LogsOptions,
    NO_HEALTHCHECK,
};
use crate::settings::EngineSettings;
use crate::stream::{ByteReader, Stream};
use crate::{EngineError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status reported when a start is cut short by the exit signal or a closed
/// restart source
pub const KILLED_STATUS: i64 = 128;

/// Factory for containers sharing one runtime and one exit signal
#[derive(Clone)]
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    exit: CancellationToken,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            exit: CancellationToken::new(),
            settings: EngineSettings::default(),
        }
    }

    /// Use `exit` as the external exit signal observed by every container
    pub fn with_exit(mut self, exit: CancellationToken) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Token that, once cancelled, stops every in-flight container operation
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Create a container named `<name>-<uuid>` from `spec`
    pub async fn new_container(
        &self,
        name: &str,
        spec: ContainerSpec,
        host: Option<HostSpec>,
    ) -> Result<Container> {
        let name = format!("{}-{}", name, uuid::Uuid::new_v4());
        let create = self.runtime.create(&name, &spec, host);
        let id = tokio::select! {
            biased;
            _ = self.exit.cancelled() => return Err(EngineError::Cancelled),
            id = create => id?,
        };
        info!("Created container {} ({})", name, id);

        Ok(Container {
            id,
            name,
            spec,
            runtime: self.runtime.clone(),
            exit: self.exit.clone(),
            settings: self.settings.clone(),
        })
    }
}

/// Interactive terminal driven by [`Container::shell`]
#[async_trait]
pub trait Tty: Send {
    /// Pump bytes between the terminal and the remote process until either side
    /// finishes. `resize` forwards terminal size changes to the remote process.
    async fn run(&mut self, remote_out: ByteReader, remote_in: ByteWriter, resize: Resize)
        -> Result<()>;
}

/// Resize handle for one exec session
pub struct Resize {
    runtime: Arc<dyn ContainerRuntime>,
    exec_id: String,
}

impl Resize {
    pub async fn resize(&self, height: u16, width: u16) -> Result<()> {
        self.runtime.resize_exec(&self.exec_id, height, width).await
    }
}

/// One created container
///
/// Cloning shares the same runtime container. Removal is forceful and is not
/// tolerant of the container already being gone; callers decide whether
/// [`EngineError::ContainerNotFound`] matters.
#[derive(Clone)]
pub struct Container {
    id: String,
    name: String,
    spec: ContainerSpec,
    runtime: Arc<dyn ContainerRuntime>,
    exit: CancellationToken,
    settings: EngineSettings,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    async fn until_exit<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.exit.cancelled() => Err(EngineError::Cancelled),
            result = operation => result,
        }
    }

    /// Force-remove the container and its volumes
    pub async fn remove(&self) -> Result<()> {
        debug!("Removing container {}", self.id);
        self.runtime.remove(&self.id, true).await?;
        info!("Removed container {}", self.name);
        Ok(())
    }

    /// Hand removal of this container to `stream`'s close chain
    pub fn remove_after_close(&self, stream: Stream) -> Stream {
        let container = self.clone();
        stream.close_after(move || async move { container.remove().await })
    }

    /// Start the container without attaching or waiting
    pub async fn background(&self) -> Result<()> {
        self.until_exit(self.runtime.start(&self.id)).await?;
        info!("Started container {} in background", self.name);
        Ok(())
    }

    /// Start the container, relay its logs to `logs` prefixed with
    /// `log_prefix`, and wait for it to finish.
    ///
    /// With a `restart` source, each signal restarts the container and
    /// reattaches logs until the source closes or the exit signal fires. Both
    /// of those end the call with [`KILLED_STATUS`].
    pub async fn start(
        &self,
        log_prefix: &str,
        logs: LogSink,
        restart: Option<mpsc::Receiver<()>>,
    ) -> Result<i64> {
        let ctx = self.exit.child_token();
        let _cancel_on_return = ctx.clone().drop_guard();
        let queue = LogQueue::spawn(logs, log_prefix);

        let status = tokio::select! {
            biased;
            _ = ctx.cancelled() => Ok(KILLED_STATUS),
            status = self.attach_and_wait(&ctx, &queue, restart) => status,
        };

        if !queue.close(self.settings.log_drain_timeout).await {
            debug!(
                "Log stream for {} still open after {:?}, closing it",
                self.name, self.settings.log_drain_timeout
            );
        }
        if let Ok(code) = &status {
            info!("Container {} finished with status {}", self.name, code);
        }
        status
    }

    async fn attach_and_wait(
        &self,
        ctx: &CancellationToken,
        queue: &LogQueue,
        restart: Option<mpsc::Receiver<()>>,
    ) -> Result<i64> {
        self.runtime.start(&self.id).await?;
        info!("Started container {}", self.name);

        let reader = self
            .runtime
            .logs(&self.id, LogsOptions::follow_all(None))
            .await?;
        let generation = ctx.child_token();
        queue
            .push(LogGeneration::new(reader, generation.clone()))
            .await?;

        match restart {
            None => self.runtime.wait(&self.id).await,
            Some(restart) => {
                let supervisor = RestartSupervisor::new(
                    self.runtime.as_ref(),
                    &self.id,
                    &self.settings,
                    ctx,
                    queue,
                );
                Ok(supervisor.run(restart, generation).await)
            }
        }
    }

    /// Run `cmd` interactively with the container's user and environment
    ///
    /// Returns Ok when the exit signal fires.
    pub async fn shell(&self, tty: &mut dyn Tty, cmd: &[String]) -> Result<()> {
        let spec = ExecSpec {
            cmd: cmd.to_vec(),
            env: self.spec.env.clone(),
            user: self.spec.user.clone(),
            tty: true,
        };
        let session = self.until_exit(self.runtime.exec(&self.id, &spec)).await?;
        debug!("Attached shell {} to container {}", session.id, self.name);

        let resize = Resize {
            runtime: self.runtime.clone(),
            exec_id: session.id,
        };
        tokio::select! {
            _ = self.exit.cancelled() => Ok(()),
            result = tty.run(session.output, session.input, resize) => result,
        }
    }

    /// Poll health on a fixed interval, sending the raw status on every tick
    ///
    /// Sends [`NO_HEALTHCHECK`] when inspection fails or reports no health.
    /// Polling stops when the exit signal fires or the receiver is dropped.
    pub fn health_check(&self) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(1);
        let runtime = self.runtime.clone();
        let id = self.id.clone();
        let exit = self.exit.clone();
        let period = self.settings.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = exit.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let health = match runtime.inspect(&id).await {
                    Ok(state) => state.health.unwrap_or_else(|| NO_HEALTHCHECK.to_string()),
                    Err(e) => {
                        debug!("Health inspection of {} failed: {}", id, e);
                        NO_HEALTHCHECK.to_string()
                    }
                };
                tokio::select! {
                    _ = exit.cancelled() => break,
                    sent = sender.send(health) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Health polling for {} stopped", id);
        });

        receiver
    }

    /// Commit the container filesystem as `reference`, pausing it meanwhile
    pub async fn commit(&self, reference: &str) -> Result<String> {
        let spec = CommitSpec {
            reference: reference.to_string(),
            pause: true,
            config: self.spec.clone(),
        };
        let image_id = self.until_exit(self.runtime.commit(&self.id, &spec)).await?;
        info!("Committed container {} as {} ({})", self.name, reference, image_id);
        Ok(image_id)
    }

    /// Extract a tar archive into the container at `path`
    pub async fn extract_to(&self, archive: ByteReader, path: &str) -> Result<()> {
        self.until_exit(self.runtime.copy_in(&self.id, path, archive))
            .await
    }

    /// Write `stream`'s contents to the file at `path`, then close the stream
    pub async fn stream_file_to(&self, stream: Stream, path: &str) -> Result<()> {
        let (reader, size, closer) = stream.into_parts();
        let copied = match file_archive(basename(path), reader, size, DEFAULT_MODE) {
            Ok(archive) => self.extract_to(archive, dirname(path)).await,
            Err(e) => Err(e),
        };
        let closed = closer.close().await;
        copied.and(closed)
    }

    /// Extract the archive in `stream` at `path`, then close the stream
    pub async fn stream_tar_to(&self, stream: Stream, path: &str) -> Result<()> {
        let (reader, _, closer) = stream.into_parts();
        let copied = self.extract_to(reader, path).await;
        let closed = closer.close().await;
        copied.and(closed)
    }

    /// Open the file at `path` for reading
    ///
    /// Closing the returned stream also closes the underlying copy-out.
    pub async fn stream_file_from(&self, path: &str) -> Result<Stream> {
        let archive = self
            .until_exit(self.runtime.copy_out(&self.id, path))
            .await?;
        let (reader, _, closer) = archive.into_parts();

        match find_entry(basename(path), path, reader).await {
            Ok((size, body)) => Ok(Stream::new(body, size).close_after(move || closer.close())),
            Err(e) => {
                if let Err(close_err) = closer.close().await {
                    warn!("Failed to close copy-out of {}: {}", path, close_err);
                }
                Err(e)
            }
        }
    }

    /// Copy the contents of directory `path` out as a tar stream
    pub async fn stream_tar_from(&self, path: &str) -> Result<Stream> {
        let contents = format!("{}/.", path.trim_end_matches('/'));
        self.until_exit(self.runtime.copy_out(&self.id, &contents))
            .await
    }

    /// Create an empty directory at `path`
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let archive = directory_archive(basename(path), DEFAULT_MODE)?;
        self.extract_to(Box::new(Cursor::new(archive)), dirname(path))
            .await
    }
}
