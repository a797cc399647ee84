// ABOUTME: Docker implementation of the container runtime capabilities
// ABOUTME: Uses bollard and re-frames decoded log output into the 8-byte wire format

use crate::logs::encode_frame;
use crate::runtime::{
    ByteWriter, CommitSpec, ContainerRuntime, ContainerSpec, ContainerState, ExecSession, ExecSpec,
    HostSpec, LogsOptions,
};
use crate::stream::{ByteReader, Stream};
use crate::{EngineError, Result};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
        LogsOptions as DockerLogsOptions, RemoveContainerOptions, RestartContainerOptions,
        StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults},
    image::CommitContainerOptions,
    models::{HostConfig, PortBinding},
    Docker,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{future, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info};

/// Docker stream type bytes used in log frame headers
const STDIN_STREAM: u8 = 0;
const STDOUT_STREAM: u8 = 1;
const STDERR_STREAM: u8 = 2;

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()?;
        debug!(
            "Docker client configured (DOCKER_HOST={:?})",
            std::env::var(forge_config::constants::DOCKER_HOST).ok()
        );
        Ok(Self { client })
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Verify the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            EngineError::Docker(e)
        })?;
        info!("Successfully connected to Docker daemon");
        Ok(())
    }

    fn to_bollard_config(spec: &ContainerSpec, host: Option<HostSpec>) -> Config<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let host_config = host.map(|host| {
            let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = host
                .port_bindings
                .into_iter()
                .map(|(port, bindings)| {
                    let bindings = bindings
                        .into_iter()
                        .map(|b| PortBinding {
                            host_ip: Some(b.host_ip),
                            host_port: Some(b.host_port),
                        })
                        .collect();
                    (port, Some(bindings))
                })
                .collect();

            HostConfig {
                memory: host.memory_bytes,
                binds: if host.binds.is_empty() {
                    None
                } else {
                    Some(host.binds)
                },
                port_bindings: if port_bindings.is_empty() {
                    None
                } else {
                    Some(port_bindings)
                },
                network_mode: host.network_mode,
                ..Default::default()
            }
        });

        Config {
            image: Some(spec.image.clone()),
            hostname: spec.hostname.clone(),
            user: spec.user.clone(),
            env: Some(spec.env.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.cmd.clone(),
            working_dir: spec.working_dir.clone(),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config,
            ..Default::default()
        }
    }

    fn not_found(id: &str, e: BollardError) -> EngineError {
        match e {
            BollardError::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::ContainerNotFound(id.to_string()),
            _ => EngineError::Docker(e),
        }
    }
}

/// Split `repo[:tag]`, ignoring colons that belong to a registry port
fn split_reference(reference: &str) -> (&str, &str) {
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => (
            &reference[..name_start + i],
            &reference[name_start + i + 1..],
        ),
        None => (reference, "latest"),
    }
}

/// Whether a timestamped log message was written before `since`
///
/// The daemon only filters `since` to whole seconds, so the rest of that
/// second is dropped here. Messages without a readable stamp are kept.
fn stamped_before(output: &LogOutput, since: DateTime<Utc>) -> bool {
    let message = match output {
        LogOutput::StdIn { message }
        | LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => message,
    };
    let stamp = message.split(|b| *b == b' ').next().unwrap_or_default();
    std::str::from_utf8(stamp)
        .ok()
        .and_then(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
        .is_some_and(|stamp| stamp < since)
}

/// Re-frame log output, skipping messages stamped before `since`
fn log_frames<S>(
    outputs: S,
    since: Option<DateTime<Utc>>,
) -> impl futures::Stream<Item = std::io::Result<Bytes>>
where
    S: futures::Stream<Item = std::result::Result<LogOutput, BollardError>>,
{
    outputs
        .filter(move |result| {
            let keep = match (result, since) {
                (Ok(output), Some(since)) => !stamped_before(output, since),
                _ => true,
            };
            future::ready(keep)
        })
        .map(|result| result.map(frame_log_output).map_err(std::io::Error::other))
}

/// Docker restart timeouts are whole seconds; partial seconds round up
fn stop_timeout_secs(timeout: Duration) -> isize {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    isize::try_from(secs).unwrap_or(isize::MAX)
}

fn frame_log_output(output: LogOutput) -> Bytes {
    let frame = match output {
        LogOutput::StdIn { message } => encode_frame(STDIN_STREAM, &message),
        LogOutput::StdOut { message } => encode_frame(STDOUT_STREAM, &message),
        LogOutput::StdErr { message } => encode_frame(STDERR_STREAM, &message),
        LogOutput::Console { message } => encode_frame(STDOUT_STREAM, &message),
    };
    Bytes::from(frame)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(
        &self,
        name: &str,
        spec: &ContainerSpec,
        host: Option<HostSpec>,
    ) -> Result<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .client
            .create_container(Some(options), Self::to_bollard_config(spec, host))
            .await
            .map_err(|e| {
                error!("Failed to create container {}: {}", name, e);
                EngineError::Docker(e)
            })?;
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<()> {
        let options = RestartContainerOptions {
            t: stop_timeout_secs(timeout),
        };
        self.client
            .restart_container(id, Some(options))
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState> {
        let inspect = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| Self::not_found(id, e))?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerState {
            started_at: state.started_at,
            health: state
                .health
                .and_then(|health| health.status)
                .map(|status| status.to_string()),
            running: state.running.unwrap_or(false),
        })
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut responses = self
            .client
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports nonzero exits as errors carrying the status
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Self::not_found(id, e)),
            None => Err(EngineError::Runtime(format!(
                "wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true, // Remove volumes
            ..Default::default()
        };
        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn logs(&self, id: &str, options: LogsOptions) -> Result<ByteReader> {
        // Without stamps there is nothing to filter the partial second on
        let since = options.since.filter(|_| options.timestamps);
        let docker_options = DockerLogsOptions::<String> {
            follow: options.follow,
            stdout: options.stdout,
            stderr: options.stderr,
            timestamps: options.timestamps,
            since: options.since.map(|since| since.timestamp()).unwrap_or(0),
            ..Default::default()
        };

        let frames = log_frames(self.client.logs(id, Some(docker_options)), since);
        Ok(Box::new(StreamReader::new(Box::pin(frames))))
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            user: spec.user.clone(),
            tty: Some(spec.tty),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.client.create_exec(id, options).await?;

        let started = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await?;

        match started {
            StartExecResults::Attached { output, input } => {
                let output = output.map(|result| {
                    result
                        .map(|chunk| chunk.into_bytes())
                        .map_err(std::io::Error::other)
                });
                let input: ByteWriter = Box::new(input);
                Ok(ExecSession {
                    id: exec.id,
                    output: Box::new(StreamReader::new(output)),
                    input,
                })
            }
            StartExecResults::Detached => Err(EngineError::ExecAttach(format!(
                "exec {} detached unexpectedly",
                exec.id
            ))),
        }
    }

    async fn resize_exec(&self, exec_id: &str, height: u16, width: u16) -> Result<()> {
        self.client
            .resize_exec(exec_id, ResizeExecOptions { height, width })
            .await?;
        Ok(())
    }

    async fn commit(&self, id: &str, spec: &CommitSpec) -> Result<String> {
        let (repo, tag) = split_reference(&spec.reference);
        let options = CommitContainerOptions {
            container: id.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            pause: spec.pause,
            ..Default::default()
        };
        let response = self
            .client
            .commit_container(options, Self::to_bollard_config(&spec.config, None))
            .await
            .map_err(|e| Self::not_found(id, e))?;
        Ok(Option::<String>::from(response.id).unwrap_or_default())
    }

    async fn copy_in(&self, id: &str, path: &str, mut archive: ByteReader) -> Result<()> {
        let mut data = Vec::new();
        archive.read_to_end(&mut data).await?;
        debug!("Uploading {} byte archive to {}:{}", data.len(), id, path);

        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.client
            .upload_to_container(id, Some(options), data.into())
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn copy_out(&self, id: &str, path: &str) -> Result<Stream> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let chunks = self
            .client
            .download_from_container(id, Some(options))
            .map(|result| result.map_err(std::io::Error::other));

        // The archive length is not reported by the download endpoint
        Ok(Stream::new(StreamReader::new(Box::pin(chunks)), 0))
    }
}
