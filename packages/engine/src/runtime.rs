// ABOUTME: Capability interface the engine requires from a container runtime
// ABOUTME: Defines container specs, inspection data, log options, and exec sessions

use crate::stream::{ByteReader, Stream};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Health value reported when the runtime has no health information
pub const NO_HEALTHCHECK: &str = "none";

/// Writer side of an attached exec session
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Immutable creation parameters for a container
///
/// Kept by the [`crate::Container`] after creation to derive exec and commit
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    /// `KEY=value` entries
    pub env: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub working_dir: Option<String>,
    /// Container ports such as `8080/tcp`
    pub exposed_ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Host-side resources for a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
    /// `host_path:container_path` bind mounts
    pub binds: Vec<String>,
    /// Container port → host bindings
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    pub network_mode: Option<String>,
}

/// Subset of container inspection the engine relies on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    /// RFC 3339 timestamp of the most recent start, as reported by the runtime
    pub started_at: Option<String>,
    /// Raw health status such as `healthy`, `starting`, or `none`
    pub health: Option<String>,
    pub running: bool,
}

/// Log attach parameters
///
/// Streams returned by [`ContainerRuntime::logs`] carry the 8-byte framed
/// multiplex format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    pub follow: bool,
    pub since: Option<DateTime<Utc>>,
}

impl LogsOptions {
    /// stdout and stderr, timestamped, following, optionally starting at `since`
    pub fn follow_all(since: Option<DateTime<Utc>>) -> Self {
        Self {
            stdout: true,
            stderr: true,
            timestamps: true,
            follow: true,
            since,
        }
    }
}

/// Interactive exec configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub tty: bool,
}

/// Attached exec: output from the process, input to it
pub struct ExecSession {
    pub id: String,
    pub output: ByteReader,
    pub input: ByteWriter,
}

/// Image commit parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSpec {
    pub reference: String,
    pub pause: bool,
    /// Image configuration recorded with the commit
    pub config: ContainerSpec,
}

/// Container runtime capabilities used by the engine
///
/// Implemented by [`crate::DockerRuntime`] and by test doubles. Errors are
/// surfaced to callers unmodified.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its runtime id
    async fn create(&self, name: &str, spec: &ContainerSpec, host: Option<HostSpec>)
        -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Restart, giving the old process `timeout` to stop before it is killed
    async fn restart(&self, id: &str, timeout: Duration) -> Result<()>;

    async fn inspect(&self, id: &str) -> Result<ContainerState>;

    /// Block until the container exits and return its status code
    async fn wait(&self, id: &str) -> Result<i64>;

    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Attach to container output as a framed byte stream
    async fn logs(&self, id: &str, options: LogsOptions) -> Result<ByteReader>;

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession>;

    async fn resize_exec(&self, exec_id: &str, height: u16, width: u16) -> Result<()>;

    /// Commit the container filesystem and return the new image id
    async fn commit(&self, id: &str, spec: &CommitSpec) -> Result<String>;

    /// Extract a tar archive into the container at `path`
    async fn copy_in(&self, id: &str, path: &str, archive: ByteReader) -> Result<()>;

    /// Copy `path` out of the container as a tar archive stream
    async fn copy_out(&self, id: &str, path: &str) -> Result<Stream>;
}
