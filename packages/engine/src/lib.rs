// ABOUTME: Container lifecycle and transport engine for Forge
// ABOUTME: Runs containers through a runtime capability trait with relabeled log output and tar transfers

pub mod archive;
pub mod container;
pub mod docker;
pub mod error;
pub mod logs;
mod restart;
pub mod runtime;
pub mod settings;
pub mod stream;

// Re-export commonly used types
pub use container::{Container, Engine, Resize, Tty, KILLED_STATUS};
pub use docker::DockerRuntime;
pub use error::{EngineError, Result};
pub use logs::{LogBuffer, LogGeneration, LogQueue, LogSink};
pub use runtime::{
    ByteWriter, CommitSpec, ContainerRuntime, ContainerSpec, ContainerState, ExecSession,
    ExecSpec, HostSpec, LogsOptions, PortBinding, NO_HEALTHCHECK,
};
pub use settings::EngineSettings;
pub use stream::{ByteReader, Stream, StreamCloser};
