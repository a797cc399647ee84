// ABOUTME: Shared test doubles for engine integration tests
// ABOUTME: Provides a mockall runtime plus helpers for framed logs and tar payloads

#![allow(dead_code)]

use async_trait::async_trait;
use forge_engine::logs::encode_frame;
use forge_engine::{
    ByteReader, CommitSpec, ContainerRuntime, ContainerSpec, ContainerState, ExecSession,
    ExecSpec, HostSpec, LogsOptions, Result, Stream,
};
use mockall::mock;
use std::io::Cursor;
use std::time::Duration;
use tokio::io::AsyncReadExt;

mock! {
    pub Runtime {}

    #[async_trait]
    impl ContainerRuntime for Runtime {
        async fn create(&self, name: &str, spec: &ContainerSpec, host: Option<HostSpec>) -> Result<String>;
        async fn start(&self, id: &str) -> Result<()>;
        async fn restart(&self, id: &str, timeout: Duration) -> Result<()>;
        async fn inspect(&self, id: &str) -> Result<ContainerState>;
        async fn wait(&self, id: &str) -> Result<i64>;
        async fn remove(&self, id: &str, force: bool) -> Result<()>;
        async fn logs(&self, id: &str, options: LogsOptions) -> Result<ByteReader>;
        async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession>;
        async fn resize_exec(&self, exec_id: &str, height: u16, width: u16) -> Result<()>;
        async fn commit(&self, id: &str, spec: &CommitSpec) -> Result<String>;
        async fn copy_in(&self, id: &str, path: &str, archive: ByteReader) -> Result<()>;
        async fn copy_out(&self, id: &str, path: &str) -> Result<Stream>;
    }
}

/// Stdout frames for each line
pub fn framed_logs(lines: &[&str]) -> ByteReader {
    let data: Vec<u8> = lines
        .iter()
        .flat_map(|line| encode_frame(1, line.as_bytes()))
        .collect();
    Box::new(Cursor::new(data))
}

/// Drain an in-memory reader from a synchronous mock closure
pub fn read_now(mut reader: ByteReader) -> Vec<u8> {
    futures::executor::block_on(async move {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    })
}

/// Entries of a tar archive as (path, entry type, contents)
pub fn tar_entries(data: &[u8]) -> Vec<(String, tar::EntryType, Vec<u8>)> {
    use std::io::Read;
    let mut archive = tar::Archive::new(data);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let kind = entry.header().entry_type();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            (path, kind, contents)
        })
        .collect()
}

/// Build a tar archive holding regular files
pub fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}
