// ABOUTME: Shared test doubles for workflow tests
// ABOUTME: Provides a mockall container runtime and tar helpers for staged artifacts

#![allow(dead_code)]

use async_trait::async_trait;
use forge_engine::logs::encode_frame;
use forge_engine::{
    ByteReader, CommitSpec, ContainerRuntime, ContainerSpec, ContainerState, ExecSession,
    ExecSpec, HostSpec, LogsOptions, Result, Stream,
};
use mockall::mock;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
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

pub type Uploads = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// Record every copy-in as (target path, archive bytes)
pub fn capture_uploads(runtime: &mut MockRuntime) -> Uploads {
    let uploads: Uploads = Arc::new(Mutex::new(Vec::new()));
    let recorded = uploads.clone();
    runtime.expect_copy_in().returning(move |_, path, archive| {
        recorded
            .lock()
            .unwrap()
            .push((path.to_string(), read_now(archive)));
        Ok(())
    });
    uploads
}

pub fn upload_to(uploads: &Uploads, path: &str) -> Vec<Vec<u8>> {
    uploads
        .lock()
        .unwrap()
        .iter()
        .filter(|(target, _)| target == path)
        .map(|(_, data)| data.clone())
        .collect()
}

pub fn framed_logs(lines: &[&str]) -> ByteReader {
    let data: Vec<u8> = lines
        .iter()
        .flat_map(|line| encode_frame(1, line.as_bytes()))
        .collect();
    Box::new(Cursor::new(data))
}

pub fn read_now(mut reader: ByteReader) -> Vec<u8> {
    futures::executor::block_on(async move {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    })
}

/// (path, contents) of every entry in a tar archive
pub fn tar_files(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;
    let mut archive = tar::Archive::new(data);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            (path, contents)
        })
        .collect()
}

/// A copy-out archive holding one file
pub fn single_file_tar(name: &str, data: &[u8]) -> Stream {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, data).unwrap();
    Stream::from_bytes(builder.into_inner().unwrap())
}

pub const SERVICES_ENV: &str = r#"VCAP_SERVICES={"some-type":[{"name":"some-name","label":"","tags":null,"plan":"","credentials":null,"syslog_drain_url":null,"provider":null,"volume_mounts":null}]}"#;
