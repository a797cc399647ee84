// ABOUTME: Workflow tests for staging an app into a droplet
// ABOUTME: Runs the stager against a mocked runtime and checks inputs, logs, cache, and cleanup

mod common;

use common::{
    capture_uploads, framed_logs, single_file_tar, tar_files, upload_to, MockRuntime, Uploads,
    SERVICES_ENV,
};
use forge::{AppConfig, Color, ForgeError, Service, StageConfig, Stager};
use forge_engine::{Engine, LogBuffer, LogSink, Stream};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

fn percent_color() -> Color {
    Arc::new(|label: &str| format!("{} %", label))
}

fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn app_config() -> AppConfig {
    AppConfig {
        name: "some-name".to_string(),
        buildpack: Some("some-buildpack".to_string()),
        buildpacks: vec![
            "some-buildpack-one".to_string(),
            "some-buildpack-two".to_string(),
        ],
        staging_env: env_map(&[
            ("TEST_STAGING_ENV_KEY", "test-staging-env-value"),
            ("MEMORY_LIMIT", "256m"),
        ]),
        running_env: env_map(&[("SOME_NA_KEY", "some-na-value")]),
        env: env_map(&[("TEST_ENV_KEY", "test-env-value"), ("MEMORY_LIMIT", "1024m")]),
        services: BTreeMap::from([(
            "some-type".to_string(),
            vec![Service {
                name: "some-name".to_string(),
                ..Default::default()
            }],
        )]),
        ..Default::default()
    }
}

fn stage_config(cache_sink: LogBuffer) -> StageConfig {
    StageConfig {
        app_tar: Box::new(Cursor::new(b"some-app-tar".to_vec())),
        cache: Some(Box::new(Cursor::new(b"some-old-cache".to_vec()))),
        cache_sink: Some(Box::new(cache_sink)),
        buildpack_zips: BTreeMap::from([
            ("some-name-one".to_string(), Stream::from_bytes("some-buildpack-zip-1")),
            ("some-name-two".to_string(), Stream::from_bytes("some-buildpack-zip-2")),
        ]),
        stack: "some-stack".to_string(),
        app_dir: Some("some-app-dir".to_string()),
        rsync: true,
        color: percent_color(),
        app_config: app_config(),
    }
}

/// Staging container whose start requires every staging input to be copied in
fn expect_staging_container(runtime: &mut MockRuntime, uploads: &Uploads) {
    runtime
        .expect_create()
        .withf(|name, spec, host| {
            name.starts_with("some-name-staging-")
                && spec.hostname.as_deref() == Some("some-name")
                && spec.exposed_ports.is_empty()
                && spec.image == "some-stack"
                && spec.working_dir.as_deref() == Some("/tmp/app")
                && spec.env
                    == vec![
                        "MEMORY_LIMIT=1024m".to_string(),
                        "PACK_APP_NAME=some-name".to_string(),
                        "TEST_ENV_KEY=test-env-value".to_string(),
                        "TEST_STAGING_ENV_KEY=test-staging-env-value".to_string(),
                        SERVICES_ENV.to_string(),
                    ]
                && spec.cmd
                    == Some(vec![
                        "-skipDetect=true".to_string(),
                        "-buildpackOrder".to_string(),
                        "some-buildpack-one,some-buildpack-two".to_string(),
                    ])
                && host
                    .as_ref()
                    .map(|host| host.binds == vec!["some-app-dir:/tmp/local".to_string()])
                    .unwrap_or(false)
        })
        .times(1)
        .returning(|_, _, _| Ok("staging-id".to_string()));
    let copied = uploads.clone();
    runtime.expect_start().times(1).returning(move |_| {
        // Two buildpacks, the app, and the old cache
        assert_eq!(copied.lock().unwrap().len(), 4);
        Ok(())
    });
    runtime
        .expect_logs()
        .times(1)
        .returning(|_, _| Ok(framed_logs(&["building\n"])));
}

#[tokio::test]
async fn test_stage_returns_droplet_of_staged_app() {
    let mut runtime = MockRuntime::new();
    let uploads = capture_uploads(&mut runtime);
    expect_staging_container(&mut runtime, &uploads);
    runtime.expect_wait().times(1).returning(|_| Ok(0));
    runtime
        .expect_copy_out()
        .withf(|_, path| path == "/tmp/output-cache")
        .times(1)
        .returning(|_, _| Ok(single_file_tar("output-cache", b"some-new-cache")));
    runtime
        .expect_copy_out()
        .withf(|_, path| path == "/tmp/droplet")
        .times(1)
        .returning(|_, _| Ok(single_file_tar("droplet", b"some-droplet")));
    let removals = Arc::new(AtomicUsize::new(0));
    let counter = removals.clone();
    runtime
        .expect_remove()
        .withf(|id, force| id == "staging-id" && *force)
        .returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let (logs, log_buffer) = LogSink::buffer();
    let stager = Stager::new(Engine::new(Arc::new(runtime)), logs);
    let cache = LogBuffer::default();

    let mut droplet = stager.stage(stage_config(cache.clone())).await.unwrap();

    assert_eq!(droplet.size(), 12);
    let mut contents = String::new();
    droplet.read_to_string(&mut contents).await.unwrap();
    assert_eq!(contents, "some-droplet");
    assert_eq!(removals.load(Ordering::SeqCst), 0);

    droplet.close().await.unwrap();
    assert_eq!(removals.load(Ordering::SeqCst), 1);

    assert_eq!(cache.contents_lossy(), "some-new-cache");
    assert_eq!(
        log_buffer.contents_lossy(),
        "Buildpacks: some-buildpack-one, some-buildpack-two\n[some-name] % building\n"
    );

    let buildpack_one = upload_to(&uploads, "/buildpacks");
    assert_eq!(buildpack_one.len(), 2);
    let mut zips: Vec<(String, Vec<u8>)> = buildpack_one
        .iter()
        .flat_map(|archive| tar_files(archive))
        .collect();
    zips.sort();
    assert_eq!(
        zips,
        vec![
            ("some-name-one.zip".to_string(), b"some-buildpack-zip-1".to_vec()),
            ("some-name-two.zip".to_string(), b"some-buildpack-zip-2".to_vec()),
        ]
    );
    assert_eq!(upload_to(&uploads, "/tmp/app"), vec![b"some-app-tar".to_vec()]);
    assert_eq!(upload_to(&uploads, "/cache"), vec![b"some-old-cache".to_vec()]);
}

#[tokio::test]
async fn test_stage_detects_among_sorted_buildpacks_without_explicit_order() {
    let mut runtime = MockRuntime::new();
    runtime
        .expect_create()
        .withf(|_, spec, _| {
            spec.cmd
                == Some(vec![
                    "-skipDetect=false".to_string(),
                    "-buildpackOrder".to_string(),
                    "a-buildpack,b-buildpack".to_string(),
                ])
        })
        .times(1)
        .returning(|_, _, _| Ok("staging-id".to_string()));
    let _uploads = capture_uploads(&mut runtime);
    runtime.expect_start().returning(|_| Ok(()));
    runtime.expect_logs().returning(|_, _| Ok(framed_logs(&[])));
    runtime.expect_wait().returning(|_| Ok(0));
    runtime
        .expect_copy_out()
        .withf(|_, path| path == "/tmp/droplet")
        .times(1)
        .returning(|_, _| Ok(single_file_tar("droplet", b"d")));
    runtime.expect_remove().times(1).returning(|_, _| Ok(()));

    let (logs, log_buffer) = LogSink::buffer();
    let stager = Stager::new(Engine::new(Arc::new(runtime)), logs);
    let config = StageConfig {
        app_tar: Box::new(Cursor::new(Vec::new())),
        cache: None,
        cache_sink: None,
        buildpack_zips: BTreeMap::from([
            ("b-buildpack".to_string(), Stream::from_bytes("b")),
            ("a-buildpack".to_string(), Stream::from_bytes("a")),
        ]),
        stack: "some-stack".to_string(),
        app_dir: None,
        rsync: false,
        color: forge::plain(),
        app_config: AppConfig {
            name: "app".to_string(),
            ..Default::default()
        },
    };

    let droplet = stager.stage(config).await.unwrap();
    droplet.close().await.unwrap();
    assert!(log_buffer
        .contents_lossy()
        .starts_with("Buildpacks: a-buildpack, b-buildpack\n"));
}

#[tokio::test]
async fn test_stage_failure_removes_container() {
    let mut runtime = MockRuntime::new();
    let uploads = capture_uploads(&mut runtime);
    expect_staging_container(&mut runtime, &uploads);
    runtime.expect_wait().times(1).returning(|_| Ok(1));
    runtime.expect_copy_out().never();
    runtime
        .expect_remove()
        .withf(|id, force| id == "staging-id" && *force)
        .times(1)
        .returning(|_, _| Ok(()));

    let (logs, _log_buffer) = LogSink::buffer();
    let stager = Stager::new(Engine::new(Arc::new(runtime)), logs);

    let err = stager
        .stage(stage_config(LogBuffer::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::StagingFailed { status: 1 }));
}

#[tokio::test]
async fn test_stage_missing_droplet_removes_container() {
    let mut runtime = MockRuntime::new();
    let uploads = capture_uploads(&mut runtime);
    expect_staging_container(&mut runtime, &uploads);
    runtime.expect_wait().times(1).returning(|_| Ok(0));
    runtime
        .expect_copy_out()
        .returning(|_, _| Ok(single_file_tar("unrelated", b"x")));
    runtime.expect_remove().times(1).returning(|_, _| Ok(()));

    let (logs, _log_buffer) = LogSink::buffer();
    let stager = Stager::new(Engine::new(Arc::new(runtime)), logs);

    let err = stager
        .stage(stage_config(LogBuffer::default()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ForgeError::Engine(forge_engine::EngineError::EntryNotFound { .. })
    ));
}
