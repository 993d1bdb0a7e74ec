//! Integration tests against a real Docker/Podman daemon.
//!
//! Tests are skipped if Docker/Podman is not available or SKIP_CONTAINER_TESTS=1.
//! They use the `busybox` image, which must already be pulled.

use cflocal::container::{
    CANCELLED_STATUS, Container, ContainerClient, ContainerConfig, ContainerError, DataStream,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use test_tag::tag;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TEST_IMAGE: &str = "busybox:latest";

/// Check if container tests should run.
fn should_run_container_tests() -> bool {
    if let Ok(value) = std::env::var(cflocal::env::SKIP_CONTAINER_TESTS_VAR) {
        if value == "1" || value.eq_ignore_ascii_case("true") {
            return false;
        }
    }

    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
        || std::process::Command::new("podman")
            .arg("info")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
}

async fn client_with_image() -> Option<Arc<ContainerClient>> {
    let client = ContainerClient::new().await.ok()?;
    if !client.image_exists(TEST_IMAGE).await.unwrap_or(false) {
        eprintln!("Skipping: {} not available locally", TEST_IMAGE);
        return None;
    }
    Some(Arc::new(client))
}

async fn create(client: Arc<ContainerClient>, cmd: &str) -> Container {
    let spec = ContainerConfig::builder()
        .image(TEST_IMAGE)
        .hostname("cflocal-test")
        .cmd(vec!["/bin/sh", "-c", cmd])
        .build()
        .expect("valid config");
    Container::create(client, spec.config, spec.host_config)
        .await
        .expect("create container")
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_run_to_exit() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }
    let Some(client) = client_with_image().await else {
        return;
    };

    let container = create(client, "echo hello; echo oops >&2; exit 3").await;
    let mut output = Vec::new();
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let status = container.start("[test] ", writer, None).await;
    container.close().await.expect("remove container");

    assert_eq!(status.expect("start"), 3);
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut output)
        .await
        .unwrap();
    let output = String::from_utf8_lossy(&output);
    assert!(output.contains("[test] "), "unexpected output: {}", output);
    assert!(output.contains("hello"), "unexpected output: {}", output);
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_restart_until_exit() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }
    let Some(client) = client_with_image().await else {
        return;
    };

    let exit = CancellationToken::new();
    let container = Arc::new(
        create(client, "echo started; sleep 60")
            .await
            .with_exit_signal(exit.clone()),
    );
    let (restart, rx) = mpsc::channel(1);
    let running = {
        let container = container.clone();
        tokio::spawn(async move { container.start("", tokio::io::sink(), Some(rx)).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    restart.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    exit.cancel();

    let status = running.await.unwrap();
    if let Ok(container) = Arc::try_unwrap(container) {
        container.close().await.expect("remove container");
    }
    assert_eq!(status.expect("start"), CANCELLED_STATUS);
}

#[tokio::test]
#[serial]
#[tag(integration, container)]
async fn test_copy_round_trip() {
    if !should_run_container_tests() {
        eprintln!("Skipping container tests (Docker/Podman not available or SKIP_CONTAINER_TESTS=1)");
        return;
    }
    let Some(client) = client_with_image().await else {
        return;
    };

    let container = create(client, "true").await;
    container
        .copy_to(DataStream::from_bytes(b"some-droplet".to_vec()), "/tmp/droplet")
        .await
        .expect("copy to container");

    let missing = container.copy_from("/tmp/nothing").await;
    assert!(matches!(missing, Err(ContainerError::ArchiveEntryNotFound(_))));

    let stream = container.copy_from("/tmp/droplet").await.expect("copy from");
    let mut stream = container
        .close_after_stream(Some(stream))
        .await
        .expect("defer removal")
        .expect("stream");
    assert_eq!(stream.size(), 12);
    assert_eq!(stream.read_to_end().await.unwrap(), b"some-droplet");
    stream.close().await.expect("close and remove");
}
