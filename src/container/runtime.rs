//! Container runtime capability seam.
//!
//! The engine never talks to a daemon directly; it drives an implementation
//! of [`ContainerRuntime`]. [`ContainerClient`](super::ContainerClient) is the
//! Docker/Podman implementation, tests use an in-memory double.

use crate::container::{ContainerConfig, Result};
use async_trait::async_trait;
use bollard::models::HostConfig;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Boxed byte reader handed across the runtime seam.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Log retrieval flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsRequest {
    /// Keep the stream open and follow new output
    pub follow: bool,
    /// Prefix each line with its RFC 3339 nano timestamp
    pub timestamps: bool,
    /// Only return output produced at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl LogsRequest {
    /// Follow-mode, timestamped logs from the beginning.
    pub fn follow() -> Self {
        Self {
            follow: true,
            timestamps: true,
            since: None,
        }
    }

    /// Follow-mode, timestamped logs starting at `since`.
    pub fn follow_since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Self::follow()
        }
    }

    /// `since` in the runtime's high-precision wire format.
    pub fn since_rfc3339(&self) -> Option<String> {
        self.since
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
    }
}

/// Image snapshot parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    /// Repository part of the image reference
    pub repo: String,
    /// Tag part of the image reference (empty for the runtime default)
    pub tag: String,
    /// Author recorded in the image
    pub author: String,
    /// Pause the container while the snapshot is taken
    pub pause: bool,
    /// Default runtime config for the new image
    pub config: ContainerConfig,
}

/// Raw archive returned by a copy-out request.
pub struct ArchiveDownload {
    /// Tar archive bytes
    pub archive: ByteReader,
    /// Size of the requested path as reported by the runtime's stat metadata
    pub stat_size: Option<u64>,
}

/// Capability-style client for a container runtime.
///
/// Every call is a blocking network operation from the engine's point of
/// view; implementations must not impose their own timeouts.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container named `name` and return its id.
    async fn create(
        &self,
        name: &str,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<String>;

    /// Start the container's process.
    async fn start(&self, id: &str) -> Result<()>;

    /// Restart the process, allowing `grace` before it is killed.
    async fn restart(&self, id: &str, grace: Duration) -> Result<()>;

    /// The process start time as reported by the runtime (RFC 3339 nano).
    async fn inspect_started_at(&self, id: &str) -> Result<String>;

    /// Block until the process exits and return its exit status.
    async fn wait(&self, id: &str) -> Result<i64>;

    /// Open a combined stdout/stderr stream in multiplexed frame format.
    async fn logs(&self, id: &str, request: LogsRequest) -> Result<ByteReader>;

    /// Extract a tar archive into `dest_dir` inside the container.
    async fn upload(&self, id: &str, dest_dir: &str, archive: Bytes) -> Result<()>;

    /// Fetch `path` from the container as a tar archive.
    async fn download(&self, id: &str, path: &str) -> Result<ArchiveDownload>;

    /// Snapshot the container into a new image and return the image id.
    async fn commit(&self, id: &str, request: CommitRequest) -> Result<String>;

    /// Remove the container.
    async fn remove(&self, id: &str, force: bool) -> Result<()>;
}
