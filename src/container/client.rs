//! Docker/Podman client wrapper.
//!
//! Provides the bollard-backed implementation of [`ContainerRuntime`] with
//! automatic connection handling and fallback to Podman sockets.

use crate::container::logs::{StreamKind, encode_frame, payload_timestamp};
use crate::container::runtime::{
    ArchiveDownload, ByteReader, CommitRequest, ContainerRuntime, LogsRequest,
};
use crate::container::{ContainerConfig, ContainerError, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerConfig as ImageConfig, ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CommitContainerOptionsBuilder, CreateContainerOptionsBuilder,
    DownloadFromContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, RestartContainerOptionsBuilder, StartContainerOptions,
    UploadToContainerOptionsBuilder, WaitContainerOptions,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Explicit daemon socket (e.g. `unix:///run/podman/podman.sock`)
    pub socket: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout: 120,
        }
    }
}

/// Docker/Podman API client wrapper.
///
/// Manages connection to Docker or Podman daemon with automatic fallback
/// and health checking.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Create a new container client with default configuration.
    ///
    /// Attempts to connect to Docker first, then falls back to Podman if available.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are available or connection fails.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Create a new container client with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = match config.socket.as_deref() {
            Some(socket) => {
                debug!("Connecting to configured socket: {}", socket);
                Docker::connect_with_socket(socket, config.timeout, bollard::API_DEFAULT_VERSION)?
            }
            None => Self::connect(config.timeout)?,
        };

        let client = Self {
            docker: Arc::new(docker),
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. Local defaults (Unix socket or Windows named pipe, honours DOCKER_HOST)
    /// 2. Rootless Podman socket
    /// 3. System Podman socket
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }
        #[cfg(not(unix))]
        let _ = timeout;

        Err(ContainerError::runtime_call(
            "connect",
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.",
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::runtime_call("ping", e))?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        self.docker
            .version()
            .await
            .map_err(|e| ContainerError::runtime_call("version", e))
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let is_podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|c| c.name.to_lowercase().contains("podman"));

        Ok(if is_podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        })
    }

    /// Check if an image exists locally.
    ///
    /// # Errors
    ///
    /// Returns error if image inspection fails.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for ContainerClient {
    async fn create(
        &self,
        name: &str,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<String> {
        let options = CreateContainerOptionsBuilder::default().name(name).build();
        let body = ContainerCreateBody {
            image: Some(config.image.clone()),
            hostname: config.hostname.clone(),
            cmd: config.cmd.clone(),
            entrypoint: config.entrypoint.clone(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            labels: config.labels.clone(),
            user: config.user.clone(),
            tty: Some(config.tty),
            host_config: Some(host_config.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| ContainerError::Creation(e.to_string()))?;
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| ContainerError::runtime_call("start", e))
    }

    async fn restart(&self, id: &str, grace: Duration) -> Result<()> {
        let options = RestartContainerOptionsBuilder::default()
            .t(grace_secs(grace).try_into().unwrap_or_default())
            .build();
        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|e| ContainerError::runtime_call("restart", e))
    }

    async fn inspect_started_at(&self, id: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| ContainerError::runtime_call("inspect", e))?;

        inspect
            .state
            .and_then(|state| state.started_at)
            .ok_or_else(|| ContainerError::runtime_call("inspect", "container has no start time"))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut responses = std::pin::pin!(self.docker.wait_container(id, None::<WaitContainerOptions>));
        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it is still a status.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(ContainerError::runtime_call("wait", e)),
            None => Err(ContainerError::runtime_call(
                "wait",
                "wait stream ended without a status",
            )),
        }
    }

    async fn logs(&self, id: &str, request: LogsRequest) -> Result<ByteReader> {
        // The daemon filters at whole seconds; frames are trimmed to the exact instant below.
        let since_secs = request.since.map(|t| t.timestamp().max(0)).unwrap_or(0);
        let options = LogsOptionsBuilder::default()
            .follow(request.follow)
            .stdout(true)
            .stderr(true)
            .timestamps(request.timestamps)
            .since(since_secs.try_into().unwrap_or_default())
            .build();

        let since = request.since.filter(|_| request.timestamps);
        let frames = self
            .docker
            .logs(id, Some(options))
            .try_filter(move |output| futures::future::ready(is_at_or_after(output, since)))
            .map_ok(encode_log_output)
            .map_err(io::Error::other);

        Ok(Box::pin(StreamReader::new(Box::pin(frames))))
    }

    async fn upload(&self, id: &str, dest_dir: &str, archive: Bytes) -> Result<()> {
        let options = UploadToContainerOptionsBuilder::default()
            .path(dest_dir)
            .build();
        self.docker
            .upload_to_container(id, Some(options), bollard::body_full(archive))
            .await
            .map_err(|e| ContainerError::runtime_call("upload", e))
    }

    async fn download(&self, id: &str, path: &str) -> Result<ArchiveDownload> {
        let options = DownloadFromContainerOptionsBuilder::default()
            .path(path)
            .build();
        let mut chunks = Box::pin(self.docker.download_from_container(id, Some(options)));

        // Surface a missing path as such instead of as a broken archive.
        let first = match chunks.next().await {
            Some(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            })) => return Err(ContainerError::ArchiveEntryNotFound(path.to_string())),
            Some(Err(e)) => return Err(ContainerError::runtime_call("download", e)),
            first => first,
        };

        let archive = stream::iter(first).chain(chunks).map_err(io::Error::other);
        Ok(ArchiveDownload {
            archive: Box::pin(StreamReader::new(Box::pin(archive))),
            // bollard does not expose the path-stat header
            stat_size: None,
        })
    }

    async fn commit(&self, id: &str, request: CommitRequest) -> Result<String> {
        let options = CommitContainerOptionsBuilder::default()
            .container(id)
            .repo(&request.repo)
            .tag(&request.tag)
            .author(&request.author)
            .pause(request.pause)
            .build();

        let response = self
            .docker
            .commit_container(options, image_config(&request.config))
            .await
            .map_err(|e| ContainerError::runtime_call("commit", e))?;

        response
            .id
            .into_image_id()
            .ok_or_else(|| ContainerError::runtime_call("commit", "daemon returned no image id"))
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| ContainerError::runtime_call("remove", e))
    }
}

/// Grace period in whole seconds, rounded up so a sub-second grace still
/// gives the process time to stop.
fn grace_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

/// Image default config equivalent to a container's runtime config.
fn image_config(config: &ContainerConfig) -> ImageConfig {
    ImageConfig {
        image: Some(config.image.clone()),
        hostname: config.hostname.clone(),
        cmd: config.cmd.clone(),
        entrypoint: config.entrypoint.clone(),
        working_dir: config.working_dir.clone(),
        env: config.env.clone(),
        labels: config.labels.clone(),
        user: config.user.clone(),
        tty: Some(config.tty),
        ..Default::default()
    }
}

/// Commit responses carry the id as optional or required depending on API version.
trait IntoImageId {
    fn into_image_id(self) -> Option<String>;
}

impl IntoImageId for String {
    fn into_image_id(self) -> Option<String> {
        Some(self).filter(|id| !id.is_empty())
    }
}

impl IntoImageId for Option<String> {
    fn into_image_id(self) -> Option<String> {
        self.filter(|id| !id.is_empty())
    }
}

fn log_message(output: &LogOutput) -> &[u8] {
    match output {
        LogOutput::StdErr { message }
        | LogOutput::StdOut { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message,
    }
}

fn is_at_or_after(output: &LogOutput, since: Option<DateTime<Utc>>) -> bool {
    match since {
        Some(since) => payload_timestamp(log_message(output)).is_none_or(|ts| ts >= since),
        None => true,
    }
}

fn encode_log_output(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdErr { message } => encode_frame(StreamKind::Stderr, &message),
        LogOutput::StdIn { message } => encode_frame(StreamKind::Stdin, &message),
        // TTY output arrives unframed as console output.
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            encode_frame(StreamKind::Stdout, &message)
        }
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}
