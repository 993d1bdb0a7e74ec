//! Container handle.
//!
//! A [`Container`] owns one container resource on the runtime from creation
//! until [`Container::close`], which force-removes it. The handle keeps the
//! runtime config it was created with so that [`Container::commit`] records
//! the same defaults in the snapshot image.

use crate::container::archive::{self, FILE_MODE};
use crate::container::lifecycle::RestartPolicy;
use crate::container::runtime::{CommitRequest, ContainerRuntime};
use crate::container::{ContainerConfig, ContainerError, DataStream, Result};
use bollard::models::HostConfig;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Author recorded in committed images.
pub const COMMIT_AUTHOR: &str = "CF Local";

const DEFAULT_NAME_PREFIX: &str = "cflocal";

/// Handle to one container resource.
pub struct Container {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) id: String,
    name: String,
    config: ContainerConfig,
    pub(crate) exit: CancellationToken,
    pub(crate) policy: RestartPolicy,
    pub(crate) bold_stderr: bool,
}

impl Container {
    /// Create a new container on `runtime`.
    ///
    /// The container is named after the config's hostname plus a random
    /// suffix, so repeated runs of the same app never collide.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Creation`] if the runtime rejects the
    /// request (duplicate name, invalid config, daemon unavailable).
    pub async fn create(
        runtime: Arc<dyn ContainerRuntime>,
        config: ContainerConfig,
        host_config: HostConfig,
    ) -> Result<Self> {
        let name = container_name(config.name_prefix());
        debug!("Creating container {} from image {}", name, config.image);

        let id = runtime
            .create(&name, &config, &host_config)
            .await
            .map_err(|e| match e {
                ContainerError::Creation(_) => e,
                other => ContainerError::Creation(other.to_string()),
            })?;

        info!("Created container: {} ({})", name, short_id(&id));

        Ok(Self {
            runtime,
            id,
            name,
            config,
            exit: CancellationToken::new(),
            policy: RestartPolicy::default(),
            bold_stderr: false,
        })
    }

    /// Use `exit` as the signal that the caller wants the container stopped.
    ///
    /// Once it fires, a running [`start`](Container::start) returns
    /// [`CANCELLED_STATUS`](crate::container::CANCELLED_STATUS) and no
    /// further restarts are attempted.
    pub fn with_exit_signal(mut self, exit: CancellationToken) -> Self {
        self.exit = exit;
        self
    }

    /// Override the restart grace period and log backoff.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Render stderr frames in bold.
    pub fn with_bold_stderr(mut self, enable: bool) -> Self {
        self.bold_stderr = enable;
        self
    }

    /// Runtime-assigned container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Generated container name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime config the container was created with.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// The exit signal; cancelling it stops a running start.
    pub fn exit_signal(&self) -> &CancellationToken {
        &self.exit
    }

    /// Force-remove the container, running or not.
    ///
    /// # Errors
    ///
    /// Returns the runtime's removal error, including when the container
    /// was already removed.
    pub async fn close(self) -> Result<()> {
        remove(self.runtime.as_ref(), &self.id).await
    }

    /// Remove the container once `stream` has been consumed and closed.
    ///
    /// Without a stream the container is removed immediately and `None` is
    /// returned. Otherwise the returned stream removes the container after
    /// its own close; an error from the stream's close takes precedence over
    /// a removal error, and removal runs either way.
    pub async fn close_after_stream(self, stream: Option<DataStream>) -> Result<Option<DataStream>> {
        let Some(mut stream) = stream else {
            self.close().await?;
            return Ok(None);
        };

        debug!(
            "Deferring removal of container {} until stream is closed",
            short_id(&self.id)
        );
        let Container { runtime, id, .. } = self;
        stream.on_close(move || async move { remove(runtime.as_ref(), &id).await });
        Ok(Some(stream))
    }

    /// Snapshot the container into a new image tagged `reference`.
    ///
    /// The container is paused for the duration of the snapshot and the
    /// image's default config is the config the container was created with.
    ///
    /// # Errors
    ///
    /// Returns error if `reference` is malformed or the commit fails.
    pub async fn commit(&self, reference: &str) -> Result<String> {
        let (repo, tag) = split_reference(reference)?;
        let request = CommitRequest {
            repo,
            tag,
            author: COMMIT_AUTHOR.to_string(),
            pause: true,
            config: self.config.clone(),
        };

        let image_id = self.runtime.commit(&self.id, request).await?;
        info!(
            "Committed container {} as {} ({})",
            short_id(&self.id),
            reference,
            image_id
        );
        Ok(image_id)
    }

    /// Extract a tar archive into `path` inside the container.
    pub async fn extract_to(&self, archive: Bytes, path: &str) -> Result<()> {
        self.runtime.upload(&self.id, path, archive).await
    }

    /// Write `stream` to the file `path` inside the container.
    ///
    /// The stream is closed on every path, whether or not the copy succeeds;
    /// a copy error takes precedence over a close error.
    pub async fn copy_to(&self, mut stream: DataStream, path: &str) -> Result<()> {
        let copied = self.upload_stream(&mut stream, path).await;
        let closed = stream.close().await;
        copied.and(closed)
    }

    async fn upload_stream(&self, stream: &mut DataStream, path: &str) -> Result<()> {
        let size = stream.size();
        let mut contents = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
        (&mut *stream).take(size).read_to_end(&mut contents).await?;
        if contents.len() as u64 != size {
            return Err(ContainerError::StreamIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "stream ended after {} of {} declared bytes",
                    contents.len(),
                    size
                ),
            )));
        }

        let archive = archive::pack_file(path, &contents, FILE_MODE)?;
        debug!(
            "Copying {} bytes to {}:{}",
            size,
            short_id(&self.id),
            path
        );
        self.extract_to(Bytes::from(archive), "/").await
    }

    /// Read the file at `path` out of the container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ArchiveEntryNotFound`] if the path does not
    /// exist in the container.
    pub async fn copy_from(&self, path: &str) -> Result<DataStream> {
        let download = self.runtime.download(&self.id, path).await?;
        archive::extract_entry(download, &archive::entry_name(path)).await
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.config.image)
            .finish()
    }
}

async fn remove(runtime: &dyn ContainerRuntime, id: &str) -> Result<()> {
    runtime.remove(id, true).await?;
    info!("Removed container: {}", short_id(id));
    Ok(())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Name for a new container: the prefix plus a random suffix.
pub fn container_name(prefix: &str) -> String {
    let prefix = if prefix.is_empty() {
        DEFAULT_NAME_PREFIX
    } else {
        prefix
    };
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Split an image reference into repository and tag.
///
/// A colon only separates a tag inside the last path segment, so registry
/// ports (`localhost:5000/app`) are kept in the repository.
pub fn split_reference(reference: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| {
        ContainerError::ConfigError(format!("Invalid image reference '{}': {}", reference, reason))
    };

    if reference.trim().is_empty() {
        return Err(invalid("empty"));
    }
    if reference.contains('@') {
        return Err(invalid("digest references cannot be committed"));
    }

    let segment_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[segment_start..].rfind(':') {
        Some(offset) => {
            let colon = segment_start + offset;
            let (repo, tag) = (&reference[..colon], &reference[colon + 1..]);
            if repo.is_empty() || tag.is_empty() {
                return Err(invalid("missing repository or tag"));
            }
            Ok((repo.to_string(), tag.to_string()))
        }
        None => Ok((reference.to_string(), String::new())),
    }
}
