//! Container lifecycle engine.
//!
//! This module drives ephemeral build/run containers on a local Docker or
//! Podman daemon: it creates them, starts them while relaying their console
//! output, restarts them on demand without losing log continuity, snapshots
//! them into images, and moves files in and out via tar archives.
//!
//! ## Architecture
//!
//! - [`runtime`]: the [`ContainerRuntime`] capability trait the engine drives
//! - [`client`]: bollard-backed [`ContainerClient`] implementing the runtime
//! - [`config`]: container configuration builders
//! - [`handle`]: the [`Container`] handle (create/close/commit/copy)
//! - [`lifecycle`]: the start/restart/exit state machine
//! - [`logs`]: frame decoding and the log multiplexer
//! - [`archive`]: single-entry tar packing and entry extraction
//! - [`stream`]: sized byte streams with close finalizers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cflocal::container::{Container, ContainerClient, ContainerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(ContainerClient::new().await?);
//!
//!     let spec = ContainerConfig::builder()
//!         .image("cloudfoundry/cflinuxfs3")
//!         .hostname("myapp")
//!         .cmd(vec!["/bin/bash", "-c", "echo hello"])
//!         .build()?;
//!
//!     let container = Container::create(client, spec.config, spec.host_config).await?;
//!     let status = container.start("[myapp] ", tokio::io::stdout(), None).await?;
//!     println!("exited with {}", status);
//!
//!     container.close().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod client;
pub mod config;
pub mod handle;
pub mod lifecycle;
pub mod logs;
pub mod runtime;
pub mod stream;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{ContainerConfig, ContainerConfigBuilder, ContainerSpec};
pub use handle::{COMMIT_AUTHOR, Container};
pub use lifecycle::{CANCELLED_STATUS, LOG_DRAIN_TIMEOUT, RestartPolicy};
pub use logs::{FrameHeader, LogSource, StreamKind};
pub use runtime::{ArchiveDownload, CommitRequest, ContainerRuntime, LogsRequest};
pub use stream::DataStream;

/// Container engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The container resource could not be created
    #[error("Container creation failed: {0}")]
    Creation(String),

    /// A runtime call failed for a reason other than cancellation
    #[error("Runtime call '{call}' failed: {message}")]
    RuntimeCall { call: &'static str, message: String },

    /// The shared cancellation token fired while a call was in flight
    #[error("context canceled")]
    Cancelled,

    /// The requested path was absent from a copy-out archive
    #[error("Archive entry not found: {0}")]
    ArchiveEntryNotFound(String),

    /// Read/write failure while copying logs or archive data
    #[error("Stream I/O error: {0}")]
    StreamIo(#[from] std::io::Error),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),
}

impl ContainerError {
    /// Build a [`ContainerError::RuntimeCall`] from any displayable cause.
    pub fn runtime_call(call: &'static str, cause: impl std::fmt::Display) -> Self {
        ContainerError::RuntimeCall {
            call,
            message: cause.to_string(),
        }
    }

    /// Whether this error is the shared context being cancelled.
    ///
    /// Errors relayed as text from other layers are matched on the
    /// `"context canceled"` suffix as well.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ContainerError::Cancelled => true,
            other => other.to_string().ends_with("context canceled"),
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_detection() {
        assert!(ContainerError::Cancelled.is_cancelled());
        assert!(ContainerError::runtime_call("wait", "request failed: context canceled").is_cancelled());
        assert!(!ContainerError::runtime_call("wait", "no such container").is_cancelled());
        assert!(!ContainerError::Creation("conflict".to_string()).is_cancelled());
    }
}
