//! # CF Local
//!
//! A local container engine for running Cloud Foundry style apps on a Docker
//! or Podman daemon. It creates short-lived containers, relays their console
//! output, restarts them on demand without dropping log lines, snapshots them
//! into images and moves files in and out of them.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: container handle, lifecycle state machine, log
//!   multiplexing, archives and the runtime seam
//! - **[`config`]**: engine configuration discovery and loading
//! - **[`cli`]**: command line parsing for the `cflocal` binary
//! - **[`env`]**: configuration paths and environment constants
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cflocal::container::{Container, ContainerClient, ContainerConfig};
//! use cflocal::EngineConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = EngineConfig::discover()?;
//!     let client = Arc::new(ContainerClient::with_config(engine.client_config()).await?);
//!
//!     let spec = ContainerConfig::builder()
//!         .image("cloudfoundry/cflinuxfs3")
//!         .hostname("myapp")
//!         .build()?;
//!     let container = Container::create(client, spec.config, spec.host_config)
//!         .await?
//!         .with_restart_policy(engine.restart);
//!
//!     let status = container
//!         .start(&engine.log_prefix_for("myapp"), tokio::io::stdout(), None)
//!         .await?;
//!     println!("exited with {}", status);
//!
//!     container.close().await?;
//!     Ok(())
//! }
//! ```

/// CLI argument parsing.
pub mod cli;

/// Engine configuration.
pub mod config;

/// Container lifecycle engine.
pub mod container;

/// Environment constants and path utilities.
pub mod env;

pub use config::{ConfigError, EngineConfig};
pub use container::{
    CANCELLED_STATUS, Container, ContainerClient, ContainerConfig, ContainerError,
    ContainerRuntime, DataStream, RestartPolicy,
};
