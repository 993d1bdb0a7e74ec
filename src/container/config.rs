//! Container configuration builders.
//!
//! Provides a fluent API for building the runtime config (what the process
//! looks like, reused verbatim as an image's default config on commit) and
//! the host config (how the daemon wires it up) for a new container.

use crate::container::{ContainerError, Result};
use bollard::models::{HostConfig, PortBinding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container configuration builder.
///
/// Provides a fluent interface for constructing container configurations
/// with sane defaults and validation.
#[derive(Default)]
pub struct ContainerConfigBuilder {
    image: Option<String>,
    hostname: Option<String>,
    cmd: Option<Vec<String>>,
    working_dir: Option<String>,
    env: Vec<String>,
    user: Option<String>,
    memory_limit: Option<i64>,
    binds: Vec<String>,
    network_mode: Option<String>,
    port_bindings: HashMap<String, Option<Vec<PortBinding>>>,
}

impl ContainerConfigBuilder {
    /// Create a new container configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the hostname; it also prefixes the generated container name.
    pub fn hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the command to run in the container.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Set the working directory in the container.
    pub fn working_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in envs {
            self.env.push(format!("{}={}", k.into(), v.into()));
        }
        self
    }

    /// Set user to run as in the container.
    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set memory limit in bytes.
    pub fn memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Add a volume bind mount (host_path:container_path[:mode]).
    pub fn bind<S: Into<String>>(mut self, bind: S) -> Self {
        self.binds.push(bind.into());
        self
    }

    /// Set network mode (e.g., "bridge", "host", "none").
    pub fn network_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Add a port binding (container_port/protocol -> host_port).
    pub fn port_binding<S: Into<String>>(mut self, container_port: S, host_port: u16) -> Self {
        self.port_bindings.insert(
            container_port.into(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );
        self
    }

    /// Build the container configuration.
    ///
    /// # Errors
    ///
    /// Returns error if required fields are missing or invalid.
    pub fn build(self) -> Result<ContainerSpec> {
        let image = self
            .image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;

        let host_config = HostConfig {
            binds: (!self.binds.is_empty()).then_some(self.binds),
            memory: self.memory_limit,
            network_mode: self.network_mode,
            port_bindings: (!self.port_bindings.is_empty()).then_some(self.port_bindings),
            ..Default::default()
        };

        let config = ContainerConfig {
            image,
            hostname: self.hostname,
            cmd: self.cmd,
            working_dir: self.working_dir,
            env: (!self.env.is_empty()).then_some(self.env),
            user: self.user,
            ..Default::default()
        };

        Ok(ContainerSpec {
            config,
            host_config,
        })
    }
}

/// Runtime configuration of a container's process.
///
/// Retained verbatim by the container handle so that a commit records the
/// same defaults the container was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image name
    pub image: String,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// Entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Environment variables (`KEY=value`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Allocate a TTY
    #[serde(default)]
    pub tty: bool,
}

impl ContainerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ContainerConfigBuilder {
        ContainerConfigBuilder::new()
    }

    /// Minimal config running `image` with its defaults.
    pub fn from_image<S: Into<String>>(image: S) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Hostname used as the container name prefix.
    pub fn name_prefix(&self) -> &str {
        self.hostname.as_deref().unwrap_or_default()
    }
}

/// Runtime config plus host config, as produced by the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Process-level runtime configuration
    pub config: ContainerConfig,
    /// Daemon-side host configuration
    pub host_config: HostConfig,
}
