//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `run`: Run an app container, relaying its output until it exits
//! - `inject`: Copy a local file into a fresh container and commit it as an image
//! - `extract`: Copy a file out of a fresh container to the local filesystem
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    Inject(InjectConfig),
    Extract(ExtractConfig),
    ShowConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub image: String,
    pub hostname: Option<String>,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub volumes: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub memory_mb: Option<u64>,
    pub network: Option<String>,
    pub restart_every: Option<u64>,
    pub commit: Option<String>,
    pub config_override: Option<PathBuf>,
}

/// Host port published for a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug)]
pub struct InjectConfig {
    pub image: String,
    pub file: PathBuf,
    pub path: String,
    pub tag: String,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ExtractConfig {
    pub image: String,
    pub path: String,
    pub output: PathBuf,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "cflocal")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run, restart and snapshot local app containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a container from an image and relay its output
    Run {
        /// Image to run
        #[arg(short = 'i', long = "image")]
        image: String,
        /// Container hostname, also used as name and log prefix
        #[arg(long = "hostname")]
        hostname: Option<String>,
        /// Environment variable as KEY=VALUE (can be used multiple times)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// User to run the process as
        #[arg(short = 'u', long = "user")]
        user: Option<String>,
        /// Working directory inside the container
        #[arg(short = 'w', long = "workdir")]
        workdir: Option<String>,
        /// Bind mount as HOST_PATH:CONTAINER_PATH[:ro] (can be used multiple times)
        #[arg(short = 'v', long = "volume", value_name = "BIND")]
        volumes: Vec<String>,
        /// Publish a port as HOST:CONTAINER (can be used multiple times)
        #[arg(short = 'p', long = "publish", value_name = "HOST:CONTAINER")]
        ports: Vec<String>,
        /// Memory limit in megabytes
        #[arg(short = 'm', long = "memory", value_name = "MB")]
        memory: Option<u64>,
        /// Network mode (bridge, host, none or a network name)
        #[arg(long = "network")]
        network: Option<String>,
        /// Restart the container every N seconds until interrupted
        #[arg(long = "restart-every", value_name = "SECS")]
        restart_every: Option<u64>,
        /// Commit the container as this image reference once it stops
        #[arg(long = "commit", value_name = "REF")]
        commit: Option<String>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Command to run instead of the image default
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Copy a local file into a container and commit the result
    Inject {
        /// Base image
        #[arg(short = 'i', long = "image")]
        image: String,
        /// Local file to copy
        file: PathBuf,
        /// Absolute destination path inside the container
        path: String,
        /// Reference for the committed image
        #[arg(short = 't', long = "tag")]
        tag: String,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Copy a file out of an image to the local filesystem
    Extract {
        /// Image to read from
        #[arg(short = 'i', long = "image")]
        image: String,
        /// Absolute path of the file inside the container
        path: String,
        /// Local output file
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                image,
                hostname,
                env,
                user,
                workdir,
                volumes,
                ports,
                memory,
                network,
                restart_every,
                commit,
                config,
                command,
            }) => {
                if *restart_every == Some(0) {
                    return Err("--restart-every must be at least 1 second".to_string());
                }
                let env = env
                    .iter()
                    .map(|pair| parse_env_pair(pair))
                    .collect::<Result<Vec<_>, _>>()?;
                let ports = ports
                    .iter()
                    .map(|port| parse_port_mapping(port))
                    .collect::<Result<Vec<_>, _>>()?;
                for volume in volumes {
                    parse_bind(volume)?;
                }
                if *memory == Some(0) {
                    return Err("--memory must be at least 1 MB".to_string());
                }

                Ok(ExecutionMode::Run(RunConfig {
                    image: image.clone(),
                    hostname: hostname.clone(),
                    command: command.clone(),
                    env,
                    user: user.clone(),
                    working_dir: workdir.clone(),
                    volumes: volumes.clone(),
                    ports,
                    memory_mb: *memory,
                    network: network.clone(),
                    restart_every: *restart_every,
                    commit: commit.clone(),
                    config_override: config.clone(),
                }))
            }
            Some(Commands::Inject {
                image,
                file,
                path,
                tag,
                config,
            }) => Ok(ExecutionMode::Inject(InjectConfig {
                image: image.clone(),
                file: file.clone(),
                path: absolute_path(path)?,
                tag: tag.clone(),
                config_override: config.clone(),
            })),
            Some(Commands::Extract {
                image,
                path,
                output,
                config,
            }) => Ok(ExecutionMode::Extract(ExtractConfig {
                image: image.clone(),
                path: absolute_path(path)?,
                output: output.clone(),
                config_override: config.clone(),
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'cflocal --help' to see available commands.".to_string(),
            ),
        }
    }
}

fn parse_env_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid environment variable '{}', expected KEY=VALUE", pair)),
    }
}

fn parse_port_mapping(mapping: &str) -> Result<PortMapping, String> {
    let invalid = || format!("Invalid port mapping '{}', expected HOST:CONTAINER", mapping);
    let (host, container) = mapping.split_once(':').ok_or_else(invalid)?;
    Ok(PortMapping {
        host: host.parse().map_err(|_| invalid())?,
        container: container.parse().map_err(|_| invalid())?,
    })
}

fn parse_bind(bind: &str) -> Result<(), String> {
    let parts: Vec<&str> = bind.split(':').collect();
    let valid = match parts.as_slice() {
        [host, container] => !host.is_empty() && container.starts_with('/'),
        [host, container, mode] => {
            !host.is_empty() && container.starts_with('/') && matches!(*mode, "ro" | "rw")
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(format!(
            "Invalid volume '{}', expected HOST_PATH:CONTAINER_PATH[:ro]",
            bind
        ))
    }
}

fn absolute_path(path: &str) -> Result<String, String> {
    if path.starts_with('/') && path.len() > 1 {
        Ok(path.to_string())
    } else {
        Err(format!("Container path '{}' must be an absolute file path", path))
    }
}
