//! CLI-specific functionality for CF Local
//!
//! This module contains argument parsing and the mapping from subcommands to
//! execution modes.

pub mod args;

pub use args::{Args, ExecutionMode, ExtractConfig, InjectConfig, PortMapping, RunConfig};
