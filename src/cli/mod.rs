//! CLI module for deploy-forge.
//!
//! This module provides the command-line interface for resolving
//! targets and writing their deployment artifacts.

mod commands;
mod output;

pub use commands::{BuildArgs, Cli, Commands, OutputFormat, SecretSpec, TargetArgs};
pub use output::OutputFormatter;
