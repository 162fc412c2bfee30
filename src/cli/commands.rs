//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{Environment, Platform, Target};
use crate::emit::ArtifactKind;
use crate::error::Result;
use crate::secrets::{ChainSecretSource, DotenvSecretSource, EnvSecretSource, HttpSecretSource};

/// deploy-forge - Layered configuration resolution and deployment artifact generation.
#[derive(Parser, Debug)]
#[command(name = "deploy-forge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the YAML layers.
    #[arg(short, long, global = true, env = "FORGE_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Secret sources, tried in order: `env`, `env:PREFIX_`, `dotenv:PATH`,
    /// or an `http(s)://` secret store URL. Defaults to `env`.
    #[arg(long = "secrets", global = true, value_name = "SOURCE")]
    pub secrets: Vec<SecretSpec>,

    /// Bearer token for HTTP secret stores.
    #[arg(long, global = true, env = "FORGE_SECRETS_TOKEN", hide_env_values = true)]
    pub secrets_token: Option<String>,

    /// Timeout for loading one target's layers, in seconds.
    #[arg(long, global = true, default_value = "10")]
    pub load_timeout_secs: u64,

    /// Timeout for one secret lookup, in seconds.
    #[arg(long, global = true, default_value = "5")]
    pub secret_timeout_secs: u64,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter set of layers into the config directory.
    Init {
        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Print the merged configuration for a target.
    Resolve {
        /// Target selection.
        #[command(flatten)]
        target: TargetArgs,

        /// Show which layer set every value.
        #[arg(long)]
        origins: bool,

        /// Merge only; skip secrets, validation and ports.
        #[arg(long)]
        raw: bool,
    },

    /// Resolve a target and report validation results.
    Validate {
        /// Target selection.
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the ports assigned for a target.
    Ports {
        /// Target selection.
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Build and write the artifacts for one target.
    Build {
        /// Target selection.
        #[command(flatten)]
        target: TargetArgs,

        /// Build settings.
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Build and write the artifacts for every target concurrently.
    BuildAll {
        /// Build settings.
        #[command(flatten)]
        build: BuildArgs,
    },
}

/// The `--env` / `--platform` pair.
#[derive(Args, Debug, Clone, Copy)]
pub struct TargetArgs {
    /// Deployment environment.
    #[arg(short, long, value_enum)]
    pub env: Environment,

    /// Deployment platform.
    #[arg(short, long, value_enum)]
    pub platform: Platform,
}

impl TargetArgs {
    /// The selected target.
    #[must_use]
    pub const fn target(&self) -> Target {
        Target::new(self.env, self.platform)
    }
}

/// Options shared by the build commands.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Output root; artifacts go to `<out>/<environment>/<platform>/`.
    #[arg(short, long, default_value = "out")]
    pub out: PathBuf,

    /// Artifacts to build (defaults to all).
    #[arg(short, long = "artifact", value_enum)]
    pub artifacts: Vec<ArtifactKind>,
}

impl BuildArgs {
    /// The requested artifact kinds, or every kind if none was given.
    #[must_use]
    pub fn kinds(&self) -> Vec<ArtifactKind> {
        if self.artifacts.is_empty() {
            ArtifactKind::ALL.to_vec()
        } else {
            self.artifacts.clone()
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// One `--secrets` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSpec {
    /// The process environment.
    Env,
    /// The process environment, names prefixed.
    EnvPrefix(String),
    /// A `.env` file read into memory.
    Dotenv(PathBuf),
    /// An HTTP secret store.
    Http(String),
}

impl FromStr for SecretSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "env" {
            return Ok(Self::Env);
        }
        if let Some(prefix) = s.strip_prefix("env:") {
            return Ok(Self::EnvPrefix(prefix.to_string()));
        }
        if let Some(path) = s.strip_prefix("dotenv:") {
            if path.is_empty() {
                return Err(String::from("dotenv source needs a path, e.g. dotenv:.env"));
            }
            return Ok(Self::Dotenv(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::Http(s.to_string()));
        }
        Err(format!(
            "Unknown secret source: {s}. Expected env, env:PREFIX_, dotenv:PATH, or an http(s):// URL"
        ))
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Builds the secret source chain from `--secrets`, in the order given.
    ///
    /// # Errors
    ///
    /// Returns an error if a dotenv file cannot be read or an HTTP client
    /// cannot be created.
    pub fn secret_source(&self) -> Result<ChainSecretSource> {
        let specs = if self.secrets.is_empty() {
            vec![SecretSpec::Env]
        } else {
            self.secrets.clone()
        };

        let mut chain = ChainSecretSource::new();
        for spec in specs {
            match spec {
                SecretSpec::Env => chain.push(Box::new(EnvSecretSource::new())),
                SecretSpec::EnvPrefix(prefix) => chain.push(Box::new(EnvSecretSource::with_prefix(prefix))),
                SecretSpec::Dotenv(path) => chain.push(Box::new(DotenvSecretSource::load(path)?)),
                SecretSpec::Http(url) => {
                    let timeout = std::time::Duration::from_secs(self.secret_timeout_secs);
                    let mut source = HttpSecretSource::with_timeout(&url, timeout)?;
                    if let Some(token) = &self.secrets_token {
                        source = source.with_token(token.clone());
                    }
                    chain.push(Box::new(source));
                }
            }
        }
        Ok(chain)
    }
}
