//! Artifact emission.
//!
//! Each artifact is a pure projection of a validated [`ResolvedConfig`]:
//! nothing here merges, validates, or looks up secrets again. A failure
//! means the resolved document does not have the structure the artifact
//! needs.

mod compose;
mod env_file;
mod health;
mod manifest;
mod services;
mod writer;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::config::{ConfigHasher, ResolvedConfig, Target};
use crate::error::Result;

pub use manifest::{ArtifactDigest, BuildManifest, MANIFEST_FILE};
pub use services::{BuildSpec, HealthSpec, ResourceSpec, ScalarString, ServiceSpec, DEFAULT_RESTART_POLICY};
pub use writer::ArtifactWriter;

/// The artifact shapes the engine can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// `KEY=VALUE` environment file.
    EnvFile,
    /// Compose service descriptors.
    Compose,
    /// Per-service health-check specs.
    HealthChecks,
}

impl ArtifactKind {
    /// Every artifact kind, in emission order.
    pub const ALL: [Self; 3] = [Self::EnvFile, Self::Compose, Self::HealthChecks];

    /// File name the artifact is written under.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::EnvFile => ".env",
            Self::Compose => "docker-compose.yml",
            Self::HealthChecks => "healthchecks.yaml",
        }
    }

    /// Short name used in errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnvFile => "env-file",
            Self::Compose => "compose",
            Self::HealthChecks => "health-checks",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How leaves that were filled from a secret source are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretHandling {
    /// Emit the original `${NAME}` reference. Used for anything written to disk.
    #[default]
    Reference,
    /// Emit the resolved secret value. For in-memory use only.
    Inline,
}

/// One emitted artifact.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    /// What kind of artifact this is.
    pub kind: ArtifactKind,
    /// File name to write it under.
    pub file_name: String,
    /// Artifact content.
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// SHA-256 of the content, hex encoded.
    #[must_use]
    pub fn sha256(&self) -> String {
        ConfigHasher::new().hash_bytes(&self.bytes)
    }

    /// Content as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Projects `config` into one artifact.
///
/// # Errors
///
/// Returns an [`EmitError`](crate::error::EmitError) if a key the artifact
/// needs is missing or has the wrong shape.
pub fn emit(config: &ResolvedConfig, kind: ArtifactKind, secrets: SecretHandling) -> Result<Artifact> {
    let redacted;
    let tree: &Value = match secrets {
        SecretHandling::Inline => config.tree(),
        SecretHandling::Reference => {
            redacted = config.redacted();
            &redacted
        }
    };

    let references: BTreeSet<&str> = match secrets {
        SecretHandling::Inline => BTreeSet::new(),
        SecretHandling::Reference => config.secret_bindings().keys().map(String::as_str).collect(),
    };

    let bytes = match kind {
        ArtifactKind::EnvFile => env_file::render(config.target(), tree)?,
        ArtifactKind::Compose => compose::render(config.target(), tree, &references)?,
        ArtifactKind::HealthChecks => health::render(config.target(), tree)?,
    };

    Ok(Artifact {
        kind,
        file_name: kind.file_name().to_string(),
        bytes,
    })
}

/// Projects `config` into every requested artifact. Fails on the first
/// artifact that cannot be produced; nothing is returned in that case.
///
/// # Errors
///
/// Returns the first emission error.
pub fn emit_all(config: &ResolvedConfig, kinds: &[ArtifactKind], secrets: SecretHandling) -> Result<Vec<Artifact>> {
    kinds.iter().map(|kind| emit(config, *kind, secrets)).collect()
}

/// First line of every generated text artifact.
fn header(target: &Target) -> String {
    format!("# Generated by deploy-forge for {target}. Do not edit.\n")
}
