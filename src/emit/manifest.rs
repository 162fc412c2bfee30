//! Build manifest written next to a target's artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ConfigHasher, Target};
use crate::error::{EmitError, Result};

use super::Artifact;

/// Manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current version of the manifest format.
pub const MANIFEST_VERSION: &str = "1";

/// Record of one build of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Manifest format version.
    pub version: String,
    /// Unique id of this build.
    pub build_id: Uuid,
    /// When the build ran.
    pub built_at: DateTime<Utc>,
    /// Target the artifacts were built for.
    pub target: Target,
    /// Fingerprint of the resolved, secret-redacted configuration.
    pub config_hash: String,
    /// Layers merged, lowest precedence first.
    pub layers: Vec<String>,
    /// Every artifact written.
    pub artifacts: Vec<ArtifactDigest>,
}

/// Name and checksum of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    /// File name.
    pub file_name: String,
    /// SHA-256 of the content.
    pub sha256: String,
    /// Size in bytes.
    pub size: usize,
}

impl BuildManifest {
    /// Creates a manifest for freshly emitted artifacts.
    #[must_use]
    pub fn new(target: Target, config_hash: impl Into<String>, layers: Vec<String>, artifacts: &[Artifact]) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            target,
            config_hash: config_hash.into(),
            layers,
            artifacts: artifacts
                .iter()
                .map(|artifact| ArtifactDigest {
                    file_name: artifact.file_name.clone(),
                    sha256: artifact.sha256(),
                    size: artifact.bytes.len(),
                })
                .collect(),
        }
    }

    /// Serializes the manifest as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| {
            EmitError::Serialize {
                artifact: "manifest",
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Returns true if `artifacts` are byte-for-byte the ones recorded here.
    #[must_use]
    pub fn matches(&self, artifacts: &[Artifact]) -> bool {
        self.artifacts.len() == artifacts.len()
            && self
                .artifacts
                .iter()
                .zip(artifacts)
                .all(|(digest, artifact)| {
                    digest.file_name == artifact.file_name
                        && ConfigHasher::hashes_match(&digest.sha256, &artifact.sha256())
                })
    }
}
