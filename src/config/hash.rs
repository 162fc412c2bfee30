//! Configuration fingerprints for change detection.
//!
//! The fingerprint is computed over the redacted tree, so rotating a secret
//! does not change it and the hash never depends on secret material.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::resolved::ResolvedConfig;
use super::tree::{kind_name, scalar_text, walk_leaves};

/// Hasher for computing configuration fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a fingerprint of a resolved configuration.
    ///
    /// Leaves are hashed in sorted path order, so two documents that differ
    /// only in key order hash the same.
    #[must_use]
    pub fn hash_config(&self, config: &ResolvedConfig) -> String {
        let redacted = config.redacted();
        let mut leaves = BTreeMap::new();
        walk_leaves(&redacted, "", &mut |path, value| {
            let text = scalar_text(value).unwrap_or_default();
            leaves.insert(path.to_string(), format!("{}:{text}", kind_name(value)));
        });

        let mut hasher = Sha256::new();
        hasher.update(config.target().environment.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(config.target().platform.as_str().as_bytes());
        for (path, value) in leaves {
            hasher.update([0u8]);
            hasher.update(path.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the SHA-256 of an artifact's bytes.
    #[must_use]
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
