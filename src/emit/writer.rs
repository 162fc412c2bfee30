//! Writes a target's artifacts to disk.
//!
//! The full set, manifest included, is staged in a hidden sibling directory
//! and then moved into place with a directory rename. An existing output
//! directory is moved aside first and restored if the swap fails, so the
//! target directory holds either the previous set or the new one, never a
//! mix. Between the two renames the directory is briefly absent.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Target;
use crate::error::Result;

use super::manifest::{BuildManifest, MANIFEST_FILE};
use super::Artifact;

/// Writes artifacts under `<root>/<environment>/<platform>/`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    /// Creates a writer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output directory for a target.
    #[must_use]
    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.environment_dir(target).join(target.platform.as_str())
    }

    fn environment_dir(&self, target: &Target) -> PathBuf {
        self.root.join(target.environment.as_str())
    }

    /// Replaces the output directory for `target` with the artifacts and the
    /// manifest. Files from an earlier build that are not part of this set
    /// are removed with the old directory.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be staged or the staged directory
    /// cannot be moved into place. The staging directory is removed and the
    /// previous output is left as it was.
    pub async fn write(&self, target: &Target, artifacts: &[Artifact], manifest: &BuildManifest) -> Result<PathBuf> {
        let parent = self.environment_dir(target);
        let dir = self.target_dir(target);
        fs::create_dir_all(&parent).await?;

        let manifest_json = manifest.to_json()?;
        let id = Uuid::new_v4().simple();
        let platform = target.platform.as_str();
        let staging = parent.join(format!(".{platform}.{id}.staging"));
        let aside = parent.join(format!(".{platform}.{id}.previous"));
        fs::create_dir(&staging).await?;

        let files = artifacts
            .iter()
            .map(|a| (a.file_name.as_str(), a.bytes.as_slice()))
            .chain(std::iter::once((MANIFEST_FILE, manifest_json.as_slice())));
        for (name, bytes) in files {
            if let Err(e) = stage(&staging.join(name), bytes).await {
                discard(&staging).await;
                return Err(e);
            }
        }
        debug!("Staged {} file(s) in {}", artifacts.len() + 1, staging.display());

        if let Err(e) = swap_in(&staging, &dir, &aside).await {
            discard(&staging).await;
            return Err(e);
        }

        info!("Wrote {} artifact(s) for {target} to {}", artifacts.len(), dir.display());
        Ok(dir)
    }
}

async fn stage(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Moves `staging` to `dir`. An existing `dir` is renamed to `aside` first,
/// put back if the second rename fails, and removed once the swap succeeds.
async fn swap_in(staging: &Path, dir: &Path, aside: &Path) -> Result<()> {
    if !fs::try_exists(dir).await? {
        fs::rename(staging, dir).await?;
        return Ok(());
    }

    fs::rename(dir, aside).await?;
    if let Err(e) = fs::rename(staging, dir).await {
        if let Err(restore) = fs::rename(aside, dir).await {
            warn!("Failed to restore {} from {}: {restore}", dir.display(), aside.display());
        }
        return Err(e.into());
    }
    discard(aside).await;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        warn!("Failed to remove {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, Platform};
    use crate::emit::ArtifactKind;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn artifacts() -> Vec<Artifact> {
        vec![
            Artifact {
                kind: ArtifactKind::EnvFile,
                file_name: String::from(".env"),
                bytes: b"ENVIRONMENT=staging\n".to_vec(),
            },
            Artifact {
                kind: ArtifactKind::Compose,
                file_name: String::from("docker-compose.yml"),
                bytes: b"services: {}\n".to_vec(),
            },
        ]
    }

    #[tokio::test]
    async fn test_writes_artifacts_and_manifest() {
        let root = tempfile::tempdir().unwrap();
        let target = Target::new(Environment::Staging, Platform::Docker);
        let artifacts = artifacts();
        let manifest = BuildManifest::new(target, "hash", vec![String::from("base")], &artifacts);

        let dir = ArtifactWriter::new(root.path())
            .write(&target, &artifacts, &manifest)
            .await
            .unwrap();

        assert_eq!(dir, root.path().join("staging").join("docker"));
        assert_eq!(std::fs::read(dir.join(".env")).unwrap(), b"ENVIRONMENT=staging\n");
        let written: BuildManifest = serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(written.build_id, manifest.build_id);

        assert_eq!(entries(&root.path().join("staging")), vec!["docker"]);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_output() {
        let root = tempfile::tempdir().unwrap();
        let target = Target::new(Environment::Development, Platform::Local);
        let writer = ArtifactWriter::new(root.path());
        let mut artifacts = artifacts();
        let manifest = BuildManifest::new(target, "one", vec![], &artifacts);
        writer.write(&target, &artifacts, &manifest).await.unwrap();

        artifacts[0].bytes = b"ENVIRONMENT=development\n".to_vec();
        artifacts.truncate(1);
        let manifest = BuildManifest::new(target, "two", vec![], &artifacts);
        let dir = writer.write(&target, &artifacts, &manifest).await.unwrap();
        assert_eq!(std::fs::read(dir.join(".env")).unwrap(), b"ENVIRONMENT=development\n");
        assert_eq!(entries(&dir), vec![".env", MANIFEST_FILE]);
        assert_eq!(entries(&root.path().join("development")), vec!["local"]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_set() {
        let root = tempfile::tempdir().unwrap();
        let target = Target::new(Environment::Production, Platform::Docker);
        let writer = ArtifactWriter::new(root.path());
        let artifacts = artifacts();
        let manifest = BuildManifest::new(target, "one", vec![], &artifacts);
        let dir = writer.write(&target, &artifacts, &manifest).await.unwrap();

        // The second file cannot be staged: its parent directory does not exist.
        let mut broken = artifacts.clone();
        broken[0].bytes = b"ENVIRONMENT=changed\n".to_vec();
        broken[1].file_name = String::from("missing/docker-compose.yml");
        let manifest_two = BuildManifest::new(target, "two", vec![], &broken);
        assert!(writer.write(&target, &broken, &manifest_two).await.is_err());

        assert_eq!(std::fs::read(dir.join(".env")).unwrap(), b"ENVIRONMENT=staging\n");
        let written: BuildManifest = serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(written.config_hash, "one");
        assert_eq!(entries(&root.path().join("production")), vec!["docker"]);
    }

    #[tokio::test]
    async fn test_unwritable_root_fails() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let target = Target::new(Environment::Staging, Platform::Cloud);
        let manifest = BuildManifest::new(target, "h", vec![], &[]);
        assert!(ArtifactWriter::new(&blocker).write(&target, &[], &manifest).await.is_err());
    }
}
