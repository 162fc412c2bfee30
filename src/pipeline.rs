//! End-to-end resolution pipeline.
//!
//! One run takes a [`Target`] through every stage in order:
//! load layers, merge, fill secrets, validate, allocate ports, and
//! optionally emit artifacts. Each stage fails closed; nothing is emitted
//! unless every stage before it succeeded.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{
    ConfigHasher, ConfigMerger, ConfigValidator, LayerLoader, ResolvedConfig, Target, ValidationReport,
};
use crate::emit::{emit_all, Artifact, ArtifactKind, BuildManifest, SecretHandling};
use crate::error::{ForgeError, LayerError, Result};
use crate::ports::{PortAllocation, PortAllocator, PortPlan};
use crate::secrets::{SecretResolver, SecretSource};

/// Default bound on loading every layer of one target.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on one secret lookup.
pub const DEFAULT_SECRET_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Bound on loading a target's layers.
    pub load_timeout: Duration,
    /// Bound on each secret lookup.
    pub secret_timeout: Duration,
    /// How secret-filled leaves appear in built artifacts.
    pub secret_handling: SecretHandling,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            secret_timeout: DEFAULT_SECRET_TIMEOUT,
            secret_handling: SecretHandling::Reference,
        }
    }
}

/// A fully resolved target, ready for emission.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// The merged, secret-filled, validated config with ports written back.
    pub config: ResolvedConfig,
    /// Ports assigned to each service.
    pub ports: PortAllocation,
    /// Non-fatal validation findings.
    pub report: ValidationReport,
    /// Fingerprint of the secret-redacted config.
    pub fingerprint: String,
}

impl ResolvedTarget {
    /// The target this was resolved for.
    #[must_use]
    pub const fn target(&self) -> &Target {
        self.config.target()
    }
}

/// Artifacts built for one target.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The resolution the artifacts were projected from.
    pub resolved: ResolvedTarget,
    /// Emitted artifacts, in the requested order.
    pub artifacts: Vec<Artifact>,
    /// Manifest describing the artifacts.
    pub manifest: BuildManifest,
}

/// Result of building one target in a batch.
#[derive(Debug)]
pub struct TargetOutcome {
    /// The target.
    pub target: Target,
    /// Build output or the error that stopped it.
    pub result: Result<BuildOutput>,
}

/// Summary of a batch, suitable for printing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Targets built successfully.
    pub succeeded: usize,
    /// Targets that failed.
    pub failed: usize,
    /// Error message per failed target.
    pub errors: Vec<String>,
}

/// Drives targets through every resolution stage.
#[derive(Clone)]
pub struct Pipeline {
    loader: Arc<LayerLoader>,
    secrets: Arc<dyn SecretSource>,
    merger: ConfigMerger,
    validator: ConfigValidator,
    hasher: ConfigHasher,
    options: PipelineOptions,
}

impl Pipeline {
    /// Creates a pipeline with default validation and options.
    #[must_use]
    pub fn new(loader: LayerLoader, secrets: impl SecretSource + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            secrets: Arc::new(secrets),
            merger: ConfigMerger::new(),
            validator: ConfigValidator::new(),
            hasher: ConfigHasher::new(),
            options: PipelineOptions::default(),
        }
    }

    /// Replaces the validator, e.g. to extend the security policy.
    #[must_use]
    pub fn with_validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the options.
    #[must_use]
    pub const fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// The options in effect.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Loads and merges the target's layers without filling secrets or
    /// validating. Useful for inspecting where a value comes from.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or merging fails.
    pub async fn merge_only(&self, target: Target) -> Result<ResolvedConfig> {
        let layers = self.load_layers(target).await?;
        self.merger.resolve(&target, &layers)
    }

    /// Resolves a target: load, merge, fill secrets, validate, allocate ports.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage that fails.
    pub async fn resolve(&self, target: Target) -> Result<ResolvedTarget> {
        info!("Resolving {target}");

        let merged = self.merge_only(target).await?;
        debug!("Merged {} layer(s) for {target}", merged.layers().len());

        let filled = SecretResolver::new(self.options.secret_timeout)
            .fill_secrets(merged, self.secrets.as_ref())
            .await?;

        let report = self.validator.validate(&filled, &target)?;

        let plan = PortPlan::from_config(&filled)?;
        let requested = plan.requested_services(&filled);
        let ports = PortAllocator::new(plan).allocate(&target, &requested)?;
        let config = ports.apply_to(filled);

        let fingerprint = self.hasher.hash_config(&config);
        info!(
            "Resolved {target}: {} port(s), {} warning(s), fingerprint {}",
            ports.len(),
            report.warning_count(),
            self.hasher.short_hash(&fingerprint)
        );

        Ok(ResolvedTarget {
            config,
            ports,
            report,
            fingerprint,
        })
    }

    /// Resolves a target and emits the requested artifacts in memory.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage or artifact that fails. No
    /// artifacts are returned in that case.
    pub async fn build(&self, target: Target, kinds: &[ArtifactKind]) -> Result<BuildOutput> {
        let resolved = self.resolve(target).await?;
        let artifacts = emit_all(&resolved.config, kinds, self.options.secret_handling)?;
        let manifest = BuildManifest::new(
            target,
            resolved.fingerprint.clone(),
            resolved.config.layers().to_vec(),
            &artifacts,
        );
        debug!("Emitted {} artifact(s) for {target}", artifacts.len());
        Ok(BuildOutput {
            resolved,
            artifacts,
            manifest,
        })
    }

    /// Builds every target concurrently, one task per target. Targets share
    /// nothing; one failing does not stop the others. Outcomes are returned
    /// in the order of `targets`.
    pub async fn build_all(&self, targets: &[Target], kinds: &[ArtifactKind]) -> Vec<TargetOutcome> {
        let handles: Vec<(Target, JoinHandle<Result<BuildOutput>>)> = targets
            .iter()
            .map(|target| {
                let pipeline = self.clone();
                let target = *target;
                let kinds = kinds.to_vec();
                (target, tokio::spawn(async move { pipeline.build(target, &kinds).await }))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (target, handle) in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(ForgeError::internal(format!("build task for {target} failed: {e}"))));
            if let Err(e) = &result {
                error!("Build failed for {target}: {e}");
            }
            outcomes.push(TargetOutcome { target, result });
        }
        outcomes
    }

    /// Loads the target's layer chain on a blocking thread, bounded by the
    /// load timeout.
    async fn load_layers(&self, target: Target) -> Result<Vec<crate::config::ConfigLayer>> {
        let loader = Arc::clone(&self.loader);
        let task = tokio::task::spawn_blocking(move || loader.load_chain(&target));
        match tokio::time::timeout(self.options.load_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ForgeError::internal(format!("layer loading task failed: {e}"))),
            Err(_) => Err(LayerError::Timeout {
                target: target.to_string(),
                after: self.options.load_timeout,
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("secrets", &self.secrets.source_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BatchSummary {
    /// Summarizes a batch of outcomes.
    #[must_use]
    pub fn from_outcomes(outcomes: &[TargetOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(format!("{}: {e}", outcome.target));
                }
            }
        }
        summary
    }

    /// Returns true if every target succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, MemoryLayerSource, Platform};
    use crate::error::{PortError, SecretError, ValidationError};
    use crate::secrets::MapSecretSource;
    use serde_yaml::Value;

    const BASE: &str = r#"
server:
  port: 7001
  debug: false
auth:
  enabled: true
db:
  password: "${DB_PASSWORD}"
ports:
  reserved: [22]
  ranges:
    development: { start: 7001, end: 7999 }
    staging: { start: 8001, end: 8999 }
    production: { start: 9001, end: 9999 }
services:
  app: { image: "ghcr.io/org/app:1", healthcheck: { endpoint: /health } }
  metrics: { image: "prom/prometheus" }
export:
  DB_PASSWORD: db.password
"#;

    fn pipeline(source: MemoryLayerSource) -> Pipeline {
        Pipeline::new(
            LayerLoader::new(source),
            MapSecretSource::new().with("DB_PASSWORD", "hunter2"),
        )
    }

    fn dev_docker() -> Target {
        Target::new(Environment::Development, Platform::Docker)
    }

    #[tokio::test]
    async fn test_resolve_runs_every_stage() {
        let source = MemoryLayerSource::new()
            .with_layer("base", BASE)
            .with_layer("platform-docker", "server: {host: 0.0.0.0}\n");
        let resolved = pipeline(source).resolve(dev_docker()).await.unwrap();

        assert_eq!(resolved.config.get("server.host"), Some(&Value::from("0.0.0.0")));
        assert_eq!(resolved.config.get("db.password"), Some(&Value::from("hunter2")));
        assert_eq!(resolved.ports.get("app"), Some(7001));
        assert_eq!(resolved.ports.get("metrics"), Some(7002));
        assert_eq!(resolved.config.get("ports.assigned.metrics"), Some(&Value::from(7002)));
        assert_eq!(resolved.fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_build_keeps_secrets_out_of_artifacts() {
        let source = MemoryLayerSource::new().with_layer("base", BASE);
        let output = pipeline(source)
            .build(dev_docker(), &ArtifactKind::ALL)
            .await
            .unwrap();

        assert_eq!(output.artifacts.len(), 3);
        assert!(output.artifacts.iter().all(|a| !a.text().contains("hunter2")));
        assert!(output.manifest.matches(&output.artifacts));
        assert_eq!(output.manifest.layers, vec![String::from("base")]);
    }

    #[tokio::test]
    async fn test_missing_secret_stops_before_validation() {
        let source = MemoryLayerSource::new().with_layer("base", BASE);
        let pipeline = Pipeline::new(LayerLoader::new(source), MapSecretSource::new());
        assert!(matches!(
            pipeline.resolve(dev_docker()).await,
            Err(ForgeError::Secret(SecretError::Missing { .. }))
        ));
    }

    #[tokio::test]
    async fn test_production_requires_safe_auth() {
        let source = MemoryLayerSource::new()
            .with_layer("base", BASE)
            .with_layer("env-prod", "auth: {enabled: false}\n");
        let target = Target::new(Environment::Production, Platform::Cloud);
        match pipeline(source).resolve(target).await {
            Err(ForgeError::Validation(ValidationError::UnsafeProductionDefault { violations })) => {
                assert_eq!(violations.paths(), vec!["auth.enabled"]);
                assert_eq!(violations.0[0].layer.as_deref(), Some("env-prod"));
            }
            other => panic!("expected unsafe default, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_all_isolates_failures() {
        let source = MemoryLayerSource::new()
            .with_layer("base", BASE)
            .with_layer("env-staging", "ports: {ranges: {staging: {start: 8001, end: 8001}}}\n");
        let targets = [
            dev_docker(),
            Target::new(Environment::Staging, Platform::Docker),
            Target::new(Environment::Production, Platform::Local),
        ];
        let outcomes = pipeline(source).build_all(&targets, &[ArtifactKind::EnvFile]).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[1].target, targets[1]);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(ForgeError::Port(PortError::RangeExhausted { .. }))
        ));
        assert!(outcomes[2].result.is_ok());

        let summary = BatchSummary::from_outcomes(&outcomes);
        assert_eq!((summary.succeeded, summary.failed), (2, 1));
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_missing_base_layer() {
        let pipeline = pipeline(MemoryLayerSource::new());
        assert!(matches!(
            pipeline.resolve(dev_docker()).await,
            Err(ForgeError::Layer(LayerError::NotFound { .. }))
        ));
    }
}
