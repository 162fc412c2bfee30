//! Validation of resolved configuration before anything is emitted.
//!
//! Two checks run over the whole tree and report every offending path at
//! once: leftover template markers, and (for production-class targets)
//! permissive security flags inherited from a lower layer.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::{Result, ValidationError, Violation, Violations};
use crate::secrets::SECRET_REFERENCE;

use super::policy::SecurityPolicy;
use super::resolved::ResolvedConfig;
use super::target::Target;

/// Marker left in templates for values a human must fill in.
#[allow(clippy::expect_used)]
pub static PLACEHOLDER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"REPLACE_WITH_[A-Za-z0-9_]+").expect("placeholder pattern is valid"));

/// Validator for resolved configurations.
#[derive(Debug, Default, Clone)]
pub struct ConfigValidator {
    /// Flags checked for production-class targets.
    policy: SecurityPolicy,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Number of leaves scanned.
    pub leaves_checked: usize,
}

impl ConfigValidator {
    /// Creates a validator with the default security policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator with a custom security policy.
    #[must_use]
    pub const fn with_policy(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    /// Validates a resolved configuration for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnresolvedPlaceholder`] listing every leaf
    /// that still holds a `REPLACE_WITH_*` marker or `${NAME}` reference,
    /// and [`ValidationError::UnsafeProductionDefault`] listing every
    /// permissive security flag on a production-class target. When both
    /// apply, they are returned together as [`ValidationError::Aggregate`].
    pub fn validate(&self, config: &ResolvedConfig, target: &Target) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        let placeholders = Self::find_placeholders(config, &mut report);
        let unsafe_defaults = self.check_security_flags(config, target, &mut report);

        let mut errors = Vec::new();
        if !placeholders.is_empty() {
            errors.push(ValidationError::UnresolvedPlaceholder {
                violations: Violations(placeholders),
            });
        }
        if !unsafe_defaults.is_empty() {
            errors.push(ValidationError::UnsafeProductionDefault {
                violations: Violations(unsafe_defaults),
            });
        }

        match errors.len() {
            0 => {
                debug!("Validation passed for {target} ({} leaves)", report.leaves_checked);
                Ok(report)
            }
            1 => Err(errors.remove(0).into()),
            _ => Err(ValidationError::Aggregate(errors).into()),
        }
    }

    /// Scans every leaf string for unresolved markers.
    fn find_placeholders(config: &ResolvedConfig, report: &mut ValidationReport) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (path, value) in config.leaves() {
            report.leaves_checked += 1;
            let Some(text) = value.as_str() else {
                continue;
            };

            let markers: Vec<&str> = PLACEHOLDER_MARKER.find_iter(text).map(|m| m.as_str()).collect();
            if !markers.is_empty() {
                violations.push(Violation::new(
                    path.clone(),
                    config.origin_of(&path).map(str::to_string),
                    format!("unresolved placeholder {}", markers.join(", ")),
                ));
                continue;
            }

            let references: Vec<&str> = SECRET_REFERENCE
                .captures_iter(text)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if !references.is_empty() {
                violations.push(Violation::new(
                    path.clone(),
                    config.origin_of(&path).map(str::to_string),
                    format!("unresolved secret reference {}", references.join(", ")),
                ));
            }
        }
        violations
    }

    /// Checks the security allow-list. Production-class targets fail,
    /// other targets only get warnings.
    fn check_security_flags(
        &self,
        config: &ResolvedConfig,
        target: &Target,
        report: &mut ValidationReport,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        for flag in self.policy.flags() {
            let Some(value) = config.get(&flag.path) else {
                continue;
            };
            if !flag.is_permissive(value) {
                continue;
            }

            let layer = config.origin_of(&flag.path).map(str::to_string);
            if target.environment.is_production_class() {
                violations.push(Violation::new(
                    flag.path.clone(),
                    layer,
                    format!(
                        "{} (set to {}; override it to {} in an environment or platform layer)",
                        flag.reason,
                        super::tree::scalar_text(value).unwrap_or_default(),
                        flag.rule
                    ),
                ));
            } else {
                let message = format!("{}: permissive value allowed outside production", flag.path);
                warn!("{message}");
                report.warnings.push(message);
            }
        }
        violations
    }
}

impl ValidationReport {
    /// Returns the number of warnings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::layer::{ConfigLayer, LayerLoader, MemoryLayerSource};
    use crate::config::merger::ConfigMerger;
    use crate::config::target::{Environment, Platform};
    use crate::error::ForgeError;

    fn layer(name: &str, yaml: &str) -> ConfigLayer {
        ConfigLayer::new(name, serde_yaml::from_str(yaml).unwrap())
    }

    fn resolve(target: Target, layers: &[ConfigLayer]) -> ResolvedConfig {
        ConfigMerger::new().resolve(&target, layers).unwrap()
    }

    fn prod() -> Target {
        Target::new(Environment::Production, Platform::Cloud)
    }

    fn dev() -> Target {
        Target::new(Environment::Development, Platform::Local)
    }

    #[test]
    fn test_every_placeholder_is_reported() {
        let config = resolve(
            dev(),
            &[layer(
                "base",
                "db: {password: REPLACE_WITH_DB_PASSWORD}\nkeys: [ok, REPLACE_WITH_KEY]\nname: fine\n",
            )],
        );
        match ConfigValidator::new().validate(&config, &dev()) {
            Err(ForgeError::Validation(ValidationError::UnresolvedPlaceholder { violations })) => {
                assert_eq!(violations.paths(), vec!["db.password", "keys[1]"]);
                assert_eq!(violations.0[0].layer.as_deref(), Some("base"));
            }
            other => panic!("expected placeholder error, got {other:?}"),
        }
    }

    #[test]
    fn test_placeholder_from_extended_layer_names_that_layer() {
        let source = MemoryLayerSource::new()
            .with_layer("base", "name: forge\n")
            .with_layer("shared-prod", "api_key: REPLACE_WITH_API_KEY\n")
            .with_layer("env-staging", "extends: shared-prod\nreplicas: 2\n");
        let target = Target::new(Environment::Staging, Platform::Docker);
        let layers = LayerLoader::new(source).load_chain(&target).unwrap();
        let config = resolve(target, &layers);

        match ConfigValidator::new().validate(&config, &target) {
            Err(ForgeError::Validation(err @ ValidationError::UnresolvedPlaceholder { .. })) => {
                let violations = err.violations();
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, "api_key");
                assert_eq!(violations[0].layer.as_deref(), Some("shared-prod"));
                assert!(err.to_string().contains("shared-prod"));
            }
            other => panic!("expected placeholder error, got {other:?}"),
        }
    }

    #[test]
    fn test_leftover_secret_reference_is_unresolved() {
        let config = resolve(dev(), &[layer("base", "token: \"${HF_TOKEN}\"\n")]);
        assert!(matches!(
            ConfigValidator::new().validate(&config, &dev()),
            Err(ForgeError::Validation(ValidationError::UnresolvedPlaceholder { .. }))
        ));
    }

    #[test]
    fn test_production_rejects_inherited_auth_disabled() {
        let layers = [layer("base", "auth: {enabled: false}\n"), layer("env-prod", "replicas: 2\n")];
        let config = resolve(prod(), &layers);
        match ConfigValidator::new().validate(&config, &prod()) {
            Err(ForgeError::Validation(ValidationError::UnsafeProductionDefault { violations })) => {
                assert_eq!(violations.paths(), vec!["auth.enabled"]);
                assert_eq!(violations.0[0].layer.as_deref(), Some("base"));
            }
            other => panic!("expected unsafe default error, got {other:?}"),
        }
    }

    #[test]
    fn test_production_accepts_overridden_auth() {
        let layers = [
            layer("base", "auth: {enabled: false}\n"),
            layer("env-prod", "auth: {enabled: true}\n"),
        ];
        let config = resolve(prod(), &layers);
        assert!(ConfigValidator::new().validate(&config, &prod()).is_ok());
    }

    #[test]
    fn test_production_rejects_auth_shorthand_disabled() {
        let config = resolve(prod(), &[layer("base", "auth: disabled\n")]);
        match ConfigValidator::new().validate(&config, &prod()) {
            Err(ForgeError::Validation(ValidationError::UnsafeProductionDefault { violations })) => {
                assert_eq!(violations.paths(), vec!["auth"]);
            }
            other => panic!("expected unsafe default error, got {other:?}"),
        }
    }

    #[test]
    fn test_production_rejects_authentication_method_none() {
        let config = resolve(prod(), &[layer("base", "authentication: {method: none}\n")]);
        match ConfigValidator::new().validate(&config, &prod()) {
            Err(ForgeError::Validation(ValidationError::UnsafeProductionDefault { violations })) => {
                assert_eq!(violations.paths(), vec!["authentication.method"]);
                assert!(violations.0[0].message.contains("a value other than none"));
            }
            other => panic!("expected unsafe default error, got {other:?}"),
        }

        let config = resolve(prod(), &[layer("base", "authentication: {method: keycloak}\n")]);
        assert!(ConfigValidator::new().validate(&config, &prod()).is_ok());
    }

    #[test]
    fn test_development_only_warns_on_permissive_flags() {
        let config = resolve(dev(), &[layer("base", "auth: {enabled: false}\nserver: {debug: true}\n")]);
        let report = ConfigValidator::new().validate(&config, &dev()).unwrap();
        assert_eq!(report.warning_count(), 2);
    }

    #[test]
    fn test_both_failures_are_aggregated() {
        let config = resolve(
            prod(),
            &[layer("base", "auth: {enabled: false}\napi_key: REPLACE_WITH_API_KEY\n")],
        );
        match ConfigValidator::new().validate(&config, &prod()) {
            Err(ForgeError::Validation(err @ ValidationError::Aggregate(_))) => {
                assert_eq!(err.violations().len(), 2);
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_policy_flag() {
        let policy = SecurityPolicy::empty().with_flag("telemetry.export_prompts", false, "prompts stay local");
        let config = resolve(prod(), &[layer("base", "telemetry: {export_prompts: true}\nauth: {enabled: false}\n")]);
        match ConfigValidator::with_policy(policy).validate(&config, &prod()) {
            Err(ForgeError::Validation(ValidationError::UnsafeProductionDefault { violations })) => {
                assert_eq!(violations.paths(), vec!["telemetry.export_prompts"]);
            }
            other => panic!("expected unsafe default error, got {other:?}"),
        }
    }
}
