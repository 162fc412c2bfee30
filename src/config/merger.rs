//! Deterministic deep merge of a layer chain.
//!
//! Merge rule per key: when both sides hold mappings they are merged
//! recursively, otherwise the higher-precedence value replaces the lower
//! one outright. Sequences are never concatenated. Keys absent from the
//! higher layer never delete keys from the lower one.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{MergeError, Result};

use super::layer::ConfigLayer;
use super::resolved::ResolvedConfig;
use super::target::Target;
use super::tree::{join_key, key_label, kind_name, walk_leaves};

/// Key holding per-environment overlays inside a layer.
pub const ENVIRONMENTS_KEY: &str = "environments";

/// Merges `higher` into `lower` in place.
pub fn deep_merge(lower: &mut Value, higher: &Value) {
    match (lower, higher) {
        (Value::Mapping(low), Value::Mapping(high)) => {
            for (key, high_value) in high {
                let both_mappings =
                    high_value.is_mapping() && low.get(key).is_some_and(Value::is_mapping);
                if both_mappings {
                    if let Some(low_value) = low.get_mut(key) {
                        deep_merge(low_value, high_value);
                    }
                } else {
                    low.insert(key.clone(), high_value.clone());
                }
            }
        }
        (low, high) => *low = high.clone(),
    }
}

/// Combines an ordered chain of layers into one [`ResolvedConfig`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigMerger;

impl ConfigMerger {
    /// Creates a new merger.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merges `layers` (lowest precedence first) for `target`.
    ///
    /// A layer's `environments.<env>` block, when present, is applied right
    /// after that layer's own body, so it keeps that layer's precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is empty or a layer is not a mapping.
    pub fn resolve(&self, target: &Target, layers: &[ConfigLayer]) -> Result<ResolvedConfig> {
        if layers.is_empty() {
            return Err(MergeError::EmptyChain {
                target: target.to_string(),
            }
            .into());
        }

        let mut tree = Value::Mapping(Mapping::new());
        let mut origins = BTreeMap::new();

        for layer in layers {
            let Value::Mapping(body) = &layer.body else {
                return Err(MergeError::NotAMapping {
                    layer: layer.name.clone(),
                    found: kind_name(&layer.body),
                }
                .into());
            };

            let mut body = body.clone();
            let overlay = take_environment_overlay(&mut body, target)?;
            let body = Value::Mapping(body);

            apply(&mut tree, &mut origins, &body, &|path| layer.origin(path).to_string());
            if let Some((env_key, overlay)) = overlay {
                let block = format!("{ENVIRONMENTS_KEY}.{env_key}");
                debug!("Applying inline overlay {}#{block}", layer.name);
                apply(&mut tree, &mut origins, &overlay, &|path| {
                    format!("{}#{block}", layer.origin(&join_key(&block, path)))
                });
            }
        }

        debug!("Merged {} layer(s) for {target}", layers.len());
        Ok(ResolvedConfig::new(
            *target,
            tree,
            origins,
            layers.iter().map(|l| l.name.clone()).collect(),
        ))
    }
}

/// Merges one layer body into the tree and records who owns its leaves.
fn apply(tree: &mut Value, origins: &mut BTreeMap<String, String>, body: &Value, owner: &dyn Fn(&str) -> String) {
    deep_merge(tree, body);
    record_origins(origins, body, owner);
}

/// Updates `origins` for `body` merged on top: origins under keys the body
/// replaces are dropped, and each leaf of the body is credited to `owner(path)`.
pub fn record_origins(origins: &mut BTreeMap<String, String>, body: &Value, owner: &dyn Fn(&str) -> String) {
    forget_replaced(origins, body, "");
    walk_leaves(body, "", &mut |path, _| {
        origins.insert(path.to_string(), owner(path));
    });
}

/// Drops origins under keys whose value the layer replaces wholesale.
fn forget_replaced(origins: &mut BTreeMap<String, String>, body: &Value, prefix: &str) {
    let Value::Mapping(map) = body else {
        return;
    };
    for (key, value) in map {
        let path = join_key(prefix, &key_label(key));
        if value.is_mapping() {
            origins.remove(&path);
            forget_replaced(origins, value, &path);
        } else {
            let nested = format!("{path}.");
            let indexed = format!("{path}[");
            origins.retain(|p, _| p != &path && !p.starts_with(&nested) && !p.starts_with(&indexed));
        }
    }
}

/// Removes the `environments` block from a layer body and returns the
/// overlay for the target environment, if one is declared.
fn take_environment_overlay(body: &mut Mapping, target: &Target) -> Result<Option<(String, Value)>> {
    let Some(environments) = body.get(ENVIRONMENTS_KEY) else {
        return Ok(None);
    };
    // A non-mapping `environments` key is ordinary data, not an overlay block.
    if !environments.is_mapping() {
        return Ok(None);
    }
    let Some(Value::Mapping(blocks)) = body.remove(ENVIRONMENTS_KEY) else {
        return Ok(None);
    };

    let mut found: Option<(String, Value)> = None;
    for (key, overlay) in blocks {
        let Value::String(name) = key else {
            continue;
        };
        if !target.environment.matches(&name) {
            continue;
        }
        if !overlay.is_mapping() && !overlay.is_null() {
            return Err(MergeError::NotAMapping {
                layer: format!("{ENVIRONMENTS_KEY}.{name}"),
                found: kind_name(&overlay),
            }
            .into());
        }
        if let Some((previous, _)) = &found {
            return Err(MergeError::Ambiguity {
                path: format!("{ENVIRONMENTS_KEY}.{name}"),
                message: format!("both '{previous}' and '{name}' select {}", target.environment),
            }
            .into());
        }
        found = Some((name, overlay));
    }

    Ok(found.filter(|(_, overlay)| overlay.is_mapping()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::layer::{LayerLoader, MemoryLayerSource};
    use crate::config::target::{Environment, Platform};
    use crate::config::tree::lookup;
    use crate::error::ForgeError;

    fn layer(name: &str, yaml: &str) -> ConfigLayer {
        ConfigLayer::new(name, serde_yaml::from_str(yaml).unwrap())
    }

    fn dev_docker() -> Target {
        Target::new(Environment::Development, Platform::Docker)
    }

    #[test]
    fn test_end_to_end_merge() {
        let layers = [
            layer("base", "port: 7001\n"),
            layer("env-dev", "{}\n"),
            layer("platform-docker", "host: \"0.0.0.0\"\n"),
        ];
        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        let expected: Value = serde_yaml::from_str("port: 7001\nhost: \"0.0.0.0\"\n").unwrap();
        assert_eq!(resolved.tree(), &expected);
    }

    #[test]
    fn test_higher_layer_wins_and_mappings_merge() {
        let layers = [
            layer("base", "server: {host: 127.0.0.1, port: 7001}\nauth: {enabled: false}\n"),
            layer("env-dev", "server: {port: 7100}\n"),
        ];
        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        assert_eq!(resolved.get("server.port"), Some(&Value::from(7100)));
        assert_eq!(resolved.get("server.host"), Some(&Value::from("127.0.0.1")));
        assert_eq!(resolved.origin("server.port"), Some("env-dev"));
        assert_eq!(resolved.origin("server.host"), Some("base"));
    }

    #[test]
    fn test_sequences_are_replaced_not_concatenated() {
        let layers = [
            layer("base", "hosts: [a, b, c]\n"),
            layer("platform-docker", "hosts: [z]\n"),
        ];
        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        let expected: Value = serde_yaml::from_str("[z]").unwrap();
        assert_eq!(resolved.get("hosts"), Some(&expected));
        assert_eq!(resolved.origin("hosts[0]"), Some("platform-docker"));
        assert_eq!(resolved.origin("hosts[2]"), None);
    }

    #[test]
    fn test_scalar_replaces_mapping() {
        let layers = [
            layer("base", "cache: {size: 10, ttl: 60}\n"),
            layer("local", "cache: off\n"),
        ];
        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        assert_eq!(resolved.get("cache"), Some(&Value::from("off")));
        assert_eq!(resolved.origin("cache.size"), None);
        assert_eq!(resolved.origin("cache"), Some("local"));
    }

    #[test]
    fn test_inline_environment_overlay() {
        let layers = [layer(
            "base",
            "auth: {enabled: false}\nenvironments:\n  production: {auth: {enabled: true}}\n  dev: {debug: true}\n",
        )];
        let prod = Target::new(Environment::Production, Platform::Cloud);
        let resolved = ConfigMerger::new().resolve(&prod, &layers).unwrap();
        assert_eq!(resolved.get("auth.enabled"), Some(&Value::from(true)));
        assert_eq!(resolved.origin("auth.enabled"), Some("base#environments.production"));
        assert!(resolved.get("environments").is_none());
        assert!(resolved.get("debug").is_none());

        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        assert_eq!(resolved.get("debug"), Some(&Value::from(true)));
        assert_eq!(resolved.get("auth.enabled"), Some(&Value::from(false)));
    }

    #[test]
    fn test_inherited_leaves_keep_their_layer() {
        let source = MemoryLayerSource::new()
            .with_layer("base", "port: 7001\n")
            .with_layer("shared-prod", "api_key: REPLACE_WITH_API_KEY\nenvironments: {staging: {debug: false}}\n")
            .with_layer("env-staging", "extends: shared-prod\nreplicas: 2\n");
        let loader = LayerLoader::new(source);
        let target = Target::new(Environment::Staging, Platform::Local);
        let layers = vec![loader.load("base").unwrap(), loader.load("env-staging").unwrap()];

        let resolved = ConfigMerger::new().resolve(&target, &layers).unwrap();
        assert_eq!(resolved.origin("api_key"), Some("shared-prod"));
        assert_eq!(resolved.origin("replicas"), Some("env-staging"));
        assert_eq!(resolved.origin("debug"), Some("shared-prod#environments.staging"));
        assert_eq!(resolved.layers(), ["base", "env-staging"]);
    }

    #[test]
    fn test_duplicate_environment_overlay_is_ambiguous() {
        let layers = [layer(
            "base",
            "environments:\n  production: {a: 1}\n  prod: {a: 2}\n",
        )];
        let prod = Target::new(Environment::Production, Platform::Cloud);
        assert!(matches!(
            ConfigMerger::new().resolve(&prod, &layers),
            Err(ForgeError::Merge(MergeError::Ambiguity { .. }))
        ));
    }

    #[test]
    fn test_empty_chain_fails() {
        assert!(matches!(
            ConfigMerger::new().resolve(&dev_docker(), &[]),
            Err(ForgeError::Merge(MergeError::EmptyChain { .. }))
        ));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let layers = [
            layer("base", "a: {b: 1, c: [1, 2]}\nd: x\n"),
            layer("env-dev", "a: {b: 2}\n"),
        ];
        let resolved = ConfigMerger::new().resolve(&dev_docker(), &layers).unwrap();
        let mut again = resolved.tree().clone();
        deep_merge(&mut again, resolved.tree());
        assert_eq!(&again, resolved.tree());
        assert!(lookup(&again, "a.c[1]").is_some());
    }
}
