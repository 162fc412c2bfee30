//! Substitution of `${NAME}` references from a secret source.

use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::tree::try_walk_leaves_mut;
use crate::config::ResolvedConfig;
use crate::error::{Result, SecretError};

use super::source::{SecretSource, SecretValue};
use super::SECRET_REFERENCE;

/// Path of the list of secrets that must exist even when unreferenced.
pub const REQUIRED_SECRETS_PATH: &str = "secrets.required";

/// Default timeout for a single secret lookup.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Fills secret references in a resolved configuration.
#[derive(Debug, Clone, Copy)]
pub struct SecretResolver {
    /// Bound on each lookup.
    timeout: Duration,
}

/// A secret name and the first place it is needed.
struct Demand {
    name: String,
    path: String,
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TIMEOUT)
    }
}

impl SecretResolver {
    /// Creates a resolver with the given per-lookup timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Substitutes every `${NAME}` reference in `config` from `source`.
    ///
    /// Lookups happen before any substitution, so a missing secret leaves
    /// no partially filled tree behind.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Missing`] for the first absent secret, naming
    /// the dotted path that needs it, or a source/timeout error.
    pub async fn fill_secrets(&self, config: ResolvedConfig, source: &dyn SecretSource) -> Result<ResolvedConfig> {
        let demands = Self::collect_demands(&config);
        if demands.is_empty() {
            debug!("No secret references in {}", config.target());
            return Ok(config);
        }

        let mut values: HashMap<String, SecretValue> = HashMap::new();
        for demand in &demands {
            let lookup = tokio::time::timeout(self.timeout, source.get(&demand.name))
                .await
                .map_err(|_| SecretError::Timeout {
                    name: demand.name.clone(),
                    after: self.timeout,
                })??;

            let Some(value) = lookup else {
                return Err(SecretError::Missing {
                    name: demand.name.clone(),
                    path: demand.path.clone(),
                    layer: config.origin_of(&demand.path).map(str::to_string),
                }
                .into());
            };
            values.insert(demand.name.clone(), value);
        }

        let mut tree = config.tree().clone();
        let mut bindings = BTreeMap::new();
        try_walk_leaves_mut::<std::convert::Infallible>(&mut tree, "", &mut |path, leaf| {
            let Value::String(text) = leaf else {
                return Ok(());
            };
            if !SECRET_REFERENCE.is_match(text) {
                return Ok(());
            }

            let filled = SECRET_REFERENCE
                .replace_all(text, |caps: &regex::Captures<'_>| {
                    values
                        .get(&caps[1])
                        .map_or_else(|| caps[0].to_string(), |v| v.expose().to_string())
                })
                .into_owned();
            bindings.insert(path.to_string(), std::mem::replace(text, filled));
            Ok(())
        })
        .unwrap_or_else(|never| match never {});

        info!(
            "Filled {} secret reference(s) from {} for {}",
            bindings.len(),
            source.source_name(),
            config.target()
        );
        Ok(config.with_secrets_filled(tree, bindings))
    }

    /// Secret names in order of first appearance, with the path that needs them.
    fn collect_demands(config: &ResolvedConfig) -> Vec<Demand> {
        let mut demands: Vec<Demand> = Vec::new();
        let mut push = |name: &str, path: &str| {
            if !demands.iter().any(|d| d.name == name) {
                demands.push(Demand {
                    name: name.to_string(),
                    path: path.to_string(),
                });
            }
        };

        for (path, value) in config.leaves() {
            let Some(text) = value.as_str() else {
                continue;
            };
            if path.strip_prefix(REQUIRED_SECRETS_PATH).is_some_and(|rest| rest.starts_with('[')) {
                push(text.trim(), &path);
                continue;
            }
            for caps in SECRET_REFERENCE.captures_iter(text) {
                push(&caps[1], &path);
            }
        }
        demands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayer, ConfigMerger, Environment, Platform, Target};
    use crate::error::ForgeError;
    use crate::secrets::MapSecretSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolve(yaml: &str) -> ResolvedConfig {
        let layer = ConfigLayer::new("base", serde_yaml::from_str(yaml).unwrap());
        ConfigMerger::new()
            .resolve(&Target::new(Environment::Staging, Platform::Docker), &[layer])
            .unwrap()
    }

    /// Counts lookups and answers from a fixed map.
    struct CountingSource {
        inner: MapSecretSource,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretSource for CountingSource {
        async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get(name).await
        }

        fn source_name(&self) -> String {
            String::from("counting")
        }
    }

    /// Never answers.
    struct HangingSource;

    #[async_trait]
    impl SecretSource for HangingSource {
        async fn get(&self, _name: &str) -> Result<Option<SecretValue>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        fn source_name(&self) -> String {
            String::from("hanging")
        }
    }

    #[tokio::test]
    async fn test_fills_whole_and_embedded_references() {
        let config = resolve(
            "hf_token: \"${HF_TOKEN}\"\ndb:\n  url: \"postgres://${DB_USER}:${DB_PASS}@db:5432/app\"\nplain: text\n",
        );
        let source = MapSecretSource::new()
            .with("HF_TOKEN", "hf_123")
            .with("DB_USER", "app")
            .with("DB_PASS", "pw");

        let filled = SecretResolver::default().fill_secrets(config, &source).await.unwrap();
        assert_eq!(filled.get("hf_token"), Some(&Value::from("hf_123")));
        assert_eq!(filled.get("db.url"), Some(&Value::from("postgres://app:pw@db:5432/app")));
        assert_eq!(
            filled.secret_bindings().get("db.url").map(String::as_str),
            Some("postgres://${DB_USER}:${DB_PASS}@db:5432/app")
        );
        assert!(!filled.secret_bindings().contains_key("plain"));
    }

    #[tokio::test]
    async fn test_missing_secret_names_key_and_path_and_stops() {
        let config = resolve("a: \"${FIRST}\"\nb: {c: \"${ABSENT}\"}\nd: \"${LATER}\"\n");
        let source = CountingSource {
            inner: MapSecretSource::new().with("FIRST", "1").with("LATER", "3"),
            calls: AtomicUsize::new(0),
        };

        match SecretResolver::default().fill_secrets(config, &source).await {
            Err(ForgeError::Secret(SecretError::Missing { name, path, layer })) => {
                assert_eq!(name, "ABSENT");
                assert_eq!(path, "b.c");
                assert_eq!(layer.as_deref(), Some("base"));
            }
            other => panic!("expected missing secret, got {other:?}"),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_each_secret_is_looked_up_once() {
        let config = resolve("a: \"${TOKEN}\"\nb: \"x-${TOKEN}\"\n");
        let source = CountingSource {
            inner: MapSecretSource::new().with("TOKEN", "t"),
            calls: AtomicUsize::new(0),
        };
        let filled = SecretResolver::default().fill_secrets(config, &source).await.unwrap();
        assert_eq!(filled.get("b"), Some(&Value::from("x-t")));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_required_secrets_must_exist() {
        let config = resolve("secrets:\n  required: [KEYCLOAK_CLIENT_SECRET]\n");
        match SecretResolver::default().fill_secrets(config, &MapSecretSource::new()).await {
            Err(ForgeError::Secret(SecretError::Missing { name, path, .. })) => {
                assert_eq!(name, "KEYCLOAK_CLIENT_SECRET");
                assert_eq!(path, "secrets.required[0]");
            }
            other => panic!("expected missing secret, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_timeout() {
        let config = resolve("a: \"${SLOW}\"\n");
        let resolver = SecretResolver::new(Duration::from_millis(20));
        match resolver.fill_secrets(config, &HangingSource).await {
            Err(ForgeError::Secret(e @ SecretError::Timeout { .. })) => {
                assert_eq!(e.to_string(), "Lookup of secret 'SLOW' timed out after 20ms");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_references_is_a_no_op() {
        let config = resolve("a: 1\n");
        let filled = SecretResolver::default()
            .fill_secrets(config.clone(), &MapSecretSource::new())
            .await
            .unwrap();
        assert_eq!(filled, config);
    }
}
