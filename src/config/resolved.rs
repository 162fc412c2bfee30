//! The merged configuration document for one target.

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::target::Target;
use super::tree::{lookup, set_path, walk_leaves};

/// Origin label recorded for values written by the engine itself.
pub const ENGINE_ORIGIN: &str = "<engine>";

/// A deep-merged configuration tree for one [`Target`].
///
/// Each stage that changes the tree returns a new value; earlier stages'
/// results are never mutated in place by later ones.
#[derive(Clone, PartialEq)]
pub struct ResolvedConfig {
    target: Target,
    tree: Value,
    origins: BTreeMap<String, String>,
    layers: Vec<String>,
    secret_bindings: BTreeMap<String, String>,
}

impl ResolvedConfig {
    /// Creates a resolved config from its merged parts.
    #[must_use]
    pub const fn new(
        target: Target,
        tree: Value,
        origins: BTreeMap<String, String>,
        layers: Vec<String>,
    ) -> Self {
        Self {
            target,
            tree,
            origins,
            layers,
            secret_bindings: BTreeMap::new(),
        }
    }

    /// The target this config was resolved for.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// The merged tree.
    #[must_use]
    pub const fn tree(&self) -> &Value {
        &self.tree
    }

    /// Names of the layers that were merged, lowest precedence first.
    #[must_use]
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Looks up a value by dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.tree, path)
    }

    /// The layer that last set the leaf at `path`.
    #[must_use]
    pub fn origin(&self, path: &str) -> Option<&str> {
        self.origins.get(path).map(String::as_str)
    }

    /// The closest recorded origin for `path` or any of its ancestors.
    #[must_use]
    pub fn origin_of(&self, path: &str) -> Option<&str> {
        let mut current = path;
        loop {
            if let Some(origin) = self.origin(current) {
                return Some(origin);
            }
            let cut = current.rfind(['.', '['])?;
            current = &current[..cut];
        }
    }

    /// Every leaf with its dotted path, in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<(String, &Value)> {
        let mut out = Vec::new();
        walk_leaves(&self.tree, "", &mut |path, value| out.push((path.to_string(), value)));
        out
    }

    /// Paths whose values were filled in from a secret source, mapped to
    /// the template text they replaced.
    #[must_use]
    pub const fn secret_bindings(&self) -> &BTreeMap<String, String> {
        &self.secret_bindings
    }

    /// Returns a copy of the tree with every secret-filled leaf put back to
    /// its `${NAME}` template. Safe to print, hash, or write to disk.
    #[must_use]
    pub fn redacted(&self) -> Value {
        let mut tree = self.tree.clone();
        for (path, template) in &self.secret_bindings {
            set_leaf(&mut tree, path, Value::String(template.clone()));
        }
        tree
    }

    /// Replaces the tree, recording which leaves came from secrets.
    #[must_use]
    pub fn with_secrets_filled(mut self, tree: Value, bindings: BTreeMap<String, String>) -> Self {
        self.tree = tree;
        self.secret_bindings.extend(bindings);
        self
    }

    /// Sets a value by dotted path of mapping keys, attributing it to the engine.
    #[must_use]
    pub fn with_value(mut self, path: &str, value: Value) -> Self {
        let prefix = format!("{path}.");
        self.origins.retain(|p, _| p != path && !p.starts_with(&prefix));
        walk_leaves(&value, path, &mut |leaf, _| {
            self.origins.insert(leaf.to_string(), ENGINE_ORIGIN.to_string());
        });
        set_path(&mut self.tree, path, value);
        self
    }
}

/// Replaces the leaf at `path`, which may include sequence indices.
fn set_leaf(tree: &mut Value, path: &str, value: Value) {
    let mut slot = Some(value);
    let _ = super::tree::try_walk_leaves_mut::<()>(tree, "", &mut |leaf_path, leaf| {
        if leaf_path == path {
            if let Some(v) = slot.take() {
                *leaf = v;
            }
            return Err(());
        }
        Ok(())
    });
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("target", &self.target)
            .field("layers", &self.layers)
            .field("leaves", &self.origins.len())
            .field("secret_bindings", &self.secret_bindings.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
