//! Layer loading and `extends` flattening.
//!
//! A layer is one named YAML document. Layers are read through a
//! [`LayerSource`] so the loader works the same against a config directory
//! and an in-memory fixture set.

use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{LayerError, Result};

use super::merger::{deep_merge, record_origins};
use super::target::Target;
use super::tree::{kind_name, walk_leaves};

/// Key naming the parent layer.
pub const EXTENDS_KEY: &str = "extends";

/// One parsed, flattened layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayer {
    /// Layer name.
    pub name: String,
    /// Parent layer named by `extends`, if any.
    pub extends: Option<String>,
    /// Layer content with the `extends` chain already applied.
    pub body: Value,
    /// Layers that contributed to `body`, parent first.
    pub lineage: Vec<String>,
    /// Layer that set each leaf of `body`, by dotted path.
    pub origins: BTreeMap<String, String>,
}

impl ConfigLayer {
    /// A layer with no parent; every leaf is owned by the layer itself.
    #[must_use]
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        let name = name.into();
        let mut origins = BTreeMap::new();
        walk_leaves(&body, "", &mut |path, _| {
            origins.insert(path.to_string(), name.clone());
        });
        Self {
            lineage: vec![name.clone()],
            name,
            extends: None,
            body,
            origins,
        }
    }

    /// The layer that set the leaf at `path`: an ancestor for inherited
    /// values, otherwise this layer.
    #[must_use]
    pub fn origin(&self, path: &str) -> &str {
        self.origins.get(path).map_or(self.name.as_str(), String::as_str)
    }
}

/// A source of raw layer text, addressed by layer name.
pub trait LayerSource: Send + Sync {
    /// Returns the layer text, or `None` if the layer does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer exists but cannot be read.
    fn read(&self, name: &str) -> Result<Option<String>>;

    /// Human-readable description of where layers are looked up.
    fn location(&self, name: &str) -> PathBuf;
}

/// Reads `<name>.yaml` or `<name>.yml` from a directory.
#[derive(Debug, Clone)]
pub struct FsLayerSource {
    /// Directory holding the layer files.
    dir: PathBuf,
}

/// Layers held in memory, mainly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayerSource {
    layers: BTreeMap<String, String>,
}

/// Loads layers and flattens their `extends` chains.
pub struct LayerLoader {
    source: Box<dyn LayerSource>,
}

/// Supported layer file extensions, in lookup order.
const LAYER_EXTENSIONS: &[&str] = &["yaml", "yml"];

impl FsLayerSource {
    /// Creates a source reading from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory layers are read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidate(&self, name: &str) -> Option<PathBuf> {
        LAYER_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
    }
}

impl LayerSource for FsLayerSource {
    fn read(&self, name: &str) -> Result<Option<String>> {
        let Some(path) = self.candidate(name) else {
            return Ok(None);
        };

        debug!("Reading layer '{name}' from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| LayerError::Io {
            layer: name.to_string(),
            message: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(content))
    }

    fn location(&self, name: &str) -> PathBuf {
        self.candidate(name)
            .unwrap_or_else(|| self.dir.join(format!("{name}.yaml")))
    }
}

impl MemoryLayerSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer.
    #[must_use]
    pub fn with_layer(mut self, name: impl Into<String>, yaml: impl Into<String>) -> Self {
        self.layers.insert(name.into(), yaml.into());
        self
    }
}

impl LayerSource for MemoryLayerSource {
    fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.layers.get(name).cloned())
    }

    fn location(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("memory:{name}"))
    }
}

impl LayerLoader {
    /// Creates a loader over the given source.
    #[must_use]
    pub fn new(source: impl LayerSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Loads one layer, flattening its `extends` chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer or any ancestor is missing or malformed,
    /// or if the `extends` chain contains a cycle.
    pub fn load(&self, name: &str) -> Result<ConfigLayer> {
        self.load_optional(name)?.ok_or_else(|| {
            LayerError::NotFound {
                name: name.to_string(),
                searched: self.source.location(name),
            }
            .into()
        })
    }

    /// Loads one layer, returning `None` if it does not exist.
    ///
    /// Ancestors named by `extends` must exist even when the layer itself
    /// is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer or an ancestor is malformed or missing,
    /// or if the `extends` chain contains a cycle.
    pub fn load_optional(&self, name: &str) -> Result<Option<ConfigLayer>> {
        let mut stack = Vec::new();
        let mut visiting = HashSet::new();
        self.load_recursive(name, &mut stack, &mut visiting)
    }

    /// Loads every layer in the target's precedence chain, lowest first.
    /// Missing optional layers are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a required layer is missing or any layer fails to load.
    pub fn load_chain(&self, target: &Target) -> Result<Vec<ConfigLayer>> {
        let mut layers = Vec::new();
        for slot in target.layer_chain() {
            if slot.required {
                layers.push(self.load(&slot.name)?);
            } else if let Some(layer) = self.load_optional(&slot.name)? {
                layers.push(layer);
            } else {
                debug!("Optional layer '{}' not present for {target}", slot.name);
            }
        }

        info!(
            "Loaded {} layer(s) for {target}: {}",
            layers.len(),
            layers.iter().map(|l| l.name.as_str()).collect::<Vec<_>>().join(" < ")
        );
        Ok(layers)
    }

    fn load_recursive(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<Option<ConfigLayer>> {
        if visiting.contains(name) {
            let start = stack.iter().position(|n| n == name).unwrap_or(0);
            let mut cycle: Vec<&str> = stack[start..].iter().map(String::as_str).collect();
            cycle.push(name);
            return Err(LayerError::Cycle {
                cycle: cycle.join(" -> "),
            }
            .into());
        }

        let Some(content) = self.source.read(name)? else {
            return Ok(None);
        };
        let location = self.source.location(name);
        let (extends, body) = parse_layer(name, &content, &location)?;

        let Some(parent_name) = extends.clone() else {
            return Ok(Some(ConfigLayer::new(name, body)));
        };

        visiting.insert(name.to_string());
        stack.push(name.to_string());
        let parent = self.load_recursive(&parent_name, stack, visiting)?;
        stack.pop();
        visiting.remove(name);

        let parent = parent.ok_or_else(|| LayerError::NotFound {
            name: parent_name.clone(),
            searched: self.source.location(&parent_name),
        })?;

        debug!("Layer '{name}' extends '{parent_name}'");
        let mut flattened = parent.body;
        deep_merge(&mut flattened, &body);

        let mut lineage = parent.lineage;
        lineage.push(name.to_string());

        let mut origins = parent.origins;
        record_origins(&mut origins, &body, &|_| name.to_string());

        Ok(Some(ConfigLayer {
            name: name.to_string(),
            extends,
            body: flattened,
            lineage,
            origins,
        }))
    }
}

impl std::fmt::Debug for LayerLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerLoader").finish_non_exhaustive()
    }
}

/// Parses layer text into its `extends` reference and its body.
fn parse_layer(name: &str, content: &str, location: &Path) -> Result<(Option<String>, Value)> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| {
        let at = e.location().map_or_else(
            || location.display().to_string(),
            |loc| format!("{}:{}:{}", location.display(), loc.line(), loc.column()),
        );
        LayerError::parse(name, format!("YAML parse error: {e}"), Some(at))
    })?;

    let mut body = match value {
        Value::Mapping(map) => map,
        // An empty document is an empty layer.
        Value::Null => Mapping::new(),
        other => {
            return Err(LayerError::parse(
                name,
                format!("layer must be a mapping, found {}", kind_name(&other)),
                Some(location.display().to_string()),
            )
            .into());
        }
    };

    let extends = match body.remove(EXTENDS_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(parent)) if !parent.trim().is_empty() => Some(parent.trim().to_string()),
        Some(other) => {
            return Err(LayerError::InvalidExtends {
                layer: name.to_string(),
                message: format!("expected a layer name, found {}", kind_name(&other)),
            }
            .into());
        }
    };

    Ok((extends, Value::Mapping(body)))
}
