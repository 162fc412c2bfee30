//! Secret sources.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SecretError};

/// A secret value. `Debug` and `Display` never print the content.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A key-value store of secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Looks up a secret by name. Returns `None` if it is absent.
    async fn get(&self, name: &str) -> Result<Option<SecretValue>>;

    /// Short identifier used in logs and errors.
    fn source_name(&self) -> String;
}

#[async_trait]
impl SecretSource for Box<dyn SecretSource> {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        (**self).get(name).await
    }

    fn source_name(&self) -> String {
        (**self).source_name()
    }
}

/// Reads secrets from the process environment, optionally with a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretSource {
    prefix: String,
}

impl EnvSecretSource {
    /// Reads `NAME` from the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `<prefix>NAME` from the environment.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        let key = format!("{}{name}", self.prefix);
        match std::env::var(&key) {
            Ok(value) => Ok(Some(SecretValue::new(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::Source {
                source_name: self.source_name(),
                name: name.to_string(),
                message: format!("{key} is not valid UTF-8"),
            }
            .into()),
        }
    }

    fn source_name(&self) -> String {
        if self.prefix.is_empty() {
            String::from("env")
        } else {
            format!("env:{}", self.prefix)
        }
    }
}

/// Secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MapSecretSource {
    values: HashMap<String, SecretValue>,
}

impl MapSecretSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), SecretValue::new(value));
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSecretSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |source, (k, v)| source.with(k, v))
    }
}

#[async_trait]
impl SecretSource for MapSecretSource {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        Ok(self.values.get(name).cloned())
    }

    fn source_name(&self) -> String {
        String::from("memory")
    }
}

/// Reads a `.env` file into memory. The process environment is never touched.
#[derive(Debug, Clone)]
pub struct DotenvSecretSource {
    path: PathBuf,
    values: MapSecretSource,
}

impl DotenvSecretSource {
    /// Loads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source_name = format!("dotenv:{}", path.display());
        let to_error = |message: String| SecretError::Source {
            source_name: source_name.clone(),
            name: String::from("*"),
            message,
        };

        let iter = dotenvy::from_path_iter(&path).map_err(|e| to_error(e.to_string()))?;
        let mut values = MapSecretSource::new();
        for item in iter {
            let (key, value) = item.map_err(|e| to_error(e.to_string()))?;
            values = values.with(key, value);
        }
        debug!("Loaded {} secret(s) from {}", values.values.len(), path.display());
        Ok(Self { path, values })
    }
}

#[async_trait]
impl SecretSource for DotenvSecretSource {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        self.values.get(name).await
    }

    fn source_name(&self) -> String {
        format!("dotenv:{}", self.path.display())
    }
}

/// Tries several sources in order; the first that has the secret wins.
#[derive(Default)]
pub struct ChainSecretSource {
    sources: Vec<Box<dyn SecretSource>>,
}

impl ChainSecretSource {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source with lower priority than those already added.
    #[must_use]
    pub fn with(mut self, source: impl SecretSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Appends an already boxed source.
    pub fn push(&mut self, source: Box<dyn SecretSource>) {
        self.sources.push(source);
    }

    /// Number of sources in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if the chain has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl SecretSource for ChainSecretSource {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        for source in &self.sources {
            if let Some(value) = source.get(name).await? {
                debug!("Secret '{name}' found in {}", source.source_name());
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn source_name(&self) -> String {
        let names: Vec<String> = self.sources.iter().map(|s| s.source_name()).collect();
        format!("chain[{}]", names.join(", "))
    }
}

impl fmt::Debug for ChainSecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSecretSource")
            .field("sources", &self.source_name())
            .finish()
    }
}
