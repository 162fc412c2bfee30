//! Target selection: which environment and platform a resolution run is for.
//!
//! A [`Target`] is threaded explicitly through every stage; nothing in the
//! engine reads "the current environment" from process state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development.
    #[value(alias = "dev")]
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    #[value(alias = "prod")]
    Production,
}

/// Deployment platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Editor or workstation, no container runtime.
    Local,
    /// Container runtime via compose.
    Docker,
    /// Managed cloud hosting.
    Cloud,
}

/// The `(environment, platform)` pair a resolution run is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    /// Deployment environment.
    pub environment: Environment,
    /// Deployment platform.
    pub platform: Platform,
}

impl Environment {
    /// All environments, in promotion order.
    pub const ALL: [Self; 3] = [Self::Development, Self::Staging, Self::Production];

    /// Full lowercase name, used for port ranges and the env file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Short name, used in layer names (`env-dev`).
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Development => "dev",
            Self::Staging => "staging",
            Self::Production => "prod",
        }
    }

    /// Whether the stricter production policy applies.
    #[must_use]
    pub const fn is_production_class(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns true if `name` is this environment's full or short name.
    #[must_use]
    pub fn matches(self, name: &str) -> bool {
        name == self.as_str() || name == self.short_name()
    }
}

impl Platform {
    /// All platforms.
    pub const ALL: [Self; 3] = [Self::Local, Self::Docker, Self::Cloud];

    /// Lowercase name, used in layer names (`platform-docker`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Docker => "docker",
            Self::Cloud => "cloud",
        }
    }
}

impl Target {
    /// Creates a new target.
    #[must_use]
    pub const fn new(environment: Environment, platform: Platform) -> Self {
        Self {
            environment,
            platform,
        }
    }

    /// Every environment/platform combination.
    #[must_use]
    pub fn all() -> Vec<Self> {
        Environment::ALL
            .iter()
            .flat_map(|env| Platform::ALL.iter().map(move |platform| Self::new(*env, *platform)))
            .collect()
    }

    /// Layer names in precedence order, lowest first.
    #[must_use]
    pub fn layer_chain(&self) -> Vec<LayerSlot> {
        vec![
            LayerSlot::required(BASE_LAYER),
            LayerSlot::optional(format!("env-{}", self.environment.short_name())),
            LayerSlot::optional(format!("platform-{}", self.platform.as_str())),
            LayerSlot::optional(LOCAL_OVERRIDE_LAYER),
        ]
    }

    /// A filesystem-friendly slug, e.g. `production-docker`.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}-{}", self.environment.as_str(), self.platform.as_str())
    }
}

/// Name of the base defaults layer.
pub const BASE_LAYER: &str = "base";

/// Name of the local/user override layer.
pub const LOCAL_OVERRIDE_LAYER: &str = "local";

/// One position in a target's precedence chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSlot {
    /// Layer name.
    pub name: String,
    /// Whether a missing layer fails the resolution.
    pub required: bool,
}

impl LayerSlot {
    fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.platform)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|env| env.matches(&s.to_lowercase()))
            .ok_or_else(|| format!("Unknown environment: {s}. Expected: development, staging, or production"))
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|platform| platform.as_str() == lower)
            .ok_or_else(|| format!("Unknown platform: {s}. Expected: local, docker, or cloud"))
    }
}
