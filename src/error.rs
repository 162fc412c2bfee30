//! Error types for the deploy-forge resolution engine.
//!
//! Every pipeline stage has its own error enum; [`ForgeError`] wraps them so
//! callers can match on the failing stage. Validation-style errors carry the
//! complete list of offending paths rather than only the first one.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the deploy-forge engine.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Layer loading errors.
    #[error("Layer error: {0}")]
    Layer(#[from] LayerError),

    /// Merge errors.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Secret resolution errors.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Port allocation errors.
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// Artifact emission errors.
    #[error("Emit error: {0}")]
    Emit(#[from] EmitError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while reading and flattening a single layer.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The layer could not be found in the layer source.
    #[error("Layer '{name}' not found (searched {searched})")]
    NotFound {
        /// Name of the missing layer.
        name: String,
        /// Where the source looked for it.
        searched: PathBuf,
    },

    /// The layer source is not valid YAML.
    #[error("Failed to parse layer '{layer}': {message}")]
    Parse {
        /// Layer name.
        layer: String,
        /// Description of the parse error.
        message: String,
        /// Optional `file:line:column` location.
        location: Option<String>,
    },

    /// The `extends` graph contains a cycle.
    #[error("Cycle in layer extends chain: {cycle}")]
    Cycle {
        /// The cycle, rendered as `a -> b -> a`.
        cycle: String,
    },

    /// The `extends` key is present but malformed.
    #[error("Invalid extends in layer '{layer}': {message}")]
    InvalidExtends {
        /// Layer name.
        layer: String,
        /// What is wrong with it.
        message: String,
    },

    /// Reading the layer failed.
    #[error("Failed to read layer '{layer}': {message}")]
    Io {
        /// Layer name.
        layer: String,
        /// Description of the IO failure.
        message: String,
    },

    /// Layer loading did not finish in time.
    #[error("Loading layers for {target} timed out after {after:?}")]
    Timeout {
        /// Target being loaded.
        target: String,
        /// The configured timeout.
        after: Duration,
    },
}

/// Merge errors.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A layer body is not a mapping at its root.
    #[error("Layer '{layer}' must be a mapping at the top level, found {found}")]
    NotAMapping {
        /// Layer name.
        layer: String,
        /// Kind of node that was found instead.
        found: &'static str,
    },

    /// Two layers disagree in a way the merge rules cannot settle.
    #[error("Ambiguous merge at '{path}': {message}")]
    Ambiguity {
        /// Dotted path of the conflict.
        path: String,
        /// Description of the ambiguity.
        message: String,
    },

    /// The layer chain is empty.
    #[error("No layers to merge for target {target}")]
    EmptyChain {
        /// Target being resolved.
        target: String,
    },
}

/// Secret resolution errors.
#[derive(Debug, Error)]
pub enum SecretError {
    /// A referenced or required secret is not present in the source.
    #[error("Missing secret '{name}' referenced at '{path}'")]
    Missing {
        /// Name of the secret.
        name: String,
        /// Dotted path where the reference was found.
        path: String,
        /// Layer that introduced the reference.
        layer: Option<String>,
    },

    /// The secret source failed.
    #[error("Secret source '{source_name}' failed for '{name}': {message}")]
    Source {
        /// Source identifier.
        source_name: String,
        /// Name of the secret being looked up.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// A lookup did not finish in time.
    #[error("Lookup of secret '{name}' timed out after {after:?}")]
    Timeout {
        /// Name of the secret.
        name: String,
        /// The configured timeout.
        after: Duration,
    },
}

/// A single offending location found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending value.
    pub path: String,
    /// Layer that last set the value, when known.
    pub layer: Option<String>,
    /// Human-readable explanation.
    pub message: String,
}

/// An ordered list of violations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

/// Validation errors. Each variant carries every violation found.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Template markers survived resolution.
    #[error("Unresolved placeholders: {violations}")]
    UnresolvedPlaceholder {
        /// Every offending path.
        violations: Violations,
    },

    /// A production target inherits a permissive security flag.
    #[error("Unsafe production defaults: {violations}")]
    UnsafeProductionDefault {
        /// Every offending path.
        violations: Violations,
    },

    /// More than one kind of validation failure.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<ValidationError>),
}

/// A single port collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflict {
    /// Service requesting the port.
    pub service: String,
    /// The contested port.
    pub port: u16,
    /// What already holds it (`reserved` or another service name).
    pub held_by: String,
}

/// Port allocation errors.
#[derive(Debug, Error)]
pub enum PortError {
    /// One or more fixed ports collide.
    #[error("Port conflicts: {}", format_conflicts(.conflicts))]
    Conflict {
        /// Every conflict found.
        conflicts: Vec<PortConflict>,
    },

    /// The environment's range ran out before every service got a port.
    #[error(
        "Port range {start}-{end} for {environment} exhausted; unassigned: {}",
        .unassigned.join(", ")
    )]
    RangeExhausted {
        /// Environment whose range was scanned.
        environment: String,
        /// Range start.
        start: u16,
        /// Range end.
        end: u16,
        /// Services left without a port.
        unassigned: Vec<String>,
    },

    /// No range is declared for the environment.
    #[error("No port range declared for environment '{environment}'")]
    MissingRange {
        /// Environment name.
        environment: String,
    },

    /// The ports section is malformed.
    #[error("Invalid ports configuration at '{path}': {message}")]
    Invalid {
        /// Dotted path of the offending value.
        path: String,
        /// Description of the problem.
        message: String,
    },
}

/// Artifact emission errors. These signal an engine defect: validated
/// configuration should always project cleanly.
#[derive(Debug, Error)]
pub enum EmitError {
    /// A key the artifact needs is absent.
    #[error("{artifact}: required key '{path}' is missing")]
    MissingKey {
        /// Artifact being emitted.
        artifact: &'static str,
        /// Dotted path of the missing key.
        path: String,
    },

    /// A value has the wrong structure for the artifact.
    #[error("{artifact}: value at '{path}' has unexpected shape: {message}")]
    InvalidShape {
        /// Artifact being emitted.
        artifact: &'static str,
        /// Dotted path of the value.
        path: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Serializing the artifact failed.
    #[error("{artifact}: serialization failed: {message}")]
    Serialize {
        /// Artifact being emitted.
        artifact: &'static str,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for deploy-forge operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Process exit code for this error. Always non-zero.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Layer(_) | Self::Merge(_) => 2,
            Self::Secret(_) => 3,
            Self::Validation(_) => 4,
            Self::Port(_) => 5,
            Self::Emit(_) | Self::Internal(_) => 70,
            Self::Io(_) => 74,
        }
    }
}

impl LayerError {
    /// Creates a parse error for a layer.
    #[must_use]
    pub fn parse(layer: impl Into<String>, message: impl Into<String>, location: Option<String>) -> Self {
        Self::Parse {
            layer: layer.into(),
            message: message.into(),
            location,
        }
    }
}

impl Violation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(path: impl Into<String>, layer: Option<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            layer,
            message: message.into(),
        }
    }
}

impl Violations {
    /// Returns the offending paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|v| v.path.as_str()).collect()
    }

    /// Returns the number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when there are no violations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ValidationError {
    /// Flattens this error into its individual violations.
    #[must_use]
    pub fn violations(&self) -> Vec<&Violation> {
        match self {
            Self::UnresolvedPlaceholder { violations } | Self::UnsafeProductionDefault { violations } => {
                violations.0.iter().collect()
            }
            Self::Aggregate(errors) => errors.iter().flat_map(Self::violations).collect(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(layer) = &self.layer {
            write!(f, " (from layer '{layer}')")?;
        }
        Ok(())
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PortConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wants {} (held by {})", self.service, self.port, self.held_by)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn format_conflicts(conflicts: &[PortConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violations_display_names_layer() {
        let violations = Violations(vec![
            Violation::new("auth.enabled", Some(String::from("base")), "must be true"),
            Violation::new("db.password", None, "placeholder"),
        ]);
        assert_eq!(
            violations.to_string(),
            "auth.enabled: must be true (from layer 'base'); db.password: placeholder"
        );
    }

    #[test]
    fn test_aggregate_flattens_violations() {
        let err = ValidationError::Aggregate(vec![
            ValidationError::UnresolvedPlaceholder {
                violations: Violations(vec![Violation::new("a", None, "x")]),
            },
            ValidationError::UnsafeProductionDefault {
                violations: Violations(vec![Violation::new("b", None, "y")]),
            },
        ]);
        let paths: Vec<_> = err.violations().iter().map(|v| v.path.clone()).collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errors = [
            ForgeError::internal("boom"),
            ForgeError::Port(PortError::MissingRange {
                environment: String::from("production"),
            }),
        ];
        for err in &errors {
            assert_ne!(err.exit_code(), 0);
        }
    }
}
