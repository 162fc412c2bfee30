//! Typed view of the `services` section shared by the compose and
//! health-check projections.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::config::tree::{join_key, lookup, scalar_text};
use crate::error::{EmitError, Result};
use crate::ports::{ASSIGNED_PORTS_PATH, SERVICES_PATH};

/// Restart policy applied when a service does not set one.
pub const DEFAULT_RESTART_POLICY: &str = "unless-stopped";

/// One entry of the `services` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    /// Image reference.
    pub image: Option<String>,
    /// Build instructions, used when no image is given.
    pub build: Option<BuildSpec>,
    /// Port the process listens on inside the container.
    pub container_port: Option<u16>,
    /// Environment variables, in declaration order.
    pub environment: Mapping,
    /// Volume mounts in compose short syntax.
    pub volumes: Vec<String>,
    /// Services that must start first.
    pub depends_on: Vec<String>,
    /// Restart policy.
    pub restart: Option<String>,
    /// Health check.
    pub healthcheck: Option<HealthSpec>,
    /// Resource limits.
    pub resources: Option<ResourceSpec>,
}

/// Build context, either a bare path or the detailed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    /// Context directory only.
    Context(String),
    /// Context with a dockerfile and build args.
    Detailed {
        /// Context directory.
        context: String,
        /// Dockerfile path relative to the context.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dockerfile: Option<String>,
        /// Build arguments.
        #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
        args: std::collections::BTreeMap<String, String>,
    },
}

/// Health check settings as written in the config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthSpec {
    /// Shell command to run.
    pub command: Option<String>,
    /// HTTP path probed with curl when no command is given.
    pub endpoint: Option<String>,
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Seconds before a check is considered failed.
    pub timeout_secs: u64,
    /// Consecutive failures before the service is unhealthy.
    pub retries: u32,
    /// Grace period after start, in seconds.
    pub start_period_secs: u64,
}

impl Default for HealthSpec {
    fn default() -> Self {
        Self {
            command: None,
            endpoint: None,
            interval_secs: 30,
            timeout_secs: 5,
            retries: 3,
            start_period_secs: 10,
        }
    }
}

/// CPU and memory limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    /// CPU limit, e.g. `"2.0"`.
    pub cpus: Option<ScalarString>,
    /// Memory limit, e.g. `4g`.
    pub memory: Option<ScalarString>,
}

/// A scalar written either as a string or a number, kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct ScalarString(pub String);

impl From<Value> for ScalarString {
    fn from(value: Value) -> Self {
        Self(scalar_text(&value).unwrap_or_default())
    }
}

/// A parsed service together with the facts the projections need.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub spec: ServiceSpec,
    pub host_port: Option<u16>,
}

impl ServiceEntry {
    /// Port the service listens on inside its container.
    pub fn container_port(&self) -> Option<u16> {
        self.spec.container_port.or(self.host_port)
    }

    /// Dotted path of a key inside this service.
    pub fn path(&self, key: &str) -> String {
        join_key(&join_key(SERVICES_PATH, &self.name), key)
    }

    /// The command the health check runs, if a health check is declared.
    pub fn health_command(&self, artifact: &'static str) -> Result<Option<(String, &HealthSpec)>> {
        let Some(health) = &self.spec.healthcheck else {
            return Ok(None);
        };
        if let Some(command) = &health.command {
            return Ok(Some((command.clone(), health)));
        }
        let Some(endpoint) = &health.endpoint else {
            return Err(EmitError::InvalidShape {
                artifact,
                path: self.path("healthcheck"),
                message: String::from("needs either `command` or `endpoint`"),
            }
            .into());
        };
        let port = self.container_port().ok_or_else(|| EmitError::MissingKey {
            artifact,
            path: join_key(ASSIGNED_PORTS_PATH, &self.name),
        })?;
        let endpoint = if endpoint.starts_with('/') {
            endpoint.clone()
        } else {
            format!("/{endpoint}")
        };
        Ok(Some((format!("curl -fsS http://localhost:{port}{endpoint}"), health)))
    }
}

/// Parses every entry of the `services` section, in declaration order.
pub fn parse_services(tree: &Value, artifact: &'static str) -> Result<Vec<ServiceEntry>> {
    let Some(section) = lookup(tree, SERVICES_PATH) else {
        return Ok(Vec::new());
    };
    if section.is_null() {
        return Ok(Vec::new());
    }
    let Some(mapping) = section.as_mapping() else {
        return Err(EmitError::InvalidShape {
            artifact,
            path: SERVICES_PATH.to_string(),
            message: String::from("expected a mapping of service name to settings"),
        }
        .into());
    };

    let mut entries = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            return Err(EmitError::InvalidShape {
                artifact,
                path: SERVICES_PATH.to_string(),
                message: String::from("service names must be strings"),
            }
            .into());
        };
        let spec: ServiceSpec = if value.is_null() {
            ServiceSpec::default()
        } else {
            serde_yaml::from_value(value.clone()).map_err(|e| EmitError::InvalidShape {
                artifact,
                path: join_key(SERVICES_PATH, name),
                message: e.to_string(),
            })?
        };
        let host_port = assigned_port(tree, name, artifact)?;
        entries.push(ServiceEntry {
            name: name.to_string(),
            spec,
            host_port,
        });
    }
    Ok(entries)
}

/// The host port written back by the allocator for `service`.
pub fn assigned_port(tree: &Value, service: &str, artifact: &'static str) -> Result<Option<u16>> {
    let path = join_key(ASSIGNED_PORTS_PATH, service);
    let Some(value) = lookup(tree, &path) else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|p| u16::try_from(p).ok())
        .map(Some)
        .ok_or_else(|| {
            EmitError::InvalidShape {
                artifact,
                path,
                message: String::from("expected a port number"),
            }
            .into()
        })
}

/// Formats a number of seconds the way compose expects durations.
pub fn duration(secs: u64) -> String {
    format!("{secs}s")
}
