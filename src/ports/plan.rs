//! The `ports` section of a resolved configuration.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::{Environment, Platform, ResolvedConfig};
use crate::error::{PortError, Result};

/// Dotted path of the ports section.
pub const PORTS_PATH: &str = "ports";

/// Dotted path where allocated ports are written back.
pub const ASSIGNED_PORTS_PATH: &str = "ports.assigned";

/// Dotted path of the services section.
pub const SERVICES_PATH: &str = "services";

/// An inclusive port range for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRange {
    /// Environment name as written in the config.
    pub environment: String,
    /// First port of the range.
    pub start: u16,
    /// Last port of the range (inclusive).
    pub end: u16,
}

/// Where an assigned port came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortSource {
    /// Fixed `external_services` entry.
    External,
    /// Platform-mandated port.
    Override,
    /// First free port in the environment's range.
    Range,
}

/// A port given to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    /// Service name.
    pub service: String,
    /// Assigned host port.
    pub port: u16,
    /// How the port was chosen.
    pub source: PortSource,
}

/// Raw shape of the `ports` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PortsSection {
    reserved: Vec<u16>,
    ranges: BTreeMap<String, RangeSection>,
    external_services: serde_yaml::Mapping,
    platform_overrides: BTreeMap<String, serde_yaml::Mapping>,
    services: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeSection {
    start: u16,
    end: u16,
}

/// Port declarations for every environment and platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPlan {
    reserved: BTreeSet<u16>,
    ranges: Vec<PortRange>,
    external: Vec<(String, u16)>,
    overrides: Vec<(String, String, u16)>,
    services: Option<Vec<String>>,
}

impl PortPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the `ports` section of a resolved config. A missing section
    /// yields an empty plan.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Invalid`] if the section is malformed.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        config.get(PORTS_PATH).map_or_else(|| Ok(Self::new()), Self::from_value)
    }

    /// Parses a `ports` section value.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Invalid`] if the section is malformed.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::new());
        }
        let section: PortsSection = serde_yaml::from_value(value.clone()).map_err(|e| PortError::Invalid {
            path: PORTS_PATH.to_string(),
            message: e.to_string(),
        })?;

        let mut plan = Self {
            reserved: section.reserved.into_iter().collect(),
            services: section.services,
            ..Self::default()
        };
        for (environment, range) in section.ranges {
            plan = plan.with_range(environment, range.start, range.end)?;
        }
        for (service, port) in fixed_ports(&section.external_services, "ports.external_services")? {
            plan = plan.with_external(service, port);
        }
        for (platform, mapping) in &section.platform_overrides {
            if platform.parse::<Platform>().is_err() {
                return Err(invalid(
                    &format!("ports.platform_overrides.{platform}"),
                    "unknown platform",
                ));
            }
            let prefix = format!("ports.platform_overrides.{platform}");
            for (service, port) in fixed_ports(mapping, &prefix)? {
                plan = plan.with_override(platform.clone(), service, port);
            }
        }
        Ok(plan)
    }

    /// Marks a port as never assignable.
    #[must_use]
    pub fn with_reserved(mut self, port: u16) -> Self {
        self.reserved.insert(port);
        self
    }

    /// Declares the range for an environment.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Invalid`] if `start > end` or `start` is zero.
    pub fn with_range(mut self, environment: impl Into<String>, start: u16, end: u16) -> Result<Self> {
        let environment = environment.into();
        if start == 0 || start > end {
            return Err(invalid(
                &format!("ports.ranges.{environment}"),
                &format!("invalid range {start}-{end}"),
            ));
        }
        self.ranges.retain(|r| r.environment != environment);
        self.ranges.push(PortRange { environment, start, end });
        Ok(self)
    }

    /// Declares a fixed external service port.
    #[must_use]
    pub fn with_external(mut self, service: impl Into<String>, port: u16) -> Self {
        self.external.push((service.into(), port));
        self
    }

    /// Declares a port a platform mandates for a service.
    #[must_use]
    pub fn with_override(mut self, platform: impl Into<String>, service: impl Into<String>, port: u16) -> Self {
        self.overrides.push((platform.into(), service.into(), port));
        self
    }

    /// Reserved ports.
    #[must_use]
    pub const fn reserved(&self) -> &BTreeSet<u16> {
        &self.reserved
    }

    /// The range declared for `environment`, matched by full or short name.
    #[must_use]
    pub fn range_for(&self, environment: Environment) -> Option<&PortRange> {
        self.ranges.iter().find(|r| environment.matches(&r.environment))
    }

    /// Fixed external service ports in declaration order.
    #[must_use]
    pub fn external(&self) -> &[(String, u16)] {
        &self.external
    }

    /// Ports mandated by `platform`, in declaration order.
    #[must_use]
    pub fn overrides_for(&self, platform: Platform) -> Vec<(&str, u16)> {
        self.overrides
            .iter()
            .filter(|(p, _, _)| p.parse::<Platform>().is_ok_and(|p| p == platform))
            .map(|(_, service, port)| (service.as_str(), *port))
            .collect()
    }

    /// Services to allocate for: `ports.services` when declared, otherwise
    /// the keys of the `services` section.
    #[must_use]
    pub fn requested_services(&self, config: &ResolvedConfig) -> Vec<String> {
        if let Some(services) = &self.services {
            return services.clone();
        }
        config
            .get(SERVICES_PATH)
            .and_then(Value::as_mapping)
            .map(|services| services.keys().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::External => "external",
            Self::Override => "override",
            Self::Range => "range",
        };
        f.write_str(label)
    }
}

/// Reads a `service: port` mapping, keeping declaration order.
fn fixed_ports(mapping: &serde_yaml::Mapping, prefix: &str) -> Result<Vec<(String, u16)>> {
    let mut out = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let Some(service) = key.as_str() else {
            return Err(invalid(prefix, "service names must be strings"));
        };
        let port = value
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid(&format!("{prefix}.{service}"), "expected a port number between 1 and 65535"))?;
        out.push((service.to_string(), port));
    }
    Ok(out)
}

fn invalid(path: &str, message: &str) -> crate::error::ForgeError {
    PortError::Invalid {
        path: path.to_string(),
        message: message.to_string(),
    }
    .into()
}
