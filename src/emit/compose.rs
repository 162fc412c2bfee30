//! Compose file projection.
//!
//! Compose interpolates `$` in its files, so literal dollars in environment
//! values and health-check commands are written as `$$`. The only `${NAME}`
//! left unescaped are secret references kept on purpose, which compose
//! fills from its own environment at deploy time.

use serde::Serialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::tree::{join_key, scalar_text};
use crate::config::Target;
use crate::error::{EmitError, Result};
use crate::secrets::SECRET_REFERENCE;

use super::header;
use super::services::{duration, parse_services, BuildSpec, ServiceEntry, DEFAULT_RESTART_POLICY};

const ARTIFACT: &str = "compose";

/// Top level of a compose file.
#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, serde_yaml::Mapping>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<BuildSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthcheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deploy: Option<Deploy>,
}

#[derive(Debug, Serialize)]
struct ComposeHealthcheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

#[derive(Debug, Serialize)]
struct Deploy {
    resources: DeployResources,
}

#[derive(Debug, Serialize)]
struct DeployResources {
    limits: Limits,
}

#[derive(Debug, Serialize)]
struct Limits {
    #[serde(skip_serializing_if = "Option::is_none")]
    cpus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<String>,
}

/// Renders the compose file. `references` holds the paths of leaves whose
/// `${NAME}` secret references must reach compose unescaped.
pub fn render(target: &Target, tree: &Value, references: &BTreeSet<&str>) -> Result<Vec<u8>> {
    let entries = parse_services(tree, ARTIFACT)?;

    let mut file = ComposeFile {
        services: BTreeMap::new(),
        volumes: BTreeMap::new(),
    };
    for entry in &entries {
        for volume in &entry.spec.volumes {
            if let Some(name) = named_volume(volume) {
                file.volumes.insert(name.to_string(), serde_yaml::Mapping::new());
            }
        }
        file.services.insert(entry.name.clone(), service(entry, references)?);
    }

    let yaml = serde_yaml::to_string(&file).map_err(|e| EmitError::Serialize {
        artifact: ARTIFACT,
        message: e.to_string(),
    })?;
    let mut out = header(target);
    out.push_str(&yaml);
    Ok(out.into_bytes())
}

fn service(entry: &ServiceEntry, references: &BTreeSet<&str>) -> Result<ComposeService> {
    let spec = &entry.spec;
    if spec.image.is_none() && spec.build.is_none() {
        return Err(EmitError::MissingKey {
            artifact: ARTIFACT,
            path: entry.path("image"),
        }
        .into());
    }

    let ports = match (entry.host_port, entry.container_port()) {
        (Some(host), Some(container)) => vec![format!("{host}:{container}")],
        _ => Vec::new(),
    };

    let mut environment = BTreeMap::new();
    for (key, value) in &spec.environment {
        let name = key.as_str().unwrap_or_default();
        let path = join_key(&entry.path("environment"), name);
        let text = scalar_text(value).ok_or_else(|| EmitError::InvalidShape {
            artifact: ARTIFACT,
            path: path.clone(),
            message: String::from("environment values must be scalars"),
        })?;
        environment.insert(name.to_string(), escape_dollars(&text, references.contains(path.as_str())));
    }

    let health_path = entry.path("healthcheck");
    let health_references = references.iter().any(|p| p.starts_with(&health_path));
    let healthcheck = entry.health_command(ARTIFACT)?.map(|(command, health)| ComposeHealthcheck {
        test: vec![String::from("CMD-SHELL"), escape_dollars(&command, health_references)],
        interval: duration(health.interval_secs),
        timeout: duration(health.timeout_secs),
        retries: health.retries,
        start_period: duration(health.start_period_secs),
    });

    let deploy = spec.resources.as_ref().and_then(|resources| {
        let limits = Limits {
            cpus: resources.cpus.as_ref().map(|c| c.0.clone()),
            memory: resources.memory.as_ref().map(|m| m.0.clone()),
        };
        (limits.cpus.is_some() || limits.memory.is_some()).then_some(Deploy {
            resources: DeployResources { limits },
        })
    });

    Ok(ComposeService {
        image: spec.image.clone(),
        build: if spec.image.is_some() { None } else { spec.build.clone() },
        ports,
        environment,
        volumes: spec.volumes.clone(),
        depends_on: spec.depends_on.clone(),
        restart: spec
            .restart
            .clone()
            .unwrap_or_else(|| DEFAULT_RESTART_POLICY.to_string()),
        healthcheck,
        deploy,
    })
}

/// Doubles every `$` so compose passes it through literally. With
/// `keep_references`, `${NAME}` secret references are left for compose to fill.
fn escape_dollars(text: &str, keep_references: bool) -> String {
    if !keep_references {
        return text.replace('$', "$$");
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for reference in SECRET_REFERENCE.find_iter(text) {
        out.push_str(&text[last..reference.start()].replace('$', "$$"));
        out.push_str(reference.as_str());
        last = reference.end();
    }
    out.push_str(&text[last..].replace('$', "$$"));
    out
}

/// `models:/models` mounts the named volume `models`; `./data:/data` and
/// `/srv:/srv` are bind mounts.
fn named_volume(volume: &str) -> Option<&str> {
    let (source, _) = volume.split_once(':')?;
    let is_path = source.starts_with(['.', '/', '~']) || source.contains('/');
    (!source.is_empty() && !is_path).then_some(source)
}
