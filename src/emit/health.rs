//! Health-check spec projection: one entry per service that declares a
//! health check, in declaration order.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::config::Target;
use crate::error::{EmitError, Result};

use super::header;
use super::services::{duration, parse_services};

const ARTIFACT: &str = "health-checks";

#[derive(Debug, Serialize)]
struct HealthCheck {
    command: String,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

pub fn render(target: &Target, tree: &Value) -> Result<Vec<u8>> {
    let mut checks = Mapping::new();
    for entry in parse_services(tree, ARTIFACT)? {
        let Some((command, health)) = entry.health_command(ARTIFACT)? else {
            continue;
        };
        let check = HealthCheck {
            command,
            interval: duration(health.interval_secs),
            timeout: duration(health.timeout_secs),
            retries: health.retries,
            start_period: duration(health.start_period_secs),
        };
        let value = serde_yaml::to_value(&check).map_err(|e| serialize_error(&e))?;
        checks.insert(Value::from(entry.name.clone()), value);
    }

    let yaml = serde_yaml::to_string(&checks).map_err(|e| serialize_error(&e))?;
    let mut out = header(target);
    out.push_str(&yaml);
    Ok(out.into_bytes())
}

fn serialize_error(e: &serde_yaml::Error) -> EmitError {
    EmitError::Serialize {
        artifact: ARTIFACT,
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tree::lookup;
    use crate::config::{Environment, Platform};

    #[test]
    fn test_only_services_with_checks_are_listed() {
        let tree: Value = serde_yaml::from_str(
            r"
services:
  app:
    image: app
    healthcheck: { command: 'pg_isready -U app', retries: 5, timeout_secs: 2 }
  worker:
    image: worker
",
        )
        .unwrap();
        let bytes = render(&Target::new(Environment::Development, Platform::Local), &tree).unwrap();
        let doc: Value = serde_yaml::from_slice(&bytes).unwrap();

        assert_eq!(lookup(&doc, "app.command"), Some(&Value::from("pg_isready -U app")));
        assert_eq!(lookup(&doc, "app.retries"), Some(&Value::from(5)));
        assert_eq!(lookup(&doc, "app.timeout"), Some(&Value::from("2s")));
        assert_eq!(lookup(&doc, "app.interval"), Some(&Value::from("30s")));
        assert!(lookup(&doc, "worker").is_none());
    }
}
