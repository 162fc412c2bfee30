//! `KEY=VALUE` environment file projection.
//!
//! Line order: `ENVIRONMENT`, `PLATFORM`, the `export` entries as declared,
//! then `<SERVICE>_PORT` for every assigned port not already exported.
//! Values are quoted so a dotenv parser reads back exactly what was written.

use serde_yaml::Value;
use std::collections::HashSet;

use crate::config::tree::{join_key, lookup, scalar_text};
use crate::config::Target;
use crate::error::{EmitError, Result};
use crate::ports::ASSIGNED_PORTS_PATH;

use super::header;

const ARTIFACT: &str = "env file";

/// Dotted path of the export table.
pub const EXPORT_PATH: &str = "export";

pub fn render(target: &Target, tree: &Value) -> Result<Vec<u8>> {
    let mut lines = EnvLines::default();
    lines.push("ENVIRONMENT", target.environment.as_str())?;
    lines.push("PLATFORM", target.platform.as_str())?;

    if let Some(exports) = lookup(tree, EXPORT_PATH).filter(|v| !v.is_null()) {
        let Some(exports) = exports.as_mapping() else {
            return Err(shape(EXPORT_PATH, "expected a mapping of ENV_NAME to dotted path"));
        };
        for (key, path) in exports {
            let name = key.as_str().unwrap_or_default();
            let entry_path = join_key(EXPORT_PATH, name);
            let Some(path) = path.as_str() else {
                return Err(shape(&entry_path, "expected a dotted path"));
            };
            let value = lookup(tree, path).ok_or_else(|| EmitError::MissingKey {
                artifact: ARTIFACT,
                path: path.to_string(),
            })?;
            let text = scalar_text(value).ok_or_else(|| shape(path, "only scalar values can be exported"))?;
            lines.push(name, &text).map_err(|_| shape(&entry_path, "invalid or duplicate variable name"))?;
        }
    }

    if let Some(assigned) = lookup(tree, ASSIGNED_PORTS_PATH).and_then(Value::as_mapping) {
        for (service, port) in assigned {
            let service = service.as_str().unwrap_or_default();
            let name = port_variable(service);
            if lines.contains(&name) {
                continue;
            }
            let port = scalar_text(port).ok_or_else(|| shape(&join_key(ASSIGNED_PORTS_PATH, service), "expected a port number"))?;
            lines.push(&name, &port)?;
        }
    }

    let mut out = header(target);
    out.push_str(&lines.text);
    Ok(out.into_bytes())
}

#[derive(Default)]
struct EnvLines {
    seen: HashSet<String>,
    text: String,
}

impl EnvLines {
    fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    fn push(&mut self, name: &str, value: &str) -> Result<()> {
        if !is_valid_name(name) || !self.seen.insert(name.to_string()) {
            return Err(shape(name, "invalid or duplicate variable name"));
        }
        self.text.push_str(name);
        self.text.push('=');
        self.text.push_str(&quote(value));
        self.text.push('\n');
        Ok(())
    }
}

/// `metrics-exporter` becomes `METRICS_EXPORTER_PORT`.
fn port_variable(service: &str) -> String {
    let mut name: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.push_str("_PORT");
    name
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quotes a value for a dotenv file.
///
/// Plain values are written bare. Single quotes are literal in dotenv, so
/// they are preferred, which also keeps `${NAME}` references from being
/// expanded. A dotenv reader still treats `\'` as an escape when looking for
/// the closing quote, so values containing `\`, `'` or a newline use double
/// quotes with `\\`, `\"`, `\$` and `\n` escaped.
fn quote(value: &str) -> String {
    let bare = |c: char| c.is_ascii_alphanumeric() || "_-./:@+,%".contains(c);
    if value.chars().all(bare) {
        return value.to_string();
    }
    if !value.contains(['\'', '\\', '\n', '\r']) {
        return format!("'{value}'");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn shape(path: &str, message: &str) -> crate::error::ForgeError {
    EmitError::InvalidShape {
        artifact: ARTIFACT,
        path: path.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, Platform};
    use crate::error::ForgeError;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn target() -> Target {
        Target::new(Environment::Production, Platform::Docker)
    }

    fn parse(bytes: &[u8]) -> HashMap<String, String> {
        dotenvy::from_read_iter(bytes).map(std::result::Result::unwrap).collect()
    }

    #[test]
    fn test_exports_round_trip_through_dotenv() {
        let tree: Value = serde_yaml::from_str(
            r#"
app:
  name: forge
  greeting: "it's a \"test\"\nsecond line"
  url: "postgres://u:p@db:5432/app?ssl=true&x=1"
  template: "${DB_PASSWORD}"
  cost: "$5 \\ back"
  spaced: "  padded  "
  empty: ""
  debug: false
  workers: 4
  ratio: 0.5
  nothing: ~
export:
  APP_NAME: app.name
  GREETING: app.greeting
  DATABASE_URL: app.url
  DB_PASSWORD: app.template
  COST: app.cost
  SPACED: app.spaced
  EMPTY: app.empty
  DEBUG: app.debug
  WORKERS: app.workers
  RATIO: app.ratio
  NOTHING: app.nothing
"#,
        )
        .unwrap();

        let parsed = parse(&render(&target(), &tree).unwrap());
        let exports = tree["export"].as_mapping().unwrap();
        for (name, path) in exports {
            let expected = scalar_text(lookup(&tree, path.as_str().unwrap()).unwrap()).unwrap();
            assert_eq!(parsed.get(name.as_str().unwrap()), Some(&expected), "{name:?}");
        }
        assert_eq!(parsed["ENVIRONMENT"], "production");
        assert_eq!(parsed["PLATFORM"], "docker");
    }

    #[test]
    fn test_port_variables_are_appended() {
        let tree: Value =
            serde_yaml::from_str("ports: {assigned: {app: 7001, metrics-exporter: 7002}}\nexport: {APP_PORT: ports.assigned.app}\n")
                .unwrap();
        let text = String::from_utf8(render(&target(), &tree).unwrap()).unwrap();
        assert_eq!(text.matches("APP_PORT=7001").count(), 1);
        assert!(text.contains("METRICS_EXPORTER_PORT=7002"));
        assert!(text.starts_with("# Generated by deploy-forge for production/docker."));
    }

    #[test]
    fn test_missing_export_path() {
        let tree: Value = serde_yaml::from_str("export: {TOKEN: auth.token}\n").unwrap();
        match render(&target(), &tree) {
            Err(ForgeError::Emit(EmitError::MissingKey { path, .. })) => assert_eq!(path, "auth.token"),
            other => panic!("expected missing key, got {other:?}"),
        }
    }

    #[test]
    fn test_non_scalar_export_is_rejected() {
        let tree: Value = serde_yaml::from_str("db: {a: 1}\nexport: {DB: db}\n").unwrap();
        assert!(matches!(
            render(&target(), &tree),
            Err(ForgeError::Emit(EmitError::InvalidShape { .. }))
        ));
    }

    #[test]
    fn test_bad_variable_name_is_rejected() {
        let tree: Value = serde_yaml::from_str("a: 1\nexport: {\"1BAD\": a}\n").unwrap();
        assert!(render(&target(), &tree).is_err());
        let tree: Value = serde_yaml::from_str("a: 1\nexport: {ENVIRONMENT: a}\n").unwrap();
        assert!(render(&target(), &tree).is_err());
    }

    #[test]
    fn test_quote_styles() {
        assert_eq!(quote("plain-value_1.2"), "plain-value_1.2");
        assert_eq!(quote("has space"), "'has space'");
        assert_eq!(quote("${X}"), "'${X}'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a\nb"), "\"a\\nb\"");
        assert_eq!(quote("trail\\"), "\"trail\\\\\"");
    }

    #[test]
    fn test_backslash_values_parse() {
        let tree: Value = serde_yaml::from_str(
            "paths:\n  trail: 'trail\\'\n  models: 'C:\\models\\'\n  mixed: 'it''s \\ $HOME'\nexport:\n  TRAIL: paths.trail\n  MODELS: paths.models\n  MIXED: paths.mixed\n",
        )
        .unwrap();
        let parsed = parse(&render(&target(), &tree).unwrap());
        assert_eq!(parsed["TRAIL"], "trail\\");
        assert_eq!(parsed["MODELS"], "C:\\models\\");
        assert_eq!(parsed["MIXED"], "it's \\ $HOME");
    }

    proptest! {
        /// Any exported string reads back unchanged.
        #[test]
        fn prop_exported_strings_round_trip(value in "[ -~\t\né]{0,24}") {
            let mut tree: Value = serde_yaml::from_str("export: {VALUE: app.value}\n").unwrap();
            let mut app = serde_yaml::Mapping::new();
            app.insert(Value::from("value"), Value::from(value.as_str()));
            tree.as_mapping_mut().unwrap().insert(Value::from("app"), Value::Mapping(app));

            let bytes = render(&target(), &tree).unwrap();
            let parsed: HashMap<String, String> = dotenvy::from_read_iter(bytes.as_slice())
                .collect::<std::result::Result<_, _>>()
                .unwrap();
            prop_assert_eq!(parsed.get("VALUE"), Some(&value));
        }
    }
}
