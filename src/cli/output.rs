//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use std::path::Path;
use tabled::{Table, Tabled};

use crate::config::tree::{lookup, scalar_text};
use crate::config::{ConfigHasher, ResolvedConfig};
use crate::error::{ForgeError, ValidationError};
use crate::pipeline::{BatchSummary, BuildOutput, ResolvedTarget, TargetOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Value origin row for table display.
#[derive(Tabled)]
struct OriginRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Layer")]
    layer: String,
}

/// Port row for table display.
#[derive(Tabled)]
struct PortRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Source")]
    source: String,
}

/// Artifact row for table display.
#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Size")]
    size: usize,
    #[tabled(rename = "SHA-256")]
    sha256: String,
}

/// Batch outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a resolved configuration. Secret values are always shown as
    /// their `${NAME}` reference.
    #[must_use]
    pub fn format_resolved(&self, config: &ResolvedConfig, origins: bool) -> String {
        let tree = config.redacted();
        match self.format {
            OutputFormat::Json => {
                let origin_map: serde_json::Map<String, serde_json::Value> = config
                    .leaves()
                    .into_iter()
                    .filter_map(|(path, _)| {
                        config
                            .origin_of(&path)
                            .map(|layer| (path, serde_json::Value::from(layer)))
                    })
                    .collect();
                let body = json!({
                    "target": config.target(),
                    "layers": config.layers(),
                    "config": serde_json::to_value(&tree).unwrap_or_default(),
                    "origins": if origins { serde_json::Value::Object(origin_map) } else { serde_json::Value::Null },
                });
                serde_json::to_string_pretty(&body).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "# {} (layers: {})\n",
                    config.target(),
                    config.layers().join(" < ")
                );
                output.push_str(&serde_yaml::to_string(&tree).unwrap_or_default());

                if origins {
                    let rows: Vec<OriginRow> = config
                        .leaves()
                        .into_iter()
                        .map(|(path, _)| OriginRow {
                            value: lookup(&tree, &path)
                                .and_then(scalar_text)
                                .map(|v| Self::truncate(&v, 40))
                                .unwrap_or_default(),
                            layer: config.origin_of(&path).unwrap_or("-").to_string(),
                            path,
                        })
                        .collect();
                    if !rows.is_empty() {
                        output.push('\n');
                        output.push_str(&Table::new(rows).to_string());
                        output.push('\n');
                    }
                }
                output
            }
        }
    }

    /// Formats the outcome of a successful validation.
    #[must_use]
    pub fn format_validation(&self, resolved: &ResolvedTarget) -> String {
        let report = &resolved.report;
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "status": "valid",
                "target": resolved.target(),
                "leaves_checked": report.leaves_checked,
                "warnings": report.warnings,
                "fingerprint": resolved.fingerprint,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} {} is valid ({} values checked, fingerprint {})\n",
                    "✓".green(),
                    resolved.target(),
                    report.leaves_checked,
                    ConfigHasher::new().short_hash(&resolved.fingerprint)
                );
                if !report.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &report.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats the ports assigned for a target.
    #[must_use]
    pub fn format_ports(&self, resolved: &ResolvedTarget) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "target": resolved.target(),
                "assignments": resolved.ports.assignments,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                if resolved.ports.is_empty() {
                    return format!("No services need ports for {}.\n", resolved.target());
                }
                let rows: Vec<PortRow> = resolved
                    .ports
                    .assignments
                    .iter()
                    .map(|a| PortRow {
                        service: a.service.clone(),
                        port: a.port,
                        source: a.source.to_string(),
                    })
                    .collect();
                format!("\nPorts for {}\n{}\n", resolved.target(), Table::new(rows))
            }
        }
    }

    /// Formats the artifacts written for one target.
    #[must_use]
    pub fn format_build(&self, output: &BuildOutput, dir: &Path) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "status": "success",
                "directory": dir.display().to_string(),
                "manifest": output.manifest,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<ArtifactRow> = output
                    .manifest
                    .artifacts
                    .iter()
                    .map(|a| ArtifactRow {
                        file: a.file_name.clone(),
                        size: a.size,
                        sha256: Self::truncate(&a.sha256, 16),
                    })
                    .collect();
                let mut text = format!(
                    "{} Built {} -> {}\n",
                    "✓".green(),
                    output.resolved.target(),
                    dir.display()
                );
                if !rows.is_empty() {
                    text.push_str(&Table::new(rows).to_string());
                    text.push('\n');
                }
                for warning in &output.resolved.report.warnings {
                    let _ = writeln!(text, "{} {warning}", "⚠".yellow());
                }
                text
            }
        }
    }

    /// Formats the outcomes of a batch build.
    #[must_use]
    pub fn format_batch(&self, outcomes: &[TargetOutcome], summary: &BatchSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "status": if summary.all_succeeded() { "success" } else { "error" },
                "summary": summary,
                "targets": outcomes
                    .iter()
                    .map(|o| json!({
                        "target": o.target,
                        "ok": o.result.is_ok(),
                        "fingerprint": o.result.as_ref().ok().map(|b| b.resolved.fingerprint.clone()),
                        "error": o.result.as_ref().err().map(ToString::to_string),
                    }))
                    .collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<OutcomeRow> = outcomes
                    .iter()
                    .map(|o| match &o.result {
                        Ok(output) => OutcomeRow {
                            target: o.target.to_string(),
                            status: "built".green().to_string(),
                            detail: format!(
                                "{} artifact(s), {}",
                                output.artifacts.len(),
                                ConfigHasher::new().short_hash(&output.resolved.fingerprint)
                            ),
                        },
                        Err(e) => OutcomeRow {
                            target: o.target.to_string(),
                            status: "failed".red().to_string(),
                            detail: Self::truncate(&e.to_string(), 60),
                        },
                    })
                    .collect();

                let mut output = format!("\n{}\n", Table::new(rows));
                let _ = writeln!(
                    output,
                    "\nBuild: {} succeeded, {} failed",
                    summary.succeeded.to_string().green(),
                    summary.failed.to_string().red()
                );
                output
            }
        }
    }

    /// Formats an error, listing every violation on its own line.
    #[must_use]
    pub fn format_error(&self, error: &ForgeError) -> String {
        let violations: Vec<_> = match error {
            ForgeError::Validation(v) => v.violations(),
            _ => Vec::new(),
        };
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "status": "error",
                "exit_code": error.exit_code(),
                "message": error.to_string(),
                "violations": violations
                    .iter()
                    .map(|v| json!({ "path": v.path, "layer": v.layer, "message": v.message }))
                    .collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                if violations.is_empty() {
                    return format!("{} {error}\n", "✗".red());
                }
                let title = match error {
                    ForgeError::Validation(ValidationError::UnsafeProductionDefault { .. }) => {
                        "Unsafe production defaults"
                    }
                    ForgeError::Validation(ValidationError::UnresolvedPlaceholder { .. }) => "Unresolved placeholders",
                    _ => "Validation failed",
                };
                let mut output = format!("{} {title} ({}):\n", "✗".red(), violations.len());
                for violation in violations {
                    let layer = violation.layer.as_deref().unwrap_or("?");
                    let _ = writeln!(
                        output,
                        "   - {} [{}]: {}",
                        violation.path.bold(),
                        layer,
                        violation.message
                    );
                }
                output
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Violation, Violations};

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_error_lists_every_violation() {
        colored::control::set_override(false);
        let error = ForgeError::Validation(ValidationError::UnresolvedPlaceholder {
            violations: Violations(vec![
                Violation::new("llm.api_key", Some(String::from("base")), "unresolved placeholder"),
                Violation::new("db.url", None, "unresolved placeholder"),
            ]),
        });

        let text = OutputFormatter::new(OutputFormat::Text).format_error(&error);
        assert!(text.contains("Unresolved placeholders (2)"));
        assert!(text.contains("llm.api_key [base]"));
        assert!(text.contains("db.url [?]"));

        let json: serde_json::Value =
            serde_json::from_str(&OutputFormatter::new(OutputFormat::Json).format_error(&error)).unwrap();
        assert_eq!(json["exit_code"], 4);
        assert_eq!(json["violations"][1]["path"], "db.url");
    }
}
