//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! plans, run reports and validation results as text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{PlanConfig, PlanHasher, ValidationResult};
use crate::orchestrator::{RunReport, StepStatus, TeardownRecord};
use crate::planner::{ProvisioningPlan, StepAction, ROOT_STEP_INDEX};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Run step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    description: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    duration: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a provisioning plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ProvisioningPlan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ProvisioningPlan) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nProvisioning Plan for {} in {}\n",
            plan.root.name.bold(),
            plan.location
        );
        let _ = write!(
            output,
            "   Fingerprint: {}\n\n",
            PlanHasher::short_hash(&plan.fingerprint)
        );

        let mut rows = vec![PlanStepRow {
            index: ROOT_STEP_INDEX,
            action: Self::format_verb("create"),
            kind: String::from("resource group"),
            name: plan.root.name.clone(),
            details: String::new(),
        }];
        rows.extend(plan.steps.iter().map(|s| PlanStepRow {
            index: s.index,
            action: Self::format_verb(s.action.verb()),
            kind: s.action.kind().to_string(),
            name: s.action.name().unwrap_or("-").to_string(),
            details: Self::truncate(&Self::action_details(&s.action), 50),
        }));
        rows.push(PlanStepRow {
            index: plan.step_count() + 1,
            action: Self::format_verb("delete"),
            kind: String::from("resource group"),
            name: plan.root.name.clone(),
            details: String::from("teardown"),
        });

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} steps, {} changing resources, then teardown of {}\n",
            plan.step_count(),
            plan.mutating_step_count().to_string().green(),
            plan.root.name.red()
        );

        output
    }

    /// Formats a run report for display.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "\nRun {} on {}\n\n",
            report.run_id,
            report.resource_group.bold()
        );

        let rows: Vec<StepRow> = report
            .steps
            .iter()
            .map(|s| StepRow {
                index: s.index,
                description: Self::truncate(&s.description, 60),
                status: Self::format_status(s.status),
                duration: format!("{:.1}s", Self::secs(s.duration_ms)),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        for step in report.steps.iter().filter(|s| !s.detail.is_empty()) {
            let _ = writeln!(output, "\n   {}. {}", step.index, step.description);
            for line in &step.detail {
                let _ = writeln!(output, "      {line}");
            }
        }

        let status = match report.result() {
            Ok(()) => format!("{} All steps succeeded", "✓".green()),
            Err(e) => format!("{} {e}", "✗".red()),
        };
        let _ = write!(output, "\n{status}\n");

        let teardown = match &report.teardown {
            TeardownRecord::Deleted { name } => {
                format!("{} Deleted resource group {name}", "✓".green())
            }
            TeardownRecord::NotProvisioned => {
                format!("{} Nothing was provisioned, nothing to delete", "✓".green())
            }
            TeardownRecord::Failed { message } => format!(
                "{} Teardown failed, delete {} manually: {message}",
                "⚠".yellow(),
                report.resource_group
            ),
        };
        let _ = writeln!(output, "{teardown}");

        let _ = writeln!(
            output,
            "\n{} succeeded, {} failed, {} skipped in {}s",
            report.count(StepStatus::Succeeded).to_string().green(),
            report.count(StepStatus::Failed).to_string().red(),
            report.count(StepStatus::Skipped).to_string().yellow(),
            report.elapsed_secs()
        );

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &PlanConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "resource_group": config.resource_group.name,
                    "location": config.location,
                    "steps": config.steps.len(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Plan is valid\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Plan has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = write!(output, "\nPlan summary:\n");
                let _ = writeln!(output, "   Resource group: {}", config.resource_group.name);
                let _ = writeln!(output, "   Location: {}", config.location);
                let _ = writeln!(output, "   Steps: {}", config.steps.len());
                let _ = writeln!(
                    output,
                    "   Security groups: {}",
                    config.security_group_names().len()
                );

                output
            }
        }
    }

    /// Extra information shown next to a plan step.
    fn action_details(action: &StepAction) -> String {
        match action {
            StepAction::CreateOrUpdateSecurityGroup { rules, .. } => {
                let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
                format!("rules: {}", names.join(", "))
            }
            StepAction::CreateOrUpdateNetwork {
                address_prefixes,
                subnets,
                ..
            } => {
                let subnets: Vec<String> = subnets
                    .iter()
                    .map(|s| match &s.network_security_group {
                        Some(nsg) => format!("{} ({}, {nsg})", s.name, s.address_prefix),
                        None => format!("{} ({})", s.name, s.address_prefix),
                    })
                    .collect();
                format!("{} | {}", address_prefixes.join(", "), subnets.join(", "))
            }
            StepAction::CreateVirtualMachine {
                network,
                subnet,
                size,
                public_ip,
                ..
            } => {
                let ip = if *public_ip { ", public IP" } else { "" };
                format!("{size} in {network}/{subnet}{ip}")
            }
            StepAction::ListNetworks | StepAction::DeleteNetwork { .. } => String::new(),
        }
    }

    /// Formats a step verb with color.
    fn format_verb(verb: &str) -> String {
        match verb {
            "create" => "+create".green().to_string(),
            "update" => "~update".yellow().to_string(),
            "delete" => "-delete".red().to_string(),
            other => other.dimmed().to_string(),
        }
    }

    /// Formats a step status with color.
    fn format_status(status: StepStatus) -> String {
        match status {
            StepStatus::Succeeded => "succeeded".green().to_string(),
            StepStatus::Failed => "failed".red().to_string(),
            StepStatus::Skipped => "skipped".dimmed().to_string(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn secs(ms: u64) -> f64 {
        ms as f64 / 1000.0
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    fingerprint: String,
    location: String,
    resource_group: String,
    step_count: usize,
    steps: Vec<StepJson>,
}

#[derive(serde::Serialize)]
struct StepJson {
    index: usize,
    verb: &'static str,
    kind: String,
    name: Option<String>,
    description: String,
}

impl From<&ProvisioningPlan> for PlanJson {
    fn from(plan: &ProvisioningPlan) -> Self {
        Self {
            fingerprint: plan.fingerprint.clone(),
            location: plan.location.clone(),
            resource_group: plan.root.name.clone(),
            step_count: plan.step_count(),
            steps: plan
                .steps
                .iter()
                .map(|s| StepJson {
                    index: s.index,
                    verb: s.action.verb(),
                    kind: s.action.kind().to_string(),
                    name: s.action.name().map(String::from),
                    description: s.description(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ConfigValidator, BUILTIN_PLAN};
    use crate::planner::NameGenerator;

    fn builtin_plan() -> ProvisioningPlan {
        let config = ConfigParser::new().parse_yaml(BUILTIN_PLAN, None).unwrap();
        ProvisioningPlan::from_config(&config, &NameGenerator::new(false)).unwrap()
    }

    #[test]
    fn test_plan_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let plan = builtin_plan();

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_plan(&plan)).unwrap();

        assert_eq!(json["resource_group"], "NetworkSampleRG");
        assert_eq!(json["steps"][0]["index"], 2);
        assert_eq!(json["steps"][0]["kind"], "network security group");
        assert_eq!(json["steps"].as_array().unwrap().len(), plan.steps.len());
    }

    #[test]
    fn test_plan_text_lists_teardown() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&builtin_plan());

        assert!(text.contains("NetworkSampleRG"));
        assert!(text.contains("teardown"));
        assert!(text.contains("backEndNSG"));
    }

    #[test]
    fn test_validation_json() {
        let config = ConfigParser::new().parse_yaml(BUILTIN_PLAN, None).unwrap();
        let result = ConfigValidator::new().check(&config);

        let json: serde_json::Value = serde_json::from_str(
            &OutputFormatter::new(OutputFormat::Json).format_validation(&config, &result, true),
        )
        .unwrap();

        assert_eq!(json["valid"], true);
        assert_eq!(json["location"], "eastus");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a longer string", 10), "a longe...");
    }
}
