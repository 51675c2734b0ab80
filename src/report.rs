//! Output formatting and persistence for validation issues.
//!
//! Supports a flat CSV report, JSON serialization, and a per-level tracing
//! summary.

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::validator::{ContextValue, Level, ValidationIssue};

/// One flat report row per issue; the context map is folded into a single
/// `key=value` column with stable key order.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    level: Level,
    code: &'a str,
    entity_id: &'a str,
    message: &'a str,
    context: String,
}

impl<'a> From<&'a ValidationIssue> for ReportRow<'a> {
    fn from(issue: &'a ValidationIssue) -> Self {
        ReportRow {
            level: issue.level,
            code: issue.code,
            entity_id: &issue.entity_id,
            message: &issue.message,
            context: context_string(&issue.context),
        }
    }
}

fn context_string(
    context: &std::collections::BTreeMap<String, ContextValue>,
) -> String {
    context
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Appends each issue as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_report(path: &str, issues: &[ValidationIssue]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, issues = issues.len(), "Appending CSV report");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for issue in issues {
        writer.serialize(ReportRow::from(issue))?;
    }
    writer.flush()?;

    Ok(())
}

/// Logs the issue list as pretty-printed JSON.
pub fn print_json(issues: &[ValidationIssue]) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(issues)?);
    Ok(())
}

/// Logs each issue at its own severity, then a one-line count summary.
pub fn log_summary(issues: &[ValidationIssue]) {
    for issue in issues {
        match issue.level {
            Level::Error => {
                error!(code = issue.code, entity_id = %issue.entity_id, "{}", issue.message)
            }
            Level::Warn => {
                warn!(code = issue.code, entity_id = %issue.entity_id, "{}", issue.message)
            }
            Level::Info => {
                info!(code = issue.code, entity_id = %issue.entity_id, "{}", issue.message)
            }
        }
    }

    let errors = issues.iter().filter(|i| i.level == Level::Error).count();
    let warnings = issues.iter().filter(|i| i.level == Level::Warn).count();
    if issues.is_empty() {
        info!("No issues detected");
    } else {
        info!(errors, warnings, total = issues.len(), "Validation issues found");
    }
}
