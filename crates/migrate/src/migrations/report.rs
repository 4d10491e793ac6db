//! Status Reporter
//!
//! Classifies a finished run and renders the before/after comparison shown to
//! the operator.

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::fmt::Write;

use super::definitions::{Operation, Outcome, Transition, Version, VersionState, VersionStatus};
use super::resolver::TargetDescriptor;
use crate::error::RunnerError;

/// Step of a run during which the runner reported teardown noise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StatusBefore,
    Invocation,
    StatusAfter,
}

/// Non-fatal failure of the apply/rollback call itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationFailure {
    pub class: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl From<&RunnerError> for InvocationFailure {
    fn from(error: &RunnerError) -> Self {
        let class = match error {
            RunnerError::Statement { .. } => "statement",
            RunnerError::Deadline { .. } => "deadline",
            _ => "runner",
        };
        let message = match error {
            RunnerError::Statement { message, .. } | RunnerError::Deadline { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        };
        Self {
            class,
            message,
            hint: error.hint().map(str::to_string),
        }
    }
}

/// Everything known about one driver run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: Operation,
    pub file_name: String,
    pub version: Version,
    pub target: TargetDescriptor,
    pub before: VersionState,
    pub after: VersionState,
    pub before_listing: Vec<VersionStatus>,
    pub after_listing: Vec<VersionStatus>,
    /// Runner command issued, e.g. `up-to 20240101`
    pub runner_command: Option<String>,
    pub skip_reason: Option<String>,
    pub failure: Option<InvocationFailure>,
    pub suppressed: Vec<Phase>,
    pub transition: Transition,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn invoked(&self) -> bool {
        self.runner_command.is_some()
    }
}

/// Classify a run.
///
/// Skipped invocations are `NoOpSkipped` (a plain status query counts as
/// `Success`). An invocation fails when the runner reported a failure or the
/// version did not reach the state the operation targets. Teardown noise only
/// matters once everything else went as expected.
pub fn classify_outcome(
    operation: Operation,
    before: VersionState,
    after: VersionState,
    invoked: bool,
    invocation_failed: bool,
    noise_suppressed: bool,
) -> Outcome {
    let settled = || {
        if noise_suppressed {
            Outcome::SuppressedNoise
        } else {
            Outcome::Success
        }
    };

    let Some(expected) = operation.expected_state() else {
        return settled();
    };

    if !invoked {
        return Outcome::NoOpSkipped;
    }

    if invocation_failed || after != expected || after == before {
        return Outcome::OperationFailed;
    }

    settled()
}

/// Render the operator report
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", style(format!("pinmig {}", report.operation)).bold());
    let _ = writeln!(out, "  Migration : {} (version {})", report.file_name, report.version);
    let _ = writeln!(out, "  Target    : `{}`", report.target.target_path);
    let _ = writeln!(
        out,
        "  Database  : {} at {}",
        report.target.identity, report.target.connection
    );
    if let Some(source) = &report.target.endpoint_source {
        let _ = writeln!(out, "  Endpoint  : {}", source);
    }

    let _ = writeln!(out);
    render_listing(&mut out, "Status before", &report.before_listing);

    match (&report.runner_command, &report.skip_reason) {
        (Some(command), _) => {
            let _ = writeln!(out, "  Runner    : {}", command);
        }
        (None, Some(reason)) => {
            let _ = writeln!(out, "  Skipped   : {}", reason);
        }
        (None, None) => {}
    }

    if let Some(failure) = &report.failure {
        let _ = writeln!(
            out,
            "  {}   : {} ({})",
            style("Error").red().bold(),
            failure.message,
            failure.class
        );
        if let Some(hint) = &failure.hint {
            let _ = writeln!(out, "  Hint      : {}", hint);
        }
    }

    if report.invoked() {
        let _ = writeln!(out);
        render_listing(&mut out, "Status after", &report.after_listing);
    }

    for phase in &report.suppressed {
        let _ = writeln!(
            out,
            "  {}: connection close deadline during {:?} ignored, the command had completed",
            style("Suppressed").yellow(),
            phase
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Version {}: {} -> {}",
        report.version, report.before, report.after
    );
    let outcome = match report.outcome {
        Outcome::Success | Outcome::SuppressedNoise => style(report.outcome.to_string()).green(),
        Outcome::NoOpSkipped => style(report.outcome.to_string()).cyan(),
        Outcome::OperationFailed => style(report.outcome.to_string()).red(),
    };
    let _ = writeln!(out, "  Outcome: {}", outcome.bold());

    out
}

fn render_listing(out: &mut String, title: &str, listing: &[VersionStatus]) {
    let _ = writeln!(out, "  {}:", title);
    if listing.is_empty() {
        let _ = writeln!(out, "    (runner listed no migrations)");
        return;
    }
    for row in listing {
        let state = match row.state {
            VersionState::Applied => style(format!("{:<8}", row.state)).green(),
            VersionState::Pending => style(format!("{:<8}", row.state)).yellow(),
        };
        let applied_at = row.applied_at.as_deref().unwrap_or("");
        let _ = writeln!(out, "    {} {:<28} {}", state, applied_at, row.file_name);
    }
}
