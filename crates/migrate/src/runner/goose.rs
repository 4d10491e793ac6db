//! goose-backed runner
//!
//! Runs `goose -dir <dir> ydb <dsn> <command>` as a subprocess. The closing
//! deadline goose's YDB driver reports after a finished command is recognized
//! here and reported as [`Teardown::DeadlineExceeded`]; everything else that
//! makes goose fail goes through [`classify`](super::classify).

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::Path;
use tokio::process::Command;

use pinmig_core::{ConfigError, PinmigConfig};

use super::classify::{is_known_error, to_runner_error};
use super::{MigrationRunner, RunnerOutput, RunnerResult, Teardown};
use crate::error::RunnerError;
use crate::migrations::definitions::{Version, VersionStatus};
use crate::migrations::extractor::parse_version;
use crate::migrations::resolver::ConnectionDescriptor;

static CLOSE_DEADLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)failed to close DB.*DeadlineExceeded").expect("valid regex"));

static ERROR_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\berror\b|\bfailed\b|\bpanic\b").expect("valid regex"));

/// Lines goose prints once a command has done its work
static COMPLETION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)successfully migrated|no migrations to run|^(?:\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\s+)?\s*OK\s+\S+\.sql|Applied At\s+Migration",
    )
    .expect("valid regex")
});

static SECRET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(token=)[^&'"\s]+"#).expect("valid regex"));

static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}\s+)?\s*(?P<state>\S.*?)\s+--\s+(?P<file>\S+\.sql)\s*$",
    )
    .expect("valid regex")
});

/// Query parameters goose's YDB driver needs for DDL in scripting mode
const DSN_PARAMS: &str = "go_query_mode=scripting&go_fake_tx=scripting&go_query_bind=declare,numeric";

/// Captured subprocess result
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// [`MigrationRunner`] backed by the goose CLI
#[derive(Debug, Clone)]
pub struct GooseRunner {
    binary: String,
    token: String,
    allow_missing: bool,
    mask_secrets: bool,
}

impl GooseRunner {
    pub fn new(binary: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            token: token.into(),
            allow_missing: false,
            mask_secrets: true,
        }
    }

    /// Build from tool configuration; resolves the access token
    pub fn from_config(config: &PinmigConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(&config.goose_bin, config.access_token()?)
            .allow_missing(config.allow_missing)
            .mask_secrets(config.mask_secrets))
    }

    pub fn allow_missing(mut self, allow_missing: bool) -> Self {
        self.allow_missing = allow_missing;
        self
    }

    pub fn mask_secrets(mut self, mask_secrets: bool) -> Self {
        self.mask_secrets = mask_secrets;
        self
    }

    /// Full DSN including credentials
    pub fn dsn(&self, connection: &ConnectionDescriptor) -> String {
        format!("{}?{}&token={}", connection.url(), DSN_PARAMS, self.token)
    }

    fn args(&self, connection: &ConnectionDescriptor, dir: &Path, command: &[String]) -> Vec<String> {
        let mut args = vec!["-dir".to_string(), dir.display().to_string()];
        if self.allow_missing {
            args.push("-allow-missing".to_string());
        }
        args.push("ydb".to_string());
        args.push(self.dsn(connection));
        args.extend(command.iter().cloned());
        args
    }

    /// Check that the goose binary can be started; returns its version line
    pub async fn ensure_available(&self) -> Result<String, RunnerError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            return Err(RunnerError::NotInstalled {
                binary: self.binary.clone(),
                reason: format!("`{} --version` exited with {}", self.binary, output.status),
            });
        }
        tracing::debug!(version = %text, "goose is available");
        Ok(text)
    }

    fn spawn_error(&self, error: io::Error) -> RunnerError {
        if error.kind() == io::ErrorKind::NotFound {
            RunnerError::NotInstalled {
                binary: self.binary.clone(),
                reason: "not found in PATH".to_string(),
            }
        } else {
            RunnerError::Io(error)
        }
    }

    async fn run(
        &self,
        connection: &ConnectionDescriptor,
        dir: &Path,
        command: &[String],
    ) -> Result<ProcessOutput, RunnerError> {
        let args = self.args(connection, dir, command);

        let printable = format!("{} {}", self.binary, args.join(" "));
        let printable = if self.mask_secrets {
            mask_secrets(&printable)
        } else {
            printable
        };
        tracing::info!(command = %printable, "Running goose");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let output = ProcessOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.stdout.trim().is_empty() {
            tracing::debug!(stdout = %output.stdout.trim_end(), "goose stdout");
        }
        if !output.stderr.trim().is_empty() {
            tracing::debug!(stderr = %output.stderr.trim_end(), "goose stderr");
        }

        Ok(output)
    }
}

#[async_trait]
impl MigrationRunner for GooseRunner {
    async fn status(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
    ) -> RunnerResult<Vec<VersionStatus>> {
        let output = self
            .run(connection, migrations_dir, &["status".to_string()])
            .await?;
        let text = interpret(&output)?;
        let listing = parse_status(&text.value)?;
        Ok(RunnerOutput::with_teardown(listing, text.teardown))
    }

    async fn apply(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        up_to: Version,
    ) -> RunnerResult<()> {
        let command = ["up-to".to_string(), up_to.to_string()];
        let output = self.run(connection, migrations_dir, &command).await?;
        Ok(interpret(&output)?.map(|_| ()))
    }

    async fn rollback(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        down_to: Version,
    ) -> RunnerResult<()> {
        let command = ["down-to".to_string(), down_to.to_string()];
        let output = self.run(connection, migrations_dir, &command).await?;
        Ok(interpret(&output)?.map(|_| ()))
    }
}

/// Replace credentials in a command line or DSN
pub fn mask_secrets(text: &str) -> String {
    SECRET.replace_all(text, "${1}***").into_owned()
}

/// Remove close-deadline lines, reporting whether any were present
fn strip_teardown_noise(text: &str) -> (String, Teardown) {
    let mut teardown = Teardown::Clean;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            if CLOSE_DEADLINE.is_match(line) {
                teardown = Teardown::DeadlineExceeded;
                false
            } else {
                true
            }
        })
        .collect();
    (kept.join("\n"), teardown)
}

/// Turn a finished goose process into a runner result.
///
/// A non-zero exit counts as success with `Teardown::DeadlineExceeded` only
/// when the close deadline is the sole complaint: goose must have reported
/// the command as done, and nothing left in the output may look like an
/// error. A close deadline line never hides another error reported by the
/// same process.
pub fn interpret(output: &ProcessOutput) -> RunnerResult<String> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    let (remaining, teardown) = strip_teardown_noise(&combined);

    if output.success {
        return Ok(RunnerOutput::with_teardown(remaining, teardown));
    }

    if teardown == Teardown::DeadlineExceeded && only_teardown_failed(&remaining) {
        return Ok(RunnerOutput::with_teardown(remaining, teardown));
    }

    Err(to_runner_error(&remaining))
}

fn only_teardown_failed(remaining: &str) -> bool {
    let completed = COMPLETION_MARKER.is_match(remaining)
        || remaining.lines().any(|line| STATUS_LINE.is_match(line));
    completed && !ERROR_MARKER.is_match(remaining) && !is_known_error(remaining)
}

/// Parse `goose status` output into version rows
pub fn parse_status(text: &str) -> Result<Vec<VersionStatus>, RunnerError> {
    let mut rows = Vec::new();

    for line in text.lines() {
        let Some(caps) = STATUS_LINE.captures(line) else {
            continue;
        };

        let file_name = caps["file"].to_string();
        let version = parse_version(&file_name).map_err(|reason| RunnerError::Protocol {
            message: format!("status row `{}`: {}", line.trim(), reason),
        })?;

        let state = caps["state"].trim();
        if state.eq_ignore_ascii_case("pending") {
            rows.push(VersionStatus::pending(version, file_name));
        } else {
            rows.push(VersionStatus::applied(version, file_name, state));
        }
    }

    rows.sort_by_key(|row| row.version);
    Ok(rows)
}
