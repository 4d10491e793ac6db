//! Migration Definitions - Core types shared by the pipeline stages
//!
//! A migration file is read once and never mutated; everything downstream
//! (resolution, isolation, driving, reporting) works from these values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Ordering key of a migration, taken from the file name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Rollback target: one below this version
    pub fn previous(self) -> Version {
        Version(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `<db_uid> (<db_name>)` folder a migration file was found under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFolder {
    pub uid: String,
    pub name: String,
}

/// A parsed migration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Where the file was read from
    pub source: PathBuf,
    /// File name, reused verbatim inside the isolated context
    pub file_name: String,
    pub version: Version,
    /// File stem after the version prefix, e.g. `migration`
    pub description: String,
    /// Absolute path of the single target table, without backticks
    pub target_path: String,
    /// Up statements, goose annotations stripped
    pub up_sql: String,
    /// Down statements, goose annotations stripped
    pub down_sql: String,
    pub database_folder: Option<DatabaseFolder>,
}

/// Per-version state as reported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Pending,
    Applied,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionState::Pending => write!(f, "Pending"),
            VersionState::Applied => write!(f, "Applied"),
        }
    }
}

/// One row of a runner status listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStatus {
    pub version: Version,
    pub file_name: String,
    pub state: VersionState,
    /// Runner-formatted apply time, when applied
    pub applied_at: Option<String>,
}

impl VersionStatus {
    pub fn pending(version: Version, file_name: impl Into<String>) -> Self {
        Self {
            version,
            file_name: file_name.into(),
            state: VersionState::Pending,
            applied_at: None,
        }
    }

    pub fn applied(version: Version, file_name: impl Into<String>, applied_at: impl Into<String>) -> Self {
        Self {
            version,
            file_name: file_name.into(),
            state: VersionState::Applied,
            applied_at: Some(applied_at.into()),
        }
    }
}

/// What the operator asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `up-to <version>`
    Apply,
    /// `down-to <version - 1>`
    Rollback,
    /// Query and report only
    Status,
}

impl Operation {
    /// State the version should be in once the operation succeeded
    pub fn expected_state(self) -> Option<VersionState> {
        match self {
            Operation::Apply => Some(VersionState::Applied),
            Operation::Rollback => Some(VersionState::Pending),
            Operation::Status => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Apply => write!(f, "apply"),
            Operation::Rollback => write!(f, "rollback"),
            Operation::Status => write!(f, "status"),
        }
    }
}

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoOpSkipped,
    OperationFailed,
    SuppressedNoise,
}

impl Outcome {
    /// Only a failed operation makes the process exit non-zero
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::OperationFailed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::NoOpSkipped => write!(f, "skipped"),
            Outcome::OperationFailed => write!(f, "operation failed"),
            Outcome::SuppressedNoise => write!(f, "success (teardown noise suppressed)"),
        }
    }
}

/// How the selected version moved during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Applied,
    RolledBack,
    /// The runner was invoked but the version stayed where it was
    Failed,
    Unchanged,
}

impl Transition {
    pub fn between(before: VersionState, after: VersionState, invoked: bool) -> Self {
        match (before, after) {
            (VersionState::Pending, VersionState::Applied) => Transition::Applied,
            (VersionState::Applied, VersionState::Pending) => Transition::RolledBack,
            _ if invoked => Transition::Failed,
            _ => Transition::Unchanged,
        }
    }
}
