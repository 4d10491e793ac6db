//! Error types for the targeted migration pipeline
//!
//! Parse-time errors carry the offending file path. Runner errors keep the
//! classification made at the runner boundary so the driver can decide what
//! is fatal without looking at message text.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use pinmig_core::{ConfigError, CoreError, ErrorPayload};

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error types for the parse → resolve → isolate → drive pipeline
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Malformed migration {}: {}", .path.display(), .reason)]
    MalformedMigration { path: PathBuf, reason: String },

    #[error("Ambiguous target in {}: found {}", .path.display(), .found.join(", "))]
    AmbiguousTarget { path: PathBuf, found: Vec<String> },

    #[error("No absolute `/...` target path in the Up section of {}", .path.display())]
    MissingTarget { path: PathBuf },

    #[error("Cannot resolve target `{}` of {}: {}", .target, .path.display(), .reason)]
    UnresolvableTarget {
        path: PathBuf,
        target: String,
        reason: String,
    },

    #[error("Failed to build isolated migration context for {}: {}", .path.display(), .source)]
    ContextBuildFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read migration {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Runner failed during {phase}: {source}")]
    Runner {
        phase: &'static str,
        #[source]
        source: RunnerError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl MigrateError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedMigration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unresolvable(
        path: impl Into<PathBuf>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvableTarget {
            path: path.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn runner(phase: &'static str, source: RunnerError) -> Self {
        Self::Runner { phase, source }
    }

    /// Stable code for machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedMigration { .. } => "MALFORMED_MIGRATION",
            Self::AmbiguousTarget { .. } => "AMBIGUOUS_TARGET",
            Self::MissingTarget { .. } => "MISSING_TARGET",
            Self::UnresolvableTarget { .. } => "UNRESOLVABLE_TARGET",
            Self::ContextBuildFailure { .. } => "CONTEXT_BUILD_FAILURE",
            Self::Io { .. } => "IO_ERROR",
            Self::Runner { .. } => "RUNNER_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Core(_) => "CORE_ERROR",
        }
    }

    /// Check if the error was raised while parsing the migration file
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedMigration { .. }
                | Self::AmbiguousTarget { .. }
                | Self::MissingTarget { .. }
                | Self::UnresolvableTarget { .. }
        )
    }
}

impl From<&MigrateError> for ErrorPayload {
    fn from(error: &MigrateError) -> Self {
        let payload = ErrorPayload::new(error.code(), error.to_string());
        match error {
            MigrateError::Runner { source, .. } => match source.hint() {
                Some(hint) => payload.with_hint(hint),
                None => payload,
            },
            MigrateError::Core(inner) => ErrorPayload::from(inner),
            e if e.is_parse_error() => {
                payload.with_hint("Fix the migration file; nothing was sent to the database.")
            }
            _ => payload,
        }
    }
}

/// Errors reported by a migration runner, already classified
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Credentials, permissions, availability, sessions: the call never did its job
    #[error("transport error: {message}")]
    Transport {
        message: String,
        hint: Option<String>,
    },

    /// A deadline expired while the operation itself was running
    #[error("deadline exceeded: {message}")]
    Deadline {
        message: String,
        hint: Option<String>,
    },

    /// A migration statement was rejected by the database
    #[error("migration statement failed: {message}")]
    Statement {
        message: String,
        hint: Option<String>,
    },

    #[error("migration runner `{binary}` is not available: {reason}")]
    NotInstalled { binary: String, reason: String },

    #[error("unexpected runner output: {message}")]
    Protocol { message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RunnerError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            hint: None,
        }
    }

    pub fn deadline(message: impl Into<String>) -> Self {
        Self::Deadline {
            message: message.into(),
            hint: None,
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            hint: None,
        }
    }

    /// Fatal errors abort the run. Non-fatal ones become an `OperationFailed`
    /// outcome with the observed post-state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Deadline { .. } | Self::Statement { .. })
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Transport { hint, .. }
            | Self::Deadline { hint, .. }
            | Self::Statement { hint, .. } => hint.as_deref(),
            Self::NotInstalled { .. } => {
                Some("install goose: go install github.com/pressly/goose/v3/cmd/goose@latest")
            }
            Self::Protocol { .. } | Self::Io(_) => None,
        }
    }
}
