//! Runner Driver
//!
//! Drives one migration through the runner against its isolated context:
//!
//! ```text
//! Idle -> StatusQueried(before) -> Invoking -> StatusQueried(after) -> Done
//!                               \-> Done (skipped)   Invoking -> Failed
//! ```
//!
//! Callers must serialize runs per database; nothing here locks a target.

use chrono::Utc;
use std::path::PathBuf;

use super::context::IsolatedContext;
use super::definitions::{MigrationFile, Operation, Transition, Version, VersionState, VersionStatus};
use super::report::{classify_outcome, InvocationFailure, Phase, RunReport};
use super::resolver::TargetDescriptor;
use crate::error::{MigrateError, MigrateResult};
use crate::runner::{MigrationRunner, Teardown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    StatusQueried(Phase),
    Invoking,
    Done,
    Failed,
}

/// What the driver decided to do after the first status query
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Skip(Option<String>),
    Apply(Version),
    Rollback(Version),
}

impl Plan {
    fn decide(operation: Operation, version: Version, before: VersionState) -> Self {
        match (operation, before) {
            (Operation::Status, _) => Plan::Skip(None),
            (Operation::Apply, VersionState::Applied) => {
                Plan::Skip(Some(format!("version {} is already applied", version)))
            }
            (Operation::Apply, VersionState::Pending) => Plan::Apply(version),
            // Rollback always targets exactly one version below the migration.
            (Operation::Rollback, VersionState::Applied) => Plan::Rollback(version.previous()),
            (Operation::Rollback, VersionState::Pending) => Plan::Skip(Some(format!(
                "version {} is not applied, nothing to roll back",
                version
            ))),
        }
    }
}

/// Per-run bookkeeping: state machine position and suppressed noise
struct RunTracker {
    version: Version,
    state: DriverState,
    suppressed: Vec<Phase>,
}

impl RunTracker {
    fn new(version: Version) -> Self {
        Self {
            version,
            state: DriverState::Idle,
            suppressed: Vec::new(),
        }
    }

    fn advance(&mut self, next: DriverState) {
        tracing::debug!(version = %self.version, from = ?self.state, to = ?next, "Driver state change");
        self.state = next;
    }

    fn note_teardown(&mut self, phase: Phase, teardown: Teardown) {
        if teardown == Teardown::DeadlineExceeded {
            tracing::warn!(
                version = %self.version,
                phase = ?phase,
                suppressed = true,
                "Connection close hit a deadline after the command completed, ignoring"
            );
            self.suppressed.push(phase);
        }
    }
}

/// Applies or rolls back exactly one migration through a [`MigrationRunner`]
pub struct RunnerDriver<R> {
    runner: R,
    context_parent: Option<PathBuf>,
}

impl<R: MigrationRunner> RunnerDriver<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            context_parent: None,
        }
    }

    /// Create isolated contexts under `parent` instead of the system temp dir
    pub fn with_context_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.context_parent = Some(parent.into());
        self
    }

    /// Run `operation` for `migration` against `target`.
    ///
    /// The isolated context lives exactly as long as this call.
    pub async fn run(
        &self,
        operation: Operation,
        migration: &MigrationFile,
        target: &TargetDescriptor,
    ) -> MigrateResult<RunReport> {
        let context = match &self.context_parent {
            Some(parent) => IsolatedContext::build_in(parent, migration, target)?,
            None => IsolatedContext::build(migration, target)?,
        };

        let result = self.drive(&context, operation, migration, target).await;

        if let Err(e) = context.close() {
            tracing::warn!(error = %e, "Failed to remove isolated migration context");
        }

        result
    }

    async fn drive(
        &self,
        context: &IsolatedContext,
        operation: Operation,
        migration: &MigrationFile,
        target: &TargetDescriptor,
    ) -> MigrateResult<RunReport> {
        let version = context.version();
        let mut run = RunTracker::new(version);

        let before_listing = self
            .query_status(context, Phase::StatusBefore, &mut run)
            .await?;
        let before = state_of(&before_listing, version);
        tracing::info!(version = %version, state = %before, "Status before {}", operation);

        let plan = Plan::decide(operation, version, before);

        let (runner_command, skip_reason, result) = match plan {
            Plan::Skip(reason) => {
                if let Some(reason) = &reason {
                    tracing::info!(version = %version, "{}", reason);
                }
                (None, reason, None)
            }
            Plan::Apply(up_to) => {
                run.advance(DriverState::Invoking);
                let result = self
                    .runner
                    .apply(context.connection(), context.dir(), up_to)
                    .await;
                (Some(format!("up-to {}", up_to)), None, Some(("apply", result)))
            }
            Plan::Rollback(down_to) => {
                run.advance(DriverState::Invoking);
                let result = self
                    .runner
                    .rollback(context.connection(), context.dir(), down_to)
                    .await;
                (Some(format!("down-to {}", down_to)), None, Some(("rollback", result)))
            }
        };

        let mut failure = None;
        if let Some((phase, result)) = result {
            match result {
                Ok(output) => run.note_teardown(Phase::Invocation, output.teardown),
                Err(e) if e.is_fatal() => {
                    run.advance(DriverState::Failed);
                    tracing::error!(version = %version, error = %e, "Runner failed during {}", phase);
                    return Err(MigrateError::runner(phase, e));
                }
                Err(e) => {
                    tracing::warn!(version = %version, error = %e, "Migration {} did not complete", phase);
                    failure = Some(InvocationFailure::from(&e));
                }
            }
        }

        let invoked = runner_command.is_some();
        let after_listing = if invoked {
            self.query_status(context, Phase::StatusAfter, &mut run)
                .await?
        } else {
            before_listing.clone()
        };
        let after = state_of(&after_listing, version);

        let outcome = classify_outcome(
            operation,
            before,
            after,
            invoked,
            failure.is_some(),
            !run.suppressed.is_empty(),
        );
        run.advance(DriverState::Done);
        tracing::info!(version = %version, before = %before, after = %after, outcome = %outcome, "Run finished");

        Ok(RunReport {
            operation,
            file_name: migration.file_name.clone(),
            version,
            target: target.clone(),
            before,
            after,
            before_listing,
            after_listing,
            runner_command,
            skip_reason,
            failure,
            suppressed: run.suppressed,
            transition: Transition::between(before, after, invoked),
            outcome,
            finished_at: Utc::now(),
        })
    }

    async fn query_status(
        &self,
        context: &IsolatedContext,
        phase: Phase,
        run: &mut RunTracker,
    ) -> MigrateResult<Vec<VersionStatus>> {
        let phase_name = match phase {
            Phase::StatusBefore => "status before",
            _ => "status after",
        };

        match self.runner.status(context.connection(), context.dir()).await {
            Ok(output) => {
                run.note_teardown(phase, output.teardown);
                run.advance(DriverState::StatusQueried(phase));
                Ok(output.value)
            }
            Err(e) => {
                run.advance(DriverState::Failed);
                Err(MigrateError::runner(phase_name, e))
            }
        }
    }
}

/// State of `version` in a listing; unlisted counts as pending
fn state_of(listing: &[VersionStatus], version: Version) -> VersionState {
    match listing.iter().find(|row| row.version == version) {
        Some(row) => row.state,
        None => {
            tracing::warn!(version = %version, "Runner did not list the migration, treating it as pending");
            VersionState::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rollback_targets_previous_version() {
        let v = Version::new(20240101);
        assert_eq!(
            Plan::decide(Operation::Rollback, v, VersionState::Applied),
            Plan::Rollback(Version::new(20240100))
        );
    }

    #[test]
    fn test_plan_skips() {
        let v = Version::new(5);
        assert!(matches!(
            Plan::decide(Operation::Rollback, v, VersionState::Pending),
            Plan::Skip(Some(reason)) if reason.contains("nothing to roll back")
        ));
        assert!(matches!(
            Plan::decide(Operation::Apply, v, VersionState::Applied),
            Plan::Skip(Some(reason)) if reason.contains("already applied")
        ));
        assert_eq!(Plan::decide(Operation::Status, v, VersionState::Applied), Plan::Skip(None));
        assert_eq!(Plan::decide(Operation::Apply, v, VersionState::Pending), Plan::Apply(v));
    }

    #[test]
    fn test_unlisted_version_is_pending() {
        let listing = vec![VersionStatus::applied(Version::new(1), "1_a.sql", "today")];
        assert_eq!(state_of(&listing, Version::new(1)), VersionState::Applied);
        assert_eq!(state_of(&listing, Version::new(2)), VersionState::Pending);
    }
}
