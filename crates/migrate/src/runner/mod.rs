//! External migration runner contract
//!
//! The runner is a black box that applies, rolls back and lists versions of
//! the migrations found in one directory against one database. Implementations
//! classify their own failures (see [`RunnerError`]) and tag benign teardown
//! conditions explicitly through [`Teardown`], so callers never inspect
//! message text.

pub mod classify;
pub mod goose;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::RunnerError;
use crate::migrations::definitions::{Version, VersionStatus};
use crate::migrations::resolver::ConnectionDescriptor;

pub use goose::GooseRunner;

/// How the database session ended after the operation itself completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Teardown {
    Clean,
    /// Closing the connection hit a deadline; the operation result stands
    DeadlineExceeded,
}

/// Successful runner result plus the teardown tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOutput<T> {
    pub value: T,
    pub teardown: Teardown,
}

impl<T> RunnerOutput<T> {
    pub fn with_teardown(value: T, teardown: Teardown) -> Self {
        Self { value, teardown }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunnerOutput<U> {
        RunnerOutput {
            value: f(self.value),
            teardown: self.teardown,
        }
    }
}

pub type RunnerResult<T> = Result<RunnerOutput<T>, RunnerError>;

/// Version-ordered migration runner over a directory of migrations
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Every migration of `migrations_dir` with its state, ordered by version
    async fn status(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
    ) -> RunnerResult<Vec<VersionStatus>>;

    /// Apply pending migrations up to and including `up_to`
    async fn apply(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        up_to: Version,
    ) -> RunnerResult<()>;

    /// Roll back applied migrations newer than `down_to`
    async fn rollback(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        down_to: Version,
    ) -> RunnerResult<()>;
}

#[async_trait]
impl<T: MigrationRunner + ?Sized> MigrationRunner for Arc<T> {
    async fn status(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
    ) -> RunnerResult<Vec<VersionStatus>> {
        (**self).status(connection, migrations_dir).await
    }

    async fn apply(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        up_to: Version,
    ) -> RunnerResult<()> {
        (**self).apply(connection, migrations_dir, up_to).await
    }

    async fn rollback(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        down_to: Version,
    ) -> RunnerResult<()> {
        (**self).rollback(connection, migrations_dir, down_to).await
    }
}
