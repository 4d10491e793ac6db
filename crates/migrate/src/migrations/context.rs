//! Isolated Migration Context
//!
//! goose walks every `.sql` file of the directory it is pointed at. Migration
//! files for many tables share one folder per database, so the runner is
//! handed a private temporary directory holding only the selected migration,
//! under its original file name so the runner derives the same version.
//!
//! The directory is owned by the context and removed when the context is
//! closed or dropped, whichever comes first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::definitions::{MigrationFile, Version};
use super::resolver::{ConnectionDescriptor, TargetDescriptor};
use crate::error::{MigrateError, MigrateResult};

/// Single-migration, single-target working set
#[derive(Debug)]
pub struct IsolatedContext {
    dir: TempDir,
    file_path: PathBuf,
    version: Version,
    connection: ConnectionDescriptor,
}

impl IsolatedContext {
    /// Materialize the context in the system temp directory
    pub fn build(migration: &MigrationFile, target: &TargetDescriptor) -> MigrateResult<Self> {
        Self::build_in(&std::env::temp_dir(), migration, target)
    }

    /// Materialize the context under `parent`
    pub fn build_in(
        parent: &Path,
        migration: &MigrationFile,
        target: &TargetDescriptor,
    ) -> MigrateResult<Self> {
        let failure = |source: io::Error| MigrateError::ContextBuildFailure {
            path: migration.source.clone(),
            source,
        };

        let dir = tempfile::Builder::new()
            .prefix(&format!("pinmig_{}_", migration.version))
            .tempdir_in(parent)
            .map_err(failure)?;

        let file_path = dir.path().join(&migration.file_name);
        fs::write(&file_path, render_isolated_migration(migration)).map_err(failure)?;

        tracing::debug!(
            dir = %dir.path().display(),
            version = %migration.version,
            database = %target.connection.database_path,
            "Built isolated migration context"
        );

        Ok(Self {
            dir,
            file_path,
            version: migration.version,
            connection: target.connection.clone(),
        })
    }

    /// Directory to hand to the runner
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.connection
    }

    /// Remove the working set now, reporting removal errors
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(dir = %path.display(), "Removed isolated migration context");
        Ok(())
    }
}

/// Rebuild the migration body with one statement block per section
pub fn render_isolated_migration(migration: &MigrationFile) -> String {
    let mut parts = vec!["-- +goose Up", "-- +goose StatementBegin"];
    if !migration.up_sql.is_empty() {
        parts.push(&migration.up_sql);
    }
    parts.extend(["-- +goose StatementEnd", "", "-- +goose Down", "-- +goose StatementBegin"]);
    if !migration.down_sql.is_empty() {
        parts.push(&migration.down_sql);
    }
    parts.extend(["-- +goose StatementEnd", ""]);
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::extractor::extract;
    use crate::migrations::resolver::TargetResolver;

    const SQL: &str = "\
-- +goose Up
-- +goose StatementBegin
ALTER TABLE `/local/db1/orders` ADD COLUMN k Utf8;
-- +goose StatementEnd
-- +goose Down
-- +goose StatementBegin
ALTER TABLE `/local/db1/orders` DROP COLUMN k;
-- +goose StatementEnd
";

    fn fixture() -> (MigrationFile, TargetDescriptor) {
        let migration = extract(Path::new("/m/20240101_migration.sql"), SQL).unwrap();
        let target = TargetResolver::new("grpc://localhost:2136")
            .resolve(&migration)
            .unwrap();
        (migration, target)
    }

    #[test]
    fn test_context_holds_exactly_one_file_named_like_the_source() {
        let parent = tempfile::tempdir().unwrap();
        let (migration, target) = fixture();
        let ctx = IsolatedContext::build_in(parent.path(), &migration, &target).unwrap();

        let names: Vec<String> = fs::read_dir(ctx.dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["20240101_migration.sql".to_string()]);
        assert_eq!(ctx.version(), Version::new(20240101));
        assert_eq!(ctx.connection().database_path, "/local/db1");

        let body = fs::read_to_string(ctx.file_path()).unwrap();
        let reparsed = extract(ctx.file_path(), &body).unwrap();
        assert_eq!(reparsed.target_path, migration.target_path);
        assert_eq!(reparsed.up_sql, migration.up_sql);
        assert_eq!(reparsed.down_sql, migration.down_sql);
    }

    #[test]
    fn test_close_removes_directory() {
        let parent = tempfile::tempdir().unwrap();
        let (migration, target) = fixture();
        let ctx = IsolatedContext::build_in(parent.path(), &migration, &target).unwrap();
        let dir = ctx.dir().to_path_buf();
        assert!(dir.exists());
        ctx.close().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let parent = tempfile::tempdir().unwrap();
        let (migration, target) = fixture();
        let dir = {
            let ctx = IsolatedContext::build_in(parent.path(), &migration, &target).unwrap();
            ctx.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn test_unwritable_parent_is_build_failure() {
        let (migration, target) = fixture();
        let err = IsolatedContext::build_in(Path::new("/nonexistent/pinmig"), &migration, &target)
            .unwrap_err();
        assert!(matches!(err, MigrateError::ContextBuildFailure { .. }));
    }

    #[test]
    fn test_render_keeps_empty_down_block() {
        let (mut migration, _) = fixture();
        migration.down_sql.clear();
        let body = render_isolated_migration(&migration);
        assert!(body.ends_with("-- +goose Down\n-- +goose StatementBegin\n-- +goose StatementEnd\n"));
    }
}
