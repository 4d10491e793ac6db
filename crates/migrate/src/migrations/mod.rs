//! Targeted migration pipeline
//!
//! File → extractor → resolver → isolated context → driver → report.

pub mod context;
pub mod definitions;
pub mod driver;
pub mod extractor;
pub mod report;
pub mod resolver;

use std::path::Path;

use crate::error::MigrateResult;

pub use context::IsolatedContext;
pub use definitions::*;
pub use driver::{DriverState, RunnerDriver};
pub use extractor::{extract, load_migration, parse_version};
pub use report::{classify_outcome, render, InvocationFailure, Phase, RunReport};
pub use resolver::{ConnectionDescriptor, DatabaseIdentity, TargetDescriptor, TargetResolver};

/// Parse a migration file and resolve its target
pub fn prepare(path: &Path, resolver: &TargetResolver) -> MigrateResult<(MigrationFile, TargetDescriptor)> {
    let migration = load_migration(path)?;
    let target = resolver.resolve(&migration)?;
    tracing::info!(
        file = %migration.file_name,
        version = %migration.version,
        target = %migration.target_path,
        database = %target.connection.database_path,
        "Prepared migration"
    );
    Ok((migration, target))
}
