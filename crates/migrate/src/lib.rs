//! # pinmig-migrate
//!
//! Applies or rolls back a single goose migration against the one YDB
//! database its SQL targets. Migration folders hold files for many tables of
//! a database; the runner only ever sees a private copy of the selected file,
//! so no other pending migration can be picked up.

pub mod error;
pub mod migrations;
pub mod runner;

pub use error::{MigrateError, MigrateResult, RunnerError};
pub use migrations::{
    prepare, ConnectionDescriptor, MigrationFile, Operation, Outcome, RunReport, RunnerDriver,
    TargetDescriptor, TargetResolver, Version, VersionState, VersionStatus,
};
pub use runner::{GooseRunner, MigrationRunner, RunnerOutput, RunnerResult, Teardown};
