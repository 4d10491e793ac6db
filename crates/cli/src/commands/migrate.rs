use std::path::Path;

use pinmig_core::PinmigConfig;
use pinmig_migrate::migrations::render;
use pinmig_migrate::{
    prepare, GooseRunner, MigrateError, Operation, Outcome, RunnerDriver, TargetResolver,
};

use super::emit;

/// Run one operation for one migration file through goose
pub async fn run(
    operation: Operation,
    file: &Path,
    config: &PinmigConfig,
    resolver: &TargetResolver,
    json: bool,
) -> Result<Outcome, MigrateError> {
    let (migration, target) = prepare(file, resolver)?;

    let runner = GooseRunner::from_config(config)?;
    let goose_version = runner
        .ensure_available()
        .await
        .map_err(|e| MigrateError::runner("preflight", e))?;
    tracing::debug!(goose = %goose_version, "Runner ready");

    let driver = RunnerDriver::new(runner);
    let report = driver.run(operation, &migration, &target).await?;

    emit(&report, || render(&report), json)?;
    Ok(report.outcome)
}
