use console::style;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

use pinmig_migrate::migrations::context::render_isolated_migration;
use pinmig_migrate::{prepare, MigrateError, MigrationFile, Outcome, TargetDescriptor, TargetResolver};

use super::emit;

/// What a run of this file would do, minus the database
#[derive(Debug, Serialize)]
struct Inspection<'a> {
    migration: &'a MigrationFile,
    target: &'a TargetDescriptor,
    rollback_to: i64,
    isolated_file: String,
}

/// Parse and resolve a migration without contacting the runner
pub fn run(file: &Path, resolver: &TargetResolver, json: bool) -> Result<Outcome, MigrateError> {
    let (migration, target) = prepare(file, resolver)?;

    let inspection = Inspection {
        migration: &migration,
        target: &target,
        rollback_to: migration.version.previous().get(),
        isolated_file: render_isolated_migration(&migration),
    };

    emit(&inspection, || render(&inspection), json)?;
    Ok(Outcome::Success)
}

fn render(inspection: &Inspection<'_>) -> String {
    let migration = inspection.migration;
    let target = inspection.target;
    let mut out = String::new();

    let _ = writeln!(out, "{}", style(&migration.file_name).bold());
    let _ = writeln!(out, "  Version     : {}", migration.version);
    let _ = writeln!(out, "  Description : {}", migration.description);
    let _ = writeln!(out, "  Target      : `{}`", migration.target_path);
    let _ = writeln!(out, "  Table       : {}", target.table_path);
    let _ = writeln!(out, "  Database    : {}", target.identity);
    let _ = writeln!(out, "  Connection  : {}", target.connection);
    if let Some(source) = &target.endpoint_source {
        let _ = writeln!(out, "  Endpoint    : {}", source);
    }
    let _ = writeln!(out, "  Rollback to : {}", inspection.rollback_to);
    if migration.down_sql.is_empty() {
        let _ = writeln!(out, "  {}", style("Down section is empty, rollback will only reset the version").yellow());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  Isolated file:");
    for line in inspection.isolated_file.lines() {
        let _ = writeln!(out, "    {}", line);
    }
    out
}
