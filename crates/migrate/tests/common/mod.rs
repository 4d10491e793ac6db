//! In-memory stand-in for goose + YDB.
//!
//! Behaves like a version-ordered runner over whatever directory it is given:
//! it reads the `.sql` files there, keeps per-database version state, and
//! emulates `ADD COLUMN` / `DROP COLUMN` so duplicate columns fail the way
//! YDB reports them. Like goose it refuses to apply a version older than the
//! current one unless missing migrations are allowed, and rolls back from the
//! current version, failing when that version's file is not in the directory.
//! Every call is recorded.

#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pinmig_migrate::migrations::extractor::{parse_version, split_sections};
use pinmig_migrate::runner::classify::to_runner_error;
use pinmig_migrate::{
    ConnectionDescriptor, MigrationRunner, RunnerError, RunnerOutput, RunnerResult, Teardown,
    Version, VersionStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub database_path: String,
    pub dir: PathBuf,
    pub files: Vec<String>,
    pub version: Option<Version>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Deadline,
}

#[derive(Debug, Default)]
struct Faults {
    apply: Option<Fault>,
    teardown_on: HashSet<&'static str>,
}

#[derive(Default)]
pub struct FakeCluster {
    /// database path -> version -> applied
    versions: Mutex<HashMap<String, BTreeMap<Version, bool>>>,
    /// absolute table path -> columns
    columns: Mutex<HashMap<String, HashSet<String>>>,
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Faults>,
    allow_missing: Mutex<bool>,
}

struct DirMigration {
    version: Version,
    file_name: String,
    up: String,
    down: String,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&self, table: &str, column: &str) {
        self.columns
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns
            .lock()
            .unwrap()
            .get(table)
            .map_or(false, |cols| cols.contains(column))
    }

    pub fn is_applied(&self, database_path: &str, version: i64) -> bool {
        self.versions
            .lock()
            .unwrap()
            .get(database_path)
            .and_then(|versions| versions.get(&Version::new(version)).copied())
            .unwrap_or(false)
    }

    /// Record a version as applied outside of any directory the runner sees
    pub fn mark_applied(&self, database_path: &str, version: i64) {
        self.set_applied(database_path, Version::new(version), true);
    }

    pub fn set_allow_missing(&self, allow_missing: bool) {
        *self.allow_missing.lock().unwrap() = allow_missing;
    }

    pub fn fail_apply_with(&self, fault: Fault) {
        self.faults.lock().unwrap().apply = Some(fault);
    }

    pub fn teardown_noise_on(&self, op: &'static str) {
        self.faults.lock().unwrap().teardown_on.insert(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    fn read_dir(&self, dir: &Path) -> Vec<DirMigration> {
        let mut migrations: Vec<DirMigration> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().map_or(false, |ext| ext == "sql"))
            .map(|path| {
                let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
                let (up, down) = split_sections(&fs::read_to_string(&path).unwrap());
                DirMigration {
                    version: parse_version(&file_name).unwrap(),
                    file_name,
                    up,
                    down,
                }
            })
            .collect();
        migrations.sort_by_key(|m| m.version);
        migrations
    }

    fn record(
        &self,
        op: &'static str,
        connection: &ConnectionDescriptor,
        dir: &Path,
        version: Option<Version>,
    ) -> Vec<DirMigration> {
        let migrations = self.read_dir(dir);
        self.calls.lock().unwrap().push(Call {
            op,
            database_path: connection.database_path.clone(),
            dir: dir.to_path_buf(),
            files: migrations.iter().map(|m| m.file_name.clone()).collect(),
            version,
        });
        migrations
    }

    fn teardown(&self, op: &'static str) -> Teardown {
        if self.faults.lock().unwrap().teardown_on.contains(op) {
            Teardown::DeadlineExceeded
        } else {
            Teardown::Clean
        }
    }

    fn applied(&self, database_path: &str, version: Version) -> bool {
        self.is_applied(database_path, version.get())
    }

    /// Highest applied version, what goose calls the current version
    fn current_version(&self, database_path: &str) -> Option<Version> {
        self.versions
            .lock()
            .unwrap()
            .get(database_path)
            .and_then(|versions| {
                versions
                    .iter()
                    .filter(|(_, applied)| **applied)
                    .map(|(version, _)| *version)
                    .max()
            })
    }

    fn set_applied(&self, database_path: &str, version: Version, applied: bool) {
        self.versions
            .lock()
            .unwrap()
            .entry(database_path.to_string())
            .or_default()
            .insert(version, applied);
    }

    fn execute(&self, sql: &str) -> Result<(), RunnerError> {
        let add = Regex::new(r"ALTER TABLE `([^`]+)` ADD COLUMN (\w+)").unwrap();
        let drop = Regex::new(r"ALTER TABLE `([^`]+)` DROP COLUMN (\w+)").unwrap();

        for line in sql.lines() {
            if let Some(caps) = add.captures(line) {
                if self.has_column(&caps[1], &caps[2]) {
                    return Err(RunnerError::Statement {
                        message: format!("Column: \"{}\" already exists", &caps[2]),
                        hint: None,
                    });
                }
                self.add_column(&caps[1], &caps[2]);
            } else if let Some(caps) = drop.captures(line) {
                let removed = self
                    .columns
                    .lock()
                    .unwrap()
                    .get_mut(&caps[1])
                    .map_or(false, |cols| cols.remove(&caps[2]));
                if !removed {
                    return Err(RunnerError::statement(format!(
                        "Column: \"{}\" not found (NOT_FOUND)",
                        &caps[2]
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationRunner for FakeCluster {
    async fn status(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
    ) -> RunnerResult<Vec<VersionStatus>> {
        let migrations = self.record("status", connection, migrations_dir, None);
        let listing = migrations
            .into_iter()
            .map(|m| {
                if self.applied(&connection.database_path, m.version) {
                    VersionStatus::applied(m.version, m.file_name, "Mon Jan  1 00:00:00 2024")
                } else {
                    VersionStatus::pending(m.version, m.file_name)
                }
            })
            .collect();
        Ok(RunnerOutput::with_teardown(listing, self.teardown("status")))
    }

    async fn apply(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        up_to: Version,
    ) -> RunnerResult<()> {
        let migrations = self.record("apply", connection, migrations_dir, Some(up_to));

        match self.faults.lock().unwrap().apply {
            Some(Fault::Transport) => {
                return Err(RunnerError::transport("rpc error: code = Unavailable"))
            }
            Some(Fault::Deadline) => {
                return Err(RunnerError::deadline("context deadline exceeded"))
            }
            None => {}
        }

        let database_path = &connection.database_path;
        let pending: Vec<&DirMigration> = migrations
            .iter()
            .filter(|m| m.version <= up_to && !self.applied(database_path, m.version))
            .collect();

        if let Some(current) = self.current_version(database_path) {
            let missing: Vec<&&DirMigration> =
                pending.iter().filter(|m| m.version < current).collect();
            if !missing.is_empty() && !*self.allow_missing.lock().unwrap() {
                let mut text = format!(
                    "goose run: error: found {} missing migrations before current version {}:",
                    missing.len(),
                    current
                );
                for m in missing {
                    text.push_str(&format!("\n\tversion {}: {}", m.version, m.file_name));
                }
                return Err(to_runner_error(&text));
            }
        }

        for m in pending {
            self.execute(&m.up)?;
            self.set_applied(database_path, m.version, true);
        }
        Ok(RunnerOutput::with_teardown((), self.teardown("apply")))
    }

    async fn rollback(
        &self,
        connection: &ConnectionDescriptor,
        migrations_dir: &Path,
        down_to: Version,
    ) -> RunnerResult<()> {
        let migrations = self.record("rollback", connection, migrations_dir, Some(down_to));

        let database_path = &connection.database_path;
        while let Some(current) = self
            .current_version(database_path)
            .filter(|version| *version > down_to)
        {
            let Some(m) = migrations.iter().find(|m| m.version == current) else {
                return Err(to_runner_error(&format!("goose run: no migration {}", current)));
            };
            self.execute(&m.down)?;
            self.set_applied(database_path, current, false);
        }
        Ok(RunnerOutput::with_teardown((), self.teardown("rollback")))
    }
}

/// Write `<root>/ydb_dbs/<db_folder>/<table>/<file_name>` adding `column` to `target`
pub fn write_migration(
    root: &Path,
    db_folder: &str,
    table: &str,
    file_name: &str,
    target: &str,
    column: &str,
) -> PathBuf {
    let dir = root.join("ydb_dbs").join(db_folder).join(table);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file_name);
    fs::write(
        &path,
        format!(
            "-- generated\n--  - {target}\n\n\
             -- +goose Up\n-- +goose StatementBegin\n\
             ALTER TABLE `{target}` ADD COLUMN {column} Utf8;\n\
             -- +goose StatementEnd\n\n\
             -- +goose Down\n-- +goose StatementBegin\n\
             ALTER TABLE `{target}` DROP COLUMN {column};\n\
             -- +goose StatementEnd\n"
        ),
    )
    .unwrap();
    path
}
