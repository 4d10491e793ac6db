//! Path & Version Extractor
//!
//! Pure parsing of a migration file's identity: the version from the file
//! name, the Up/Down bodies from goose annotations, and the single absolute
//! target path referenced by those bodies.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use super::definitions::{DatabaseFolder, MigrationFile, Version};
use crate::error::{MigrateError, MigrateResult};

static GOOSE_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*--\s*\+goose\s+(\w+)").expect("valid regex"));

static ABSOLUTE_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`(/[^`]+)`").expect("valid regex"));

static DATABASE_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<uid>[^\s()]+) \((?P<name>.+)\)$").expect("valid regex"));

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Up,
    Down,
}

/// Read and parse a migration file from disk
pub fn load_migration(path: &Path) -> MigrateResult<MigrationFile> {
    let content = fs::read_to_string(path).map_err(|source| MigrateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract(path, &content)
}

/// Parse a migration from its path and raw content
pub fn extract(path: &Path, content: &str) -> MigrateResult<MigrationFile> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| MigrateError::malformed(path, "file name is not valid UTF-8"))?;

    if !file_name.to_lowercase().ends_with(".sql") {
        return Err(MigrateError::malformed(path, "migration files must end in .sql"));
    }

    let (version, description) =
        parse_file_name(file_name).map_err(|reason| MigrateError::malformed(path, reason))?;

    let (up_sql, down_sql) = split_sections(content);
    let target_path = extract_target(path, &up_sql, &down_sql)?;

    if down_sql.trim().is_empty() {
        tracing::warn!(file = %path.display(), "Migration has an empty Down section, rollback will only unmark the version");
    }

    Ok(MigrationFile {
        source: path.to_path_buf(),
        file_name: file_name.to_string(),
        version,
        description,
        target_path,
        up_sql,
        down_sql,
        database_folder: find_database_folder(path),
    })
}

/// Version from the leading numeric token of a file name.
///
/// `20240101_migration.sql` → 20240101. The token ends at the first `_` or
/// `.`, must be all ASCII digits and positive.
pub fn parse_version(file_name: &str) -> Result<Version, String> {
    parse_file_name(file_name).map(|(version, _)| version)
}

fn parse_file_name(file_name: &str) -> Result<(Version, String), String> {
    let stem = match file_name.rfind('.') {
        Some(dot) => &file_name[..dot],
        None => file_name,
    };

    let (token, description) = match stem.find('_') {
        Some(idx) => (&stem[..idx], &stem[idx + 1..]),
        None => (stem, ""),
    };

    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!(
            "file name `{}` has no numeric version prefix (expected e.g. 20251026164222_migration.sql)",
            file_name
        ));
    }

    let value: i64 = token
        .parse()
        .map_err(|_| format!("version `{}` does not fit a 64-bit integer", token))?;

    if value <= 0 {
        return Err(format!("version must be greater than zero, got {}", value));
    }

    Ok((Version::new(value), description.to_string()))
}

/// Split goose Up/Down sections.
///
/// No `+goose Up` marker means the whole file is Up. Annotation lines such as
/// `StatementBegin` are dropped from both bodies.
pub fn split_sections(content: &str) -> (String, String) {
    let has_up_marker = content
        .lines()
        .any(|line| annotation(line).as_deref() == Some("up"));

    let mut section = if has_up_marker { Section::Header } else { Section::Up };
    let mut up = Vec::new();
    let mut down = Vec::new();

    for line in content.lines() {
        if let Some(keyword) = annotation(line) {
            match keyword.as_str() {
                "up" => section = Section::Up,
                "down" => section = Section::Down,
                _ => {}
            }
            continue;
        }

        match section {
            Section::Up => up.push(line.trim_end()),
            Section::Down => down.push(line.trim_end()),
            Section::Header => {}
        }
    }

    (up.join("\n").trim().to_string(), down.join("\n").trim().to_string())
}

fn annotation(line: &str) -> Option<String> {
    GOOSE_ANNOTATION
        .captures(line)
        .map(|caps| caps[1].to_lowercase())
}

/// Distinct absolute paths in backticks, in order of first appearance.
/// Comments are not scanned.
fn targets_in(body: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in body.lines() {
        for caps in ABSOLUTE_TARGET.captures_iter(strip_trailing_comment(line)) {
            let target = caps[1].to_string();
            if !found.contains(&target) {
                found.push(target);
            }
        }
    }
    found
}

/// Cut a line at the first `--` outside backticks and string literals
fn strip_trailing_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(open) if b == open => quote = None,
            Some(_) => {}
            None if matches!(b, b'`' | b'\'' | b'"') => quote = Some(b),
            None if b == b'-' && bytes.get(i + 1) == Some(&b'-') => return &line[..i],
            None => {}
        }
    }
    line
}

fn extract_target(path: &Path, up_sql: &str, down_sql: &str) -> MigrateResult<String> {
    let up_targets = targets_in(up_sql);

    let mut all = up_targets.clone();
    for target in targets_in(down_sql) {
        if !all.contains(&target) {
            all.push(target);
        }
    }

    if all.len() > 1 {
        return Err(MigrateError::AmbiguousTarget {
            path: path.to_path_buf(),
            found: all,
        });
    }

    match up_targets.into_iter().next() {
        Some(target) => Ok(target),
        None => Err(MigrateError::MissingTarget {
            path: path.to_path_buf(),
        }),
    }
}

/// Closest ancestor directory named `<db_uid> (<db_name>)`
fn find_database_folder(path: &Path) -> Option<DatabaseFolder> {
    path.ancestors().skip(1).find_map(|dir| {
        let name = dir.file_name()?.to_str()?;
        let caps = DATABASE_FOLDER.captures(name)?;
        Some(DatabaseFolder {
            uid: caps["uid"].to_string(),
            name: caps["name"].to_string(),
        })
    })
}
