//! Target Resolver
//!
//! Maps the absolute target path of a migration to the database that owns it.
//! The database path is derived from the target path alone, so the same file
//! always resolves to the same database whatever the environment says.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::definitions::MigrationFile;
use crate::error::{MigrateError, MigrateResult};

/// Cloud region segments (`ru-central1`) prefix `/<region>/<cloud>/<db>` paths
static REGION_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+-[a-z]+\d+$").expect("valid regex"));

/// Identity of the database a target lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseIdentity {
    /// Last segment of the database path
    pub uid: String,
    /// Human name, known only from the `<uid> (<name>)` folder
    pub name: Option<String>,
}

impl fmt::Display for DatabaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.uid, name),
            None => write!(f, "{}", self.uid),
        }
    }
}

/// Enough to open a session against exactly one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub endpoint: String,
    pub database_path: String,
}

impl ConnectionDescriptor {
    /// `<endpoint><database_path>`, the credential-free part of a DSN
    pub fn url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), self.database_path)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Resolved target of one migration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub identity: DatabaseIdentity,
    pub connection: ConnectionDescriptor,
    /// Absolute table path as written in the migration
    pub target_path: String,
    /// Path of the table inside its database: `<parent_path>/<table_name>`
    pub table_path: String,
    /// Where the cluster endpoint came from (environment, flag, default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_source: Option<String>,
}

/// Database root and intra-database part of an absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPath {
    pub database_path: String,
    pub table_path: String,
    pub uid: String,
}

/// Split an absolute target path at its database root.
///
/// `/ru-central1/<cloud>/<db>/...` keeps three root segments, any other
/// absolute path keeps two (`/local/db1/orders` → `/local/db1` + `orders`).
pub fn split_target_path(target_path: &str) -> Result<SplitPath, String> {
    let rest = target_path
        .strip_prefix('/')
        .ok_or_else(|| "target path is not absolute".to_string())?;

    let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err("target path has empty segments".to_string());
    }

    let root_depth = if REGION_SEGMENT.is_match(segments[0]) { 3 } else { 2 };
    if segments.len() <= root_depth {
        return Err(format!(
            "expected a database root of {} segments followed by a table path",
            root_depth
        ));
    }

    Ok(SplitPath {
        database_path: format!("/{}", segments[..root_depth].join("/")),
        table_path: segments[root_depth..].join("/"),
        uid: segments[root_depth - 1].to_string(),
    })
}

/// Resolves migration targets against one cluster endpoint
#[derive(Debug, Clone)]
pub struct TargetResolver {
    endpoint: String,
    endpoint_source: Option<String>,
}

impl TargetResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            endpoint_source: None,
        }
    }

    /// Record where the endpoint was configured; shown in every report
    pub fn with_endpoint_source(mut self, source: impl Into<String>) -> Self {
        self.endpoint_source = Some(source.into());
        self
    }

    /// Resolve the target of a parsed migration file
    pub fn resolve(&self, migration: &MigrationFile) -> MigrateResult<TargetDescriptor> {
        let split = split_target_path(&migration.target_path).map_err(|reason| {
            MigrateError::unresolvable(&migration.source, &migration.target_path, reason)
        })?;

        // A file stored under another database's folder is a targeting mistake.
        if let Some(folder) = &migration.database_folder {
            if folder.uid != split.uid {
                return Err(MigrateError::unresolvable(
                    &migration.source,
                    &migration.target_path,
                    format!(
                        "file lives in the folder of database `{} ({})` but targets database `{}`",
                        folder.uid, folder.name, split.uid
                    ),
                ));
            }
        }

        let identity = DatabaseIdentity {
            uid: split.uid,
            name: migration.database_folder.as_ref().map(|f| f.name.clone()),
        };

        tracing::debug!(
            target_path = %migration.target_path,
            database = %split.database_path,
            "Resolved migration target"
        );

        Ok(TargetDescriptor {
            identity,
            connection: ConnectionDescriptor {
                endpoint: self.endpoint.clone(),
                database_path: split.database_path,
            },
            target_path: migration.target_path.clone(),
            table_path: split.table_path,
            endpoint_source: self.endpoint_source.clone(),
        })
    }
}
