use crate::config::validation::parse_flag;
use crate::config::{ConfigError, ConfigSource};
use crate::logging::LogFormat;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Serverless YDB endpoint used when nothing else is configured
pub const DEFAULT_ENDPOINT: &str = "grpcs://ydb.serverless.yandexcloud.net:2135";

/// Default name of the IAM token file, relative to the working directory
pub const DEFAULT_TOKEN_FILE: &str = "iam.token";

/// Default goose executable
pub const DEFAULT_GOOSE_BIN: &str = "goose";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Configuration trait for loading and checking tool configuration
pub trait AppConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Tool configuration.
///
/// Note that nothing in here names a database: the database a migration
/// touches is always derived from the migration file itself. Only the cluster
/// endpoint, credentials and runner knobs are ambient.
#[derive(Debug, Clone)]
pub struct PinmigConfig {
    /// Cluster endpoint, e.g. `grpcs://host:2135`
    pub endpoint: String,
    /// goose executable name or path
    pub goose_bin: String,
    /// Access token given directly (wins over `token_file`)
    pub token: Option<String>,
    /// File holding an IAM token
    pub token_file: PathBuf,
    /// Pass `-allow-missing` to goose
    pub allow_missing: bool,
    /// Replace `token=...` with `token=***` in logged command lines
    pub mask_secrets: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl PinmigConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            goose_bin: DEFAULT_GOOSE_BIN.to_string(),
            token: None,
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            allow_missing: false,
            mask_secrets: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    /// Configuration for tests: quiet logging, fixed token
    pub fn testing() -> Self {
        Self {
            token: Some("test-token".to_string()),
            log_level: "warn".to_string(),
            log_format: LogFormat::Plain,
            ..Self::new()
        }
    }

    /// Resolve the access token.
    ///
    /// Only called right before a runner invocation, so `inspect` works
    /// without credentials.
    pub fn access_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.token {
            let token = token.trim();
            if token.is_empty() {
                return Err(ConfigError::invalid_value("token", "", "a non-empty access token"));
            }
            return Ok(token.to_string());
        }

        read_token_file(&self.token_file)
    }
}

impl Default for PinmigConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_token_file(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::missing_required(
            "token",
            format!(
                "Token file {} not found; set PINMIG_TOKEN or PINMIG_TOKEN_FILE",
                path.display()
            ),
        ));
    }

    let raw = fs::read_to_string(path).map_err(|e| {
        ConfigError::file_system(format!("Failed to read token file {}: {}", path.display(), e))
    })?;

    let token = raw.trim();
    if token.is_empty() {
        return Err(ConfigError::validation_failed(format!(
            "Token file {} is empty, refresh the token",
            path.display()
        )));
    }

    Ok(token.to_string())
}

impl AppConfigTrait for PinmigConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Ok(endpoint) = env::var("PINMIG_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Ok(goose_bin) = env::var("PINMIG_GOOSE_BIN") {
            config.goose_bin = goose_bin;
        }

        config.token = env::var("PINMIG_TOKEN").ok();

        if let Ok(token_file) = env::var("PINMIG_TOKEN_FILE") {
            config.token_file = PathBuf::from(token_file);
        }

        if let Ok(raw) = env::var("PINMIG_ALLOW_MISSING") {
            config.allow_missing = parse_flag("allow_missing", &raw)?;
        }

        if let Ok(raw) = env::var("PINMIG_MASK_SECRETS") {
            config.mask_secrets = parse_flag("mask_secrets", &raw)?;
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level.to_lowercase();
        }

        if let Ok(log_format) = env::var("LOG_FORMAT") {
            config.log_format = log_format.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = url::Url::parse(&self.endpoint).map_err(|_| {
            ConfigError::invalid_value("endpoint", &self.endpoint, "URL like grpcs://host:2135")
        })?;

        if !matches!(endpoint.scheme(), "grpc" | "grpcs") {
            return Err(ConfigError::invalid_value(
                "endpoint",
                &self.endpoint,
                "grpc:// or grpcs:// scheme",
            ));
        }

        // The database path is appended from the migration file, never from here.
        if !matches!(endpoint.path(), "" | "/") {
            return Err(ConfigError::invalid_value(
                "endpoint",
                &self.endpoint,
                "endpoint without a database path",
            ));
        }

        if self.goose_bin.trim().is_empty() {
            return Err(ConfigError::invalid_value("goose_bin", "", "path to the goose executable"));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid_value(
                "log_level",
                &self.log_level,
                format!("one of: {}", VALID_LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let fields = [
            ("endpoint", "PINMIG_ENDPOINT", DEFAULT_ENDPOINT),
            ("goose_bin", "PINMIG_GOOSE_BIN", DEFAULT_GOOSE_BIN),
            ("token", "PINMIG_TOKEN", "read from token file"),
            ("token_file", "PINMIG_TOKEN_FILE", DEFAULT_TOKEN_FILE),
            ("allow_missing", "PINMIG_ALLOW_MISSING", "false"),
            ("mask_secrets", "PINMIG_MASK_SECRETS", "true"),
            ("log_level", "LOG_LEVEL", "info"),
            ("log_format", "LOG_FORMAT", "pretty"),
        ];

        fields
            .into_iter()
            .map(|(field, var, default)| {
                let source = if env::var(var).is_ok() {
                    ConfigSource::EnvVar(var.to_string())
                } else {
                    ConfigSource::Default(default.to_string())
                };
                (field.to_string(), source)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: [&str; 8] = [
        "PINMIG_ENDPOINT",
        "PINMIG_GOOSE_BIN",
        "PINMIG_TOKEN",
        "PINMIG_TOKEN_FILE",
        "PINMIG_ALLOW_MISSING",
        "PINMIG_MASK_SECRETS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    fn clean_test_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_empty_env() {
        clean_test_env();
        let config = PinmigConfig::from_env().unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.goose_bin, "goose");
        assert!(config.mask_secrets);
        assert!(!config.allow_missing);
        assert!(config.config_sources()["endpoint"].is_default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clean_test_env();
        env::set_var("PINMIG_ENDPOINT", "grpc://localhost:2136");
        env::set_var("PINMIG_ALLOW_MISSING", "true");
        env::set_var("LOG_FORMAT", "json");

        let config = PinmigConfig::from_env().unwrap();
        assert_eq!(config.endpoint, "grpc://localhost:2136");
        assert!(config.allow_missing);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.config_sources()["endpoint"],
            ConfigSource::EnvVar("PINMIG_ENDPOINT".to_string())
        );

        clean_test_env();
    }

    #[test]
    #[serial]
    fn test_bad_log_level_rejected() {
        clean_test_env();
        env::set_var("LOG_LEVEL", "loud");
        assert!(PinmigConfig::from_env().is_err());
        clean_test_env();
    }

    #[test]
    fn test_endpoint_with_database_path_rejected() {
        let mut config = PinmigConfig::new();
        config.endpoint = "grpcs://ydb.example:2135/ru-central1/a/b".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("without a database path"));
    }

    #[test]
    fn test_http_endpoint_rejected() {
        let mut config = PinmigConfig::new();
        config.endpoint = "https://ydb.example:2135".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_token_from_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  t1.secret  ").unwrap();

        let mut config = PinmigConfig::new();
        config.token_file = file.path().to_path_buf();
        assert_eq!(config.access_token().unwrap(), "t1.secret");
    }

    #[test]
    fn test_empty_token_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = PinmigConfig::new();
        config.token_file = file.path().to_path_buf();
        assert!(matches!(
            config.access_token(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_missing_token_file_rejected() {
        let mut config = PinmigConfig::new();
        config.token_file = PathBuf::from("/nonexistent/pinmig/iam.token");
        assert!(matches!(
            config.access_token(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_inline_token_wins() {
        let mut config = PinmigConfig::testing();
        config.token_file = PathBuf::from("/nonexistent/pinmig/iam.token");
        assert_eq!(config.access_token().unwrap(), "test-token");
    }
}
