mod commands;

use clap::{Args, Parser, Subcommand};
use pinmig_core::{
    init_logging, AppConfigTrait, ConfigError, ConfigSource, LogFormat, LoggingConfig,
    PinmigConfig,
};
use pinmig_migrate::{MigrateError, Operation, TargetResolver};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pinmig")]
#[command(version)]
#[command(about = "Apply or roll back exactly one goose migration against the YDB database it targets")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand; they override the environment
#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// Cluster endpoint, e.g. grpcs://host:2135 (no database path)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// goose executable
    #[arg(long, global = true)]
    goose_bin: Option<String>,

    /// File holding the IAM token
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    /// Pass -allow-missing to goose
    #[arg(long, global = true)]
    allow_missing: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json, plain)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a single migration file
    Apply {
        /// Migration file, e.g. ydb_dbs/<uid> (<name>)/orders/20240101_migration.sql
        file: PathBuf,
    },

    /// Roll back a single migration file
    Rollback {
        /// Migration file
        file: PathBuf,
    },

    /// Show the runner status of a single migration file
    Status {
        /// Migration file
        file: PathBuf,
    },

    /// Parse and resolve a migration file without touching the database
    Inspect {
        /// Migration file
        file: PathBuf,
    },
}

impl GlobalArgs {
    /// Environment first, then command line flags on top
    fn load_config(&self) -> Result<PinmigConfig, ConfigError> {
        let mut config = PinmigConfig::from_env()?;
        self.apply_overrides(&mut config)?;
        config.validate()?;

        for (field, source) in self.config_sources(&config) {
            tracing::trace!(field = %field, source = %source, "Configuration source");
        }

        Ok(config)
    }

    /// Resolver for the configured endpoint, tagged with where it came from
    fn resolver(&self, config: &PinmigConfig) -> TargetResolver {
        let source = self
            .config_sources(config)
            .into_iter()
            .find(|(field, _)| field == "endpoint")
            .map(|(_, source)| source)
            .unwrap_or(ConfigSource::Default(config.endpoint.clone()));

        if source.is_default() {
            tracing::info!(endpoint = %config.endpoint, "No endpoint configured, using the default cluster");
        } else {
            tracing::info!(endpoint = %config.endpoint, source = %source, "Using configured endpoint");
        }

        TargetResolver::new(&config.endpoint).with_endpoint_source(source.description())
    }

    fn apply_overrides(&self, config: &mut PinmigConfig) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(goose_bin) = &self.goose_bin {
            config.goose_bin = goose_bin.clone();
        }
        if let Some(token_file) = &self.token_file {
            config.token_file = token_file.clone();
        }
        if self.allow_missing {
            config.allow_missing = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.to_lowercase();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.parse::<LogFormat>()?;
        }
        Ok(())
    }

    fn config_sources(&self, config: &PinmigConfig) -> Vec<(String, ConfigSource)> {
        let mut sources: Vec<_> = config.config_sources().into_iter().collect();
        let overridden = [
            ("endpoint", self.endpoint.is_some()),
            ("goose_bin", self.goose_bin.is_some()),
            ("token_file", self.token_file.is_some()),
            ("allow_missing", self.allow_missing),
            ("log_level", self.log_level.is_some()),
            ("log_format", self.log_format.is_some()),
        ];
        for (field, source) in sources.iter_mut() {
            if overridden.iter().any(|(name, set)| *set && name == field) {
                *source = ConfigSource::CommandLine;
            }
        }
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        sources
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.global.json;

    let config = match cli.global.load_config() {
        Ok(config) => config,
        Err(e) => {
            commands::report_error(&MigrateError::from(e), json);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&LoggingConfig::new(&config.log_level, config.log_format)) {
        eprintln!("warning: {}", e);
    }

    let resolver = cli.global.resolver(&config);

    let result = match cli.command {
        Commands::Apply { file } => {
            commands::migrate::run(Operation::Apply, &file, &config, &resolver, json).await
        }
        Commands::Rollback { file } => {
            commands::migrate::run(Operation::Rollback, &file, &config, &resolver, json).await
        }
        Commands::Status { file } => {
            commands::migrate::run(Operation::Status, &file, &config, &resolver, json).await
        }
        Commands::Inspect { file } => commands::inspect::run(&file, &resolver, json),
    };

    match result {
        Ok(outcome) if outcome.is_failure() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "pinmig failed");
            commands::report_error(&e, json);
            ExitCode::FAILURE
        }
    }
}
