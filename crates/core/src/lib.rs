pub mod config;
pub mod errors;
pub mod logging;

pub use config::{AppConfigTrait, ConfigError, ConfigSource, PinmigConfig};
pub use errors::{CoreError, ErrorPayload};
pub use logging::{init_logging, LogFormat, LoggingConfig};
