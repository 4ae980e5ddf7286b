pub mod loader;
pub mod schema;

pub use loader::{
    load_config, load_config_from_str, resolve_api_key, resolve_database_path, validate_config,
};
pub use schema::{
    BackendConfig, Config, DatabaseConfig, LogFormat, LoggingConfig, RetryConfig,
    StorageConfig, SubmissionConfig, WorkersConfig,
};
