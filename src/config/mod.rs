//! Application configuration.
//!
//! The backend is configured through a flat set of keys that mirror the
//! environment variables the deployment charts set (`BACKEND_REST_PORT`,
//! `DB_HOST`, ...). The same keys, lower-cased, may be given in YAML files.

mod storage;

pub use storage::{DatabaseConfig, DatabaseDriver};

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "APICLARITY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "APICLARITY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "APICLARITY_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "APICLARITY_LOG_FORMAT";

/// Errors raised while loading or interpreting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Ports
    pub backend_rest_port: u16,
    pub backend_rest_tls_port: u16,
    pub http_traces_port: u16,
    pub http_traces_tls_port: u16,
    pub external_http_traces_tls_port: u16,
    pub http_trace_sampling_manager_port: u16,
    pub https_trace_sampling_manager_port: u16,
    pub grpc_trace_sampling_manager_port: u16,
    pub health_check_address: String,

    // Kubernetes
    pub enable_k8s: bool,
    pub k8s_local: bool,
    pub no_k8s_monitor: bool,
    pub trace_sampling_enabled: bool,
    /// Base URL of the external trace sampling manager. Empty disables relaying.
    pub trace_sampling_manager_url: String,
    pub host_to_trace_secret_name: String,
    pub host_to_trace_secret_namespace: String,
    pub host_to_trace_secret_owner_name: String,
    /// Comma separated CIDRs whose destinations are classified as internal.
    pub internal_cidrs: String,

    // TLS
    pub enable_tls: bool,
    pub tls_server_cert_file_path: String,
    pub tls_server_key_file_path: String,
    pub root_cert_file_path: String,

    // Database
    pub database_driver: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_host: String,
    pub db_port_number: u16,
    pub enable_db_info_logs: bool,

    // Intervals
    pub state_backup_interval_sec: u64,
    pub database_cleaner_interval_sec: u64,
    pub state_backup_file_name: String,

    // Analysis
    pub trace_analyzer_dict_filenames: String,
    pub trace_analyzer_rules_filenames: String,
    pub trace_analyzer_sensitive_keywords_filenames: String,
    pub trace_analyzer_ignore_findings: String,
    pub modules_assets: String,

    // Notifications
    pub notification_backend_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_rest_port: 8080,
            backend_rest_tls_port: 8443,
            http_traces_port: 9000,
            http_traces_tls_port: 9443,
            external_http_traces_tls_port: 10443,
            http_trace_sampling_manager_port: 9990,
            https_trace_sampling_manager_port: 9991,
            grpc_trace_sampling_manager_port: 9991,
            health_check_address: ":8081".to_string(),
            enable_k8s: true,
            k8s_local: false,
            no_k8s_monitor: false,
            trace_sampling_enabled: false,
            trace_sampling_manager_url: String::new(),
            host_to_trace_secret_name: String::new(),
            host_to_trace_secret_namespace: String::new(),
            host_to_trace_secret_owner_name: String::new(),
            internal_cidrs: "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16".to_string(),
            enable_tls: false,
            tls_server_cert_file_path: String::new(),
            tls_server_key_file_path: String::new(),
            root_cert_file_path: String::new(),
            database_driver: "local".to_string(),
            db_name: "apiclarity".to_string(),
            db_user: "postgres".to_string(),
            db_pass: String::new(),
            db_host: "localhost".to_string(),
            db_port_number: 5432,
            enable_db_info_logs: false,
            state_backup_interval_sec: 30,
            database_cleaner_interval_sec: 30,
            state_backup_file_name: "state.gob".to_string(),
            trace_analyzer_dict_filenames: String::new(),
            trace_analyzer_rules_filenames: String::new(),
            trace_analyzer_sensitive_keywords_filenames: String::new(),
            trace_analyzer_ignore_findings: String::new(),
            modules_assets: "./assets".to_string(),
            notification_backend_prefix: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Bare environment variables (`BACKEND_REST_PORT`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    /// Database connection settings derived from the `DB_*` keys.
    pub fn database(&self) -> Result<DatabaseConfig, ConfigError> {
        DatabaseConfig::from_config(self)
    }

    pub fn state_backup_interval(&self) -> Duration {
        Duration::from_secs(self.state_backup_interval_sec.max(1))
    }

    pub fn database_cleaner_interval(&self) -> Duration {
        Duration::from_secs(self.database_cleaner_interval_sec.max(1))
    }

    pub fn state_backup_path(&self) -> PathBuf {
        PathBuf::from(&self.state_backup_file_name)
    }

    /// Parsed `INTERNAL_CIDRS`.
    pub fn internal_networks(&self) -> Result<Vec<ipnetwork::IpNetwork>, ConfigError> {
        split_list(&self.internal_cidrs, &[','])
            .into_iter()
            .map(|cidr| {
                cidr.parse().map_err(|e: ipnetwork::IpNetworkError| ConfigError::Invalid {
                    key: "INTERNAL_CIDRS",
                    message: format!("{cidr}: {e}"),
                })
            })
            .collect()
    }
}

/// Split a list-valued key, dropping empty items.
pub fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(|c: char| separators.contains(&c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
