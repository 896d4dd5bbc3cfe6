//! Database configuration types.

use super::{Config, ConfigError};

/// Database driver discriminator (`DATABASE_DRIVER`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatabaseDriver {
    /// Local SQLite file.
    #[default]
    Local,
    Postgres,
}

/// Resolved database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub driver: DatabaseDriver,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Log every statement at info level.
    pub info_logs: bool,
}

impl DatabaseConfig {
    pub(super) fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let driver = match config.database_driver.to_ascii_lowercase().as_str() {
            "local" | "sqlite" => DatabaseDriver::Local,
            "postgres" => DatabaseDriver::Postgres,
            other => {
                return Err(ConfigError::Invalid {
                    key: "DATABASE_DRIVER",
                    message: format!("unknown driver '{other}' (expected postgres|local)"),
                })
            }
        };

        Ok(Self {
            driver,
            name: config.db_name.clone(),
            user: config.db_user.clone(),
            // Secrets mounted as env vars sometimes carry a trailing newline
            password: config.db_pass.trim_end_matches('\n').to_string(),
            host: config.db_host.clone(),
            port: config.db_port_number,
            info_logs: config.enable_db_info_logs,
        })
    }

    /// Path of the SQLite file used by the local driver.
    pub fn sqlite_path(&self) -> String {
        if self.name.ends_with(".db") || self.name == ":memory:" {
            self.name.clone()
        } else {
            format!("{}.db", self.name)
        }
    }

    /// In-memory SQLite settings for tests.
    pub fn in_memory() -> Self {
        Self {
            driver: DatabaseDriver::Local,
            name: ":memory:".to_string(),
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            info_logs: false,
        }
    }
}
