//! Configuration management for the election store
//!
//! Loads store, admin and logging settings from environment variables with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Remote document key used by deployed installations
pub const DEFAULT_DOCUMENT_KEY: &str = "app_data";

/// Local storage key used by deployed installations
pub const DEFAULT_LOCAL_KEY: &str = "DANG_VIEN_VOTE_DB_V2_PRO";

/// Upper bound on how long the loading state may last
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 3000;

/// Backend selection and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key of the single election document in the remote store
    pub document_key: String,

    /// Directory holding the local cache files
    pub local_cache_dir: PathBuf,

    /// Key of the serialized document in the local cache
    pub local_cache_key: String,

    /// Startup loading timer in milliseconds
    pub startup_timeout_ms: u64,

    /// Whether a remote store should be used when one is supplied
    pub remote_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            document_key: DEFAULT_DOCUMENT_KEY.to_string(),
            local_cache_dir: PathBuf::from(".election"),
            local_cache_key: DEFAULT_LOCAL_KEY.to_string(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            remote_enabled: false,
        }
    }
}

impl StoreConfig {
    /// Load store configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let document_key =
            std::env::var("ELECTION_DOCUMENT_KEY").unwrap_or(defaults.document_key);

        let local_cache_dir = std::env::var("ELECTION_LOCAL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.local_cache_dir);

        let local_cache_key =
            std::env::var("ELECTION_LOCAL_KEY").unwrap_or(defaults.local_cache_key);

        let startup_timeout_ms = std::env::var("ELECTION_STARTUP_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_STARTUP_TIMEOUT_MS.to_string())
            .parse()
            .map_err(|_| Error::internal("Invalid ELECTION_STARTUP_TIMEOUT_MS"))?;

        let remote_enabled = std::env::var("ELECTION_REMOTE_ENABLED")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            document_key,
            local_cache_dir,
            local_cache_key,
            startup_timeout_ms,
            remote_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            local_cache_dir: std::env::temp_dir().join("member-vote-test"),
            startup_timeout_ms: 200,
            remote_enabled: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.document_key.trim().is_empty() {
            return Err(Error::validation("document_key"));
        }
        if self.local_cache_key.trim().is_empty() {
            return Err(Error::validation("local_cache_key"));
        }
        if self.local_cache_dir.as_os_str().is_empty() {
            return Err(Error::validation("local_cache_dir"));
        }
        if self.startup_timeout_ms == 0 {
            return Err(Error::validation("startup_timeout_ms"));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Shared secret gating the admin console and destructive resets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub secret: String,
}

impl AdminConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let secret = std::env::var("ELECTION_ADMIN_SECRET")
            .map_err(|_| Error::internal("ELECTION_ADMIN_SECRET environment variable required"))?;

        if secret.trim().is_empty() {
            return Err(Error::validation("ELECTION_ADMIN_SECRET"));
        }

        Ok(Self { secret })
    }

    pub fn for_testing() -> Self {
        Self {
            secret: "admin123".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let store = StoreConfig::from_env()?;
        let admin = AdminConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self {
            store,
            admin,
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Self {
            store: StoreConfig::for_testing(),
            admin: AdminConfig::for_testing(),
            logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.document_key, "app_data");
        assert_eq!(config.local_cache_key, "DANG_VIEN_VOTE_DB_V2_PRO");
        assert_eq!(config.startup_timeout(), Duration::from_secs(3));
        assert!(!config.remote_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_validation() {
        let empty_key = StoreConfig {
            document_key: "  ".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(empty_key.validate(), Err(Error::Validation { .. })));

        let zero_timeout = StoreConfig {
            startup_timeout_ms: 0,
            ..StoreConfig::default()
        };
        assert!(zero_timeout.validate().is_err());

        let no_dir = StoreConfig {
            local_cache_dir: PathBuf::new(),
            ..StoreConfig::default()
        };
        assert!(no_dir.validate().is_err());
    }

    #[test]
    fn test_testing_config() {
        let config = Config::for_testing();
        assert!(config.store.remote_enabled);
        assert!(config.store.validate().is_ok());
        assert_eq!(config.admin.secret, "admin123");
        assert_eq!(config.logging.level, "debug");
    }
}
