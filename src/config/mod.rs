//! Application configuration

pub mod file;

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file::FileConfig;

use crate::conversation::DEFAULT_AVATAR;

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how to reach the companion service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Applied to chat, safety-check and ping alike
    pub timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub service: ServiceConfig,
    pub data_dir: PathBuf,
    /// Externally supplied identity; `None` means anonymous
    pub user_id: Option<String>,
    pub default_avatar: String,
}

impl Config {
    /// Build from `SOLACE_CONFIG` (if set) overlaid with the environment
    pub fn from_env() -> anyhow::Result<Self> {
        let file = match env::var("SOLACE_CONFIG") {
            Ok(path) => Some(FileConfig::from_file(Path::new(&path))?),
            Err(_) => None,
        };

        Ok(Self::resolve(file.unwrap_or_default(), |key| env::var(key).ok()))
    }

    /// Merge file values with variables from `lookup`; variables win
    pub fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("COMPANION_API_URL")
            .or(file.service.base_url)
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());

        let timeout_secs = lookup("COMPANION_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .or(file.service.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            service: ServiceConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            data_dir: lookup("SOLACE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            user_id: lookup("SOLACE_USER_ID")
                .or(file.session.user_id)
                .filter(|id| !id.trim().is_empty()),
            default_avatar: file
                .session
                .default_avatar
                .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("solace.db")
    }
}
