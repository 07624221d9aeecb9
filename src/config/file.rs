//! Optional TOML configuration file
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:5000/api"
//! timeout_secs = 10
//!
//! [session]
//! user_id = "user-1234"
//! default_avatar = "🦉"
//! ```
//!
//! Every field is optional; environment variables take precedence.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub service: ServiceSection,

    #[serde(default)]
    pub session: SessionSection,
}

/// Companion service endpoint settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Session defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSection {
    /// Identity sent with chat requests
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub default_avatar: Option<String>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.service.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "service.base_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        if self.service.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "service.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[service]
base_url = "https://companion.example.com/api"
timeout_secs = 15

[session]
user_id = "user-99"
default_avatar = "🦉"
"#;

        let config = FileConfig::parse(toml).unwrap();
        assert_eq!(
            config.service.base_url.as_deref(),
            Some("https://companion.example.com/api")
        );
        assert_eq!(config.service.timeout_secs, Some(15));
        assert_eq!(config.session.user_id.as_deref(), Some("user-99"));
        assert_eq!(config.session.default_avatar.as_deref(), Some("🦉"));
    }

    #[test]
    fn test_parse_empty_config() {
        let config = FileConfig::parse("").unwrap();
        assert!(config.service.base_url.is_none());
        assert!(config.session.user_id.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            FileConfig::parse("[service]\ntimeout_secs = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            FileConfig::parse("[service]\nbase_url = \"localhost:5000\""),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            FileConfig::parse("[service\n"),
            Err(ConfigError::Toml(_))
        ));
    }
}
