//! Tracker configuration, loaded once at startup from a TOML file.
//!
//! Every component receives an immutable view of this structure; nothing
//! reads configuration from ambient state after load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;

/// Default filename used to store the tracker configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level configuration for a tracker deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// PHOENIX roots to crawl, in order.
    pub data_roots: Vec<PathBuf>,
    /// Catalog database location; defaults to the app directory when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Webhook endpoint for the delta report; absent means render-only.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Ordered directory-convention rules, highest priority first.
    #[serde(default = "default_convention", rename = "convention")]
    pub convention_rules: Vec<ConventionRuleConfig>,
}

/// One directory-convention rule: segment tokens matched against the leading
/// path components below a data root.
///
/// Tokens: `:network`, `:study`, `:subject`, `:modality` capture a segment,
/// `*` matches any single segment, anything else matches literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConventionRuleConfig {
    pub segments: Vec<String>,
}

/// Errors returned while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// At least one data root must be configured.
    #[error("Config has no data_roots; nothing to crawl")]
    NoDataRoots,
    /// No app directory could be resolved for defaults.
    #[error(transparent)]
    AppDir(#[from] app_dirs::AppDirError),
}

impl TrackerConfig {
    /// Load and validate the configuration from the given TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrackerConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the catalog database path, falling back to the app directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(app_dirs::default_database_path()?),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.data_roots.is_empty() {
            return Err(ConfigError::NoDataRoots);
        }
        Ok(())
    }
}

/// The documented PHOENIX layout: `<network>/<study>/<subject>/<modality>/...`.
fn default_convention() -> Vec<ConventionRuleConfig> {
    vec![ConventionRuleConfig {
        segments: [":network", ":study", ":subject", ":modality"]
            .into_iter()
            .map(String::from)
            .collect(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_default_convention() {
        let file = write_config(r#"data_roots = ["/data/phoenix"]"#);
        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.data_roots, vec![PathBuf::from("/data/phoenix")]);
        assert!(config.database.is_none());
        assert!(config.webhook_url.is_none());
        assert_eq!(config.convention_rules.len(), 1);
        assert_eq!(
            config.convention_rules[0].segments,
            vec![":network", ":study", ":subject", ":modality"]
        );
    }

    #[test]
    fn loads_explicit_convention_rules_in_order() {
        let file = write_config(
            r#"
data_roots = ["/data/a", "/data/b"]
database = "/var/lib/tracker/catalog.db"
webhook_url = "https://hooks.example.com/T000/B000"

[[convention]]
segments = ["PROTECTED", ":study", "raw", ":subject", ":modality"]

[[convention]]
segments = [":network", ":study", ":subject", ":modality"]
"#,
        );
        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.data_roots.len(), 2);
        assert_eq!(
            config.database.as_deref(),
            Some(Path::new("/var/lib/tracker/catalog.db"))
        );
        assert_eq!(config.convention_rules.len(), 2);
        assert_eq!(config.convention_rules[0].segments[0], "PROTECTED");
    }

    #[test]
    fn rejects_empty_data_roots() {
        let file = write_config("data_roots = []\n");
        let err = TrackerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NoDataRoots));
    }

    #[test]
    fn rejects_invalid_toml() {
        let file = write_config("data_roots = [\n");
        let err = TrackerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
