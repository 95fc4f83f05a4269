//! Service configuration, read once at startup from a JSON file.
//!
//! ```json
//! {
//!     "FileStore": { "Path": "./index", "SystemsPerFile": 100000000, "MemoryCacheMaxAge": 300 },
//!     "AccessControl": { "RequireAccessToken": true, "AccessToken": "secret" },
//!     "Search": { "ResultLimit": 50, "CaseInsensitive": true }
//! }
//! ```
//!
//! Every section and key is optional and falls back to the defaults below.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::trie::SearchOptions;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppConfig {
    pub file_store: FileStoreConfig,
    pub access_control: AccessControlConfig,
    pub search: SearchConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileStoreConfig {
    /// Directory holding the `index.<N>.dat` files.
    pub path: PathBuf,
    /// Records per backing file.
    pub systems_per_file: u64,
    /// Seconds a cached node may go unused before the sweeper drops it.
    pub memory_cache_max_age: u64,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./index"),
            // 100M records of 21 bytes stays just under the 2^31 byte mark.
            systems_per_file: 100_000_000,
            memory_cache_max_age: 300,
        }
    }
}

impl FileStoreConfig {
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.memory_cache_max_age)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct AccessControlConfig {
    pub require_access_token: bool,
    pub access_token: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SearchConfig {
    pub result_limit: usize,
    pub case_insensitive: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let options = SearchOptions::default();
        Self {
            result_limit: options.limit,
            case_insensitive: options.case_insensitive,
        }
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            limit: config.result_limit,
            case_insensitive: config.case_insensitive,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_store.systems_per_file == 0 {
            return Err(ConfigError::Invalid("FileStore.SystemsPerFile must be positive"));
        }
        if self.access_control.require_access_token && self.access_control.access_token.is_empty()
        {
            return Err(ConfigError::Invalid(
                "AccessControl.AccessToken must be set when RequireAccessToken is true",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "FileStore": {"Path": "/data/index", "SystemsPerFile": 1000, "MemoryCacheMaxAge": 60},
                "AccessControl": {"RequireAccessToken": true, "AccessToken": "hunter2"},
                "Search": {"ResultLimit": 10, "CaseInsensitive": false}
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.file_store.path, PathBuf::from("/data/index"));
        assert_eq!(config.file_store.systems_per_file, 1000);
        assert_eq!(config.file_store.cache_max_age(), Duration::from_secs(60));
        assert!(config.access_control.require_access_token);
        assert_eq!(config.access_control.access_token, "hunter2");
        assert_eq!(
            SearchOptions::from(&config.search),
            SearchOptions {
                limit: 10,
                case_insensitive: false
            }
        );
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"FileStore": {"Path": "idx"}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.file_store.path, PathBuf::from("idx"));
        assert_eq!(config.file_store.systems_per_file, 100_000_000);
        assert_eq!(config.access_control, AccessControlConfig::default());
        assert_eq!(config.search, SearchConfig::default());
    }

    #[test]
    fn test_invalid_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Read { .. })
        ));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(&path, r#"{"FileStore": {"SystemsPerFile": 0}}"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, r#"{"AccessControl": {"RequireAccessToken": true}}"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
