//! Configuration file support for the clinic tools.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/clinic/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_treatments_file")]
    pub treatments_file: String,

    #[serde(default = "default_entries_file")]
    pub entries_file: String,

    #[serde(default = "default_types_file")]
    pub types_file: String,

    #[serde(default = "default_users_file")]
    pub users_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            treatments_file: default_treatments_file(),
            entries_file: default_entries_file(),
            types_file: default_types_file(),
            users_file: default_users_file(),
        }
    }
}

impl DataConfig {
    pub fn treatments_path(&self) -> PathBuf {
        self.data_dir.join(&self.treatments_file)
    }

    pub fn entries_path(&self) -> PathBuf {
        self.data_dir.join(&self.entries_file)
    }

    pub fn types_path(&self) -> PathBuf {
        self.data_dir.join(&self.types_file)
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(&self.users_file)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn home_or_current_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| home_or_current_dir().join(".local/share"));
    base.join("clinic")
}

fn default_treatments_file() -> String {
    crate::store::DEFAULT_TREATMENTS_FILE.into()
}

fn default_entries_file() -> String {
    crate::store::DEFAULT_ENTRIES_FILE.into()
}

fn default_types_file() -> String {
    crate::catalog::DEFAULT_TYPES_FILE.into()
}

fn default_users_file() -> String {
    crate::users::DEFAULT_USERS_FILE.into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject file layouts where two collections would share a file.
    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        let files = [
            ("treatments_file", &data.treatments_file),
            ("entries_file", &data.entries_file),
            ("types_file", &data.types_file),
            ("users_file", &data.users_file),
        ];

        for (i, (key, name)) in files.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", key)));
            }
            if let Some((other, _)) = files[i + 1..].iter().find(|(_, n)| n == name) {
                return Err(Error::Config(format!(
                    "{} and {} both point at {}",
                    key, other, name
                )));
            }
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| home_or_current_dir().join(".config"));
        base.join("clinic").join("config.toml")
    }
}
