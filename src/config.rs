//! Persistent configuration
//!
//! Defaults are read from `config.json` in the platform configuration
//! directory (`~/.config/csiscope/config.json` on Linux) and overridden by
//! command line flags.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use csiscope_core::{DecodeOptions, Strictness, Vendor};
use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Cli;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    InvalidValue(String),
}

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "csiscope", "csiscope")
}

/// Location of the default config file, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// Settings as stored in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Hardware family to assume instead of detecting it
    pub vendor: Option<String>,
    pub strictness: Strictness,
    /// Nexmon chip name used instead of the chip id in each packet
    pub nexmon_chip: Option<String>,
    /// Number of captures decoded in parallel
    pub jobs: Option<usize>,
}

/// Effective settings after merging the config file with the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub vendor: Option<Vendor>,
    pub options: DecodeOptions,
    pub jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            vendor: None,
            options: DecodeOptions::default(),
            jobs: default_jobs(),
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// Read the config file at `path`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path` if given, else the default config file if it exists
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Config::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                debug!("Loading config from {}", path.display());
                Config::from_file(&path)
            }
            _ => Ok(Config::default()),
        }
    }

    /// Merge with command line flags, which take precedence
    pub fn resolve(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let vendor = match cli.format {
            Some(format) => Some(Vendor::from(format)),
            None => self
                .vendor
                .as_deref()
                .map(|name| Vendor::try_from(name))
                .transpose()
                .map_err(ConfigError::InvalidValue)?,
        };

        let strictness = if cli.strict {
            Strictness::Strict
        } else {
            self.strictness
        };

        let nexmon_chip = cli
            .nexmon_chip
            .as_deref()
            .or(self.nexmon_chip.as_deref())
            .map(parse_chip)
            .transpose()
            .map_err(ConfigError::InvalidValue)?;

        let jobs = cli.jobs.or(self.jobs).unwrap_or_else(default_jobs).max(1);

        Ok(Settings {
            vendor,
            options: DecodeOptions {
                strictness,
                nexmon_chip,
                source: None,
            },
            jobs,
        })
    }
}

#[cfg(feature = "nexmon")]
fn parse_chip(name: &str) -> Result<u16, String> {
    csiscope_core::protocol::nexmon::Chip::try_from(name).map(|chip| chip.id())
}

#[cfg(not(feature = "nexmon"))]
fn parse_chip(name: &str) -> Result<u16, String> {
    Err(format!("Nexmon chip {} given but Nexmon support is not compiled in", name))
}
