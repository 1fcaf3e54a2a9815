use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render_scheduler::DEFAULT_RENDER_PERIOD;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3030/bpfquery";
pub const DEFAULT_QUERY: &str =
    "select\n    str(args.path -> dentry -> d_name.name) as filename\nfrom\n    kprobe.vfs_open;";

const APP_DIR: &str = "bpfq";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_render_period_ms")]
    pub render_period_ms: u64,
    #[serde(default = "default_query")]
    pub default_query: String,
    #[serde(default)]
    pub max_buffered_rows: Option<usize>,
    #[serde(default)]
    pub presets_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            render_period_ms: default_render_period_ms(),
            default_query: default_query(),
            max_buffered_rows: None,
            presets_path: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn render_period(&self) -> Duration {
        Duration::from_millis(self.render_period_ms.max(1))
    }

    /// Explicit `presets_path`, else `presets.toml` next to the config file.
    pub fn resolved_presets_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.presets_path {
            return Ok(path.clone());
        }
        Ok(config_dir()?.join("presets.toml"))
    }
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_render_period_ms() -> u64 {
    u64::try_from(DEFAULT_RENDER_PERIOD.as_millis()).unwrap_or(1_000)
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub fn load_default() -> Result<ClientConfig, ConfigError> {
    load_from_path(&default_config_path()?)
}

/// A missing or blank file yields the defaults.
pub fn load_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(ClientConfig::default());
    }

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("BPFQ_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join(APP_DIR))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn default_log_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("bpfq.log"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{load_from_path, ClientConfig, ConfigError, DEFAULT_SERVER_URL};

    fn temp_config_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("config.toml")
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let config = load_from_path(&temp_config_path(&temp_dir)).expect("defaults expected");

        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.render_period(), Duration::from_millis(1_000));
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_keys() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_config_path(&temp_dir);
        fs::write(
            &path,
            "render_period_ms = 250\nmax_buffered_rows = 5000\npresets_path = \"/tmp/p.toml\"\n",
        )
        .expect("failed to write config");

        let config = load_from_path(&path).expect("config should parse");
        assert_eq!(config.render_period(), Duration::from_millis(250));
        assert_eq!(config.max_buffered_rows, Some(5_000));
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(
            config.resolved_presets_path().expect("explicit path"),
            PathBuf::from("/tmp/p.toml")
        );
    }

    #[test]
    fn zero_render_period_is_clamped() {
        let config = ClientConfig {
            render_period_ms: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.render_period(), Duration::from_millis(1));
    }

    #[test]
    fn malformed_config_reports_path() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_config_path(&temp_dir);
        fs::write(&path, "render_period_ms = \"fast\"").expect("failed to write config");

        let err = load_from_path(&path).expect_err("bad type must fail");
        assert!(matches!(err, ConfigError::Parse { path: ref failed, .. } if failed == &path));
    }
}
