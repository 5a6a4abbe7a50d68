//! Layered configuration: built-in defaults, then the TOML config file,
//! then `WDB_*` environment variables, then CLI flags (applied by the
//! caller).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "wdb-server";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub socket: SocketConfig,
    pub engine: EngineConfig,
    pub settings: SettingsConfig,
}

/// HTTP listener for the browser-facing WebSocket endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1984,
        }
    }
}

/// TCP listener for debuggee connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 19840,
        }
    }
}

/// External programs used to launch and attach debuggees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub python: String,
    pub gdb: String,
    /// Directory searched recursively for libpython when
    /// `settings.extra_search_path` is on. Supports `~` and `$VAR`.
    pub search_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            gdb: "gdb".to_string(),
            search_path: None,
        }
    }
}

/// Initial values of the live toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub debug: bool,
    pub extra_search_path: bool,
    pub more: bool,
    pub detached_session: bool,
    pub show_filename: bool,
}

/// Default location of the config file: `~/.config/wdb-server/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("could not determine config directory")?;
    Ok(base.join(APP_NAME).join("config.toml"))
}

pub fn load(path: Option<&Path>) -> Result<(AppConfig, PathBuf)> {
    let path = match path {
        Some(path) => expand_path(path)?,
        None => default_config_path()?,
    };

    let settings = Config::builder()
        .add_source(File::from(path.as_path()).format(FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix("WDB").separator("__"))
        .build()
        .context("building configuration")?;

    let config: AppConfig = settings
        .try_deserialize()
        .context("deserializing configuration")?;
    Ok((config, path))
}

/// Write the default configuration to `path`, creating parent directories.
/// Refuses to clobber an existing file.
pub fn write_default(path: &Path) -> Result<()> {
    anyhow::ensure!(!path.exists(), "config file already exists: {}", path.display());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let rendered =
        toml::to_string_pretty(&AppConfig::default()).context("rendering default config")?;
    std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(raw.as_ref())
        .with_context(|| format!("expanding path {raw}"))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_ports() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 1984);
        assert_eq!(config.socket.port, 19840);
        assert!(!config.settings.show_filename);
    }

    #[test]
    fn load_reads_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8080\n\n[settings]\ndetached_session = true\n",
        )
        .unwrap();

        let (config, loaded_from) = load(Some(&path)).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "localhost");
        assert!(config.settings.detached_session);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, _) = load(Some(&path)).unwrap();
        assert_eq!(config.socket.port, 19840);
    }

    #[test]
    fn write_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        write_default(&path).unwrap();
        let (config, _) = load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 1984);
        assert!(write_default(&path).is_err());
    }
}
