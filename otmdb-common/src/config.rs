//! Configuration loading and root folder resolution
//!
//! Two-tier configuration:
//! 1. **TOML bootstrap**: root folder, database file name, logging (read once at startup)
//! 2. **Database runtime**: everything else lives in the `settings` table
//!    (see [`crate::db::settings`])

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "OTMDB_ROOT_FOLDER";

/// Default database file name inside the root folder
pub const DEFAULT_DATABASE_FILE: &str = "otmdb.db";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Database file name, relative to the root folder
    #[serde(default)]
    pub database_file: Option<String>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Database file name, falling back to [`DEFAULT_DATABASE_FILE`]
    pub fn database_file(&self) -> &str {
        self.database_file.as_deref().unwrap_or(DEFAULT_DATABASE_FILE)
    }
}

/// Parse a TOML config from a string
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))
}

/// Read and parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_config(&content)
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize TOML config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load the platform config file, or defaults when none exists
///
/// A missing config file is not an error. A config file that exists but
/// fails to parse is.
pub fn load_toml_config() -> Result<TomlConfig> {
    match find_config_file() {
        Ok(path) => read_toml_config(&path),
        Err(_) => Ok(TomlConfig::default()),
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: Option<&TomlConfig>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = config.and_then(|c| c.root_folder.clone()) {
        return root_folder;
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get default configuration file path for the platform
pub fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/otmdb/config.toml first, then /etc/otmdb/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("otmdb").join("config.toml"));
        let system_config = PathBuf::from("/etc/otmdb/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("otmdb").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/otmdb (or /var/lib/otmdb for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("otmdb"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/otmdb"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/otmdb
        dirs::data_dir()
            .map(|d| d.join("otmdb"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/otmdb"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\otmdb
        dirs::data_local_dir()
            .map(|d| d.join("otmdb"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\otmdb"))
    } else {
        PathBuf::from("./otmdb_data")
    }
}

/// Resolved root folder plus the database file inside it
#[derive(Debug, Clone)]
pub struct RootFolder {
    path: PathBuf,
    database_file: String,
}

impl RootFolder {
    /// Wrap a resolved root folder
    pub fn new(path: PathBuf, database_file: impl Into<String>) -> Self {
        Self {
            path,
            database_file: database_file.into(),
        }
    }

    /// Root folder path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the root folder if it doesn't exist
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }

    /// Full path of the database file
    pub fn database_path(&self) -> PathBuf {
        self.path.join(&self.database_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = parse_toml_config("").unwrap();
        assert!(config.root_folder.is_none());
        assert_eq!(config.database_file(), DEFAULT_DATABASE_FILE);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse_toml_config(
            r#"
            root_folder = "/srv/otmdb"
            database_file = "catalogue.db"

            [logging]
            level = "debug"
            file = "/var/log/otmdb.log"
            "#,
        )
        .unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/otmdb")));
        assert_eq!(config.database_file(), "catalogue.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/otmdb.log")));
    }

    #[test]
    fn test_parse_invalid_config_is_config_error() {
        let err = parse_toml_config("root_folder = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_root_folder_database_path() {
        let root = RootFolder::new(PathBuf::from("/tmp/otmdb"), "x.db");
        assert_eq!(root.database_path(), PathBuf::from("/tmp/otmdb/x.db"));
    }
}
