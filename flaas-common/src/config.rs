//! Configuration file discovery and TOML loading
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config dir>/flaas/config.toml`)
//! 4. Compiled defaults (no file)
//!
//! A missing file is never fatal: callers get `T::default()` and a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FLAAS_CONFIG";

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given on the command line
    CommandLine(PathBuf),
    /// Path taken from the environment variable
    Environment(PathBuf),
    /// Per-user config file found on disk
    UserFile(PathBuf),
    /// No file; compiled defaults in effect
    Defaults,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p) | ConfigSource::Environment(p) | ConfigSource::UserFile(p) => {
                Some(p)
            }
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolve which config file (if any) should be loaded.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    if let Some(path) = user_config_file() {
        if path.exists() {
            return ConfigSource::UserFile(path);
        }
    }

    // Priority 4: Compiled defaults
    ConfigSource::Defaults
}

/// Default per-user config file location for the platform
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flaas").join("config.toml"))
}

/// Parse a TOML file into `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}

/// Load configuration from the resolved source, falling back to defaults.
///
/// A named file that does not exist is only a warning. A file that exists but
/// fails to parse is an error.
pub fn load_or_default<T: DeserializeOwned + Default>(source: &ConfigSource) -> Result<T> {
    let Some(path) = source.path() else {
        info!("No config file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using compiled defaults");
        return Ok(T::default());
    }

    info!(path = %path.display(), "Loading configuration");
    load_toml(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        retries: u32,
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins_over_env() {
        std::env::set_var("FLAAS_TEST_CONFIG_A", "/tmp/from-env.toml");
        let source = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "FLAAS_TEST_CONFIG_A");
        assert_eq!(source, ConfigSource::CommandLine(PathBuf::from("/tmp/from-cli.toml")));
        std::env::remove_var("FLAAS_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_arg() {
        std::env::set_var("FLAAS_TEST_CONFIG_B", "/tmp/from-env.toml");
        let source = resolve_config_path(None, "FLAAS_TEST_CONFIG_B");
        assert_eq!(source, ConfigSource::Environment(PathBuf::from("/tmp/from-env.toml")));
        std::env::remove_var("FLAAS_TEST_CONFIG_B");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let source = ConfigSource::CommandLine(PathBuf::from("/nonexistent/flaas/config.toml"));
        let loaded: Sample = load_or_default(&source).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retries = 4").unwrap();

        let source = ConfigSource::CommandLine(file.path().to_path_buf());
        let loaded: Sample = load_or_default(&source).unwrap();
        assert_eq!(loaded.retries, 4);
        assert_eq!(loaded.name, "");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retries = \"four\"").unwrap();

        let source = ConfigSource::CommandLine(file.path().to_path_buf());
        let result: Result<Sample> = load_or_default(&source);
        assert!(matches!(result, Err(Error::ConfigParse { .. })));
    }
}
