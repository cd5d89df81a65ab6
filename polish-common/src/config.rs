//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging section shared by every service TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when neither `RUST_LOG` nor `filter` is set
    pub level: String,
    /// Full `EnvFilter` directive string (overrides `level`)
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Filter directives for a crate, e.g. `polish_optimizer=info,tower_http=info`
    pub fn directives(&self, crate_name: &str) -> String {
        match &self.filter {
            Some(filter) if !filter.trim().is_empty() => filter.clone(),
            _ => format!("{crate_name}={level},tower_http={level}", level = self.level),
        }
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` from the TOML config file
/// 4. OS-dependent default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_root: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_root {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// Default TOML path for a module: `<config dir>/polish/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("polish").join(format!("{module_name}.toml")))
}

/// Load a TOML config file.
///
/// An explicit path must exist. Without one, the module's default path is
/// tried and `T::default()` is returned when it is absent.
pub fn load_toml_config<T>(explicit: Option<&Path>, module_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path(module_name) {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!(module = module_name, "No config file found, using defaults");
                return Ok(T::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("polish"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/polish"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("polish"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/polish"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("polish"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\polish"))
    } else {
        PathBuf::from("./polish_data")
    }
}
