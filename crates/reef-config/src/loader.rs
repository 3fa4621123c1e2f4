//! Configuration loading

use crate::error::{ConfigError, Result};
use crate::{ConfigFormat, HostConfig};
use regex::{Captures, Regex};
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file, detecting the format from its extension
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    load_from_str(&content, format)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<HostConfig> {
    // Expand environment variables first
    let expanded = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded).map_err(|e| parse_error("YAML", e))?,
        ConfigFormat::Toml => toml::from_str(&expanded).map_err(|e| parse_error("TOML", e))?,
        ConfigFormat::Json => serde_json::from_str(&expanded).map_err(|e| parse_error("JSON", e))?,
    };

    Ok(config)
}

/// Load, then validate
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

fn parse_error(format: &'static str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        format,
        message: e.to_string(),
    }
}

/// Expand `${VAR}` and `${VAR:-default}`
pub(crate) fn expand_env_vars(content: &str) -> Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| ConfigError::invalid(format!("Invalid regex: {e}")))?;
    let mut missing = None;

    let expanded = pattern.replace_all(content, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (env::var(name), caps.get(3)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::MissingVar(name)),
        None => Ok(expanded.into_owned()),
    }
}
