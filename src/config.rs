//! Configuration handling for stpl.
//! Loads template search settings from `stpl.json`, `stpl.yml` or `stpl.yaml`.

use crate::constants::{CONFIG_FILES, DEFAULT_BUFFER_SIZE, TEMPLATE_EXTENSIONS};
use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Template manager settings. Every field is optional in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories searched for templates, in order
    pub directories: Vec<PathBuf>,
    /// Extensions tried after the bare template name
    pub extensions: Vec<String>,
    /// Chunk size of buffered rendering
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from(".")],
            extensions: TEMPLATE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Resolves relative search directories against `base`.
    pub fn relative_to<P: AsRef<Path>>(mut self, base: P) -> Self {
        let base = base.as_ref();
        for dir in &mut self.directories {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        self
    }
}

/// Finds the first configuration file present in a directory.
///
/// # Arguments
/// * `dir` - Directory to look in
/// * `config_files` - Candidate file names, in order of preference
///
/// # Returns
/// * `Option<PathBuf>` - Path of the first existing file
pub fn find_config<P: AsRef<Path>>(dir: P, config_files: &[&str]) -> Option<PathBuf> {
    config_files
        .iter()
        .map(|file| dir.as_ref().join(file))
        .find(|path| path.is_file())
}

/// Parses configuration content, trying JSON first and YAML second.
///
/// # Errors
/// * `Error::ConfigError` if the content is neither valid JSON nor valid YAML
pub fn parse_config(content: &str) -> Result<Config> {
    match serde_json::from_str(content) {
        Ok(config) => Ok(config),
        Err(_) => serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid configuration format: {e}"))),
    }
}

/// Reads a configuration file, resolving its directories against the file's location.
///
/// # Errors
/// * `Error::IoError` if the file cannot be read
/// * `Error::ConfigError` if it cannot be parsed
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path).map_err(Error::IoError)?;
    let config = parse_config(&content)?;
    Ok(match path.parent() {
        Some(base) if !base.as_os_str().is_empty() => config.relative_to(base),
        _ => config,
    })
}

/// Loads the configuration of a directory, falling back to defaults.
pub fn get_config<P: AsRef<Path>>(dir: P) -> Result<Config> {
    match find_config(&dir, &CONFIG_FILES) {
        Some(path) => read_config(path),
        None => {
            debug!("No configuration file in {}, using defaults", dir.as_ref().display());
            Ok(Config::default())
        }
    }
}
