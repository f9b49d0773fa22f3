//! Settings file read/write operations
//!
//! Settings are stored as TOML. A missing file is not an error: the defaults
//! are used, matching what a fresh install would persist.

use super::schema::Settings;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Settings-related errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Read and validate settings from a file
pub fn load(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    settings.validate().map_err(SettingsError::Invalid)?;

    tracing::debug!("Loaded settings from {:?}", path);

    Ok(settings)
}

/// Read settings, falling back to defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        tracing::info!("No settings file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }
    load(path)
}

/// Write settings to a file, creating parent directories as needed
pub fn save(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    settings.validate().map_err(SettingsError::Invalid)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(settings)?;
    fs::write(path, content)?;

    tracing::debug!("Saved settings to {:?}", path);

    Ok(())
}
