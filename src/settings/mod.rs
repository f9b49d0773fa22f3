//! Persisted settings
//!
//! The settings file holds the session defaults a start command falls back
//! to, plus storage, capture, delivery and logging configuration.

pub mod file;
pub mod schema;

pub use file::{load, load_or_default, save, SettingsError};
pub use schema::{
    CaptureSettings, ControllerSettings, DeliverySettings, LoggingSettings, Settings,
    StorageSettings,
};
