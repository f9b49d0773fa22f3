//! Settings schema definitions
//!
//! These types describe the persisted settings file. Every section falls back
//! to its defaults when missing, so a partial file is always valid input.

use crate::recorder::state::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Try the streaming sink before the buffered store
    pub sink_enabled: bool,
    /// Directory the streaming sink creates recording files in
    pub sink_dir: PathBuf,
    /// SQLite database backing the buffered store
    pub database_path: PathBuf,
    /// Directory for recordings reconstructed from the buffered store
    pub downloads_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            sink_enabled: true,
            sink_dir: PathBuf::from("recordings"),
            database_path: PathBuf::from("recordings/segments.db"),
            downloads_dir: PathBuf::from("downloads"),
        }
    }
}

// =============================================================================
// Capture
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// FFmpeg binary
    pub ffmpeg_path: String,
    /// Container muxer passed to `-f`
    pub container: String,
    /// File extension matching the container
    pub file_extension: String,
    /// Read buffer size for the engine's stdout
    pub read_chunk_bytes: usize,
    /// How long a graceful stop may take before the process is killed
    pub stop_grace_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            container: "matroska".to_string(),
            file_extension: "mkv".to_string(),
            read_chunk_bytes: 64 * 1024,
            stop_grace_ms: 5_000,
        }
    }
}

impl CaptureSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

// =============================================================================
// Delivery
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Base URL of the bot API
    pub remote_api_base: String,
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Upload chunk size, which is also the progress granularity
    pub chunk_bytes: usize,
    /// User agent string
    pub user_agent: String,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            remote_api_base: "https://api.telegram.org".to_string(),
            // Full recordings can be several gigabytes
            timeout_secs: 3_600,
            connect_timeout_secs: 10,
            chunk_bytes: 64 * 1024,
            user_agent: format!("segment-recorder/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Delay before restarting capture after an engine fault
    pub restart_delay_ms: u64,
    /// Capacity of the notification channel shared by all sessions
    pub event_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            restart_delay_ms: 1_000,
            event_capacity: 256,
        }
    }
}

impl ControllerSettings {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

// =============================================================================
// Logging
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "segment_recorder=info".to_string(),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session: SessionConfig,
    pub storage: StorageSettings,
    pub capture: CaptureSettings,
    pub delivery: DeliverySettings,
    pub controller: ControllerSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Check values that would make a session impossible to run
    pub fn validate(&self) -> Result<(), String> {
        self.session.validate()?;
        if self.capture.read_chunk_bytes == 0 {
            return Err("capture.read_chunk_bytes must be greater than zero".to_string());
        }
        if self.controller.event_capacity == 0 {
            return Err("controller.event_capacity must be greater than zero".to_string());
        }
        if self.delivery.chunk_bytes == 0 {
            return Err("delivery.chunk_bytes must be greater than zero".to_string());
        }
        Ok(())
    }
}
