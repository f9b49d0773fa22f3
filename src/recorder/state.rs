//! Recording state management
//!
//! Defines the session state machine, the per-session configuration and the
//! segment type that flows from the capture engine into storage and delivery.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Placeholder bot token shipped in default settings
pub const PLACEHOLDER_BOT_TOKEN: &str = "YOUR_TELEGRAM_BOT_TOKEN";

/// Placeholder recipient id shipped in default settings
pub const PLACEHOLDER_RECIPIENT_ID: &str = "YOUR_TELEGRAM_CHAT_ID";

/// Default local upload endpoint
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:3000/upload.php";

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session has been started
    Idle,
    /// Resolving the target, opening storage or waiting for playback
    Starting,
    /// Capture engine running, segments flowing
    Recording,
    /// Stop requested, waiting for the engine to drain
    Stopping,
    /// Session finalized
    Stopped,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Whether the session still owns its target
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Recording | Self::Stopping)
    }
}

/// Which delivery destinations receive segments and the assembled recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryToggles {
    /// Send the assembled recording to the local endpoint on stop
    pub send_full_to_local: bool,
    /// Send every segment to the local endpoint as it is captured
    pub send_segments_to_local: bool,
    /// Send the assembled recording to the remote bot on stop
    pub send_full_to_remote: bool,
    /// Send every segment to the remote bot as it is captured
    pub send_segments_to_remote: bool,
}

/// Credentials for the remote bot endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCredentials {
    pub token: String,
    pub recipient_id: String,
}

impl Default for RemoteCredentials {
    fn default() -> Self {
        Self {
            token: PLACEHOLDER_BOT_TOKEN.to_string(),
            recipient_id: PLACEHOLDER_RECIPIENT_ID.to_string(),
        }
    }
}

impl RemoteCredentials {
    /// Empty or placeholder values mean "not configured"
    pub fn is_configured(&self) -> bool {
        let token = self.token.trim();
        let recipient = self.recipient_id.trim();
        !token.is_empty()
            && token != PLACEHOLDER_BOT_TOKEN
            && !recipient.is_empty()
            && recipient != PLACEHOLDER_RECIPIENT_ID
    }
}

/// Configuration for one recording session
///
/// Supplied with every start command and never mutated while the session runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Locator used to resolve the capture target (stream URL or file path)
    pub target_locator: String,

    /// Length of each segment in milliseconds
    pub segment_interval_ms: u64,

    /// Total session length in milliseconds before an automatic stop
    pub total_duration_ms: u64,

    /// Local upload endpoint
    pub local_endpoint_url: String,

    /// Delivery toggles
    pub delivery: DeliveryToggles,

    /// Remote bot credentials
    pub remote: RemoteCredentials,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_locator: String::new(),
            segment_interval_ms: 5 * 60 * 1000,
            total_duration_ms: 5 * 60 * 60 * 1000,
            local_endpoint_url: DEFAULT_LOCAL_ENDPOINT.to_string(),
            delivery: DeliveryToggles::default(),
            remote: RemoteCredentials::default(),
        }
    }
}

impl SessionConfig {
    pub fn segment_interval(&self) -> Duration {
        Duration::from_millis(self.segment_interval_ms)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms)
    }

    /// Reject configurations the controller cannot run
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_interval_ms == 0 {
            return Err("segment interval must be greater than zero".to_string());
        }
        if self.total_duration_ms == 0 {
            return Err("total duration must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// One time-bounded chunk of captured stream data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Emission order within the session, starting at 0
    pub index: u64,
    /// Encoded bytes
    pub data: Bytes,
    /// Wall-clock time the engine emitted the segment
    pub captured_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(index: u64, data: Bytes) -> Self {
        Self {
            index,
            data,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Concatenate segments in emission order
pub fn assemble(segments: &[Segment]) -> Bytes {
    let total: usize = segments.iter().map(Segment::len).sum();
    let mut out = Vec::with_capacity(total);
    for segment in segments {
        out.extend_from_slice(&segment.data);
    }
    Bytes::from(out)
}

/// Reasons a session could not reach or keep the Recording state
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum SessionFailure {
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("No storage backend available: {0}")]
    StoreUnavailable(String),

    #[error("Target is not capturable: {0}")]
    NotCapturable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result of a finalized session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id
    pub session_id: Uuid,

    /// Target the session recorded
    pub target: String,

    /// Number of segments in the assembled recording
    pub segment_count: usize,

    /// Size of the assembled recording in bytes
    pub total_bytes: u64,

    /// Whether the streaming sink failed over to the buffered store
    pub failed_over: bool,

    /// Number of capture restarts performed
    pub restarts: u32,

    /// File written by the streaming sink, if it was used
    pub sink_location: Option<String>,

    /// Recording reconstructed from the buffered store, if any
    pub download: Option<String>,

    /// Buffered rows were left in place for `recover`
    pub rows_retained: bool,

    /// Unix timestamp when the session started
    pub started_at: DateTime<Utc>,

    /// Unix timestamp when the session stopped
    pub stopped_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_persisted_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.segment_interval(), Duration::from_secs(300));
        assert_eq!(config.total_duration(), Duration::from_secs(5 * 3600));
        assert_eq!(config.delivery, DeliveryToggles::default());
        assert!(!config.remote.is_configured());
    }

    #[test]
    fn test_credentials_placeholders_are_not_configured() {
        let mut creds = RemoteCredentials {
            token: "123:abc".to_string(),
            recipient_id: PLACEHOLDER_RECIPIENT_ID.to_string(),
        };
        assert!(!creds.is_configured());

        creds.recipient_id = "  ".to_string();
        assert!(!creds.is_configured());

        creds.recipient_id = "4242".to_string();
        assert!(creds.is_configured());
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_ok());

        config.segment_interval_ms = 0;
        assert!(config.validate().is_err());

        config.segment_interval_ms = 1000;
        config.total_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_assemble_preserves_order() {
        let segments = vec![
            Segment::new(0, Bytes::from_static(b"ab")),
            Segment::new(1, Bytes::from_static(b"cd")),
            Segment::new(2, Bytes::from_static(b"e")),
        ];
        assert_eq!(assemble(&segments), Bytes::from_static(b"abcde"));
        assert!(assemble(&[]).is_empty());
    }

    #[test]
    fn test_active_states() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Starting.is_active());
        assert!(SessionState::Recording.is_active());
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Stopped.is_active());
    }
}
