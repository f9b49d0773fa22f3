//! Capture trait definitions
//!
//! Platform-agnostic traits for capture targets and the locators that find
//! them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Target cannot produce a capturable stream: {0}")]
    NotCapturable(String),

    #[error("Failed to start capture process: {0}")]
    Spawn(String),

    #[error("Playback request refused: {0}")]
    PlaybackRefused(String),
}

/// Observable changes on a capture target and its environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetSignal {
    /// Playback started or resumed
    Playing,
    /// Playback paused
    Paused,
    /// Playback stopped making progress
    Stalled,
    /// The media reached its end
    Ended,
    /// The host surface became visible (`true`) or hidden (`false`)
    Visibility(bool),
    /// Network connectivity was restored
    Online,
    /// Network connectivity was lost
    Offline,
}

/// A source that can be captured
pub trait CaptureTarget: Send + Sync {
    /// Stable identifier, usually the locator the target was resolved from
    fn id(&self) -> &str;

    /// Input the capture engine reads from, `None` if nothing is capturable
    fn stream_source(&self) -> Option<String>;

    /// Whether playback is currently paused
    fn is_paused(&self) -> bool;

    /// Whether the host surface is visible
    fn is_visible(&self) -> bool;

    /// Ask the target to start playback
    fn request_play(&self) -> Result<(), CaptureError>;

    /// Subscribe to target and environment signals
    fn subscribe(&self) -> broadcast::Receiver<TargetSignal>;
}

/// Resolves a locator string to a capture target
#[async_trait]
pub trait TargetLocator: Send + Sync {
    /// Returns `None` when nothing matches the locator
    async fn resolve(&self, locator: &str) -> Option<Arc<dyn CaptureTarget>>;
}
