//! Stream and file capture targets
//!
//! A `MediaSource` is anything FFmpeg can read: a network stream URL or a
//! local file. The host process drives its playback and environment signals,
//! which the session's continuity monitor observes.

use super::traits::{CaptureError, CaptureTarget, TargetLocator, TargetSignal};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

const SIGNAL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
struct PlaybackFlags {
    paused: bool,
    visible: bool,
}

/// A capturable stream URL or file path
pub struct MediaSource {
    locator: String,
    flags: Mutex<PlaybackFlags>,
    signals: broadcast::Sender<TargetSignal>,
}

impl MediaSource {
    pub fn new(locator: impl Into<String>) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            locator: locator.into(),
            flags: Mutex::new(PlaybackFlags {
                paused: false,
                visible: true,
            }),
            signals,
        }
    }

    /// Record a signal reported by the host and notify observers
    ///
    /// Playback and visibility signals also update the flags the continuity
    /// monitor reads.
    pub fn publish(&self, signal: TargetSignal) {
        {
            let mut flags = self.flags.lock();
            match signal {
                TargetSignal::Playing => flags.paused = false,
                TargetSignal::Paused => flags.paused = true,
                TargetSignal::Visibility(visible) => flags.visible = visible,
                _ => {}
            }
        }
        // No subscribers just means no session is watching
        let _ = self.signals.send(signal);
    }

    pub fn set_playing(&self) {
        self.publish(TargetSignal::Playing);
    }

    pub fn set_paused(&self) {
        self.publish(TargetSignal::Paused);
    }

    pub fn set_visible(&self, visible: bool) {
        self.publish(TargetSignal::Visibility(visible));
    }

    pub fn notify_stalled(&self) {
        self.publish(TargetSignal::Stalled);
    }

    pub fn notify_online(&self) {
        self.publish(TargetSignal::Online);
    }
}

impl CaptureTarget for MediaSource {
    fn id(&self) -> &str {
        &self.locator
    }

    fn stream_source(&self) -> Option<String> {
        if is_url(&self.locator) || Path::new(&self.locator).exists() {
            Some(self.locator.clone())
        } else {
            None
        }
    }

    fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    fn is_visible(&self) -> bool {
        self.flags.lock().visible
    }

    fn request_play(&self) -> Result<(), CaptureError> {
        // FFmpeg pulls the stream itself, so a play request always succeeds
        self.set_playing();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TargetSignal> {
        self.signals.subscribe()
    }
}

/// Resolves locators to cached `MediaSource` targets
///
/// The cache keeps one target per locator, so signals the host publishes on a
/// target reach every session that resolved it.
#[derive(Default)]
pub struct SourceLocator {
    targets: Mutex<HashMap<String, Arc<MediaSource>>>,
}

impl SourceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the target for a locator without checking that it exists
    pub fn target(&self, locator: &str) -> Arc<MediaSource> {
        self.targets
            .lock()
            .entry(locator.to_string())
            .or_insert_with(|| Arc::new(MediaSource::new(locator)))
            .clone()
    }
}

#[async_trait]
impl TargetLocator for SourceLocator {
    async fn resolve(&self, locator: &str) -> Option<Arc<dyn CaptureTarget>> {
        let locator = locator.trim();
        if locator.is_empty() {
            return None;
        }
        if !is_url(locator) && !tokio::fs::try_exists(locator).await.unwrap_or(false) {
            tracing::debug!("Locator {} matches no stream or file", locator);
            return None;
        }
        Some(self.target(locator) as Arc<dyn CaptureTarget>)
    }
}

/// Whether a locator looks like `scheme://...`
pub fn is_url(locator: &str) -> bool {
    match locator.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}
