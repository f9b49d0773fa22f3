//! Continuity monitor
//!
//! Watches a capture target's playback and environment signals while a
//! session is running and asks the session to resume capture when it should
//! be capturing but is not. It never touches storage or delivery itself.

use crate::capture::{CaptureTarget, TargetSignal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Why capture is being (re)started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResumeReason {
    /// The target started playing
    Playing,
    /// The host surface became visible while the target plays
    Visible,
    /// Connectivity came back while the target plays on a visible surface
    Online,
    /// Scheduled restart after an engine fault
    Restart,
}

impl std::fmt::Display for ResumeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playing => write!(f, "playback started"),
            Self::Visible => write!(f, "surface visible"),
            Self::Online => write!(f, "back online"),
            Self::Restart => write!(f, "restart after fault"),
        }
    }
}

/// Returns whether capture is currently running
pub type CapturingProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Delivers a resume request, returning `false` once the session is gone
pub type ResumeRequester = Arc<dyn Fn(ResumeReason) -> bool + Send + Sync>;

/// Observer task bound to one target
pub struct ContinuityMonitor {
    armed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ContinuityMonitor {
    /// Start observing `target`
    ///
    /// The monitor starts armed: the first `Playing` signal may trigger one
    /// resume, later ones are ignored until `arm` is called again.
    pub fn start(
        target: Arc<dyn CaptureTarget>,
        capturing: CapturingProbe,
        request: ResumeRequester,
    ) -> Self {
        let armed = Arc::new(AtomicBool::new(true));
        let mut signals = target.subscribe();
        let task_armed = armed.clone();

        let task = tokio::spawn(async move {
            loop {
                let signal = match signals.recv().await {
                    Ok(signal) => signal,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Continuity monitor skipped {} signals", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let resume = match signal {
                    TargetSignal::Playing => {
                        // One-shot per arm cycle
                        if task_armed.swap(false, Ordering::SeqCst) && !capturing() {
                            Some(ResumeReason::Playing)
                        } else {
                            None
                        }
                    }
                    TargetSignal::Visibility(true) if !target.is_paused() && !capturing() => {
                        Some(ResumeReason::Visible)
                    }
                    TargetSignal::Online
                        if target.is_visible() && !target.is_paused() && !capturing() =>
                    {
                        Some(ResumeReason::Online)
                    }
                    TargetSignal::Stalled => {
                        tracing::warn!("Target {} stalled, requesting playback", target.id());
                        if let Err(e) = target.request_play() {
                            tracing::error!("Could not resume playback after stall: {}", e);
                        }
                        None
                    }
                    TargetSignal::Paused => {
                        tracing::warn!("Target {} paused, capture continues", target.id());
                        None
                    }
                    TargetSignal::Ended => {
                        tracing::warn!("Target {} ended, capture continues while the stream is live", target.id());
                        None
                    }
                    TargetSignal::Offline => {
                        tracing::warn!("Connectivity lost while observing {}", target.id());
                        None
                    }
                    _ => None,
                };

                if let Some(reason) = resume {
                    tracing::info!("Continuity monitor requesting capture: {}", reason);
                    if !request(reason) {
                        break;
                    }
                }
            }
        });

        Self {
            armed,
            task: Some(task),
        }
    }

    /// Re-arm the one-shot `Playing` trigger
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Disarm and stop observing
    pub fn stop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ContinuityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
