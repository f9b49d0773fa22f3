//! Session notifications
//!
//! Every session publishes on one broadcast channel so the relay can persist
//! cross-restart state and drive status displays.

use super::monitor::ResumeReason;
use super::state::{SessionFailure, SessionState, SessionSummary};
use crate::delivery::{DeliveryProgress, DeliveryReceipt, DeliveryScope, Destination};
use crate::storage::BackendKind;
use serde::Serialize;
use uuid::Uuid;

/// Events emitted by recording sessions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    /// The session moved to a new state
    #[serde(rename_all = "camelCase")]
    StateChanged {
        session_id: Uuid,
        target: String,
        state: SessionState,
    },

    /// Capture is running; sent every time Recording is entered
    #[serde(rename_all = "camelCase")]
    Started {
        session_id: Uuid,
        target: String,
        backend: Option<BackendKind>,
        resumed: bool,
    },

    /// A segment reached storage
    #[serde(rename_all = "camelCase")]
    SegmentPersisted {
        session_id: Uuid,
        index: u64,
        bytes: u64,
        backend: BackendKind,
    },

    /// The streaming sink failed and the buffered store took over
    #[serde(rename_all = "camelCase")]
    FailedOver { session_id: Uuid, at_segment: u64 },

    /// A restart was scheduled after an engine fault
    #[serde(rename_all = "camelCase")]
    Restarting { session_id: Uuid, reason: String },

    /// Capture was resumed on request of the continuity monitor
    #[serde(rename_all = "camelCase")]
    Resuming {
        session_id: Uuid,
        reason: ResumeReason,
    },

    /// Upload progress
    #[serde(rename_all = "camelCase")]
    DeliveryProgress {
        session_id: Uuid,
        progress: DeliveryProgress,
    },

    /// Upload finished
    #[serde(rename_all = "camelCase")]
    Delivered {
        session_id: Uuid,
        receipt: DeliveryReceipt,
    },

    /// Upload failed or was skipped
    #[serde(rename_all = "camelCase")]
    DeliveryFailed {
        session_id: Uuid,
        destination: Destination,
        scope: DeliveryScope,
        error: String,
    },

    /// The session finalized
    #[serde(rename_all = "camelCase")]
    Stopped {
        session_id: Uuid,
        summary: SessionSummary,
    },

    /// The session could not start
    #[serde(rename_all = "camelCase")]
    Failed {
        session_id: Uuid,
        target: String,
        failure: SessionFailure,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::StateChanged { session_id, .. }
            | Self::Started { session_id, .. }
            | Self::SegmentPersisted { session_id, .. }
            | Self::FailedOver { session_id, .. }
            | Self::Restarting { session_id, .. }
            | Self::Resuming { session_id, .. }
            | Self::DeliveryProgress { session_id, .. }
            | Self::Delivered { session_id, .. }
            | Self::DeliveryFailed { session_id, .. }
            | Self::Stopped { session_id, .. }
            | Self::Failed { session_id, .. } => *session_id,
        }
    }
}
