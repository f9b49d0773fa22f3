//! Delivery types
//!
//! Destinations, requests, progress reports, receipts and errors for the
//! upload fan-out.

use crate::recorder::state::{RemoteCredentials, SessionConfig};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Where a blob is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Destination {
    /// HTTP endpoint accepting a multipart `video` field
    Local,
    /// Bot API `sendDocument` endpoint
    RemoteBot,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local endpoint"),
            Self::RemoteBot => write!(f, "remote bot"),
        }
    }
}

/// What the blob is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "index")]
pub enum DeliveryScope {
    /// A single segment by emission index
    Segment(u64),
    /// The assembled session recording
    Full,
}

impl std::fmt::Display for DeliveryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segment(index) => write!(f, "segment {}", index),
            Self::Full => write!(f, "full recording"),
        }
    }
}

/// Endpoint settings taken from the session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEndpoints {
    pub local_url: String,
    pub remote: RemoteCredentials,
}

impl From<&SessionConfig> for DeliveryEndpoints {
    fn from(config: &SessionConfig) -> Self {
        Self {
            local_url: config.local_endpoint_url.clone(),
            remote: config.remote.clone(),
        }
    }
}

/// One blob to send to one destination
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub destination: Destination,
    pub scope: DeliveryScope,
    pub file_name: String,
    pub data: Bytes,
}

impl DeliveryRequest {
    pub fn segment(destination: Destination, index: u64, data: Bytes, extension: &str) -> Self {
        Self {
            destination,
            scope: DeliveryScope::Segment(index),
            file_name: format!("segment-{}.{}", index, extension),
            data,
        }
    }

    pub fn full(destination: Destination, data: Bytes, extension: &str) -> Self {
        Self {
            destination,
            scope: DeliveryScope::Full,
            file_name: format!("video_recording.{}", extension),
            data,
        }
    }
}

/// Upload progress for one send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryProgress {
    pub destination: Destination,
    pub scope: DeliveryScope,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// Fraction in [0, 1]
    pub fraction: f64,
}

impl DeliveryProgress {
    pub fn new(destination: Destination, scope: DeliveryScope, bytes_sent: u64, total_bytes: u64) -> Self {
        let fraction = if total_bytes == 0 {
            1.0
        } else {
            (bytes_sent.min(total_bytes) as f64 / total_bytes as f64).clamp(0.0, 1.0)
        };
        Self {
            destination,
            scope,
            bytes_sent,
            total_bytes,
            fraction,
        }
    }
}

/// Progress callback invoked during a send
pub type ProgressCallback = Arc<dyn Fn(DeliveryProgress) + Send + Sync>;

/// Progress callback that drops every report
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Successful delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub destination: Destination,
    pub scope: DeliveryScope,
    pub bytes: u64,
    pub status: u16,
    /// Parsed JSON body for bot responses
    pub response: Option<serde_json::Value>,
}

/// Delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Destination is not configured")]
    NotConfigured,

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}
