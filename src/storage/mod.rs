//! Segment persistence
//!
//! Two interchangeable backends hold a session's segments: the streaming
//! sink appends them to one open destination, the buffered store keeps them
//! as ordered rows until the session is finalized. `SessionStore` owns the
//! choice between them and the one-time failover from sink to buffer.

pub mod buffered;
pub mod export;
pub mod sink;
pub mod store;

pub use buffered::{BufferedStore, PendingSession};
pub use export::write_download;
pub use sink::{DestinationPicker, FilePicker, SinkDestination, StreamingSink};
pub use store::{FinalizeOutcome, SessionStore};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Streaming sink unavailable: {0}")]
    AcquisitionFailed(String),

    #[error("Segment write failed: {0}")]
    WriteFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No store is open")]
    NotOpen,
}

/// Which backend currently receives segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    StreamingSink,
    Buffered,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamingSink => write!(f, "streaming sink"),
            Self::Buffered => write!(f, "buffered store"),
        }
    }
}
