//! Upload progress tracking
//!
//! The blob is fed to the HTTP client in fixed-size chunks; each chunk the
//! client pulls advances the tracker, so reports follow the bytes handed to
//! the transport.

use super::types::{DeliveryProgress, DeliveryScope, Destination, ProgressCallback};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Sent {
    bytes: u64,
    complete_reported: bool,
}

/// Monotonic progress reporter for one send
pub struct ProgressTracker {
    destination: Destination,
    scope: DeliveryScope,
    total: u64,
    sent: Mutex<Sent>,
    callback: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(
        destination: Destination,
        scope: DeliveryScope,
        total: u64,
        callback: ProgressCallback,
    ) -> Self {
        Self {
            destination,
            scope,
            total,
            sent: Mutex::new(Sent::default()),
            callback,
        }
    }

    /// Record `n` more bytes handed to the transport
    pub fn advance(&self, n: u64) {
        let mut sent = self.sent.lock();
        sent.bytes = (sent.bytes + n).min(self.total);
        if sent.bytes == self.total {
            sent.complete_reported = true;
        }
        (self.callback)(DeliveryProgress::new(
            self.destination,
            self.scope,
            sent.bytes,
            self.total,
        ));
    }

    /// Report completion if no chunk already did
    pub fn finish(&self) {
        let mut sent = self.sent.lock();
        if sent.complete_reported {
            return;
        }
        sent.bytes = self.total;
        sent.complete_reported = true;
        (self.callback)(DeliveryProgress::new(
            self.destination,
            self.scope,
            self.total,
            self.total,
        ));
    }
}

/// Split `data` into chunks that advance `tracker` as they are pulled
pub fn progress_stream(
    data: Bytes,
    chunk_bytes: usize,
    tracker: Arc<ProgressTracker>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunk = chunk_bytes.max(1);
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(chunk)
        .map(|start| data.slice(start..(start + chunk).min(data.len())))
        .collect();

    stream::iter(chunks).map(move |piece| {
        tracker.advance(piece.len() as u64);
        Ok(piece)
    })
}

/// Request body that reports progress while it is sent
pub fn progress_body(data: Bytes, chunk_bytes: usize, tracker: Arc<ProgressTracker>) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_stream(data, chunk_bytes, tracker))
}
