//! Capture engine abstraction
//!
//! An engine turns a capture target into a push-based stream of segments.
//! It reports through `EngineEvents`, which tags every event with the engine
//! generation so the controller can ignore events from a replaced engine.

use super::traits::{CaptureError, CaptureTarget};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Events an engine pushes to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// One segment worth of encoded bytes
    Segment(Bytes),
    /// Graceful stop finished; no further events follow
    Completed,
    /// The engine died without being asked to stop; no further events follow
    Fault(String),
}

type EventSink = dyn Fn(u64, EngineEvent) -> bool + Send + Sync;

/// Delivery channel from an engine back to its owner
#[derive(Clone)]
pub struct EngineEvents {
    generation: u64,
    sink: Arc<EventSink>,
}

impl EngineEvents {
    pub fn new(generation: u64, sink: Arc<EventSink>) -> Self {
        Self { generation, sink }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the owner is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        (self.sink)(self.generation, event)
    }

    pub fn segment(&self, data: Bytes) -> bool {
        self.emit(EngineEvent::Segment(data))
    }

    pub fn completed(&self) -> bool {
        self.emit(EngineEvent::Completed)
    }

    pub fn fault(&self, reason: impl Into<String>) -> bool {
        self.emit(EngineEvent::Fault(reason.into()))
    }
}

/// Control handle for a running engine
#[async_trait]
pub trait EngineHandle: Send {
    /// Request a graceful stop
    ///
    /// Exactly one `Completed` event follows unless the engine already
    /// faulted, and no segment is emitted after it.
    async fn stop(&mut self);
}

/// Starts engines for capture targets
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn start(
        &self,
        target: Arc<dyn CaptureTarget>,
        segment_interval: Duration,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineHandle>, CaptureError>;
}
