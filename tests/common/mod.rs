//! Shared fakes for session controller tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use segment_recorder::capture::{
    CaptureEngine, CaptureError, CaptureTarget, EngineEvents, EngineHandle, TargetLocator,
    TargetSignal,
};
use segment_recorder::delivery::{
    Delivery, DeliveryEndpoints, DeliveryError, DeliveryProgress, DeliveryReceipt,
    DeliveryRequest, DeliveryScope, Destination, ProgressCallback,
};
use segment_recorder::recorder::state::SessionConfig;
use segment_recorder::recorder::{SessionEvent, SessionHandle, SessionServices, SessionState};
use segment_recorder::storage::store::StorageBackends;
use segment_recorder::storage::{DestinationPicker, SinkDestination, StoreError};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;

pub const TARGET: &str = "fake://camera";

// =============================================================================
// Capture target
// =============================================================================

/// Target whose playback only starts when the test says so
pub struct StubbornTarget {
    paused: AtomicBool,
    play_requests: AtomicUsize,
    signals: broadcast::Sender<TargetSignal>,
}

impl StubbornTarget {
    pub fn new() -> Arc<Self> {
        let (signals, _) = broadcast::channel(64);
        Arc::new(Self {
            paused: AtomicBool::new(false),
            play_requests: AtomicUsize::new(0),
            signals,
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.signals.send(TargetSignal::Paused);
    }

    pub fn play(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.signals.send(TargetSignal::Playing);
    }

    pub fn signal(&self, signal: TargetSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn play_requests(&self) -> usize {
        self.play_requests.load(Ordering::SeqCst)
    }
}

impl CaptureTarget for StubbornTarget {
    fn id(&self) -> &str {
        TARGET
    }

    fn stream_source(&self) -> Option<String> {
        Some(TARGET.to_string())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn request_play(&self) -> Result<(), CaptureError> {
        self.play_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TargetSignal> {
        self.signals.subscribe()
    }
}

/// Resolves only `TARGET`
pub struct FixedLocator {
    target: Arc<StubbornTarget>,
    resolves: AtomicUsize,
}

impl FixedLocator {
    pub fn new(target: Arc<StubbornTarget>) -> Arc<Self> {
        Arc::new(Self {
            target,
            resolves: AtomicUsize::new(0),
        })
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetLocator for FixedLocator {
    async fn resolve(&self, locator: &str) -> Option<Arc<dyn CaptureTarget>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if locator == TARGET {
            Some(self.target.clone() as Arc<dyn CaptureTarget>)
        } else {
            None
        }
    }
}

// =============================================================================
// Capture engine
// =============================================================================

/// Engine driven by the test: segments and faults are injected by hand
#[derive(Default)]
pub struct ScriptedEngine {
    runs: Mutex<Vec<EngineEvents>>,
    start_attempts: AtomicUsize,
    stops: AtomicUsize,
    fail_next_start: AtomicBool,
    /// Skip the Completed event on stop
    hold_completion: AtomicBool,
    /// Emitted as the final segment on stop
    final_segment: Mutex<Option<Bytes>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn start_attempts(&self) -> usize {
        self.start_attempts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn hold_completion(&self) {
        self.hold_completion.store(true, Ordering::SeqCst);
    }

    pub fn set_final_segment(&self, data: &'static [u8]) {
        *self.final_segment.lock() = Some(Bytes::from_static(data));
    }

    /// Events channel of a given run, 0 being the first
    pub fn run(&self, index: usize) -> EngineEvents {
        self.runs.lock()[index].clone()
    }

    fn latest(&self) -> EngineEvents {
        self.runs
            .lock()
            .last()
            .cloned()
            .expect("engine was never started")
    }

    pub fn segment(&self, data: &[u8]) {
        self.latest().segment(Bytes::copy_from_slice(data));
    }

    pub fn fault(&self, reason: &str) {
        self.latest().fault(reason);
    }

    pub fn complete(&self) {
        self.latest().completed();
    }
}

struct ScriptedHandle {
    engine: Arc<ScriptedEngine>,
    events: EngineEvents,
}

#[async_trait]
impl EngineHandle for ScriptedHandle {
    async fn stop(&mut self) {
        self.engine.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(data) = self.engine.final_segment.lock().take() {
            self.events.segment(data);
        }
        if !self.engine.hold_completion.load(Ordering::SeqCst) {
            self.events.completed();
        }
    }
}

/// `CaptureEngine` wrapper so the test keeps an `Arc` to the engine state
pub struct SharedEngine(pub Arc<ScriptedEngine>);

#[async_trait]
impl CaptureEngine for SharedEngine {
    async fn start(
        &self,
        _target: Arc<dyn CaptureTarget>,
        _segment_interval: Duration,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineHandle>, CaptureError> {
        self.0.start_attempts.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotCapturable("scripted failure".to_string()));
        }
        self.0.runs.lock().push(events.clone());
        Ok(Box::new(ScriptedHandle {
            engine: self.0.clone(),
            events,
        }))
    }
}

// =============================================================================
// Streaming sink
// =============================================================================

/// In-memory destination that can refuse acquisition or fail after N writes
#[derive(Default)]
pub struct MemoryPicker {
    pub written: Arc<Mutex<Vec<u8>>>,
    refuse: AtomicBool,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryPicker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing() -> Arc<Self> {
        let picker = Self::default();
        picker.refuse.store(true, Ordering::SeqCst);
        Arc::new(picker)
    }

    pub fn failing_after(writes: usize) -> Arc<Self> {
        let picker = Self::default();
        *picker.fail_after.lock() = Some(writes);
        Arc::new(picker)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl DestinationPicker for MemoryPicker {
    async fn pick(&self, _target: &str) -> Result<SinkDestination, StoreError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StoreError::AcquisitionFailed("user dismissed the picker".to_string()));
        }
        Ok(SinkDestination::new(
            "memory",
            Box::new(MemoryWriter {
                written: self.written.clone(),
                remaining: *self.fail_after.lock(),
            }),
        ))
    }
}

struct MemoryWriter {
    written: Arc<Mutex<Vec<u8>>>,
    remaining: Option<usize>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.remaining {
            Some(0) => {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "quota exceeded")))
            }
            Some(n) => self.remaining = Some(n - 1),
            None => {}
        }
        self.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// Delivery
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentBlob {
    pub destination: Destination,
    pub scope: DeliveryScope,
    pub data: Bytes,
}

/// Records every send; can be made slow or failing
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<SentBlob>>,
    completed: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Duration>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let delivery = Self::default();
        delivery.fail.store(true, Ordering::SeqCst);
        Arc::new(delivery)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn sent(&self) -> Vec<SentBlob> {
        self.sent.lock().clone()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn full_sends(&self) -> Vec<SentBlob> {
        self.sent()
            .into_iter()
            .filter(|s| s.scope == DeliveryScope::Full)
            .collect()
    }

    pub fn segment_sends(&self) -> Vec<SentBlob> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s.scope, DeliveryScope::Segment(_)))
            .collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send(
        &self,
        _endpoints: &DeliveryEndpoints,
        request: DeliveryRequest,
        progress: ProgressCallback,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        self.sent.lock().push(SentBlob {
            destination: request.destination,
            scope: request.scope,
            data: request.data.clone(),
        });

        let total = request.data.len() as u64;
        progress(DeliveryProgress::new(
            request.destination,
            request.scope,
            total / 2,
            total,
        ));

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("connection refused".to_string()));
        }

        progress(DeliveryProgress::new(
            request.destination,
            request.scope,
            total,
            total,
        ));
        Ok(DeliveryReceipt {
            destination: request.destination,
            scope: request.scope,
            bytes: total,
            status: 200,
            response: None,
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub target: Arc<StubbornTarget>,
    pub locator: Arc<FixedLocator>,
    pub engine: Arc<ScriptedEngine>,
    pub picker: Arc<MemoryPicker>,
    pub delivery: Arc<RecordingDelivery>,
    pub services: SessionServices,
}

impl Harness {
    pub fn new(picker: Arc<MemoryPicker>) -> Self {
        Self::with_delivery(picker, RecordingDelivery::new())
    }

    pub fn with_delivery(picker: Arc<MemoryPicker>, delivery: Arc<RecordingDelivery>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(StorageBackends::new(
            picker.clone(),
            dir.path().join("segments.db"),
            dir.path().join("downloads"),
            "mkv",
        ));
        Self::build(dir, picker, delivery, storage)
    }

    /// Harness whose buffered store cannot be opened
    pub fn without_buffered_store(picker: Arc<MemoryPicker>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");
        let storage = Arc::new(StorageBackends::new(
            picker.clone(),
            blocker.join("segments.db"),
            dir.path().join("downloads"),
            "mkv",
        ));
        Self::build(dir, picker, RecordingDelivery::new(), storage)
    }

    fn build(
        dir: TempDir,
        picker: Arc<MemoryPicker>,
        delivery: Arc<RecordingDelivery>,
        storage: Arc<StorageBackends>,
    ) -> Self {
        let target = StubbornTarget::new();
        let locator = FixedLocator::new(target.clone());
        let engine = ScriptedEngine::new();
        let (events, _) = broadcast::channel(1024);

        let services = SessionServices {
            locator: locator.clone(),
            engine: Arc::new(SharedEngine(engine.clone())),
            storage,
            delivery: delivery.clone(),
            restart_delay: Duration::from_millis(20),
            file_extension: "mkv".to_string(),
            events,
        };

        Self {
            dir,
            target,
            locator,
            engine,
            picker,
            delivery,
            services,
        }
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            target_locator: TARGET.to_string(),
            segment_interval_ms: 1_000,
            total_duration_ms: 60_000,
            ..Default::default()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.services.events.subscribe()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    eventually(&format!("state {:?}", state), || handle.state() == state).await;
}

/// Concatenation of byte strings
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

/// Collects every session notification in the background
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn attach(mut rx: broadcast::Receiver<SessionEvent>) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => events.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        log
    }

    pub fn all(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn persisted(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::SegmentPersisted { .. }))
    }
}
