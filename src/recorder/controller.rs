//! Recording session controller
//!
//! Each session runs as one actor task. Engine events, stop commands, monitor
//! requests and timers all funnel through the session inbox and are handled
//! one at a time, so segments are persisted strictly in emission order.
//! Deliveries run beside the actor and are drained before it exits.

use super::events::SessionEvent;
use super::monitor::{ContinuityMonitor, ResumeReason};
use super::state::{SessionConfig, SessionFailure, SessionState, SessionSummary, Segment};
use crate::capture::{
    CaptureEngine, CaptureError, CaptureTarget, EngineEvent, EngineEvents, EngineHandle,
    FfmpegEngine, TargetLocator, TargetSignal,
};
use crate::delivery::{
    Delivery, DeliveryClient, DeliveryEndpoints, DeliveryError, DeliveryRequest, Destination,
    ProgressCallback,
};
use crate::settings::Settings;
use crate::storage::store::StorageBackends;
use crate::storage::{FilePicker, SessionStore};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionServices {
    pub locator: Arc<dyn TargetLocator>,
    pub engine: Arc<dyn CaptureEngine>,
    pub storage: Arc<StorageBackends>,
    pub delivery: Arc<dyn Delivery>,
    /// Delay before restarting capture after an engine fault
    pub restart_delay: Duration,
    /// Extension used for delivered file names
    pub file_extension: String,
    pub events: broadcast::Sender<SessionEvent>,
}

impl SessionServices {
    /// Build the production services: FFmpeg capture, file sink with SQLite
    /// fallback and HTTP delivery
    pub fn from_settings(
        settings: &Settings,
        locator: Arc<dyn TargetLocator>,
    ) -> Result<Self, DeliveryError> {
        let picker = Arc::new(FilePicker::from_settings(&settings.storage, &settings.capture));
        let storage = Arc::new(StorageBackends::new(
            picker,
            settings.storage.database_path.clone(),
            settings.storage.downloads_dir.clone(),
            settings.capture.file_extension.clone(),
        ));
        let (events, _) = broadcast::channel(settings.controller.event_capacity.max(1));

        Ok(Self {
            locator,
            engine: Arc::new(FfmpegEngine::new(settings.capture.clone())),
            storage,
            delivery: Arc::new(DeliveryClient::new(&settings.delivery)?),
            restart_delay: settings.controller.restart_delay(),
            file_extension: settings.capture.file_extension.clone(),
            events,
        })
    }
}

/// Final result of a session
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The session recorded and finalized
    Finished(SessionSummary),
    /// The session never reached Recording
    Failed(SessionFailure),
}

impl SessionOutcome {
    pub fn summary(&self) -> Option<&SessionSummary> {
        match self {
            Self::Finished(summary) => Some(summary),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Finished(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

#[derive(Debug)]
pub(crate) enum SessionMessage {
    Engine { generation: u64, event: EngineEvent },
    Stop,
    DurationElapsed,
    Resume(ResumeReason),
    RestartDue,
    PlaybackObserved,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    target: String,
    state: Arc<RwLock<SessionState>>,
    inbox: mpsc::UnboundedSender<SessionMessage>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Request a graceful stop
    ///
    /// Returns `false` without doing anything unless the session is Starting
    /// or Recording.
    pub fn stop(&self) -> bool {
        match self.state() {
            SessionState::Starting | SessionState::Recording => {
                self.inbox.send(SessionMessage::Stop).is_ok()
            }
            _ => false,
        }
    }

    /// Ask the session to resume capture as the continuity monitor would
    pub fn resume(&self, reason: ResumeReason) -> bool {
        self.inbox.send(SessionMessage::Resume(reason)).is_ok()
    }

    /// Outcome if the session already ended
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the session to end
    ///
    /// Returns `None` only if the session task died without reporting.
    pub async fn wait(&self) -> Option<SessionOutcome> {
        let mut outcome = self.outcome.clone();
        let result = outcome
            .wait_for(|o| o.is_some())
            .await
            .ok()
            .and_then(|o| o.clone());
        result
    }
}

/// Start a session and return immediately
///
/// The returned handle is the start acknowledgement; Recording is confirmed
/// later through a `SessionEvent::Started` notification.
pub fn spawn_session(config: SessionConfig, services: SessionServices) -> SessionHandle {
    let session_id = Uuid::new_v4();
    let target = config.target_locator.trim().to_string();
    let state = Arc::new(RwLock::new(SessionState::Starting));
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = watch::channel(None);

    let actor = SessionActor::new(
        session_id,
        target.clone(),
        config,
        services,
        state.clone(),
        inbox_tx.clone(),
    );

    tokio::spawn(async move {
        let outcome = actor.run(inbox_rx).await;
        let _ = outcome_tx.send(Some(outcome));
    });

    SessionHandle {
        session_id,
        target,
        state,
        inbox: inbox_tx,
        outcome: outcome_rx,
    }
}

enum Flow {
    Continue,
    Finalize,
}

struct SessionActor {
    session_id: Uuid,
    target_locator: String,
    config: SessionConfig,
    endpoints: DeliveryEndpoints,
    services: SessionServices,
    state: Arc<RwLock<SessionState>>,
    inbox: mpsc::UnboundedSender<SessionMessage>,
    store: SessionStore,
    target: Option<Arc<dyn CaptureTarget>>,
    engine: Option<Box<dyn EngineHandle>>,
    monitor: Option<ContinuityMonitor>,
    /// Bumped on every engine start; events from older engines are ignored
    generation: u64,
    next_index: u64,
    stopping: bool,
    awaiting_playback: bool,
    restart_pending: bool,
    started_once: bool,
    restarts: u32,
    timers: Vec<JoinHandle<()>>,
    deliveries: JoinSet<()>,
    started_at: chrono::DateTime<Utc>,
}

impl SessionActor {
    fn new(
        session_id: Uuid,
        target_locator: String,
        config: SessionConfig,
        services: SessionServices,
        state: Arc<RwLock<SessionState>>,
        inbox: mpsc::UnboundedSender<SessionMessage>,
    ) -> Self {
        let store = SessionStore::new(
            services.storage.clone(),
            session_id.to_string(),
            target_locator.clone(),
        );
        let endpoints = DeliveryEndpoints::from(&config);

        Self {
            session_id,
            target_locator,
            config,
            endpoints,
            services,
            state,
            inbox,
            store,
            target: None,
            engine: None,
            monitor: None,
            generation: 0,
            next_index: 0,
            stopping: false,
            awaiting_playback: false,
            restart_pending: false,
            started_once: false,
            restarts: 0,
            timers: Vec::new(),
            deliveries: JoinSet::new(),
            started_at: Utc::now(),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionMessage>) -> SessionOutcome {
        self.set_state(SessionState::Starting);

        if let Err(failure) = self.start().await {
            return self.fail(failure).await;
        }

        while let Some(message) = inbox.recv().await {
            self.reap_deliveries();
            if let Flow::Finalize = self.handle(message).await {
                break;
            }
        }

        SessionOutcome::Finished(self.finalize().await)
    }

    // =========================================================================
    // Starting
    // =========================================================================

    async fn start(&mut self) -> Result<(), SessionFailure> {
        tracing::info!(
            "Starting session {} on {}",
            self.session_id,
            self.target_locator
        );

        self.config
            .validate()
            .map_err(SessionFailure::InvalidConfig)?;

        let target = self
            .services
            .locator
            .resolve(&self.target_locator)
            .await
            .ok_or_else(|| SessionFailure::TargetNotFound(self.target_locator.clone()))?;

        let backend = self
            .store
            .open()
            .await
            .map_err(|e| SessionFailure::StoreUnavailable(e.to_string()))?;
        tracing::info!("Session {} persists to the {}", self.session_id, backend);

        self.spawn_duration_timer();
        self.watch_target(target.clone());
        self.target = Some(target.clone());

        self.begin_capture(target)
            .await
            .map_err(|e| SessionFailure::NotCapturable(e.to_string()))
    }

    /// Start the engine, first asking a paused target to play
    async fn begin_capture(&mut self, target: Arc<dyn CaptureTarget>) -> Result<(), CaptureError> {
        if target.is_paused() {
            let mut signals = target.subscribe();
            target.request_play()?;

            if target.is_paused() {
                tracing::info!(
                    "Target {} is paused, waiting for playback before capturing",
                    target.id()
                );
                self.awaiting_playback = true;
                let inbox = self.inbox.clone();
                self.timers.push(tokio::spawn(async move {
                    loop {
                        match signals.recv().await {
                            Ok(TargetSignal::Playing) => {
                                let _ = inbox.send(SessionMessage::PlaybackObserved);
                                break;
                            }
                            Ok(_) | Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        }
                    }
                }));
                return Ok(());
            }
        }

        self.start_engine(target).await
    }

    async fn start_engine(&mut self, target: Arc<dyn CaptureTarget>) -> Result<(), CaptureError> {
        self.generation += 1;
        let inbox = self.inbox.clone();
        let events = EngineEvents::new(
            self.generation,
            Arc::new(move |generation, event| {
                inbox
                    .send(SessionMessage::Engine { generation, event })
                    .is_ok()
            }),
        );

        let handle = self
            .services
            .engine
            .start(target, self.config.segment_interval(), events)
            .await?;
        self.engine = Some(handle);

        let resumed = self.started_once;
        if resumed {
            self.restarts += 1;
        }
        self.started_once = true;

        self.set_state(SessionState::Recording);
        self.emit(SessionEvent::Started {
            session_id: self.session_id,
            target: self.target_locator.clone(),
            backend: self.store.active_backend(),
            resumed,
        });
        tracing::info!(
            "Session {} recording (generation {})",
            self.session_id,
            self.generation
        );
        Ok(())
    }

    fn watch_target(&mut self, target: Arc<dyn CaptureTarget>) {
        if let Some(mut previous) = self.monitor.take() {
            previous.stop();
        }

        let state = self.state.clone();
        let inbox = self.inbox.clone();
        self.monitor = Some(ContinuityMonitor::start(
            target,
            Arc::new(move || *state.read() == SessionState::Recording),
            Arc::new(move |reason| inbox.send(SessionMessage::Resume(reason)).is_ok()),
        ));
    }

    fn spawn_duration_timer(&mut self) {
        let inbox = self.inbox.clone();
        let total = self.config.total_duration();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(total).await;
            let _ = inbox.send(SessionMessage::DurationElapsed);
        }));
    }

    async fn fail(mut self, failure: SessionFailure) -> SessionOutcome {
        tracing::error!("Session {} could not start: {}", self.session_id, failure);
        self.teardown();

        let state = match failure {
            SessionFailure::TargetNotFound(_) | SessionFailure::InvalidConfig(_) => {
                SessionState::Idle
            }
            SessionFailure::StoreUnavailable(_) | SessionFailure::NotCapturable(_) => {
                SessionState::Stopped
            }
        };

        if self.store.active_backend().is_some() {
            let released = self.store.finalize().await;
            if released.rows_retained {
                tracing::warn!("Buffered rows of session {} left for recovery", self.session_id);
            }
        }

        self.set_state(state);
        self.emit(SessionEvent::Failed {
            session_id: self.session_id,
            target: self.target_locator.clone(),
            failure: failure.clone(),
        });
        SessionOutcome::Failed(failure)
    }

    // =========================================================================
    // Recording
    // =========================================================================

    async fn handle(&mut self, message: SessionMessage) -> Flow {
        match message {
            SessionMessage::Engine { generation, event } if generation != self.generation => {
                tracing::debug!(
                    "Ignoring {:?} from replaced engine generation {}",
                    event,
                    generation
                );
                Flow::Continue
            }
            SessionMessage::Engine {
                event: EngineEvent::Segment(data),
                ..
            } => {
                self.on_segment(data).await;
                Flow::Continue
            }
            SessionMessage::Engine {
                event: EngineEvent::Completed,
                ..
            } => {
                self.engine = None;
                if self.stopping {
                    Flow::Finalize
                } else {
                    self.on_capture_lost("engine completed without a stop request".to_string());
                    Flow::Continue
                }
            }
            SessionMessage::Engine {
                event: EngineEvent::Fault(reason),
                ..
            } => {
                self.engine = None;
                if self.stopping {
                    tracing::warn!("Engine fault while stopping: {}", reason);
                    Flow::Finalize
                } else {
                    self.on_capture_lost(reason);
                    Flow::Continue
                }
            }
            SessionMessage::Stop => self.begin_stop("stop command").await,
            SessionMessage::DurationElapsed => self.begin_stop("total duration reached").await,
            SessionMessage::RestartDue => {
                self.restart_pending = false;
                if !self.stopping && self.engine.is_none() && !self.awaiting_playback {
                    self.resume(ResumeReason::Restart).await;
                }
                Flow::Continue
            }
            SessionMessage::Resume(reason) => {
                if self.stopping
                    || self.engine.is_some()
                    || self.awaiting_playback
                    || self.restart_pending
                {
                    tracing::debug!("Resume ({}) ignored, capture running or pending", reason);
                } else {
                    self.emit(SessionEvent::Resuming {
                        session_id: self.session_id,
                        reason,
                    });
                    self.resume(reason).await;
                }
                Flow::Continue
            }
            SessionMessage::PlaybackObserved => {
                if self.awaiting_playback && !self.stopping && self.engine.is_none() {
                    self.awaiting_playback = false;
                    if let Some(target) = self.target.clone() {
                        if let Err(e) = self.start_engine(target).await {
                            tracing::warn!("Capture did not start after playback: {}", e);
                        }
                    }
                }
                Flow::Continue
            }
        }
    }

    async fn on_segment(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }

        let index = self.next_index;
        self.next_index += 1;
        let bytes = data.len() as u64;
        let was_failed_over = self.store.failed_over();

        match self.store.persist(Segment::new(index, data.clone())).await {
            Ok(backend) => {
                self.emit(SessionEvent::SegmentPersisted {
                    session_id: self.session_id,
                    index,
                    bytes,
                    backend,
                });
            }
            Err(e) => {
                tracing::error!(
                    "Segment {} of session {} held in memory, no backend accepted it: {}",
                    index,
                    self.session_id,
                    e
                );
            }
        }

        if !was_failed_over && self.store.failed_over() {
            self.emit(SessionEvent::FailedOver {
                session_id: self.session_id,
                at_segment: index,
            });
        }

        let toggles = self.config.delivery;
        if toggles.send_segments_to_local {
            self.dispatch(DeliveryRequest::segment(
                Destination::Local,
                index,
                data.clone(),
                &self.services.file_extension,
            ));
        }
        if toggles.send_segments_to_remote {
            self.dispatch(DeliveryRequest::segment(
                Destination::RemoteBot,
                index,
                data,
                &self.services.file_extension,
            ));
        }
    }

    /// The engine went away without a stop request: schedule one restart
    fn on_capture_lost(&mut self, reason: String) {
        tracing::warn!(
            "Capture of {} lost: {}; restarting in {:?}",
            self.target_locator,
            reason,
            self.services.restart_delay
        );

        self.set_state(SessionState::Starting);
        self.emit(SessionEvent::Restarting {
            session_id: self.session_id,
            reason,
        });
        if let Some(monitor) = &self.monitor {
            monitor.arm();
        }

        self.restart_pending = true;
        let inbox = self.inbox.clone();
        let delay = self.services.restart_delay;
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(SessionMessage::RestartDue);
        }));
    }

    /// Re-resolve the target and start capture again
    async fn resume(&mut self, reason: ResumeReason) {
        tracing::info!("Resuming capture of {}: {}", self.target_locator, reason);

        let Some(target) = self.services.locator.resolve(&self.target_locator).await else {
            tracing::warn!(
                "Target {} not found, waiting for the continuity monitor",
                self.target_locator
            );
            return;
        };

        let same_target = self
            .target
            .as_ref()
            .map(|current| {
                Arc::as_ptr(current) as *const () == Arc::as_ptr(&target) as *const ()
            })
            .unwrap_or(false);
        if !same_target {
            self.watch_target(target.clone());
        }
        self.target = Some(target.clone());

        if let Err(e) = self.begin_capture(target).await {
            tracing::warn!("Capture restart failed: {}", e);
        }
    }

    // =========================================================================
    // Stopping
    // =========================================================================

    async fn begin_stop(&mut self, reason: &str) -> Flow {
        if self.stopping {
            return Flow::Continue;
        }
        self.stopping = true;
        tracing::info!("Stopping session {}: {}", self.session_id, reason);
        self.set_state(SessionState::Stopping);

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        match self.engine.as_mut() {
            Some(engine) => {
                engine.stop().await;
                Flow::Continue
            }
            None => Flow::Finalize,
        }
    }

    async fn finalize(mut self) -> SessionSummary {
        self.teardown();

        let outcome = self.store.finalize().await;
        let mut summary = SessionSummary {
            session_id: self.session_id,
            target: self.target_locator.clone(),
            segment_count: outcome.segments.len(),
            total_bytes: outcome.total_bytes(),
            failed_over: outcome.failed_over,
            restarts: self.restarts,
            sink_location: outcome.sink_location.clone(),
            download: outcome
                .download
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            rows_retained: outcome.rows_retained,
            started_at: self.started_at,
            stopped_at: self.started_at,
        };

        if outcome.rows_retained {
            tracing::warn!(
                "Buffered segments of session {} kept, run recover to export them",
                self.session_id
            );
        }

        if outcome.is_empty() {
            tracing::warn!("Session {} captured no segments", self.session_id);
        } else {
            let blob = outcome.assembled();
            let toggles = self.config.delivery;
            if toggles.send_full_to_local {
                self.dispatch(DeliveryRequest::full(
                    Destination::Local,
                    blob.clone(),
                    &self.services.file_extension,
                ));
            }
            if toggles.send_full_to_remote {
                self.dispatch(DeliveryRequest::full(
                    Destination::RemoteBot,
                    blob,
                    &self.services.file_extension,
                ));
            }
        }

        while let Some(result) = self.deliveries.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Delivery task ended abnormally: {}", e);
            }
        }

        summary.stopped_at = Utc::now();
        self.set_state(SessionState::Stopped);
        self.emit(SessionEvent::Stopped {
            session_id: self.session_id,
            summary: summary.clone(),
        });
        tracing::info!(
            "Session {} stopped: {} segments, {} bytes",
            self.session_id,
            summary.segment_count,
            summary.total_bytes
        );
        summary
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Fire-and-forget delivery; the outcome only produces notifications
    fn dispatch(&mut self, request: DeliveryRequest) {
        let delivery = self.services.delivery.clone();
        let endpoints = self.endpoints.clone();
        let events = self.services.events.clone();
        let session_id = self.session_id;

        let progress_events = events.clone();
        let progress: ProgressCallback = Arc::new(move |progress| {
            let _ = progress_events.send(SessionEvent::DeliveryProgress {
                session_id,
                progress,
            });
        });

        self.deliveries.spawn(async move {
            let destination = request.destination;
            let scope = request.scope;
            let event = match delivery.send(&endpoints, request, progress).await {
                Ok(receipt) => SessionEvent::Delivered {
                    session_id,
                    receipt,
                },
                Err(e) => SessionEvent::DeliveryFailed {
                    session_id,
                    destination,
                    scope,
                    error: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn reap_deliveries(&mut self) {
        while let Some(result) = self.deliveries.try_join_next() {
            if let Err(e) = result {
                tracing::warn!("Delivery task ended abnormally: {}", e);
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::info!(
                "Session {} state: {:?} -> {:?}",
                self.session_id,
                previous,
                state
            );
        }
        self.emit(SessionEvent::StateChanged {
            session_id: self.session_id,
            target: self.target_locator.clone(),
            state,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers just means nobody is listening
        let _ = self.services.events.send(event);
    }
}
