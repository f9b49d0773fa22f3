//! Recording commands for the host relay
//!
//! The relay talks JSON: `{"action": "startRecording", "options": {...}}`,
//! `{"action": "stopRecording"}` and `{"action": "getRecordingState"}`.
//! Start and stop are acknowledged immediately; the outcome arrives later as
//! session notifications. The host reports playback and environment changes
//! with `{"action": "targetSignal", "signal": "playing"}`, which reach the
//! continuity monitor of any session recording that target.

use crate::capture::{SourceLocator, TargetSignal};
use crate::recorder::state::SessionConfig;
use crate::recorder::{SessionEvent, SessionHandle, SessionRegistry, SessionState};
use crate::utils::{AppError, AppResult, ErrorResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application state for recording
pub struct RecorderState {
    pub registry: SessionRegistry,
    /// Persisted options that fill in anything a start command leaves out
    pub defaults: SessionConfig,
    /// Targets the host publishes signals on
    pub sources: Arc<SourceLocator>,
}

impl RecorderState {
    pub fn new(
        registry: SessionRegistry,
        defaults: SessionConfig,
        sources: Arc<SourceLocator>,
    ) -> Self {
        Self {
            registry,
            defaults,
            sources,
        }
    }

    fn resolve_target(&self, target: Option<&str>) -> String {
        target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.defaults.target_locator.trim())
            .to_string()
    }
}

/// Options carried by a start command
///
/// Field names from the extension-era option pages are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
    #[serde(alias = "videoSelector")]
    pub target_locator: Option<String>,
    #[serde(alias = "segmentDuration")]
    pub segment_interval_ms: Option<u64>,
    #[serde(alias = "recordDuration")]
    pub total_duration_ms: Option<u64>,
    #[serde(alias = "enableSendLocal", alias = "enableLocalSave")]
    pub send_full_to_local: Option<bool>,
    #[serde(alias = "enableSendSegmentLocal", alias = "enableSegmentLocalSave")]
    pub send_segments_to_local: Option<bool>,
    #[serde(alias = "enableTelegramSave")]
    pub send_full_to_remote: Option<bool>,
    #[serde(alias = "enableSendSegmentTelegram", alias = "enableSegmentTelegramSave")]
    pub send_segments_to_remote: Option<bool>,
    #[serde(alias = "localServerUrl")]
    pub local_endpoint_url: Option<String>,
    #[serde(alias = "telegramBotToken")]
    pub remote_token: Option<String>,
    #[serde(alias = "telegramChatId")]
    pub remote_recipient_id: Option<String>,
}

impl StartOptions {
    /// Overlay these options on the persisted defaults
    pub fn into_config(self, defaults: &SessionConfig) -> SessionConfig {
        let mut config = defaults.clone();
        if let Some(target) = self.target_locator {
            config.target_locator = target;
        }
        if let Some(interval) = self.segment_interval_ms {
            config.segment_interval_ms = interval;
        }
        if let Some(total) = self.total_duration_ms {
            config.total_duration_ms = total;
        }
        if let Some(v) = self.send_full_to_local {
            config.delivery.send_full_to_local = v;
        }
        if let Some(v) = self.send_segments_to_local {
            config.delivery.send_segments_to_local = v;
        }
        if let Some(v) = self.send_full_to_remote {
            config.delivery.send_full_to_remote = v;
        }
        if let Some(v) = self.send_segments_to_remote {
            config.delivery.send_segments_to_remote = v;
        }
        if let Some(url) = self.local_endpoint_url {
            config.local_endpoint_url = url;
        }
        if let Some(token) = self.remote_token {
            config.remote.token = token;
        }
        if let Some(recipient) = self.remote_recipient_id {
            config.remote.recipient_id = recipient;
        }
        config
    }
}

/// Messages accepted from the relay
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RelayCommand {
    #[serde(alias = "contentStartRecording")]
    StartRecording {
        #[serde(default)]
        options: StartOptions,
    },
    #[serde(alias = "contentStopRecording")]
    StopRecording {
        #[serde(default)]
        target: Option<String>,
    },
    GetRecordingState {
        #[serde(default)]
        target: Option<String>,
    },
    TargetSignal {
        #[serde(default)]
        target: Option<String>,
        signal: TargetSignal,
    },
}

/// Acknowledgement of a start or stop command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Starting,
    Stopping,
    Signaled,
    Noop,
}

/// Answer to a state query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
    pub state: SessionState,
}

/// Replies sent back to the relay
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Ack { status: CommandStatus },
    State(RecordingStatus),
    Error(ErrorResponse),
}

/// Start recording
///
/// Returns as soon as the session is spawned; Recording is confirmed by a
/// `Started` notification.
pub async fn start_recording(state: &RecorderState, options: StartOptions) -> AppResult<SessionHandle> {
    let config = options.into_config(&state.defaults);
    if config.target_locator.trim().is_empty() {
        return Err(AppError::Recording("no target locator given".to_string()));
    }
    state.registry.start(config)
}

/// Stop recording
pub async fn stop_recording(state: &RecorderState, target: Option<&str>) -> CommandStatus {
    let target = state.resolve_target(target);
    if state.registry.stop(&target) {
        CommandStatus::Stopping
    } else {
        tracing::warn!("Stop requested for {} but nothing is recording", target);
        CommandStatus::Noop
    }
}

/// Get current recording state
pub async fn get_recording_state(state: &RecorderState, target: Option<&str>) -> RecordingStatus {
    let target = state.resolve_target(target);
    let session_state = state.registry.state(&target);
    RecordingStatus {
        is_recording: session_state.is_active(),
        state: session_state,
    }
}

/// Publish a host-reported signal on a target
pub async fn signal_target(
    state: &RecorderState,
    target: Option<&str>,
    signal: TargetSignal,
) -> CommandStatus {
    let target = state.resolve_target(target);
    if target.is_empty() {
        tracing::warn!("Signal {:?} has no target", signal);
        return CommandStatus::Noop;
    }
    tracing::debug!("Target {} signaled {:?}", target, signal);
    state.sources.target(&target).publish(signal);
    CommandStatus::Signaled
}

/// Subscribe to session notifications to forward them to the relay
pub fn subscribe_notifications(state: &RecorderState) -> broadcast::Receiver<SessionEvent> {
    state.registry.subscribe()
}

/// Handle one typed relay command
pub async fn handle_command(state: &RecorderState, command: RelayCommand) -> RelayResponse {
    match command {
        RelayCommand::StartRecording { options } => match start_recording(state, options).await {
            Ok(handle) => {
                tracing::info!(
                    "Start acknowledged for {} (session {})",
                    handle.target(),
                    handle.session_id()
                );
                RelayResponse::Ack {
                    status: CommandStatus::Starting,
                }
            }
            Err(e) => RelayResponse::Error(e.into()),
        },
        RelayCommand::StopRecording { target } => RelayResponse::Ack {
            status: stop_recording(state, target.as_deref()).await,
        },
        RelayCommand::GetRecordingState { target } => {
            RelayResponse::State(get_recording_state(state, target.as_deref()).await)
        }
        RelayCommand::TargetSignal { target, signal } => RelayResponse::Ack {
            status: signal_target(state, target.as_deref(), signal).await,
        },
    }
}

/// Handle one raw JSON relay message and produce the JSON reply
pub async fn handle_relay_message(state: &RecorderState, message: &str) -> String {
    let response = match serde_json::from_str::<RelayCommand>(message) {
        Ok(command) => handle_command(state, command).await,
        Err(e) => RelayResponse::Error(AppError::Serialization(e).into()),
    };

    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(
            r#"{{"code":"SERIALIZATION_ERROR","message":"{}"}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
