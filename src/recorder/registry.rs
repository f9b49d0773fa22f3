//! Session registry
//!
//! Maps each capture target to its single live session. Entries are created
//! when a session starts and removed once it has reported its outcome.

use super::controller::{spawn_session, SessionHandle, SessionOutcome, SessionServices};
use super::events::SessionEvent;
use super::state::{SessionConfig, SessionState};
use crate::utils::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Keyed registry of live sessions
#[derive(Clone)]
pub struct SessionRegistry {
    services: SessionServices,
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(services: SessionServices) -> Self {
        Self {
            services,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to notifications from every session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.services.events.subscribe()
    }

    /// Start a session for the configured target
    ///
    /// Fails if the target already has an active session.
    pub fn start(&self, config: SessionConfig) -> AppResult<SessionHandle> {
        let key = config.target_locator.trim().to_string();

        let handle = {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&key) {
                if existing.is_active() {
                    return Err(AppError::Recording(format!(
                        "a session is already active for {}",
                        key
                    )));
                }
            }

            let handle = spawn_session(config, self.services.clone());
            sessions.insert(key.clone(), handle.clone());
            handle
        };

        let sessions = self.sessions.clone();
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.wait().await;
            let mut sessions = sessions.lock();
            if sessions
                .get(&key)
                .map(|h| h.session_id() == watched.session_id())
                .unwrap_or(false)
            {
                sessions.remove(&key);
                tracing::debug!("Session {} removed from registry", watched.session_id());
            }
        });

        Ok(handle)
    }

    /// Session registered for a target
    pub fn get(&self, target: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(target.trim()).cloned()
    }

    /// Whether a target has an active session
    pub fn is_active(&self, target: &str) -> bool {
        self.get(target).map(|h| h.is_active()).unwrap_or(false)
    }

    /// State of a target's session, Idle if there is none
    pub fn state(&self, target: &str) -> SessionState {
        self.get(target)
            .map(|h| h.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Request a stop; `false` if nothing was running
    pub fn stop(&self, target: &str) -> bool {
        self.get(target).map(|h| h.stop()).unwrap_or(false)
    }

    pub fn active_targets(&self) -> Vec<String> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, h)| h.is_active())
            .map(|(target, _)| target.clone())
            .collect()
    }

    /// Stop every session and wait for all of them to finish
    pub async fn shutdown(&self) -> Vec<SessionOutcome> {
        let handles: Vec<SessionHandle> = self.sessions.lock().values().cloned().collect();
        for handle in &handles {
            handle.stop();
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(outcome) = handle.wait().await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}
