//! Recording session control
//!
//! The session controller, its continuity monitor and the registry that
//! keeps one session per capture target.

pub mod controller;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod state;

pub use controller::{spawn_session, SessionHandle, SessionOutcome, SessionServices};
pub use events::SessionEvent;
pub use monitor::{ContinuityMonitor, ResumeReason};
pub use registry::SessionRegistry;
pub use state::{
    DeliveryToggles, RemoteCredentials, Segment, SessionConfig, SessionFailure, SessionState,
    SessionSummary,
};
