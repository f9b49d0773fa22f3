//! Relay command handlers
//!
//! Entry points the host relay calls to start, stop and query recording
//! sessions.

pub mod recording;
