//! Segment Recorder - segmented live-stream capture with durable storage.
//!
//! This is the library crate behind the `segment-recorder` binary. It provides
//! the recording session controller, the segment stores, the upload fan-out
//! and the relay command handlers.

pub mod capture;
pub mod commands;
pub mod delivery;
pub mod recorder;
pub mod settings;
pub mod storage;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `default_directive`. Calling this twice is harmless.
pub fn init_tracing(default_directive: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
