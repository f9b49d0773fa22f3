//! Stream capture
//!
//! Capture targets, the locators that resolve them, and the engines that turn
//! a target into a stream of segments.

pub mod engine;
pub mod ffmpeg;
pub mod source;
pub mod traits;

pub use engine::{CaptureEngine, EngineEvent, EngineEvents, EngineHandle};
pub use ffmpeg::FfmpegEngine;
pub use source::{MediaSource, SourceLocator};
pub use traits::{CaptureError, CaptureTarget, TargetLocator, TargetSignal};
