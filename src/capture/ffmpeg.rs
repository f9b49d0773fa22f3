//! FFmpeg-backed capture engine
//!
//! FFmpeg remuxes the target's stream (no transcoding) into a single
//! container written to stdout. The engine accumulates stdout and emits the
//! buffered bytes as one segment at every interval tick, so the segments of a
//! session concatenate back into one playable file.

use super::engine::{CaptureEngine, EngineEvents, EngineHandle};
use super::traits::{CaptureError, CaptureTarget};
use crate::settings::CaptureSettings;
use async_trait::async_trait;
use bytes::BytesMut;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Capture engine that segments FFmpeg's output
pub struct FfmpegEngine {
    settings: CaptureSettings,
}

impl FfmpegEngine {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    /// Arguments for remuxing `source` to stdout
    pub fn build_args(&self, source: &str) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            self.settings.container.clone(),
            "pipe:1".to_string(),
        ]
    }

    async fn check_available(&self) -> Result<(), CaptureError> {
        let probe = Command::new(&self.settings.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match probe {
            Ok(_) => Ok(()),
            Err(e) => Err(CaptureError::Spawn(format!(
                "FFmpeg not found at '{}': {}",
                self.settings.ffmpeg_path, e
            ))),
        }
    }
}

#[async_trait]
impl CaptureEngine for FfmpegEngine {
    async fn start(
        &self,
        target: Arc<dyn CaptureTarget>,
        segment_interval: Duration,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineHandle>, CaptureError> {
        let source = target
            .stream_source()
            .ok_or_else(|| CaptureError::NotCapturable(target.id().to_string()))?;

        self.check_available().await?;

        let args = self.build_args(&source);
        tracing::info!("Starting FFmpeg capture: {:?}", args);

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("Failed to start FFmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Spawn("Failed to capture FFmpeg stdout".to_string()))?;
        let stdin = child.stdin.take();

        if let Some(stderr) = child.stderr.take() {
            let target_id = target.id().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("ffmpeg [{}]: {}", target_id, line);
                }
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let segmenter = Segmenter {
            child,
            stdout,
            stdin,
            interval: segment_interval,
            chunk_bytes: self.settings.read_chunk_bytes.max(1),
            stop_grace: self.settings.stop_grace(),
            events,
        };
        let task = tokio::spawn(segmenter.run(stop_rx));

        Ok(Box::new(FfmpegHandle {
            stop_tx: Some(stop_tx),
            _task: task,
        }))
    }
}

/// Handle for a running FFmpeg capture
pub struct FfmpegHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

#[async_trait]
impl EngineHandle for FfmpegHandle {
    async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            if tx.send(()).is_err() {
                tracing::debug!("FFmpeg capture already finished before stop");
            }
        }
    }
}

struct Segmenter {
    child: Child,
    stdout: ChildStdout,
    stdin: Option<ChildStdin>,
    interval: Duration,
    chunk_bytes: usize,
    stop_grace: Duration,
    events: EngineEvents,
}

impl Segmenter {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        let mut buffer = BytesMut::new();
        let mut read_buf = vec![0u8; self.chunk_bytes];
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stopping = false;
        let mut stop_deadline: Option<Instant> = None;
        let mut failure: Option<String> = None;

        loop {
            let deadline = stop_deadline.unwrap_or_else(|| Instant::now() + self.stop_grace);
            tokio::select! {
                read = self.stdout.read(&mut read_buf) => match read {
                    Ok(0) => break,
                    Ok(n) => buffer.extend_from_slice(&read_buf[..n]),
                    Err(e) => {
                        failure = Some(format!("Failed to read FFmpeg output: {}", e));
                        break;
                    }
                },
                _ = ticker.tick(), if !stopping => {
                    if !buffer.is_empty() && !self.events.segment(buffer.split().freeze()) {
                        tracing::debug!("Capture owner went away, killing FFmpeg");
                        let _ = self.child.kill().await;
                        return;
                    }
                }
                _ = &mut stop_rx, if !stopping => {
                    stopping = true;
                    stop_deadline = Some(Instant::now() + self.stop_grace);
                    self.request_quit().await;
                }
                _ = tokio::time::sleep_until(deadline), if stop_deadline.is_some() => {
                    tracing::warn!("FFmpeg did not exit within {:?}, killing it", self.stop_grace);
                    let _ = self.child.kill().await;
                    break;
                }
            }
        }

        let status = self.child.wait().await;

        // Whatever was read before EOF belongs to the last segment
        if !buffer.is_empty() {
            self.events.segment(buffer.split().freeze());
        }

        if stopping {
            tracing::info!("FFmpeg capture stopped");
            self.events.completed();
        } else {
            let reason = failure.unwrap_or_else(|| match status {
                Ok(status) => format!("capture process exited unexpectedly ({})", status),
                Err(e) => format!("capture process lost: {}", e),
            });
            tracing::warn!("FFmpeg capture fault: {}", reason);
            self.events.fault(reason);
        }
    }

    /// Ask FFmpeg to finish the container and exit
    async fn request_quit(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::debug!("Could not send quit to FFmpeg: {}", e);
            }
            let _ = stdin.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::engine::EngineEvent;
    use crate::capture::source::MediaSource;
    use parking_lot::Mutex;

    fn collecting_events() -> (EngineEvents, Arc<Mutex<Vec<EngineEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let events = EngineEvents::new(
            1,
            Arc::new(move |_, event| {
                sink_seen.lock().push(event);
                true
            }),
        );
        (events, seen)
    }

    async fn wait_for_terminal(seen: &Arc<Mutex<Vec<EngineEvent>>>) {
        for _ in 0..200 {
            let done = seen
                .lock()
                .iter()
                .any(|e| matches!(e, EngineEvent::Completed | EngineEvent::Fault(_)));
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("engine never reached a terminal event");
    }

    fn segment_bytes(seen: &[EngineEvent]) -> Vec<u8> {
        seen.iter()
            .filter_map(|e| match e {
                EngineEvent::Segment(data) => Some(data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_build_args_copies_streams() {
        let engine = FfmpegEngine::new(CaptureSettings::default());
        let args = engine.build_args("rtmp://example.invalid/live");

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "rtmp://example.invalid/live");
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "matroska"));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[tokio::test]
    async fn test_missing_source_is_not_capturable() {
        let engine = FfmpegEngine::new(CaptureSettings::default());
        let target = Arc::new(MediaSource::new("/no/such/input.mkv"));
        let (events, _) = collecting_events();

        let result = engine.start(target, Duration::from_secs(1), events).await;
        assert!(matches!(result, Err(CaptureError::NotCapturable(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let settings = CaptureSettings {
            ffmpeg_path: "/nonexistent/bin/ffmpeg".to_string(),
            ..Default::default()
        };
        let engine = FfmpegEngine::new(settings);
        let target = Arc::new(MediaSource::new("rtsp://example.invalid/cam"));
        let (events, _) = collecting_events();

        let result = engine.start(target, Duration::from_secs(1), events).await;
        assert!(matches!(result, Err(CaptureError::Spawn(_))));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_emits_remainder_then_fault() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(
            dir.path(),
            "[ \"$1\" = \"-version\" ] && exit 0\nprintf abc\nsleep 0.2\nprintf def\nexit 1",
        );
        let engine = FfmpegEngine::new(CaptureSettings {
            ffmpeg_path: script,
            ..Default::default()
        });
        let target = Arc::new(MediaSource::new("rtmp://example.invalid/live"));
        let (events, seen) = collecting_events();

        let _handle = engine
            .start(target, Duration::from_secs(30), events)
            .await
            .unwrap();
        wait_for_terminal(&seen).await;

        let seen = seen.lock();
        assert_eq!(segment_bytes(&seen), b"abcdef".to_vec());
        assert!(matches!(seen.last(), Some(EngineEvent::Fault(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_completes_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(
            dir.path(),
            "[ \"$1\" = \"-version\" ] && exit 0\nprintf abc\nexec sleep 30",
        );
        let engine = FfmpegEngine::new(CaptureSettings {
            ffmpeg_path: script,
            stop_grace_ms: 200,
            ..Default::default()
        });
        let target = Arc::new(MediaSource::new("rtmp://example.invalid/live"));
        let (events, seen) = collecting_events();

        let mut handle = engine
            .start(target, Duration::from_secs(30), events)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;
        wait_for_terminal(&seen).await;

        let seen = seen.lock();
        assert_eq!(segment_bytes(&seen), b"abc".to_vec());
        assert_eq!(seen.last(), Some(&EngineEvent::Completed));
        let completions = seen
            .iter()
            .filter(|e| matches!(e, EngineEvent::Completed))
            .count();
        assert_eq!(completions, 1);
    }
}
