//! Streaming sink backend
//!
//! The sink appends each segment to a single destination opened once per
//! session. Acquiring the destination may be refused, in which case the
//! session falls back to the buffered store.

use super::StoreError;
use crate::settings::{CaptureSettings, StorageSettings};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writable destination handed out by a picker
pub struct SinkDestination {
    /// Human readable location, e.g. the file path
    pub label: String,
    pub writer: Box<dyn AsyncWrite + Send + Sync + Unpin>,
}

impl SinkDestination {
    pub fn new(label: impl Into<String>, writer: Box<dyn AsyncWrite + Send + Sync + Unpin>) -> Self {
        Self {
            label: label.into(),
            writer,
        }
    }
}

impl std::fmt::Debug for SinkDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDestination")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Grants a streaming destination for a target
///
/// Any refusal is reported as `StoreError::AcquisitionFailed`.
#[async_trait]
pub trait DestinationPicker: Send + Sync {
    async fn pick(&self, target: &str) -> Result<SinkDestination, StoreError>;
}

/// Picks a fresh file under the sink directory
pub struct FilePicker {
    dir: PathBuf,
    extension: String,
    enabled: bool,
}

impl FilePicker {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            enabled: true,
        }
    }

    pub fn from_settings(storage: &StorageSettings, capture: &CaptureSettings) -> Self {
        Self {
            dir: storage.sink_dir.clone(),
            extension: capture.file_extension.clone(),
            enabled: storage.sink_enabled,
        }
    }

    fn file_name(&self, target: &str) -> String {
        format!(
            "{}-{}.{}",
            urlencoding::encode(target),
            Utc::now().format("%Y%m%d-%H%M%S%.3f"),
            self.extension
        )
    }
}

#[async_trait]
impl DestinationPicker for FilePicker {
    async fn pick(&self, target: &str) -> Result<SinkDestination, StoreError> {
        if !self.enabled {
            return Err(StoreError::AcquisitionFailed(
                "streaming sink is disabled".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::AcquisitionFailed(format!(
                "cannot create {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.dir.join(self.file_name(target));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                StoreError::AcquisitionFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        Ok(SinkDestination::new(
            path.to_string_lossy(),
            Box::new(file),
        ))
    }
}

/// Open streaming sink for one session
///
/// The destination is released on close and after the first failed write.
pub struct StreamingSink {
    label: String,
    writer: Option<Box<dyn AsyncWrite + Send + Sync + Unpin>>,
    bytes_written: u64,
}

impl StreamingSink {
    pub fn new(destination: SinkDestination) -> Self {
        Self {
            label: destination.label,
            writer: Some(destination.writer),
            bytes_written: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one segment and flush it to the destination
    pub async fn append(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let writer = self.writer.as_mut().ok_or(StoreError::NotOpen)?;

        let result = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.bytes_written += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.writer = None;
                Err(StoreError::WriteFailed(format!("{}: {}", self.label, e)))
            }
        }
    }

    /// Flush and release the destination
    pub async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}
