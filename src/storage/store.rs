//! Session-scoped store with sink-to-buffer failover
//!
//! A `SessionStore` is owned by exactly one session. It prefers the streaming
//! sink and switches to the buffered store on acquisition failure or on the
//! first failed write. Segments that reached the sink are retained in memory,
//! segments after the switch live in the buffered store, and finalize joins
//! the two so the reconstruction has no gap and no duplicate.

use super::buffered::BufferedStore;
use super::export::write_download;
use super::sink::{DestinationPicker, StreamingSink};
use super::{BackendKind, StoreError};
use crate::recorder::state::{assemble, Segment};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Process-wide storage resources shared by all sessions
pub struct StorageBackends {
    picker: Arc<dyn DestinationPicker>,
    database_path: PathBuf,
    downloads_dir: PathBuf,
    extension: String,
    buffered: OnceCell<BufferedStore>,
}

impl StorageBackends {
    pub fn new(
        picker: Arc<dyn DestinationPicker>,
        database_path: impl Into<PathBuf>,
        downloads_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            picker,
            database_path: database_path.into(),
            downloads_dir: downloads_dir.into(),
            extension: extension.into(),
            buffered: OnceCell::new(),
        }
    }

    /// Open the buffered store once; later calls return the same store
    pub async fn buffered(&self) -> Result<BufferedStore, StoreError> {
        self.buffered
            .get_or_try_init(|| BufferedStore::open(&self.database_path))
            .await
            .cloned()
    }

    pub fn downloads_dir(&self) -> &PathBuf {
        &self.downloads_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// What finalize produced
#[derive(Debug, Clone, Default)]
pub struct FinalizeOutcome {
    /// Every persisted segment in emission order
    pub segments: Vec<Segment>,
    /// Whether the session switched from the sink to the buffered store
    pub failed_over: bool,
    /// Where the streaming sink wrote, if it was used
    pub sink_location: Option<String>,
    /// Reconstructed recording written from buffered data
    pub download: Option<PathBuf>,
    /// Buffered rows of the session are still stored and left for recovery
    pub rows_retained: bool,
}

impl FinalizeOutcome {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn assembled(&self) -> Bytes {
        assemble(&self.segments)
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.len() as u64).sum()
    }
}

/// Storage handle for one session
pub struct SessionStore {
    backends: Arc<StorageBackends>,
    session_id: String,
    target: String,
    active: Option<BackendKind>,
    sink: Option<StreamingSink>,
    sink_location: Option<String>,
    sink_retained: Vec<Segment>,
    fallback: Option<BufferedStore>,
    /// Segments no backend has accepted yet, oldest first
    unflushed: Vec<Segment>,
    failed_over: bool,
}

impl SessionStore {
    pub fn new(
        backends: Arc<StorageBackends>,
        session_id: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            backends,
            session_id: session_id.into(),
            target: target.into(),
            active: None,
            sink: None,
            sink_location: None,
            sink_retained: Vec::new(),
            fallback: None,
            unflushed: Vec::new(),
            failed_over: false,
        }
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active
    }

    pub fn failed_over(&self) -> bool {
        self.failed_over
    }

    /// Acquire the streaming sink
    pub async fn open_primary(&mut self) -> Result<(), StoreError> {
        let destination = self.backends.picker.pick(&self.target).await?;
        tracing::info!("Streaming sink acquired: {}", destination.label);
        self.sink_location = Some(destination.label.clone());
        self.sink = Some(StreamingSink::new(destination));
        self.active = Some(BackendKind::StreamingSink);
        Ok(())
    }

    /// Open the buffered store; a no-op once it is open
    pub async fn open_fallback(&mut self) -> Result<(), StoreError> {
        if self.fallback.is_none() {
            self.fallback = Some(self.backends.buffered().await?);
            tracing::info!("Buffered store in use for session {}", self.session_id);
        }
        self.active = Some(BackendKind::Buffered);
        Ok(())
    }

    /// Open the sink, falling back to the buffered store
    ///
    /// Fails only when neither backend can be opened.
    pub async fn open(&mut self) -> Result<BackendKind, StoreError> {
        match self.open_primary().await {
            Ok(()) => Ok(BackendKind::StreamingSink),
            Err(e) => {
                tracing::warn!("Streaming sink unavailable, using buffered store: {}", e);
                self.open_fallback().await?;
                Ok(BackendKind::Buffered)
            }
        }
    }

    /// Persist one segment
    ///
    /// A sink write failure switches the session to the buffered store and
    /// the same segment is written there. If no backend accepts the segment it
    /// is kept in memory and retried ahead of the next one.
    pub async fn persist(&mut self, segment: Segment) -> Result<BackendKind, StoreError> {
        match self.active {
            None => {
                self.unflushed.push(segment);
                Err(StoreError::NotOpen)
            }
            Some(BackendKind::StreamingSink) => {
                let result = match self.sink.as_mut() {
                    Some(sink) => sink.append(&segment.data).await,
                    None => Err(StoreError::NotOpen),
                };
                match result {
                    Ok(()) => {
                        tracing::debug!(
                            "Segment {} ({} bytes) appended to streaming sink",
                            segment.index,
                            segment.len()
                        );
                        self.sink_retained.push(segment);
                        Ok(BackendKind::StreamingSink)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Streaming sink write failed at segment {}, failing over: {}",
                            segment.index,
                            e
                        );
                        self.failed_over = true;
                        self.sink = None;
                        self.unflushed.push(segment);
                        self.open_fallback().await?;
                        self.flush_unflushed().await?;
                        Ok(BackendKind::Buffered)
                    }
                }
            }
            Some(BackendKind::Buffered) => {
                self.unflushed.push(segment);
                if self.fallback.is_none() {
                    self.open_fallback().await?;
                }
                self.flush_unflushed().await?;
                Ok(BackendKind::Buffered)
            }
        }
    }

    async fn flush_unflushed(&mut self) -> Result<(), StoreError> {
        let store = self.fallback.as_ref().ok_or(StoreError::NotOpen)?;
        while let Some(segment) = self.unflushed.first() {
            store.insert(&self.session_id, &self.target, segment).await?;
            tracing::debug!(
                "Segment {} ({} bytes) inserted into buffered store",
                segment.index,
                segment.len()
            );
            self.unflushed.remove(0);
        }
        Ok(())
    }

    /// Close the backends and assemble the session
    ///
    /// Buffered rows are cleared only after the reconstructed recording has
    /// been written to the downloads directory. Read and clear failures do
    /// not discard what was assembled: the outcome carries the segments that
    /// could be collected and `rows_retained` is set so the rows are left for
    /// `recover`. When the rows cannot be cleared the download is removed
    /// again, so the recording is reconstructed exactly once.
    pub async fn finalize(&mut self) -> FinalizeOutcome {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                tracing::warn!("Failed to close streaming sink: {}", e);
            }
        }

        if !self.unflushed.is_empty() && self.active.is_some() {
            if let Err(e) = self.open_fallback().await {
                tracing::error!("Buffered store still unavailable at finalize: {}", e);
            } else if let Err(e) = self.flush_unflushed().await {
                tracing::error!("Could not flush pending segments: {}", e);
            }
        }

        let mut segments = std::mem::take(&mut self.sink_retained);
        let mut download = None;
        let mut rows_retained = false;

        if let Some(store) = self.fallback.clone() {
            match store.read_session(&self.session_id).await {
                Ok(stored) => {
                    segments.extend(stored);
                    segments.extend(std::mem::take(&mut self.unflushed));
                    if !segments.is_empty() {
                        let (path, retained) = self.export_and_clear(&store, &segments).await;
                        download = path;
                        rows_retained = retained;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Could not read buffered rows of session {}, leaving them for recovery: {}",
                        self.session_id,
                        e
                    );
                    segments.extend(std::mem::take(&mut self.unflushed));
                    rows_retained = true;
                }
            }
        } else {
            segments.extend(std::mem::take(&mut self.unflushed));
        }

        self.active = None;

        FinalizeOutcome {
            segments,
            failed_over: self.failed_over,
            sink_location: self.sink_location.clone(),
            download,
            rows_retained,
        }
    }

    /// Write the download, then clear the rows it was built from
    ///
    /// Returns the download path and whether the rows are still stored.
    async fn export_and_clear(
        &self,
        store: &BufferedStore,
        segments: &[Segment],
    ) -> (Option<PathBuf>, bool) {
        let path = match write_download(
            self.backends.downloads_dir(),
            self.backends.extension(),
            &assemble(segments),
        )
        .await
        {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(
                    "Could not write recording, keeping buffered rows of session {}: {}",
                    self.session_id,
                    e
                );
                return (None, true);
            }
        };

        match store.clear_session(&self.session_id).await {
            Ok(removed) => {
                tracing::debug!(
                    "Cleared {} buffered segments for session {}",
                    removed,
                    self.session_id
                );
                (Some(path), false)
            }
            Err(e) => {
                tracing::error!(
                    "Could not clear buffered rows of session {}, leaving them for recovery: {}",
                    self.session_id,
                    e
                );
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => (None, true),
                    Err(e) => {
                        tracing::warn!(
                            "Could not remove {} after failed clear: {}",
                            path.display(),
                            e
                        );
                        (Some(path), true)
                    }
                }
            }
        }
    }
}
