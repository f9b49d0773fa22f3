//! Download artifact for recordings reconstructed from the buffered store

use super::StoreError;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// File stem used for reconstructed recordings
pub const DOWNLOAD_STEM: &str = "video_recording";

/// Write an assembled recording to `dir` as `video_recording-<timestamp>.<ext>`
///
/// Never overwrites: a numeric suffix is added if the name is taken.
pub async fn write_download(dir: &Path, extension: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
    tokio::fs::create_dir_all(dir).await?;

    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{}-{}.{}", DOWNLOAD_STEM, stamp, extension)
        } else {
            format!("{}-{}-{}.{}", DOWNLOAD_STEM, stamp, attempt, extension)
        };
        let path = dir.join(name);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(data).await?;
                file.flush().await?;
                tracing::info!("Recording saved to {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
