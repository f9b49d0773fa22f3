//! HTTP delivery client
//!
//! Multipart uploads to the local endpoint and the bot `sendDocument` API.
//! Every send is a single attempt; the caller decides whether to retry.

use super::progress::{progress_body, ProgressTracker};
use super::types::{
    DeliveryEndpoints, DeliveryError, DeliveryReceipt, DeliveryRequest, Destination,
    ProgressCallback,
};
use super::Delivery;
use crate::settings::DeliverySettings;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Build the shared HTTP client
pub fn create_client(settings: &DeliverySettings) -> Result<Client, DeliveryError> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&settings.user_agent)
        .use_rustls_tls()
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| DeliveryError::Client(format!("Failed to create HTTP client: {}", e)))
}

/// Delivery over HTTP
#[derive(Clone)]
pub struct DeliveryClient {
    http: Client,
    remote_api_base: String,
    chunk_bytes: usize,
}

impl DeliveryClient {
    pub fn new(settings: &DeliverySettings) -> Result<Self, DeliveryError> {
        Ok(Self {
            http: create_client(settings)?,
            remote_api_base: settings.remote_api_base.trim_end_matches('/').to_string(),
            chunk_bytes: settings.chunk_bytes.max(1),
        })
    }

    fn file_part(
        &self,
        request: &DeliveryRequest,
        tracker: Arc<ProgressTracker>,
    ) -> Result<Part, DeliveryError> {
        let body = progress_body(request.data.clone(), self.chunk_bytes, tracker);
        Part::stream_with_length(body, request.data.len() as u64)
            .file_name(request.file_name.clone())
            .mime_str(mime_for(&request.file_name))
            .map_err(|e| DeliveryError::Client(e.to_string()))
    }

    async fn send_local(
        &self,
        url: &str,
        request: &DeliveryRequest,
        tracker: Arc<ProgressTracker>,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if url.trim().is_empty() {
            return Err(DeliveryError::NotConfigured);
        }

        let form = Form::new().part("video", self.file_part(request, tracker.clone())?);
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        if status != StatusCode::OK {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracker.finish();
        Ok(DeliveryReceipt {
            destination: Destination::Local,
            scope: request.scope,
            bytes: request.data.len() as u64,
            status: status.as_u16(),
            response: serde_json::from_str(&body).ok(),
        })
    }

    async fn send_remote(
        &self,
        endpoints: &DeliveryEndpoints,
        request: &DeliveryRequest,
        tracker: Arc<ProgressTracker>,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if !endpoints.remote.is_configured() {
            return Err(DeliveryError::NotConfigured);
        }

        let url = format!(
            "{}/bot{}/sendDocument",
            self.remote_api_base,
            endpoints.remote.token.trim()
        );
        let form = Form::new()
            .text("chat_id", endpoints.remote.recipient_id.trim().to_string())
            .part("document", self.file_part(request, tracker.clone())?);

        // The URL carries the bot token, keep it out of error messages
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.without_url().to_string()))?;
        if status != StatusCode::OK {
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| DeliveryError::InvalidResponse(format!("expected JSON body: {}", e)))?;

        tracker.finish();
        Ok(DeliveryReceipt {
            destination: Destination::RemoteBot,
            scope: request.scope,
            bytes: request.data.len() as u64,
            status: status.as_u16(),
            response: Some(json),
        })
    }
}

#[async_trait]
impl Delivery for DeliveryClient {
    async fn send(
        &self,
        endpoints: &DeliveryEndpoints,
        request: DeliveryRequest,
        progress: ProgressCallback,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let tracker = Arc::new(ProgressTracker::new(
            request.destination,
            request.scope,
            request.data.len() as u64,
            progress,
        ));

        let result = match request.destination {
            Destination::Local => {
                self.send_local(&endpoints.local_url, &request, tracker)
                    .await
            }
            Destination::RemoteBot => self.send_remote(endpoints, &request, tracker).await,
        };

        match &result {
            Ok(receipt) => tracing::info!(
                "Delivered {} to {} ({} bytes)",
                receipt.scope,
                receipt.destination,
                receipt.bytes
            ),
            Err(DeliveryError::NotConfigured) => tracing::debug!(
                "Skipped {} to {}: not configured",
                request.scope,
                request.destination
            ),
            Err(e) => tracing::warn!(
                "Delivery of {} to {} failed: {}",
                request.scope,
                request.destination,
                e
            ),
        }

        result
    }
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next() {
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}
