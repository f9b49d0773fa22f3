//! Upload fan-out
//!
//! Sends segments and assembled recordings to the local endpoint and the
//! remote bot. Sends are independent and never retried here.

pub mod client;
pub mod progress;
pub mod types;

pub use client::{create_client, DeliveryClient};
pub use progress::ProgressTracker;
pub use types::{
    ignore_progress, DeliveryEndpoints, DeliveryError, DeliveryProgress, DeliveryReceipt,
    DeliveryRequest, DeliveryScope, Destination, ProgressCallback,
};

use async_trait::async_trait;

/// Sends one blob to one destination
///
/// Progress reports are non-decreasing and the returned result is the single
/// terminal outcome of the call.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(
        &self,
        endpoints: &DeliveryEndpoints,
        request: DeliveryRequest,
        progress: ProgressCallback,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}
