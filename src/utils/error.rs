//! Error types and handling
//!
//! Common error types used across the application.

use crate::capture::CaptureError;
use crate::delivery::DeliveryError;
use crate::settings::SettingsError;
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Recording error: {0}")]
    Recording(String),
}

/// Error response for the relay
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Settings(_) => "SETTINGS_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Delivery(_) => "DELIVERY_ERROR",
            AppError::Recording(_) => "RECORDING_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
