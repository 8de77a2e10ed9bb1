// src/moonraker/mod.rs - Management API side of the bridge
pub mod client;
pub mod models;
pub mod notify;
pub mod poller;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tft_shared::PrintAction;

pub use client::MoonrakerClient;
pub use models::PrinterObjects;
pub use notify::NotificationTracker;
pub use poller::ApiPoller;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("Body error: {0}")]
    Body(#[from] hyper::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Payload(e.to_string())
    }
}

/// The read-only query plus the optional job-control calls the bridge makes.
#[async_trait]
pub trait PrinterApi: Send + Sync {
    async fn query_status(&self) -> Result<PrinterObjects, ApiError>;
    async fn run_action(&self, action: PrintAction) -> Result<(), ApiError>;
}
