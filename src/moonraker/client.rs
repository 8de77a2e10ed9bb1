// src/moonraker/client.rs - HTTP client for Moonraker
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tft_shared::PrintAction;
use tft_shared::config::MoonrakerConfig;

use super::models::{PrinterObjects, QUERY_OBJECTS, QueryResponse, ServerInfo, ServerInfoResponse};
use super::{ApiError, PrinterApi};

pub struct MoonrakerClient {
    http: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    timeout: Duration,
}

impl MoonrakerClient {
    pub fn new(config: &MoonrakerConfig) -> Self {
        let http = Client::builder(TokioExecutor::new()).build_http();
        Self {
            http,
            base_url: config.base_url(),
            timeout: config.request_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn query_path() -> String {
        format!("/printer/objects/query?{}", QUERY_OBJECTS.join("&"))
    }

    /// `GET /server/info`, used once at startup to log who we are talking to.
    pub async fn server_info(&self) -> Result<ServerInfo, ApiError> {
        let body = self.request(Method::GET, "/server/info").await?;
        let reply: ServerInfoResponse = serde_json::from_slice(&body)?;
        Ok(reply.result)
    }

    async fn request(&self, method: Method, path: &str) -> Result<Bytes, ApiError> {
        let uri = format!("{}{}", self.base_url, path);
        let req = Request::builder()
            .method(method)
            .uri(&uri)
            .header(hyper::header::ACCEPT, "application/json")
            .body(Full::new(Bytes::new()))?;

        let exchange = async {
            let resp = self.http.request(req).await?;
            let status = resp.status();
            let body = resp.into_body().collect().await?.to_bytes();
            if status != StatusCode::OK {
                return Err(ApiError::Status(status.as_u16()));
            }
            Ok(body)
        };
        let body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))??;
        tracing::trace!("{} -> {}", uri, String::from_utf8_lossy(&body));
        Ok(body)
    }
}

#[async_trait]
impl PrinterApi for MoonrakerClient {
    async fn query_status(&self) -> Result<PrinterObjects, ApiError> {
        let body = self.request(Method::GET, &Self::query_path()).await?;
        let reply: QueryResponse = serde_json::from_slice(&body)?;
        let objects = reply.result.status;
        if !objects.is_usable() {
            return Err(ApiError::Payload("reply has neither extruder nor print_stats".to_string()));
        }
        Ok(objects)
    }

    async fn run_action(&self, action: PrintAction) -> Result<(), ApiError> {
        tracing::info!("Forwarding panel {} request to Moonraker", action);
        self.request(Method::POST, action.endpoint()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_path_lists_all_objects() {
        assert_eq!(
            MoonrakerClient::query_path(),
            "/printer/objects/query?toolhead&extruder&heater_bed&fan&print_stats&virtual_sdcard&display_status"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let config = MoonrakerConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let client = MoonrakerClient::new(&config);
        let err = client.query_status().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_) | ApiError::Timeout(_)), "{:?}", err);
    }
}
