// Moonraker client and poller against a fake Moonraker served by axum
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use klipper_tft_bridge::moonraker::{ApiError, ApiPoller, MoonrakerClient, PrinterApi};
use serde_json::{Value, json};
use tft_shared::config::MoonrakerConfig;
use tft_shared::{Config, ConnectionState, PrintAction, PrintState, Snapshot, SnapshotStore};
use tokio::sync::mpsc;

const PRINTING: &str = r#"{"result":{"eventtime":100.0,"status":{
    "toolhead":{"position":[1.0,2.0,3.0,4.0]},
    "extruder":{"temperature":210.0,"target":210.0},
    "heater_bed":{"temperature":60.0,"target":60.0},
    "fan":{"speed":1.0},
    "print_stats":{"state":"printing","filename":"cube.gcode","print_duration":60.0},
    "virtual_sdcard":{"progress":0.5,"file_position":500,"file_size":1000,"is_active":true},
    "display_status":{"progress":0.5}}}}"#;

struct FakeMoonraker {
    status: AtomicU16,
    delay_ms: AtomicU64,
    body: Mutex<String>,
    last_query: Mutex<Option<String>>,
    actions: Mutex<Vec<String>>,
}

impl FakeMoonraker {
    fn new(body: &str) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU16::new(200),
            delay_ms: AtomicU64::new(0),
            body: Mutex::new(body.to_string()),
            last_query: Mutex::new(None),
            actions: Mutex::new(Vec::new()),
        })
    }

    fn respond_with(&self, status: u16, body: &str) {
        self.status.store(status, Ordering::SeqCst);
        *self.body.lock().unwrap() = body.to_string();
    }
}

async fn query(State(fake): State<Arc<FakeMoonraker>>, RawQuery(q): RawQuery) -> (StatusCode, String) {
    *fake.last_query.lock().unwrap() = q;
    let delay = fake.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let status = StatusCode::from_u16(fake.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    (status, fake.body.lock().unwrap().clone())
}

async fn print_action(State(fake): State<Arc<FakeMoonraker>>, Path(action): Path<String>) -> Json<Value> {
    fake.actions.lock().unwrap().push(action);
    Json(json!({ "result": "ok" }))
}

async fn server_info() -> Json<Value> {
    Json(json!({
        "result": {
            "klippy_connected": true,
            "klippy_state": "ready",
            "moonraker_version": "v0.9.3"
        }
    }))
}

async fn serve(fake: Arc<FakeMoonraker>) -> MoonrakerConfig {
    let app = Router::new()
        .route("/printer/objects/query", get(query))
        .route("/printer/print/{action}", post(print_action))
        .route("/server/info", get(server_info))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MoonrakerConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        poll_interval_ms: 50,
        request_timeout_ms: 300,
    }
}

#[tokio::test]
async fn test_query_requests_all_objects() {
    let fake = FakeMoonraker::new(PRINTING);
    let client = MoonrakerClient::new(&serve(fake.clone()).await);

    let objects = client.query_status().await.unwrap();
    assert_eq!(objects.extruder.unwrap().temperature, 210.0);
    assert_eq!(objects.print_stats.unwrap().filename, "cube.gcode");
    assert_eq!(
        fake.last_query.lock().unwrap().as_deref(),
        Some("toolhead&extruder&heater_bed&fan&print_stats&virtual_sdcard&display_status")
    );
}

#[tokio::test]
async fn test_http_error_status() {
    let fake = FakeMoonraker::new(PRINTING);
    fake.respond_with(500, "klippy shutdown");
    let client = MoonrakerClient::new(&serve(fake).await);
    assert!(matches!(client.query_status().await, Err(ApiError::Status(500))));
}

#[tokio::test]
async fn test_malformed_payloads() {
    let fake = FakeMoonraker::new("{\"result\":");
    let client = MoonrakerClient::new(&serve(fake.clone()).await);
    assert!(matches!(client.query_status().await, Err(ApiError::Payload(_))));

    fake.respond_with(200, r#"{"result":{"status":{}}}"#);
    assert!(matches!(client.query_status().await, Err(ApiError::Payload(_))));
}

#[tokio::test]
async fn test_slow_reply_times_out() {
    let fake = FakeMoonraker::new(PRINTING);
    fake.delay_ms.store(2000, Ordering::SeqCst);
    let client = MoonrakerClient::new(&serve(fake).await);
    assert!(matches!(client.query_status().await, Err(ApiError::Timeout(_))));
}

#[tokio::test]
async fn test_actions_and_server_info() {
    let fake = FakeMoonraker::new(PRINTING);
    let client = MoonrakerClient::new(&serve(fake.clone()).await);

    client.run_action(PrintAction::Pause).await.unwrap();
    client.run_action(PrintAction::Cancel).await.unwrap();
    assert_eq!(*fake.actions.lock().unwrap(), vec!["pause".to_string(), "cancel".to_string()]);

    let info = client.server_info().await.unwrap();
    assert!(info.klippy_connected);
    assert_eq!(info.klippy_state, "ready");
    assert_eq!(info.moonraker_version.as_deref(), Some("v0.9.3"));
}

#[tokio::test]
async fn test_poller_publishes_and_degrades() {
    let fake = FakeMoonraker::new(PRINTING);
    let mut config = Config::default();
    config.moonraker = serve(fake.clone()).await;
    let api = Arc::new(MoonrakerClient::new(&config.moonraker));

    let store = SnapshotStore::new(Snapshot::initial("Klipper"));
    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (notify_tx, mut notify_rx) = mpsc::channel(16);
    let mut poller = ApiPoller::new(api, store.clone(), &config, events_tx, notify_tx);

    poller.poll_once().await.unwrap();
    let snapshot = store.current();
    assert_eq!(snapshot.status.print_state, PrintState::Printing);
    assert_eq!(snapshot.status.fan_speed_percent, 100);
    assert_eq!(snapshot.status.progress.percent_done, Some(50.0));
    assert_eq!(events_rx.recv().await.unwrap().state, ConnectionState::Connected);
    assert_eq!(notify_rx.recv().await.unwrap(), tft_shared::NotificationEvent::PrintStarted);

    fake.respond_with(503, "");
    assert!(poller.poll_once().await.is_err());
    assert_eq!(events_rx.recv().await.unwrap().state, ConnectionState::Degraded);
    // Last good data is still served
    assert_eq!(store.current().status.tool_temp.current, 210.0);
}
