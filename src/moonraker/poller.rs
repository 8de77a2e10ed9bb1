// src/moonraker/poller.rs - Periodic status query and snapshot publishing
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tft_shared::config::{Config, PanelConfig};
use tft_shared::{
    ConnectionState, Layer, LinkEvent, LinkHealth, LinkKind, NotificationEvent, Position, PrintProgress,
    PrintState, PrinterStatus, Snapshot, SnapshotStore, Temperature,
};

use super::models::PrinterObjects;
use super::notify::NotificationTracker;
use super::{ApiError, PrinterApi};

/// Queries the management API once per tick and publishes the result.
///
/// One attempt per tick, no synchronous retry. Failures accumulate in the
/// link health; past the degraded threshold the tick interval is replaced by
/// the backoff schedule until a poll succeeds again.
pub struct ApiPoller {
    api: Arc<dyn PrinterApi>,
    store: SnapshotStore,
    panel: PanelConfig,
    interval: Duration,
    timeout: Duration,
    health: LinkHealth,
    tracker: NotificationTracker,
    events_tx: mpsc::Sender<LinkEvent>,
    notify_tx: mpsc::Sender<NotificationEvent>,
}

impl ApiPoller {
    pub fn new(
        api: Arc<dyn PrinterApi>,
        store: SnapshotStore,
        config: &Config,
        events_tx: mpsc::Sender<LinkEvent>,
        notify_tx: mpsc::Sender<NotificationEvent>,
    ) -> Self {
        Self {
            api,
            store,
            panel: config.panel.clone(),
            interval: config.moonraker.poll_interval(),
            timeout: config.moonraker.request_timeout(),
            health: LinkHealth::new(LinkKind::Api, config.backoff.policy()),
            tracker: NotificationTracker::new(config.panel.progress_step_percent),
            events_tx,
            notify_tx,
        }
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("API poller started, interval {:?}", self.interval);
        let changed = self.health.mark_connecting();
        self.report(changed).await;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = self.poll_once() => {}
            }

            let delay = if self.health.in_backoff() {
                let delay = self.health.next_retry_delay();
                tracing::debug!("Moonraker unreachable, retrying in {:?}", delay);
                delay
            } else {
                self.interval
            };
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("API poller shutting down");
    }

    /// One query attempt. Publishes a fresh snapshot on success; on failure
    /// the previous snapshot stays current and only ages.
    pub async fn poll_once(&mut self) -> Result<(), ApiError> {
        let result = match tokio::time::timeout(self.timeout, self.api.query_status()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.timeout)),
        };

        match result {
            Ok(objects) => {
                let previous = self.store.current();
                let status = normalize(&objects, &previous.status, &self.panel);
                let events = self.tracker.observe(&status);
                self.store.publish(Snapshot::new(status, self.panel.firmware_name.clone()));
                for event in events {
                    if let Err(e) = self.notify_tx.try_send(event) {
                        tracing::warn!("Dropping notification {:?}: {}", event, e);
                    }
                }
                let changed = self.health.record_success();
                self.report(changed).await;
                Ok(())
            }
            Err(e) => {
                let changed = self.health.record_failure();
                tracing::warn!(
                    "Moonraker poll failed ({} in a row): {}",
                    self.health.consecutive_failures(),
                    e
                );
                self.report(changed).await;
                Err(e)
            }
        }
    }

    async fn report(&self, changed: Option<ConnectionState>) {
        if let Some(state) = changed {
            let _ = self.events_tx.send(LinkEvent::new(LinkKind::Api, state)).await;
        }
    }
}

/// Build a status from one query reply. Objects missing from the reply keep
/// their previous values.
pub fn normalize(objects: &PrinterObjects, prev: &PrinterStatus, panel: &PanelConfig) -> PrinterStatus {
    let tool_temp = objects
        .extruder
        .map(|h| Temperature::new(h.temperature, h.target))
        .unwrap_or(prev.tool_temp);
    let bed_temp = objects
        .heater_bed
        .map(|h| Temperature::new(h.temperature, h.target))
        .unwrap_or(prev.bed_temp);
    let fan_speed_percent = objects
        .fan
        .map(|f| (f.speed.clamp(0.0, 1.0) * 100.0).round() as u8)
        .unwrap_or(prev.fan_speed_percent);
    let position = match objects.toolhead.as_ref().map(|t| t.position.as_slice()) {
        Some([x, y, z, e, ..]) => Position { x: *x, y: *y, z: *z, e: *e },
        Some([x, y, z]) => Position { x: *x, y: *y, z: *z, e: prev.position.e },
        _ => prev.position,
    };

    let (print_state, filename) = match &objects.print_stats {
        Some(stats) => (
            PrintState::from_klipper(&stats.state),
            Some(stats.filename.clone()).filter(|f| !f.is_empty()),
        ),
        None => (prev.print_state, prev.filename.clone()),
    };

    let (progress, layer) = if print_state.is_active() {
        (job_progress(objects, prev), job_layer(objects, panel))
    } else {
        (PrintProgress::default(), None)
    };

    PrinterStatus {
        tool_temp,
        bed_temp,
        fan_speed_percent,
        position,
        print_state,
        progress,
        layer,
        filename,
    }
}

fn job_progress(objects: &PrinterObjects, prev: &PrinterStatus) -> PrintProgress {
    let sd = objects.virtual_sdcard;
    let fraction = objects
        .display_status
        .map(|d| d.progress)
        .filter(|p| *p > 0.0)
        .or(sd.map(|s| s.progress));
    let percent_done = fraction
        .map(|f| (f * 100.0).clamp(0.0, 100.0))
        .or(prev.progress.percent_done);

    let (file_done, file_total) = match sd {
        Some(s) if s.file_size > 0 => (Some(s.file_position), Some(s.file_size)),
        _ => (prev.progress.file_done, prev.progress.file_total),
    };

    let time_elapsed_sec = objects
        .print_stats
        .as_ref()
        .map(|s| s.print_duration)
        .or(prev.progress.time_elapsed_sec);
    let time_left_sec = match (time_elapsed_sec, percent_done) {
        (Some(elapsed), Some(pct)) if pct > 0.0 && elapsed > 0.0 => Some((elapsed / (pct / 100.0) - elapsed).max(0.0)),
        _ => None,
    };

    PrintProgress {
        percent_done,
        file_done,
        file_total,
        time_elapsed_sec,
        time_left_sec,
    }
}

fn job_layer(objects: &PrinterObjects, panel: &PanelConfig) -> Option<Layer> {
    let reported = objects
        .print_stats
        .as_ref()
        .and_then(|s| s.info)
        .and_then(|info| match (info.current_layer, info.total_layer) {
            (Some(current), Some(total)) if total > 0 => Some(Layer { current, total }),
            _ => None,
        });
    if reported.is_some() {
        return reported;
    }

    let total = panel.estimated_total_layers?;
    let sd = objects.virtual_sdcard.filter(|s| s.is_active)?;
    let current = ((sd.progress.clamp(0.0, 1.0) * total as f64).ceil() as u32).clamp(1, total);
    Some(Layer { current, total })
}
