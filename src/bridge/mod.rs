// src/bridge/mod.rs - Bridge controller: wires both links together
pub mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tft_shared::{
    Config, ConfigError, ConnectionState, LinkEvent, LinkKind, NotificationEvent, PanelDialect, PrintAction,
    SerialInterface, Snapshot, SnapshotStore,
};

use crate::communication::{OutboundWriter, SerialSession};
use crate::gcode::{CommandKind, ResponseFormatter, autoreport_line, detect_dialect, notification_lines, parse_line};
use crate::moonraker::{ApiPoller, PrinterApi};

pub use state::{BridgePhase, BridgeStateMachine};

/// How long link tasks get to stop after shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const LINE_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 32;
const NOTIFY_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Link task failed: {0}")]
    Task(String),
}

/// Owns the configuration and the two link seams until [`Bridge::run`].
pub struct Bridge {
    config: Config,
    api: Arc<dyn PrinterApi>,
    serial: Arc<dyn SerialInterface>,
    store: SnapshotStore,
}

impl Bridge {
    pub fn new(config: Config, api: Arc<dyn PrinterApi>, serial: Arc<dyn SerialInterface>) -> Self {
        let store = SnapshotStore::new(Snapshot::initial(config.panel.firmware_name.clone()));
        Self { config, api, serial, store }
    }

    pub fn store(&self) -> SnapshotStore {
        self.store.clone()
    }

    /// Run until `shutdown` resolves. Both links are closed before this
    /// returns, on every exit path.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (lines_tx, lines_rx) = mpsc::channel(LINE_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_QUEUE);
        let writer = OutboundWriter::new(self.config.serial.write_timeout());

        let session = SerialSession::new(
            self.serial.clone(),
            self.config.serial.port.clone(),
            self.config.serial.baud,
            self.config.backoff.policy(),
            writer.clone(),
            lines_tx,
            events_tx.clone(),
        );
        let poller = ApiPoller::new(self.api.clone(), self.store.clone(), &self.config, events_tx, notify_tx);

        let mut tasks = LinkTasks::new(shutdown_tx);
        tasks.spawn(session.run(tasks.subscribe()));
        tasks.spawn(poller.run(tasks.subscribe()));

        let mut controller = Controller {
            machine: BridgeStateMachine::new(),
            formatter: ResponseFormatter::new(&self.config.panel),
            store: self.store.clone(),
            writer,
            api: self.api.clone(),
            passthrough: self.config.panel.action_passthrough,
            default_autoreport_s: self.config.panel.autoreport_temp_interval_s,
            stale_after: self.config.moonraker.poll_interval() * 2,
            autoreport: autoreport_interval(self.config.panel.autoreport_temp_interval_s),
            dialect: self.config.panel.dialect,
            detect_timeout: self.config.panel.dialect_detect_timeout(),
            detect_deadline: None,
        };
        controller.run(shutdown, lines_rx, events_rx, notify_rx).await;

        tasks.shutdown(SHUTDOWN_GRACE).await
    }
}

struct Controller {
    machine: BridgeStateMachine,
    formatter: ResponseFormatter,
    store: SnapshotStore,
    writer: OutboundWriter,
    api: Arc<dyn PrinterApi>,
    passthrough: bool,
    default_autoreport_s: u64,
    stale_after: Duration,
    autoreport: Option<Interval>,
    /// Configured dialect. `Auto` is resolved again on every connect.
    dialect: PanelDialect,
    detect_timeout: Duration,
    /// Set while the panel's dialect is still unknown.
    detect_deadline: Option<Instant>,
}

impl Controller {
    async fn run<F>(
        &mut self,
        shutdown: F,
        mut lines_rx: mpsc::Receiver<String>,
        mut events_rx: mpsc::Receiver<LinkEvent>,
        mut notify_rx: mpsc::Receiver<NotificationEvent>,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if let Some(phase) = self.machine.start() {
            tracing::info!("Bridge phase: {}", phase);
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                // Command responses first; notifications are best-effort.
                Some(line) = lines_rx.recv() => self.handle_line(&line).await,
                Some(event) = events_rx.recv() => self.handle_link_event(event).await,
                Some(event) = notify_rx.recv() => self.handle_notification(event).await,
                _ = next_tick(&mut self.autoreport) => self.send_autoreport().await,
                _ = wait_until(self.detect_deadline) => {
                    tracing::warn!(
                        "Panel dialect not recognised within {:?}, assuming {}",
                        self.detect_timeout,
                        PanelDialect::Btt
                    );
                    self.resolve_dialect(PanelDialect::Btt);
                    self.send_handshake().await;
                }
            }
        }

        if let Some(phase) = self.machine.terminate() {
            tracing::info!("Bridge phase: {}", phase);
        }
    }

    async fn handle_line(&mut self, line: &str) {
        let detected = self.detect_deadline.and_then(|_| detect_dialect(line));
        if let Some(dialect) = detected {
            tracing::info!("Panel speaks the {} dialect", dialect);
            self.resolve_dialect(dialect);
        }

        let command = parse_line(line);
        let snapshot = self.store.current();
        let response = self.formatter.format(&command, &snapshot);
        if snapshot.is_stale(self.stale_after) {
            tracing::debug!("Answering '{}' from a snapshot {}ms old", line.trim(), snapshot.age_millis());
        }

        match command.kind {
            CommandKind::AutoReportTemp { interval_s } => {
                tracing::info!("Panel set temperature autoreport to {}s", interval_s);
                self.autoreport = autoreport_interval(interval_s);
            }
            CommandKind::HostAction(action) => self.host_action(action),
            CommandKind::Unknown if !line.trim().is_empty() => {
                tracing::debug!("Acknowledging unhandled command '{}'", line.trim());
            }
            _ => {}
        }

        if let Err(e) = self.writer.send_response(&response).await {
            tracing::warn!("Could not answer '{}': {}", line.trim(), e);
        }
        if detected.is_some() {
            self.send_handshake().await;
        }
    }

    fn resolve_dialect(&mut self, dialect: PanelDialect) {
        self.formatter.set_dialect(dialect);
        self.detect_deadline = None;
    }

    async fn send_handshake(&mut self) {
        let handshake = self.formatter.handshake(&self.store.current());
        if let Err(e) = self.writer.send_response(&handshake).await {
            tracing::warn!("Handshake failed: {}", e);
        }
    }

    fn host_action(&self, action: PrintAction) {
        if !self.passthrough {
            tracing::info!("Panel requested {}, passthrough disabled", action);
            return;
        }
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.run_action(action).await {
                tracing::error!("Forwarding {} failed: {}", action, e);
            }
        });
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event.state {
            ConnectionState::Connected => tracing::info!("{} link {}", event.link, event.state),
            ConnectionState::Connecting => tracing::debug!("{} link {}", event.link, event.state),
            _ => tracing::warn!("{} link {}", event.link, event.state),
        }
        if let Some(phase) = self.machine.on_link_event(event) {
            match phase {
                BridgePhase::Degraded => tracing::warn!("Bridge phase: {}", phase),
                _ => tracing::info!("Bridge phase: {}", phase),
            }
        }

        if event.link != LinkKind::Serial {
            return;
        }
        if event.state != ConnectionState::Connected {
            self.detect_deadline = None;
            return;
        }
        // A reconnected panel starts over with its own autoreport setting.
        self.autoreport = autoreport_interval(self.default_autoreport_s);
        if self.dialect == PanelDialect::Auto {
            // The panel may have been swapped; wait for it to speak first.
            self.formatter.set_dialect(PanelDialect::Auto);
            self.detect_deadline = Some(Instant::now() + self.detect_timeout);
            tracing::debug!("Waiting up to {:?} to recognise the panel dialect", self.detect_timeout);
            return;
        }
        self.send_handshake().await;
    }

    async fn handle_notification(&mut self, event: NotificationEvent) {
        if !self.machine.link_state(LinkKind::Serial).is_usable() {
            tracing::debug!("Panel not connected, discarding {:?}", event);
            return;
        }
        let lines = notification_lines(&event);
        match self.writer.send_notification(&lines).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Panel busy, dropped notification {:?}", event),
            Err(e) => tracing::warn!("Notification {:?} not delivered: {}", event, e),
        }
    }

    async fn send_autoreport(&mut self) {
        if !self.machine.link_state(LinkKind::Serial).is_usable() {
            return;
        }
        let line = autoreport_line(&self.store.current());
        if let Err(e) = self.writer.send_notification(&[line]).await {
            tracing::debug!("Autoreport not delivered: {}", e);
        }
    }
}

fn autoreport_interval(interval_s: u64) -> Option<Interval> {
    if interval_s == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_s);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Link tasks sharing one shutdown signal. Dropping the guard aborts any
/// task still running, so the serial handle is released even on a panic.
struct LinkTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl LinkTasks {
    fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { shutdown_tx, handles: Vec::new() }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    async fn shutdown(mut self, grace: Duration) -> Result<(), BridgeError> {
        let _ = self.shutdown_tx.send(());
        let mut failure = None;
        for mut handle in self.handles.drain(..) {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => failure = Some(BridgeError::Task(e.to_string())),
                Ok(Err(_)) => {}
                Err(_) => {
                    tracing::warn!("Link task did not stop within {:?}, aborting", grace);
                    handle.abort();
                }
            }
        }
        tracing::info!("Bridge stopped");
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for LinkTasks {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(());
        for handle in &self.handles {
            handle.abort();
        }
    }
}
