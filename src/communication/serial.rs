// src/communication/serial.rs - Panel serial session
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, broadcast, mpsc};
use tft_shared::backoff::BackoffPolicy;
use tft_shared::{LinkEvent, LinkHealth, LinkKind, SerialInterface};

use super::outbound::OutboundWriter;

/// Longest line accepted from the panel before it is cut and delivered.
pub const MAX_LINE_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not connected to panel")]
    NotConnected,
    #[error("Timeout after {0:?} writing to panel")]
    Timeout(Duration),
}

/// Splits inbound bytes into lines. `\n`, `\r` and `\r\n` all terminate a
/// line; the terminator is not part of the delivered text.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    last_was_cr: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                b'\n' if self.last_was_cr => {
                    self.last_was_cr = false;
                }
                b'\n' | b'\r' => {
                    self.last_was_cr = b == b'\r';
                    lines.push(self.take_line());
                }
                _ => {
                    self.last_was_cr = false;
                    self.buf.push(b);
                    if self.buf.len() >= MAX_LINE_LEN {
                        tracing::warn!("Panel line exceeded {} bytes, cutting it", MAX_LINE_LEN);
                        lines.push(self.take_line());
                    }
                }
            }
        }
        lines
    }

    /// Bytes received after the last terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.last_was_cr = false;
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

/// Owns the panel link: opens it, frames inbound lines for the controller,
/// and reopens it with backoff whenever it fails.
pub struct SerialSession {
    interface: Arc<dyn SerialInterface>,
    port: String,
    baud: u32,
    health: LinkHealth,
    writer: OutboundWriter,
    lines_tx: mpsc::Sender<String>,
    events_tx: mpsc::Sender<LinkEvent>,
}

impl SerialSession {
    pub fn new(
        interface: Arc<dyn SerialInterface>,
        port: impl Into<String>,
        baud: u32,
        policy: BackoffPolicy,
        writer: OutboundWriter,
        lines_tx: mpsc::Sender<String>,
        events_tx: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            interface,
            port: port.into(),
            baud,
            health: LinkHealth::new(LinkKind::Serial, policy),
            writer,
            lines_tx,
            events_tx,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let changed = self.health.mark_connecting();
            self.report(changed).await;
            let opened = tokio::select! {
                _ = shutdown_rx.recv() => break,
                opened = self.interface.open(&self.port, self.baud) => opened,
            };
            match opened {
                Ok(link) => {
                    tracing::info!("Opened panel link {} @ {} baud", self.port, self.baud);
                    let (mut reader, write_half) = tokio::io::split(link);
                    let link_lost = self.writer.attach(write_half).await;
                    let changed = self.health.record_success();
                    self.report(changed).await;

                    let stop = self.read_lines(&mut reader, &link_lost, &mut shutdown_rx).await;
                    self.writer.detach().await;
                    drop(reader);
                    if stop {
                        break;
                    }
                    let changed = self.health.record_lost();
                    self.report(changed).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to open panel link {}: {}", self.port, e);
                    let changed = self.health.record_failure();
                    self.report(changed).await;
                }
            }

            let delay = self.health.next_retry_delay();
            tracing::debug!("Reopening panel link in {:?}", delay);
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.writer.detach().await;
        tracing::info!("Serial session shutting down");
    }

    /// Deliver lines until the link fails. Returns true on shutdown.
    async fn read_lines<R>(
        &mut self,
        reader: &mut R,
        link_lost: &Notify,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        // A fresh framer per connection: fragments from a dead link are dropped.
        let mut framer = LineFramer::new();
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return true,
                _ = link_lost.notified() => {
                    tracing::warn!("Panel link lost on write");
                    return false;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::warn!("Panel link closed by remote");
                        return false;
                    }
                    Ok(n) => {
                        for line in framer.push(&buf[..n]) {
                            tracing::debug!("TFT >> {}", line);
                            if self.lines_tx.send(line).await.is_err() {
                                return true;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Serial read error: {}", e);
                        return false;
                    }
                }
            }
        }
    }

    async fn report(&self, changed: Option<tft_shared::ConnectionState>) {
        if let Some(state) = changed {
            let _ = self.events_tx.send(LinkEvent::new(LinkKind::Serial, state)).await;
        }
    }
}
