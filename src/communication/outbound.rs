// src/communication/outbound.rs - Single writer for everything sent to the panel
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tft_shared::SerialLink;

use super::serial::SerialError;
use crate::gcode::Response;
use crate::gcode::formatter::LINE_TERMINATOR;

type PanelWriter = WriteHalf<Box<dyn SerialLink>>;

/// Frames accepted per connection before `send_response` has to wait.
const FRAME_QUEUE: usize = 32;

#[derive(Debug, Default)]
pub struct OutboundStats {
    pub responses_sent: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_dropped: AtomicU64,
    pub write_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Response,
    Notification,
}

/// Whole lines queued as one unit. A frame is never interleaved with another.
struct Frame {
    kind: FrameKind,
    bytes: Vec<u8>,
    written: usize,
}

impl Frame {
    fn new(kind: FrameKind, lines: &[String]) -> Self {
        let mut wire = String::with_capacity(lines.iter().map(|l| l.len() + LINE_TERMINATOR.len()).sum());
        for line in lines {
            tracing::debug!("PI >> {}", line);
            wire.push_str(line);
            wire.push_str(LINE_TERMINATOR);
        }
        Self { kind, bytes: wire.into_bytes(), written: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    fn is_done(&self) -> bool {
        self.written >= self.bytes.len()
    }
}

struct Connection {
    frames_tx: mpsc::Sender<Frame>,
    /// Frames queued or partly written on this connection.
    backlog: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

/// Everything for the panel goes through one writer task per connection, so
/// response lines and notification lines never interleave. Responses are
/// always queued; notifications are dropped unless the link is idle.
#[derive(Clone)]
pub struct OutboundWriter {
    conn: Arc<Mutex<Option<Connection>>>,
    write_timeout: Duration,
    stats: Arc<OutboundStats>,
}

impl OutboundWriter {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(None)),
            write_timeout,
            stats: Arc::new(OutboundStats::default()),
        }
    }

    /// Start writing to the write half of a fresh connection. The returned
    /// handle is notified if the link fails underneath the writer.
    pub async fn attach(&self, half: PanelWriter) -> Arc<Notify> {
        let link_lost = Arc::new(Notify::new());
        let backlog = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let task = tokio::spawn(write_frames(
            half,
            frames_rx,
            backlog.clone(),
            link_lost.clone(),
            self.write_timeout,
            self.stats.clone(),
        ));

        let previous = self.conn.lock().await.replace(Connection { frames_tx, backlog, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        link_lost
    }

    /// Stop writing. Queued lines get one write timeout to go out.
    pub async fn detach(&self) {
        let Some(conn) = self.conn.lock().await.take() else {
            return;
        };
        let Connection { frames_tx, mut task, .. } = conn;
        drop(frames_tx);
        if tokio::time::timeout(self.write_timeout, &mut task).await.is_err() {
            tracing::debug!("Panel writer still busy after {:?}, aborting", self.write_timeout);
            task.abort();
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.conn.lock().await.as_ref().is_some_and(|c| !c.frames_tx.is_closed())
    }

    pub fn stats(&self) -> &OutboundStats {
        &self.stats
    }

    /// Queue a complete response. Waits only when the queue itself is full.
    pub async fn send_response(&self, response: &Response) -> Result<(), SerialError> {
        if response.is_empty() {
            return Ok(());
        }
        let (frames_tx, backlog) = self.sender().await?;
        backlog.fetch_add(1, Ordering::SeqCst);
        frames_tx
            .send(Frame::new(FrameKind::Response, response.lines()))
            .await
            .map_err(|_| SerialError::NotConnected)
    }

    /// Queue notification lines only if nothing else is waiting on the link.
    /// Returns `Ok(false)` when they were dropped.
    pub async fn send_notification(&self, lines: &[String]) -> Result<bool, SerialError> {
        if lines.is_empty() {
            return Ok(true);
        }
        let (frames_tx, backlog) = self.sender().await?;
        if backlog.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            self.dropped(lines);
            return Ok(false);
        }
        match frames_tx.try_send(Frame::new(FrameKind::Notification, lines)) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                backlog.fetch_sub(1, Ordering::SeqCst);
                self.dropped(lines);
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Err(SerialError::NotConnected),
        }
    }

    async fn sender(&self) -> Result<(mpsc::Sender<Frame>, Arc<AtomicUsize>), SerialError> {
        match self.conn.lock().await.as_ref() {
            Some(c) if !c.frames_tx.is_closed() => Ok((c.frames_tx.clone(), c.backlog.clone())),
            _ => Err(SerialError::NotConnected),
        }
    }

    fn dropped(&self, lines: &[String]) {
        self.stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Panel backlogged, dropping notification {:?}", lines.first());
    }
}

enum Step {
    Queued(Option<Frame>),
    Wrote(std::io::Result<usize>),
    Stalled,
}

/// Drains queued frames into the link in order. Ends when the queue is closed
/// and empty, or when the link fails; a failure is signalled on `link_lost`.
async fn write_frames(
    mut half: PanelWriter,
    mut frames_rx: mpsc::Receiver<Frame>,
    backlog: Arc<AtomicUsize>,
    link_lost: Arc<Notify>,
    write_timeout: Duration,
    stats: Arc<OutboundStats>,
) {
    let mut pending: VecDeque<Frame> = VecDeque::new();
    let mut open = true;
    // Set while a response waits on the link; restarted on every write that
    // makes progress. A notification alone never times the link out.
    let mut stalled_since: Option<Instant> = None;

    while open || !pending.is_empty() {
        let deadline = stalled_since.map(|since| since + write_timeout);
        let step = {
            let chunk = pending.front().map(Frame::remaining).unwrap_or(&[][..]);
            tokio::select! {
                biased;
                frame = frames_rx.recv(), if open => Step::Queued(frame),
                written = half.write(chunk), if !chunk.is_empty() => Step::Wrote(written),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::Stalled
                }
            }
        };

        let failure = match step {
            Step::Queued(Some(frame)) => {
                if frame.kind == FrameKind::Response && stalled_since.is_none() {
                    stalled_since = Some(Instant::now());
                }
                pending.push_back(frame);
                continue;
            }
            Step::Queued(None) => {
                open = false;
                continue;
            }
            Step::Wrote(Ok(0)) => SerialError::Io(std::io::ErrorKind::WriteZero.into()),
            Step::Wrote(Ok(n)) => {
                if let Some(front) = pending.front_mut() {
                    front.written += n;
                }
                if pending.front().is_some_and(Frame::is_done) {
                    if let Some(frame) = pending.pop_front() {
                        let sent = match frame.kind {
                            FrameKind::Response => &stats.responses_sent,
                            FrameKind::Notification => &stats.notifications_sent,
                        };
                        sent.fetch_add(1, Ordering::Relaxed);
                        backlog.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                stalled_since = pending.iter().any(|f| f.kind == FrameKind::Response).then(Instant::now);
                continue;
            }
            Step::Wrote(Err(e)) => SerialError::Io(e),
            Step::Stalled => SerialError::Timeout(write_timeout),
        };

        tracing::error!("Panel write failed: {}", failure);
        stats.write_errors.fetch_add(1, Ordering::Relaxed);
        link_lost.notify_one();
        return;
    }
}
