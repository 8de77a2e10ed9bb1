// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use klipper_tft_bridge::moonraker::models::{Fan, Heater, PrintStats, PrinterObjects, Toolhead};
use klipper_tft_bridge::moonraker::{ApiError, PrinterApi};
use tft_shared::{Config, PrintAction, SerialInterface, SerialLink};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

/// Hands out queued in-memory links; fails to open once the queue is empty.
#[derive(Default)]
pub struct PipeSerial {
    links: Mutex<VecDeque<Box<dyn SerialLink>>>,
    pub opens: AtomicUsize,
}

impl PipeSerial {
    pub fn with_links(links: Vec<Box<dyn SerialLink>>) -> Arc<Self> {
        Arc::new(Self { links: Mutex::new(links.into()), opens: AtomicUsize::new(0) })
    }

    /// `count` connected duplex pipes; the returned ends act as the panel.
    pub fn pipes(count: usize) -> (Arc<Self>, Vec<DuplexStream>) {
        Self::pipes_with_capacity(count, 4096)
    }

    /// Pipes that hold at most `capacity` unread bytes per direction.
    pub fn pipes_with_capacity(count: usize, capacity: usize) -> (Arc<Self>, Vec<DuplexStream>) {
        let mut ours = Vec::new();
        let mut panels = Vec::new();
        for _ in 0..count {
            let (a, b) = tokio::io::duplex(capacity);
            ours.push(Box::new(a) as Box<dyn SerialLink>);
            panels.push(b);
        }
        (Self::with_links(ours), panels)
    }
}

#[async_trait]
impl SerialInterface for PipeSerial {
    async fn open(&self, port: &str, _baud: u32) -> std::io::Result<Box<dyn SerialLink>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} not present", port)))
    }

    fn available_ports(&self) -> Vec<String> {
        vec!["/dev/ttyTEST".to_string()]
    }
}

/// Printer API returning a fixed reply; can be switched into failure.
pub struct FakePrinter {
    objects: Mutex<PrinterObjects>,
    failing: AtomicBool,
    pub polls: AtomicUsize,
    pub actions: Mutex<Vec<PrintAction>>,
}

impl FakePrinter {
    pub fn new(objects: PrinterObjects) -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(objects),
            failing: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
            actions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_objects(&self, objects: PrinterObjects) {
        *self.objects.lock().unwrap() = objects;
    }

    pub fn set_state(&self, state: &str) {
        if let Some(stats) = self.objects.lock().unwrap().print_stats.as_mut() {
            stats.state = state.to_string();
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrinterApi for FakePrinter {
    async fn query_status(&self) -> Result<PrinterObjects, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Status(503));
        }
        Ok(self.objects.lock().unwrap().clone())
    }

    async fn run_action(&self, action: PrintAction) -> Result<(), ApiError> {
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

/// Extruder at 210/210, bed at 60/60, idle.
pub fn idle_printer() -> PrinterObjects {
    PrinterObjects {
        toolhead: Some(Toolhead { position: vec![10.0, 20.0, 5.0, 0.0] }),
        extruder: Some(Heater { temperature: 210.0, target: 210.0 }),
        heater_bed: Some(Heater { temperature: 60.0, target: 60.0 }),
        fan: Some(Fan { speed: 0.0 }),
        print_stats: Some(PrintStats { state: "standby".to_string(), ..Default::default() }),
        virtual_sdcard: None,
        display_status: None,
    }
}

/// Defaults with timings short enough for tests.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.moonraker.poll_interval_ms = 20;
    config.moonraker.request_timeout_ms = 200;
    config.serial.port = "/dev/ttyTEST".to_string();
    config.serial.write_timeout_ms = 500;
    config.backoff.initial_ms = 10;
    config.backoff.max_ms = 40;
    config
}

/// The panel side of a pipe.
pub struct Panel {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Panel {
    pub fn new(stream: DuplexStream) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self { lines: BufReader::new(r).lines(), writer: w }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Bytes without a terminator.
    pub async fn send_raw(&mut self, bytes: &str) {
        self.writer.write_all(bytes.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line, or None on EOF or after two seconds of silence.
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .ok()
            .and_then(|r| r.ok())
            .flatten()
    }

    /// Skip lines until one starts with `prefix`.
    pub async fn expect_prefix(&mut self, prefix: &str) -> String {
        loop {
            match self.next_line().await {
                Some(line) if line.starts_with(prefix) => return line,
                Some(_) => continue,
                None => panic!("panel never received a line starting with {:?}", prefix),
            }
        }
    }
}

/// Poll `cond` every 10ms for up to two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
