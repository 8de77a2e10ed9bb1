//! Printer-state snapshot and its single-writer store.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Temperature {
    pub current: f64,
    pub target: f64,
}

impl Temperature {
    pub fn new(current: f64, target: f64) -> Self {
        Self { current, target }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintState {
    #[default]
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl PrintState {
    /// Map a Klipper `print_stats.state` string. Unknown strings are Standby.
    pub fn from_klipper(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "printing" => PrintState::Printing,
            "paused" => PrintState::Paused,
            "complete" => PrintState::Complete,
            "cancelled" => PrintState::Cancelled,
            "error" => PrintState::Error,
            _ => PrintState::Standby,
        }
    }

    /// A job is loaded (running or paused).
    pub fn is_active(self) -> bool {
        matches!(self, PrintState::Printing | PrintState::Paused)
    }

    /// Klipper's own name for the state.
    pub fn as_klipper(self) -> &'static str {
        match self {
            PrintState::Standby => "standby",
            PrintState::Printing => "printing",
            PrintState::Paused => "paused",
            PrintState::Complete => "complete",
            PrintState::Cancelled => "cancelled",
            PrintState::Error => "error",
        }
    }
}

/// Job progress. Every field is unknown until a print is active.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PrintProgress {
    pub percent_done: Option<f64>,
    pub file_done: Option<u64>,
    pub file_total: Option<u64>,
    pub time_elapsed_sec: Option<f64>,
    pub time_left_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layer {
    pub current: u32,
    pub total: u32,
}

/// Everything the panel can be told about the printer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrinterStatus {
    pub tool_temp: Temperature,
    pub bed_temp: Temperature,
    pub fan_speed_percent: u8,
    pub position: Position,
    pub print_state: PrintState,
    pub progress: PrintProgress,
    pub layer: Option<Layer>,
    pub filename: Option<String>,
}

/// Immutable point-in-time printer state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: PrinterStatus,
    pub firmware_name: String,
    produced_at: Instant,
}

impl Snapshot {
    pub fn new(status: PrinterStatus, firmware_name: impl Into<String>) -> Self {
        Self {
            status,
            firmware_name: firmware_name.into(),
            produced_at: Instant::now(),
        }
    }

    /// Placeholder published before the first successful poll.
    pub fn initial(firmware_name: impl Into<String>) -> Self {
        Self::new(PrinterStatus::default(), firmware_name)
    }

    pub fn produced_at(&self) -> Instant {
        self.produced_at
    }

    pub fn age_millis(&self) -> u64 {
        self.produced_at.elapsed().as_millis() as u64
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.produced_at.elapsed() > max_age
    }

    /// Equal in every field except age.
    pub fn same_state(&self, other: &Snapshot) -> bool {
        self.status == other.status && self.firmware_name == other.firmware_name
    }
}

/// Holds the one current [`Snapshot`]. Publishing swaps the whole value, so
/// readers never see a half-updated state.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new(initial: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current snapshot, returning the one it replaced.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        self.tx.send_replace(Arc::new(snapshot))
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}
