// src/moonraker/models.rs - Moonraker response payloads
use serde::Deserialize;

/// Objects requested on every poll.
pub const QUERY_OBJECTS: [&str; 7] = [
    "toolhead",
    "extruder",
    "heater_bed",
    "fan",
    "print_stats",
    "virtual_sdcard",
    "display_status",
];

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub result: QueryResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    pub status: PrinterObjects,
}

/// The subset of printer objects the bridge reads. Any object may be absent
/// from a reply when it is not configured in Klipper.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrinterObjects {
    pub toolhead: Option<Toolhead>,
    pub extruder: Option<Heater>,
    pub heater_bed: Option<Heater>,
    pub fan: Option<Fan>,
    pub print_stats: Option<PrintStats>,
    pub virtual_sdcard: Option<VirtualSdcard>,
    pub display_status: Option<DisplayStatus>,
}

impl PrinterObjects {
    /// A reply without the extruder or print_stats is not a printer we can
    /// describe.
    pub fn is_usable(&self) -> bool {
        self.extruder.is_some() || self.print_stats.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Toolhead {
    #[serde(default)]
    pub position: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Heater {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub target: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Fan {
    /// 0.0 - 1.0
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrintStats {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub print_duration: f64,
    #[serde(default)]
    pub info: Option<PrintStatsInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PrintStatsInfo {
    pub current_layer: Option<u32>,
    pub total_layer: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct VirtualSdcard {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub file_position: u64,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct DisplayStatus {
    #[serde(default)]
    pub progress: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfoResponse {
    pub result: ServerInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub klippy_connected: bool,
    #[serde(default)]
    pub klippy_state: String,
    #[serde(default)]
    pub moonraker_version: Option<String>,
}
