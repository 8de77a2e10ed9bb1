//! Marlin response text for the panel.
//!
//! The panel scans responses for substrings instead of parsing them, so the
//! token order and number formats here are fixed: one decimal for
//! temperatures, two for positions and steps.

use tft_shared::config::PanelConfig;
use tft_shared::{NotificationEvent, PanelDialect, PrintState, Snapshot};

use super::parser::{Command, CommandKind};

pub const ACK: &str = "ok";
pub const LINE_TERMINATOR: &str = "\r\n";

const CAPABILITIES: [&str; 4] = [
    "Cap:EEPROM:1",
    "Cap:AUTOREPORT_TEMP:1",
    "Cap:HOST_ACTION_COMMANDS:1",
    "Cap:PROMPT_SUPPORT:1",
];

/// Identity original MKS firmware accepts as a mainboard.
const MKS_IDENTITY: &str = "FIRMWARE_NAME:MKS-TFT FIRMWARE_VERSION:2.0.6";

/// Scale used for `SD printing byte` when the real file size is unknown.
const SD_PERCENT_SCALE: u64 = 1_000_000;

/// Speed and flow factors in the status line. They are not polled.
const NOMINAL_FACTOR_PERCENT: u32 = 100;

/// Longest file name shown in the status line, ellipsis included.
const STATUS_FILENAME_MAX: usize = 20;

/// One or more lines written to the panel as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    lines: Vec<String>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack() -> Self {
        Self::from_lines([ACK])
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect() }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Bytes as written to the link, every line terminated.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.len() + 2).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push_str(LINE_TERMINATOR);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    dialect: PanelDialect,
    extruder_count: u8,
    steps_per_mm: [f64; 4],
}

impl ResponseFormatter {
    pub fn new(panel: &PanelConfig) -> Self {
        Self {
            dialect: panel.dialect,
            extruder_count: panel.extruder_count,
            steps_per_mm: panel.steps_per_mm,
        }
    }

    pub fn dialect(&self) -> PanelDialect {
        self.dialect
    }

    /// Switch dialect once the panel's firmware is known. Until then `Auto`
    /// answers the BTT way.
    pub fn set_dialect(&mut self, dialect: PanelDialect) {
        self.dialect = dialect;
    }

    fn is_mks(&self) -> bool {
        self.dialect == PanelDialect::Mks
    }

    pub fn format(&self, command: &Command, snapshot: &Snapshot) -> Response {
        match command.kind {
            CommandKind::TempReport if self.is_mks() => {
                Response::from_lines([temperature_fields(snapshot), ACK.to_string()])
            }
            CommandKind::TempReport => Response::from_lines([format!("{} {}", ACK, temperature_fields(snapshot))]),
            CommandKind::FirmwareInfo => Response::from_lines([self.firmware_line(snapshot), ACK.to_string()]),
            CommandKind::StatusLine => Response::from_lines([status_line(snapshot), ACK.to_string()]),
            CommandKind::PositionReport => Response::from_lines([self.position_line(snapshot), ACK.to_string()]),
            CommandKind::StepsPerMm => Response::from_lines([self.steps_line(), ACK.to_string()]),
            CommandKind::Capabilities => {
                let mut response = Response::from_lines(CAPABILITIES);
                response.push(ACK);
                response
            }
            CommandKind::SdStatus => Response::from_lines([sd_status_line(snapshot), ACK.to_string()]),
            CommandKind::FileList => {
                let mut response = Response::from_lines(["Begin file list"]);
                if let Some(name) = snapshot.status.filename.as_deref().filter(|n| !n.is_empty()) {
                    response.push(name);
                }
                response.push("End file list");
                response.push(ACK);
                response
            }
            CommandKind::AutoReportTemp { .. } | CommandKind::HostAction(_) | CommandKind::Unknown => Response::ack(),
        }
    }

    /// Sent on every fresh serial connection so the panel recognises a
    /// Marlin board without waiting for its own queries.
    pub fn handshake(&self, snapshot: &Snapshot) -> Response {
        if self.is_mks() {
            return Response::from_lines([temperature_fields(snapshot), MKS_IDENTITY.to_string(), ACK.to_string()]);
        }
        let mut response = Response::from_lines([
            format!("{} {}", ACK, temperature_fields(snapshot)),
            self.firmware_line(snapshot),
        ]);
        for line in self.format(&Command::new(CommandKind::Capabilities, ""), snapshot).lines() {
            response.push(line.clone());
        }
        response.push("//action:notification Ready.");
        response
    }

    fn firmware_line(&self, snapshot: &Snapshot) -> String {
        if self.is_mks() {
            return MKS_IDENTITY.to_string();
        }
        format!(
            "FIRMWARE_NAME:{} HOST_ACTION_COMMANDS:1 EXTRUDER_COUNT:{}",
            snapshot.firmware_name, self.extruder_count
        )
    }

    fn position_line(&self, snapshot: &Snapshot) -> String {
        let p = snapshot.status.position;
        let [sx, sy, sz, _] = self.steps_per_mm;
        format!(
            "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2} Count X:{} Y:{} Z:{}",
            p.x,
            p.y,
            p.z,
            p.e,
            (p.x * sx).round() as i64,
            (p.y * sy).round() as i64,
            (p.z * sz).round() as i64
        )
    }

    fn steps_line(&self) -> String {
        let [x, y, z, e] = self.steps_per_mm;
        format!("M92 X{:.2} Y{:.2} Z{:.2} E{:.2}", x, y, z, e)
    }
}

/// Unsolicited temperature report (M155 autoreport). No acknowledgement.
pub fn autoreport_line(snapshot: &Snapshot) -> String {
    temperature_fields(snapshot)
}

fn temperature_fields(snapshot: &Snapshot) -> String {
    let tool = snapshot.status.tool_temp;
    let bed = snapshot.status.bed_temp;
    format!(
        "T:{:.1} /{:.1} B:{:.1} /{:.1} @:0 B@:0",
        tool.current, tool.target, bed.current, bed.target
    )
}

fn sd_status_line(snapshot: &Snapshot) -> String {
    let status = &snapshot.status;
    if !matches!(status.print_state, PrintState::Printing | PrintState::Paused) {
        return "Not SD printing".to_string();
    }
    let progress = status.progress;
    let (done, total) = match (progress.file_done, progress.file_total) {
        (Some(done), Some(total)) if total > 0 => (done.min(total), total),
        _ => {
            let pct = progress.percent_done.unwrap_or(0.0).clamp(0.0, 100.0);
            ((pct / 100.0 * SD_PERCENT_SCALE as f64) as u64, SD_PERCENT_SCALE)
        }
    };
    format!("SD printing byte {}/{}", done, total)
}

/// `KLIP:` line for custom panel screens: temperatures, state, progress,
/// position, elapsed/remaining time, file, speed, flow and fan, colon separated.
fn status_line(snapshot: &Snapshot) -> String {
    let status = &snapshot.status;
    let (tool, bed, pos) = (status.tool_temp, status.bed_temp, status.position);
    let progress = status.progress;
    format!(
        "KLIP:{:.1}:{:.1}:{:.1}:{:.1}:{}:{:.0}:{:.2}:{:.2}:{:.2}:{}/{}:{}:{}:{}:{}",
        tool.current,
        tool.target,
        bed.current,
        bed.target,
        status.print_state.as_klipper(),
        progress.percent_done.unwrap_or(0.0).clamp(0.0, 100.0),
        pos.x,
        pos.y,
        pos.z,
        format_duration_hm(progress.time_elapsed_sec),
        format_duration_hm(progress.time_left_sec),
        status_filename(status.filename.as_deref()),
        NOMINAL_FACTOR_PERCENT,
        NOMINAL_FACTOR_PERCENT,
        status.fan_speed_percent
    )
}

/// Base name, shortened to fit the status screen.
fn status_filename(path: Option<&str>) -> String {
    let name = path
        .and_then(|p| p.rsplit('/').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("No file");
    if name.chars().count() <= STATUS_FILENAME_MAX {
        return name.to_string();
    }
    let mut short: String = name.chars().take(STATUS_FILENAME_MAX - 3).collect();
    short.push_str("...");
    short
}

/// `HH:MM`, zero when unknown.
fn format_duration_hm(secs: Option<f64>) -> String {
    let secs = secs.unwrap_or(0.0).max(0.0) as u64;
    format!("{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
}

/// Lines announcing one notification.
pub fn notification_lines(event: &NotificationEvent) -> Vec<String> {
    match *event {
        NotificationEvent::PrintStarted => vec!["//action:print_start".to_string()],
        NotificationEvent::Paused => vec!["//action:pause".to_string()],
        NotificationEvent::Resumed => vec!["//action:resume".to_string()],
        NotificationEvent::PrintFinished => vec!["//action:print_end".to_string()],
        NotificationEvent::PrintCancelled => vec!["//action:cancel".to_string()],
        NotificationEvent::Progress { percent, time_left_sec } => {
            let mut lines = vec![format!("//action:notification Data Left {}/100", percent)];
            if let Some(secs) = time_left_sec {
                lines.push(format!("//action:notification Time Left {}", format_duration_hms(secs)));
            }
            lines
        }
        NotificationEvent::LayerChanged { current, total } => {
            vec![format!("//action:notification Layer Left {}/{}", current, total)]
        }
        NotificationEvent::FanChanged { percent } => {
            let pwm = (f64::from(percent.min(100)) * 255.0 / 100.0).round() as u8;
            vec![format!("M106 S{}", pwm)]
        }
    }
}

/// `01h02m03s`
pub fn format_duration_hms(secs: u64) -> String {
    format!("{:02}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::parser::parse_line;
    use tft_shared::{Position, PrinterStatus, Temperature};

    fn formatter() -> ResponseFormatter {
        ResponseFormatter::new(&PanelConfig::default())
    }

    fn snapshot_with(f: impl FnOnce(&mut PrinterStatus)) -> Snapshot {
        let mut status = PrinterStatus::default();
        f(&mut status);
        Snapshot::new(status, "Klipper")
    }

    fn respond(line: &str, snapshot: &Snapshot) -> Vec<String> {
        formatter().format(&parse_line(line), snapshot).lines().to_vec()
    }

    #[test]
    fn test_temperature_report_exact() {
        let snap = snapshot_with(|s| {
            s.tool_temp = Temperature::new(210.0, 210.0);
            s.bed_temp = Temperature::new(60.0, 60.0);
        });
        assert_eq!(respond("M105", &snap), vec!["ok T:210.0 /210.0 B:60.0 /60.0 @:0 B@:0"]);
    }

    #[test]
    fn test_temperature_rounds_to_one_decimal() {
        let snap = snapshot_with(|s| {
            s.tool_temp = Temperature::new(209.96, 0.0);
            s.bed_temp = Temperature::new(23.04, 0.0);
        });
        assert_eq!(respond("M105", &snap), vec!["ok T:210.0 /0.0 B:23.0 /0.0 @:0 B@:0"]);
    }

    #[test]
    fn test_firmware_info() {
        let snap = Snapshot::initial("Klipper");
        assert_eq!(
            respond("M115", &snap),
            vec!["FIRMWARE_NAME:Klipper HOST_ACTION_COMMANDS:1 EXTRUDER_COUNT:1", "ok"]
        );
    }

    #[test]
    fn test_position_report_with_counts() {
        let snap = snapshot_with(|s| {
            s.position = Position { x: 150.0, y: 150.0, z: 10.0, e: 0.0 };
        });
        assert_eq!(
            respond("M114", &snap),
            vec!["X:150.00 Y:150.00 Z:10.00 E:0.00 Count X:12000 Y:12000 Z:4000", "ok"]
        );
    }

    #[test]
    fn test_steps_per_mm() {
        let snap = Snapshot::initial("Klipper");
        assert_eq!(respond("M92", &snap), vec!["M92 X80.00 Y80.00 Z400.00 E420.00", "ok"]);
    }

    #[test]
    fn test_capabilities_block() {
        let snap = Snapshot::initial("Klipper");
        let response = formatter().format(&Command::new(CommandKind::Capabilities, ""), &snap);
        assert_eq!(response.lines().len(), 5);
        assert!(response.lines().iter().any(|l| l == "Cap:AUTOREPORT_TEMP:1"));
        assert!(response.lines().iter().any(|l| l == "Cap:EEPROM:1"));
        assert_eq!(response.lines().last().unwrap(), "ok");
    }

    #[test]
    fn test_sd_status() {
        let idle = Snapshot::initial("Klipper");
        assert_eq!(respond("M27", &idle), vec!["Not SD printing", "ok"]);

        let printing = snapshot_with(|s| {
            s.print_state = PrintState::Printing;
            s.progress.file_done = Some(2500);
            s.progress.file_total = Some(10000);
        });
        assert_eq!(respond("M27", &printing), vec!["SD printing byte 2500/10000", "ok"]);

        let percent_only = snapshot_with(|s| {
            s.print_state = PrintState::Paused;
            s.progress.percent_done = Some(42.0);
        });
        assert_eq!(respond("M27", &percent_only), vec!["SD printing byte 420000/1000000", "ok"]);
    }

    #[test]
    fn test_file_list() {
        let snap = snapshot_with(|s| s.filename = Some("benchy.gcode".to_string()));
        assert_eq!(respond("M20", &snap), vec!["Begin file list", "benchy.gcode", "End file list", "ok"]);
        assert_eq!(respond("M20", &Snapshot::initial("Klipper")), vec!["Begin file list", "End file list", "ok"]);
    }

    #[test]
    fn test_unknown_and_actuation_get_plain_ack() {
        let snap = Snapshot::initial("Klipper");
        for line in ["", "garbage", "M104 S200", "G28", "M155 S2", "M118 action:remote pause"] {
            assert_eq!(respond(line, &snap), vec!["ok"], "{:?}", line);
        }
    }

    #[test]
    fn test_every_response_ends_with_ack_token() {
        let snap = Snapshot::initial("Klipper");
        for line in ["M105", "M115", "M114", "M92", "M27", "M20", "M155 S1", "nonsense"] {
            let lines = respond(line, &snap);
            assert!(lines.last().unwrap().starts_with("ok"), "{:?}", line);
        }
    }

    #[test]
    fn test_handshake_sequence() {
        let snap = Snapshot::initial("Klipper");
        let response = formatter().handshake(&snap);
        let lines = response.lines();
        assert_eq!(lines[0], "ok T:0.0 /0.0 B:0.0 /0.0 @:0 B@:0");
        assert!(lines[1].starts_with("FIRMWARE_NAME:Klipper"));
        assert_eq!(lines[2], "Cap:EEPROM:1");
        assert_eq!(lines.last().unwrap(), "//action:notification Ready.");
    }

    #[test]
    fn test_status_line() {
        let snap = snapshot_with(|s| {
            s.tool_temp = Temperature::new(205.3, 210.0);
            s.bed_temp = Temperature::new(60.0, 60.0);
            s.position = Position { x: 117.5, y: 98.25, z: 0.4, e: 0.0 };
            s.print_state = PrintState::Printing;
            s.progress.percent_done = Some(42.4);
            s.progress.time_elapsed_sec = Some(3720.0);
            s.progress.time_left_sec = Some(5460.0);
            s.filename = Some("gcodes/calibration_cube_0.2mm_PLA.gcode".to_string());
            s.fan_speed_percent = 80;
        });
        assert_eq!(
            respond("M999", &snap),
            vec![
                "KLIP:205.3:210.0:60.0:60.0:printing:42:117.50:98.25:0.40:01:02/01:31:calibration_cube_...:100:100:80",
                "ok"
            ]
        );
    }

    #[test]
    fn test_status_line_when_idle() {
        let line = &respond("M999", &Snapshot::initial("Klipper"))[0];
        assert_eq!(line, "KLIP:0.0:0.0:0.0:0.0:standby:0:0.00:0.00:0.00:00:00/00:00:No file:100:100:0");
    }

    #[test]
    fn test_mks_dialect() {
        let mut formatter = formatter();
        formatter.set_dialect(PanelDialect::Mks);
        let snap = snapshot_with(|s| s.tool_temp = Temperature::new(25.0, 0.0));
        let temps = formatter.format(&parse_line("M105"), &snap);
        assert_eq!(temps.lines(), ["T:25.0 /0.0 B:0.0 /0.0 @:0 B@:0", "ok"]);
        assert_eq!(
            formatter.format(&parse_line("M115"), &snap).lines(),
            ["FIRMWARE_NAME:MKS-TFT FIRMWARE_VERSION:2.0.6", "ok"]
        );
        assert_eq!(
            formatter.handshake(&snap).lines(),
            ["T:25.0 /0.0 B:0.0 /0.0 @:0 B@:0", "FIRMWARE_NAME:MKS-TFT FIRMWARE_VERSION:2.0.6", "ok"]
        );
    }

    #[test]
    fn test_auto_dialect_answers_like_btt() {
        let mut formatter = formatter();
        formatter.set_dialect(PanelDialect::Auto);
        let lines = formatter.format(&parse_line("M105"), &Snapshot::initial("Klipper")).lines().to_vec();
        assert_eq!(lines, vec!["ok T:0.0 /0.0 B:0.0 /0.0 @:0 B@:0"]);
    }

    #[test]
    fn test_wire_format_terminates_every_line() {
        let response = Response::from_lines(["a", "ok"]);
        assert_eq!(response.to_wire(), "a\r\nok\r\n");
    }

    #[test]
    fn test_autoreport_has_no_ack() {
        let snap = snapshot_with(|s| s.tool_temp = Temperature::new(25.5, 0.0));
        assert_eq!(autoreport_line(&snap), "T:25.5 /0.0 B:0.0 /0.0 @:0 B@:0");
    }

    #[test]
    fn test_notification_lines() {
        assert_eq!(notification_lines(&NotificationEvent::PrintFinished), vec!["//action:print_end"]);
        assert_eq!(
            notification_lines(&NotificationEvent::Progress { percent: 45, time_left_sec: Some(3723) }),
            vec!["//action:notification Data Left 45/100", "//action:notification Time Left 01h02m03s"]
        );
        assert_eq!(
            notification_lines(&NotificationEvent::LayerChanged { current: 12, total: 200 }),
            vec!["//action:notification Layer Left 12/200"]
        );
        assert_eq!(notification_lines(&NotificationEvent::FanChanged { percent: 100 }), vec!["M106 S255"]);
        assert_eq!(notification_lines(&NotificationEvent::FanChanged { percent: 50 }), vec!["M106 S128"]);
    }
}
