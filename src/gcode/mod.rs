// src/gcode/mod.rs - Marlin command vocabulary spoken by the panel
pub mod formatter;
pub mod parser;

pub use formatter::{Response, ResponseFormatter, autoreport_line, notification_lines};
pub use parser::{Command, CommandKind, detect_dialect, parse_line};
