// src/communication/mod.rs - Panel link
pub mod outbound;
pub mod serial;
pub mod serial_linux;

pub use outbound::{OutboundStats, OutboundWriter};
pub use serial::{LineFramer, SerialError, SerialSession};
pub use serial_linux::LinuxSerial;
