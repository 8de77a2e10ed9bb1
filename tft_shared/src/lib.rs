// tft_shared: data model and seams shared by the bridge, its binary and tests

pub mod backoff;
pub mod config;
pub mod connection;
pub mod notification;
pub mod serial_interface;
pub mod snapshot;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::{Config, ConfigError, PanelDialect, load_config};
pub use connection::{ConnectionState, LinkEvent, LinkHealth, LinkKind};
pub use notification::{NotificationEvent, PrintAction};
pub use serial_interface::{SerialInterface, SerialLink};
pub use snapshot::{
    Layer, Position, PrintProgress, PrintState, PrinterStatus, Snapshot, SnapshotStore, Temperature,
};
