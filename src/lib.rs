// klipper-tft-bridge: impersonates a Marlin mainboard towards a TFT panel,
// answering from printer state polled out of Moonraker.
pub mod bridge;
pub mod communication;
pub mod gcode;
pub mod moonraker;

pub use tft_shared;
