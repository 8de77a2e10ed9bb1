use async_trait::async_trait;
use tft_shared::serial_interface::{SerialInterface, SerialLink};

/// Linux implementation of SerialInterface using serial2-tokio
pub struct LinuxSerial;

#[async_trait]
impl SerialInterface for LinuxSerial {
    async fn open(&self, port: &str, baud: u32) -> std::io::Result<Box<dyn SerialLink>> {
        let serial = serial2_tokio::SerialPort::open(port, baud)?;
        Ok(Box::new(serial))
    }

    fn available_ports(&self) -> Vec<String> {
        match serial2_tokio::SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(e) => {
                tracing::debug!("Could not enumerate serial ports: {}", e);
                vec![]
            }
        }
    }
}
