use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream to the panel. Implemented by the OS serial port and by
/// in-memory pipes in tests.
pub trait SerialLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialLink for T {}

/// Opens the panel link. The serial session calls this again on every
/// reconnect.
#[async_trait]
pub trait SerialInterface: Send + Sync {
    async fn open(&self, port: &str, baud: u32) -> std::io::Result<Box<dyn SerialLink>>;
    fn available_ports(&self) -> Vec<String>;
}
