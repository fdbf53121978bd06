use async_trait::async_trait;

use crate::config::ConfiguredDevice;
use crate::error::TransportError;

/// A device seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub alias: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found,
    /// The configured device was not seen. `candidates` lists everything that was.
    NotFound { candidates: Vec<Candidate> },
}

/// The link to one peripheral.
///
/// The client drives a transport from a single task: `discover` once, then
/// `connect`, then any number of `write`/`next_notification` calls until either
/// a call fails or the client disconnects.
#[async_trait]
pub trait Transport: Send {
    /// Look for the configured device on the adapter.
    async fn discover(&mut self, device: &ConfiguredDevice) -> Result<Discovery, TransportError>;

    /// Physically connect to the discovered device and subscribe to its
    /// notifications.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next notification. `Ok(None)` means the notification stream
    /// has ended, i.e. the connection is gone.
    async fn next_notification(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
