use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    #[error("Device does not support {0}")]
    Unsupported(&'static str),

    #[error("Not connected")]
    NotConnected,

    #[error("Notification stream ended")]
    StreamEnded,

    #[error("Timed out waiting for a reply")]
    Timeout,

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Ble(#[from] bluest::Error),
}

/// Terminal failures of a device client, handed to
/// [`Consumer::on_error`](crate::dispatch::Consumer::on_error).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The peripheral could not be discovered at all. No retries are attempted.
    #[error("Device not found: {alias} => {address}, please check the details provided")]
    Configuration { alias: String, address: String },

    /// Discovery itself failed, e.g. the adapter is unavailable.
    #[error("Discovery failed: {0}")]
    Discovery(#[source] TransportError),

    /// Every attempt of the initial connect failed.
    #[error("Max reconnect attempts reached ({attempts}), last error: {source}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// An established session dropped and the single reconnect attempt failed.
    #[error("Reconnect after connection loss failed: {0}")]
    FatalReconnect(#[source] TransportError),
}

/// Frames that are dropped without reaching the parser. These are only logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown operation={0:#04x}")]
    UnknownOperation(u8),

    #[error("frame length {actual} does not match section register={register} (expected {expected})")]
    LengthMismatch { register: u16, expected: usize, actual: usize },

    #[error("CRC check failed")]
    Checksum,
}
