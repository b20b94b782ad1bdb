//! Transport Layer Abstractions
//!
//! The engine talks to the radio through one narrow interface: accept
//! inbound byte streams, dial outbound ones by device address and service
//! id, enumerate paired devices, and report the local device. Everything
//! else (platform stacks, sockets, pairing) lives behind [`Radio`].
//!
//! Inbound streams are pushed into the node's stream channel by the
//! driver's accept loop; the node never polls the transport.

pub mod memory;
pub mod tcp;

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Service id all nodes accept and dial. Must match on every node.
pub const SERVICE_UUID: &str = "a1b2c3d4-e5f6-7890-abcd-ef1234567890";

/// Outbound dial timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer size for the inbound stream channel.
pub const STREAM_CHANNEL_SIZE: usize = 16;

/// Object-safe alias for a bidirectional byte stream.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamIo for T {}

/// A live bidirectional byte stream to a remote device.
pub type RadioStream = Box<dyn StreamIo>;

/// Transport-reported identity of a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Raw radio address as the platform reports it (not normalized).
    pub address: String,
}

/// Which side opened the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkDirection {
    /// The remote dialed us.
    Inbound,
    /// We dialed the remote.
    Outbound,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkDirection::Inbound => "inbound",
            LinkDirection::Outbound => "outbound",
        };
        write!(f, "{}", s)
    }
}

/// A newly established stream, inbound or outbound, headed for admission.
pub struct StreamEvent {
    pub stream: RadioStream,
    pub device: DeviceInfo,
    pub direction: LinkDirection,
}

impl fmt::Debug for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEvent")
            .field("device", &self.device)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Channel sender for established streams.
pub type StreamTx = mpsc::Sender<StreamEvent>;

/// Channel receiver for established streams.
pub type StreamRx = mpsc::Receiver<StreamEvent>;

/// Create a stream channel with the given buffer size.
pub fn stream_channel(buffer: usize) -> (StreamTx, StreamRx) {
    mpsc::channel(buffer)
}

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not started")]
    NotStarted,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport failed to start: {0}")]
    StartFailed(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("connect timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The narrow radio interface the engine depends on.
///
/// Drivers are trait objects shared across tasks, so the async operations
/// return boxed futures and internal state sits behind interior
/// mutability.
pub trait Radio: Send + Sync {
    /// Local radio name and address.
    fn local_device(&self) -> DeviceInfo;

    /// Enumerate paired devices.
    fn paired_devices(&self) -> Vec<DeviceInfo>;

    /// Begin accepting inbound streams, delivering them to `incoming`.
    fn start(&self, incoming: StreamTx) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Stop accepting inbound streams.
    fn stop(&self);

    /// Dial a stream to `(address, service_uuid)`.
    fn dial<'a>(
        &'a self,
        address: &'a str,
        service_uuid: &'a str,
    ) -> BoxFuture<'a, Result<(RadioStream, DeviceInfo), TransportError>>;
}
