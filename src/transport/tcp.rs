//! TCP Transport Driver
//!
//! Stands in for the platform radio library on ordinary networks. The
//! listener side pushes accepted streams into the node's stream channel;
//! the dial side maps a radio address to a configured socket endpoint.
//!
//! TCP cannot report a remote's radio address the way a radio stack does,
//! so inbound connections are identified by matching the source IP against
//! the configured peer list, falling back to an address derived from the
//! IP octets. Dial-in and dial-out for the same peer therefore converge on
//! one admission key.

use super::{
    DeviceInfo, LinkDirection, Radio, RadioStream, StreamEvent, StreamTx, TransportError,
    DIAL_TIMEOUT, SERVICE_UUID,
};
use crate::address::RadioAddr;
use crate::config::{TcpConfig, TcpPeerConfig};
use futures::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// TCP driver state.
#[derive(Default)]
struct Inner {
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// TCP-backed [`Radio`].
pub struct TcpRadio {
    config: TcpConfig,
    device: DeviceInfo,
    inner: Mutex<Inner>,
}

impl TcpRadio {
    /// Create a new TCP radio with the given local identity.
    pub fn new(config: TcpConfig, device: DeviceInfo) -> Self {
        Self {
            config,
            device,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Get the local bound address (only valid after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().expect("tcp radio lock poisoned").local_addr
    }
}

/// Derive a stable radio address from an IP (used for inbound connections
/// from hosts not in the peer list).
fn derive_address(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4
            .octets()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect(),
        IpAddr::V6(v6) => v6
            .octets()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect(),
    }
}

/// Find the configured peer whose endpoint host matches an IP.
fn peer_for_ip(peers: &[TcpPeerConfig], ip: IpAddr) -> Option<&TcpPeerConfig> {
    peers.iter().find(|p| {
        p.endpoint
            .rsplit_once(':')
            .and_then(|(host, _)| host.trim_matches(['[', ']']).parse::<IpAddr>().ok())
            .map(|peer_ip| peer_ip == ip)
            .unwrap_or(false)
    })
}

impl Radio for TcpRadio {
    fn local_device(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn paired_devices(&self) -> Vec<DeviceInfo> {
        self.config
            .peers
            .iter()
            .map(|p| DeviceInfo {
                name: p.name.clone(),
                address: p.address.clone(),
            })
            .collect()
    }

    fn start(&self, incoming: StreamTx) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self
                .inner
                .lock()
                .expect("tcp radio lock poisoned")
                .accept_task
                .is_some()
            {
                return Err(TransportError::AlreadyStarted);
            }

            let listener = TcpListener::bind(self.config.listen())
                .await
                .map_err(|e| TransportError::StartFailed(format!("bind failed: {}", e)))?;
            let local_addr = listener
                .local_addr()
                .map_err(|e| TransportError::StartFailed(format!("get local addr: {}", e)))?;

            info!(local_addr = %local_addr, "TCP transport listening");

            let peers = self.config.peers.clone();
            let accept_task = tokio::spawn(async move {
                loop {
                    let (stream, remote) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "TCP accept failed");
                            continue;
                        }
                    };

                    let device = match peer_for_ip(&peers, remote.ip()) {
                        Some(peer) => DeviceInfo {
                            name: peer.name.clone(),
                            address: peer.address.clone(),
                        },
                        None => DeviceInfo {
                            name: remote.ip().to_string(),
                            address: derive_address(remote.ip()),
                        },
                    };
                    debug!(remote = %remote, device = %device.name, "Accepted TCP stream");

                    let event = StreamEvent {
                        stream: Box::new(stream),
                        device,
                        direction: LinkDirection::Inbound,
                    };
                    if incoming.send(event).await.is_err() {
                        break; // node gone
                    }
                }
            });

            let mut inner = self.inner.lock().expect("tcp radio lock poisoned");
            inner.accept_task = Some(accept_task);
            inner.local_addr = Some(local_addr);
            Ok(())
        })
    }

    fn stop(&self) {
        let mut inner = self.inner.lock().expect("tcp radio lock poisoned");
        if let Some(task) = inner.accept_task.take() {
            task.abort();
        }
        inner.local_addr = None;
    }

    fn dial<'a>(
        &'a self,
        address: &'a str,
        service_uuid: &'a str,
    ) -> BoxFuture<'a, Result<(RadioStream, DeviceInfo), TransportError>> {
        Box::pin(async move {
            if service_uuid != SERVICE_UUID {
                return Err(TransportError::UnknownService(service_uuid.to_string()));
            }

            let wanted = RadioAddr::normalize(address);
            let peer = self
                .config
                .peers
                .iter()
                .find(|p| RadioAddr::normalize(&p.address) == wanted)
                .ok_or_else(|| TransportError::UnknownDevice(address.to_string()))?;

            let stream = match timeout(DIAL_TIMEOUT, TcpStream::connect(&peer.endpoint)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(TransportError::ConnectFailed(e.to_string())),
                Err(_) => return Err(TransportError::Timeout),
            };

            debug!(endpoint = %peer.endpoint, device = %peer.name, "Dialed TCP stream");
            Ok((
                Box::new(stream) as RadioStream,
                DeviceInfo {
                    name: peer.name.clone(),
                    address: peer.address.clone(),
                },
            ))
        })
    }
}
