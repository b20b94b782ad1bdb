//! In-Process Memory Transport
//!
//! A registry of endpoints wired together with in-memory duplex streams.
//! Gives multi-node tests and demos a real accept/dial surface without
//! touching the network: dialing an endpoint hands the callee the other
//! half of a fresh duplex pipe through its inbound stream channel.

use super::{
    DeviceInfo, LinkDirection, Radio, RadioStream, StreamEvent, StreamTx, TransportError,
};
use crate::address::RadioAddr;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Buffer size of each duplex pipe half.
const PIPE_CAPACITY: usize = 256 * 1024;

#[derive(Clone)]
struct Registration {
    device: DeviceInfo,
    incoming: StreamTx,
}

/// A shared in-process "radio spectrum" endpoints register on.
#[derive(Clone, Default)]
pub struct MemoryNet {
    inner: Arc<Mutex<HashMap<String, Registration>>>,
}

impl MemoryNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint on this net with the given device identity.
    pub fn endpoint(&self, name: &str, address: &str) -> MemoryRadio {
        MemoryRadio {
            net: self.clone(),
            device: DeviceInfo {
                name: name.to_string(),
                address: address.to_string(),
            },
        }
    }
}

/// One device on a [`MemoryNet`].
pub struct MemoryRadio {
    net: MemoryNet,
    device: DeviceInfo,
}

impl MemoryRadio {
    fn key(&self) -> String {
        RadioAddr::normalize(&self.device.address).as_str().to_string()
    }
}

impl Radio for MemoryRadio {
    fn local_device(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn paired_devices(&self) -> Vec<DeviceInfo> {
        let key = self.key();
        let registry = self.net.inner.lock().expect("memory net lock poisoned");
        registry
            .iter()
            .filter(|(k, _)| **k != key)
            .map(|(_, reg)| reg.device.clone())
            .collect()
    }

    fn start(&self, incoming: StreamTx) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut registry = self.net.inner.lock().expect("memory net lock poisoned");
            if registry.contains_key(&self.key()) {
                return Err(TransportError::AlreadyStarted);
            }
            registry.insert(
                self.key(),
                Registration {
                    device: self.device.clone(),
                    incoming,
                },
            );
            debug!(address = %self.device.address, "Memory endpoint registered");
            Ok(())
        })
    }

    fn stop(&self) {
        let mut registry = self.net.inner.lock().expect("memory net lock poisoned");
        registry.remove(&self.key());
    }

    fn dial<'a>(
        &'a self,
        address: &'a str,
        _service_uuid: &'a str,
    ) -> BoxFuture<'a, Result<(RadioStream, DeviceInfo), TransportError>> {
        Box::pin(async move {
            let key = RadioAddr::normalize(address).as_str().to_string();
            let target = {
                let registry = self.net.inner.lock().expect("memory net lock poisoned");
                registry.get(&key).cloned()
            };
            let Some(target) = target else {
                return Err(TransportError::UnknownDevice(address.to_string()));
            };

            let (our_half, their_half) = tokio::io::duplex(PIPE_CAPACITY);
            let event = StreamEvent {
                stream: Box::new(their_half),
                device: self.device.clone(),
                direction: LinkDirection::Inbound,
            };
            target
                .incoming
                .send(event)
                .await
                .map_err(|_| TransportError::ConnectFailed("endpoint stopped".to_string()))?;

            Ok((Box::new(our_half) as RadioStream, target.device))
        })
    }
}
