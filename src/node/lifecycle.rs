//! Node lifecycle: start, stop, the event loop, and link admission.

use super::{Node, NodeError, NodeEvent, NodeState};
use crate::address::RadioAddr;
use crate::gossip::{GOSSIP_INITIAL_DELAY, GOSSIP_INTERVAL};
use crate::link::Link;
use crate::protocol::Frame;
use crate::transport::{stream_channel, StreamEvent, SERVICE_UUID, STREAM_CHANNEL_SIZE};
use crate::ui::UiEvent;
use tracing::{debug, info, warn};

impl Node {
    // === State Transitions ===

    /// Start the node: bring the radio up and begin accepting streams.
    ///
    /// A radio that cannot start is a fatal startup failure; the node
    /// surfaces it and never enters the event loop.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if !self.state.can_start() {
            return Err(NodeError::AlreadyStarted);
        }
        self.state = NodeState::Starting;

        let (stream_tx, stream_rx) = stream_channel(STREAM_CHANNEL_SIZE);
        if let Err(e) = self.radio.start(stream_tx.clone()).await {
            self.state = NodeState::Stopped;
            self.ui(UiEvent::Status("NO BLUETOOTH".to_string()));
            self.transcript(format!("[ERROR] Transport failed to start: {}", e));
            return Err(e.into());
        }
        self.stream_tx = Some(stream_tx);
        self.stream_rx = Some(stream_rx);

        self.state = NodeState::Running;
        self.ui(UiEvent::LinkCount(0));
        self.ui(UiEvent::Status(format!(
            "Listening as {} [{}]",
            self.local_nickname, self.local_addr
        )));
        info!(
            addr = %self.local_addr,
            nickname = %self.local_nickname,
            "Node started"
        );
        Ok(())
    }

    /// Stop the node: tear down every link and shut the radio down.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        if !self.state.can_stop() {
            return Err(NodeError::NotStarted);
        }
        self.state = NodeState::Stopping;
        info!(state = %self.state, "Node stopping");

        let addrs: Vec<RadioAddr> = self.links.keys().cloned().collect();
        for addr in addrs {
            self.teardown_link(&addr, None);
        }

        self.radio.stop();
        self.stream_tx.take();
        self.stream_rx.take();

        self.state = NodeState::Stopped;
        self.ui(UiEvent::Status("Stopped".to_string()));
        info!(state = %self.state, "Node stopped");
        Ok(())
    }

    // === Event Loop ===

    /// Run the event loop until shutdown.
    ///
    /// Consumes node events (frames, closures, commands, timers) and
    /// inbound streams from the radio, and drives the periodic gossip
    /// announcement.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        let mut event_rx = self.event_rx.take().ok_or(NodeError::NotStarted)?;
        let mut stream_rx = self.stream_rx.take().ok_or(NodeError::NotStarted)?;
        let mut streams_open = true;

        let mut gossip = tokio::time::interval_at(
            tokio::time::Instant::now() + GOSSIP_INITIAL_DELAY,
            GOSSIP_INTERVAL,
        );

        info!("Event loop started");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(NodeEvent::Shutdown) | None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
                stream = stream_rx.recv(), if streams_open => {
                    match stream {
                        Some(event) => self.admit_stream(event),
                        None => streams_open = false,
                    }
                }
                _ = gossip.tick() => {
                    self.gossip_tick();
                }
            }
        }

        info!("Event loop stopped");
        Ok(())
    }

    // === Dialing ===

    /// Dial a paired device by raw address, off the event loop.
    ///
    /// The established stream comes back through the stream channel like
    /// any inbound one; failures come back as a `DialFailed` event.
    pub(super) fn dial(&self, address: String) {
        let Some(stream_tx) = self.stream_tx.clone() else {
            self.transcript("[ERROR] Connection failed: transport not started".to_string());
            return;
        };
        let radio = self.radio.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            match radio.dial(&address, SERVICE_UUID).await {
                Ok((stream, device)) => {
                    let event = StreamEvent {
                        stream,
                        device,
                        direction: crate::transport::LinkDirection::Outbound,
                    };
                    let _ = stream_tx.send(event).await;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(NodeEvent::DialFailed {
                            address,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    // === Admission (Connection Manager) ===

    /// Admit or reject a newly established stream.
    ///
    /// The remote address is normalized before any state is touched, then
    /// admission is a two-step commit: reserve the address in
    /// `connected_addrs`, then install the link. A lost reservation means
    /// another stream to the same peer already won; the newcomer is
    /// dropped on the floor, which closes it.
    pub(super) fn admit_stream(&mut self, event: StreamEvent) {
        let addr = RadioAddr::normalize(&event.device.address);
        if addr.is_empty() {
            debug!(raw = %event.device.address, "Dropping stream with unusable address");
            return;
        }
        if addr == self.local_addr {
            debug!("Dropping stream to ourselves");
            return;
        }

        if !self.connected_addrs.insert(addr.clone()) {
            info!(peer = %addr, direction = %event.direction, "Duplicate connection rejected");
            self.transcript(format!("[LINK] Duplicate connection to {}", event.device.name));
            return;
        }

        let link = Link::spawn(
            event.stream,
            addr.clone(),
            event.device.name.clone(),
            event.direction,
            self.event_tx.clone(),
        );

        // Best-effort nickname announcement to the new peer.
        link.send(Frame::Nick(self.local_nickname.clone()));

        let previous = self.links.insert(addr.clone(), link);
        debug_assert!(previous.is_none(), "admission lock must prevent this");

        info!(
            peer = %addr,
            device = %event.device.name,
            direction = %event.direction,
            links = self.links.len(),
            "Link established"
        );
        self.transcript(format!(
            "[LINK] Connected to {} ({})",
            event.device.name, event.direction
        ));
        self.ui(UiEvent::LinkCount(self.links.len()));
    }

    // === Teardown ===

    /// Remove a link and every per-peer record tied to it.
    pub(super) fn teardown_link(&mut self, addr: &RadioAddr, reason: Option<String>) {
        let name = self.display_name(addr);
        let Some(link) = self.links.remove(addr) else {
            // A close event can race teardown; nothing left to do.
            self.connected_addrs.remove(addr);
            return;
        };

        link.shutdown();
        self.connected_addrs.remove(addr);
        self.remote_nicknames.remove(addr);

        match reason {
            Some(reason) => {
                warn!(peer = %addr, reason = %reason, "Link lost");
            }
            None => {
                info!(peer = %addr, "Link closed");
            }
        }
        self.transcript(format!("[LINK] Disconnected from {}", name));
        self.ui(UiEvent::LinkCount(self.links.len()));
    }
}
