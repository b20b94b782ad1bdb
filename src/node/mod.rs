//! Chat Node Entity
//!
//! Top-level structure representing a running mesh chat instance. The
//! Node owns every table the protocol needs: the active-link set and its
//! admission lock, remote nicknames, the seen-id set, the mesh peer
//! table, and in-progress inbound transfers.
//!
//! All tables are mutated only by the node's event loop, which consumes
//! one mpsc channel of [`NodeEvent`]s fed by per-link reader tasks, dial
//! tasks, typing timers, and the command surface. That single-owner shape
//! is what makes the two-step admission commit atomic and lets a relay be
//! marked seen before any forward is issued.

mod handlers;
mod lifecycle;
#[cfg(test)]
mod tests;

use crate::address::RadioAddr;
use crate::config::Config;
use crate::gossip::MeshTable;
use crate::link::Link;
use crate::protocol::Frame;
use crate::relay::SeenIds;
use crate::transfer::FileRx;
use crate::transport::{Radio, StreamRx, StreamTx, TransportError};
use crate::ui::{UiEvent, UiTx};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffer size for the node event channel.
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// How long a typing indicator stays raised without a refresh.
pub const TYPING_CLEAR: Duration = Duration::from_secs(3);

/// Errors related to node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node not started")]
    NotStarted,

    #[error("node already started")]
    AlreadyStarted,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Node operational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created but not started.
    Created,
    /// Starting up (transport coming up).
    Starting,
    /// Fully operational.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
}

impl NodeState {
    /// Check if the node is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Check if the node can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, NodeState::Created | NodeState::Stopped)
    }

    /// Check if the node can be stopped.
    pub fn can_stop(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Events
// ============================================================================

/// One unit of work for the node's event loop.
#[derive(Debug)]
pub enum NodeEvent {
    /// A decoded frame arrived on a link.
    Frame { addr: RadioAddr, frame: Frame },
    /// A link hit EOF or a stream error.
    LinkClosed {
        addr: RadioAddr,
        reason: Option<String>,
    },
    /// One input line from the user.
    Command(String),
    /// An outbound dial failed.
    DialFailed { address: String, error: String },
    /// A typing indicator timer fired.
    TypingExpired { addr: RadioAddr, seq: u64 },
    /// Stop the event loop.
    Shutdown,
}

/// Channel sender for node events.
pub type EventTx = mpsc::Sender<NodeEvent>;

/// Channel receiver for node events.
pub type EventRx = mpsc::Receiver<NodeEvent>;

/// Create a node event channel with the given buffer size.
pub fn event_channel(buffer: usize) -> (EventTx, EventRx) {
    mpsc::channel(buffer)
}

// ============================================================================
// Node
// ============================================================================

/// A running mesh chat node.
pub struct Node {
    // === Identity ===
    /// Canonical local radio address.
    local_addr: RadioAddr,
    /// Transport-reported local device name.
    local_device_name: String,
    /// Current nickname, announced to peers.
    local_nickname: String,

    // === Collaborators ===
    /// The radio this node accepts and dials through.
    radio: Arc<dyn Radio>,
    /// UI event sink.
    ui_tx: UiTx,

    // === State ===
    /// Node operational state.
    state: NodeState,

    // === Links (Connection Manager) ===
    /// Active links, keyed by canonical remote address.
    links: HashMap<RadioAddr, Link>,
    /// Admission lock. An address is in exactly zero or exactly both of
    /// this set and `links`.
    connected_addrs: HashSet<RadioAddr>,

    // === Protocol Tables ===
    /// Last nickname announced by each direct peer.
    remote_nicknames: HashMap<RadioAddr, String>,
    /// Relay ids already processed.
    seen_ids: SeenIds,
    /// Indirectly reachable peers.
    mesh: MeshTable,
    /// In-progress inbound transfers, one per peer.
    transfers: HashMap<RadioAddr, FileRx>,
    /// Typing indicator generations, to ignore stale clear timers.
    typing_seq: HashMap<RadioAddr, u64>,

    // === Files ===
    /// Where received files are written.
    download_dir: PathBuf,

    // === Channels ===
    /// Event sender handed to link readers, timers, and the shell.
    event_tx: EventTx,
    /// Event receiver (taken by the event loop).
    event_rx: Option<EventRx>,
    /// Inbound stream sender (given to the radio, kept for dial tasks).
    stream_tx: Option<StreamTx>,
    /// Inbound stream receiver (taken by the event loop).
    stream_rx: Option<StreamRx>,
}

impl Node {
    /// Create a new node over the given radio.
    ///
    /// The local address and device name come from the radio; the
    /// nickname defaults to the device name unless configured.
    pub fn new(config: Config, radio: Arc<dyn Radio>, ui_tx: UiTx) -> Self {
        let device = radio.local_device();
        let local_addr = RadioAddr::normalize(&device.address);
        let local_nickname = config
            .node
            .nickname
            .clone()
            .unwrap_or_else(|| device.name.clone());
        let download_dir = config.files.download_dir();

        let (event_tx, event_rx) = event_channel(EVENT_CHANNEL_SIZE);

        Self {
            local_addr,
            local_device_name: device.name,
            local_nickname,
            radio,
            ui_tx,
            state: NodeState::Created,
            links: HashMap::new(),
            connected_addrs: HashSet::new(),
            remote_nicknames: HashMap::new(),
            seen_ids: SeenIds::new(),
            mesh: MeshTable::new(),
            transfers: HashMap::new(),
            typing_seq: HashMap::new(),
            download_dir,
            event_tx,
            event_rx: Some(event_rx),
            stream_tx: None,
            stream_rx: None,
        }
    }

    // === Identity Accessors ===

    /// Canonical local radio address.
    pub fn local_addr(&self) -> &RadioAddr {
        &self.local_addr
    }

    /// Transport-reported local device name.
    pub fn local_device_name(&self) -> &str {
        &self.local_device_name
    }

    /// Current nickname.
    pub fn local_nickname(&self) -> &str {
        &self.local_nickname
    }

    // === State ===

    /// Get the node state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Check if the node is operational.
    pub fn is_running(&self) -> bool {
        self.state.is_operational()
    }

    // === Counts ===

    /// Number of active links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of known mesh peers.
    pub fn mesh_peer_count(&self) -> usize {
        self.mesh.len()
    }

    // === Channels ===

    /// Clone of the event sender, for the shell and spawned tasks.
    pub fn event_sender(&self) -> EventTx {
        self.event_tx.clone()
    }

    // === Display Names ===

    /// Resolve the display name for a peer address: announced nickname,
    /// else transport-reported device name, else the raw address.
    pub fn display_name(&self, addr: &RadioAddr) -> String {
        if let Some(nick) = self.remote_nicknames.get(addr) {
            return nick.clone();
        }
        if let Some(link) = self.links.get(addr) {
            return link.device_name().to_string();
        }
        if let Some(peer) = self.mesh.get(addr) {
            return peer.nickname.clone();
        }
        addr.to_string()
    }

    // === Outbound ===

    /// Queue a frame on every active link except `except`.
    pub(crate) fn broadcast(&self, frame: &Frame, except: Option<&RadioAddr>) {
        for (addr, link) in &self.links {
            if Some(addr) == except {
                continue;
            }
            link.send(frame.clone());
        }
    }

    // === UI Helpers ===

    /// Emit a UI event, best-effort.
    pub(crate) fn ui(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }

    /// Append one transcript line.
    pub(crate) fn transcript(&self, line: String) {
        self.ui(UiEvent::Transcript(line));
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("local_addr", &self.local_addr)
            .field("nickname", &self.local_nickname)
            .field("state", &self.state)
            .field("links", &self.links.len())
            .field("mesh_peers", &self.mesh.len())
            .finish()
    }
}
