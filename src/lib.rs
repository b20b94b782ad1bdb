//! OffGrid: serverless peer-to-peer mesh chat
//!
//! Every node is simultaneously a server (accepting inbound streams) and
//! a client (dialing outbound ones), forming an undirected graph of
//! direct links between paired devices. Chat text, typing signals,
//! nickname updates, peer lists, and chunked file transfers travel as
//! newline-delimited text frames and are forwarded hop-by-hop, so any two
//! nodes reachable through the graph can talk without a direct link.

pub mod address;
pub mod codec;
pub mod command;
pub mod config;
pub mod gossip;
pub mod link;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod transfer;
pub mod transport;
pub mod ui;

// Re-export address types
pub use address::RadioAddr;

// Re-export protocol types
pub use protocol::{
    FileChunk, FileEnd, FileStart, Frame, PeerEntry, ProtocolError, RelayFrame, BROADCAST_ADDR,
};

// Re-export codec types
pub use codec::FrameCodec;

// Re-export relay types
pub use relay::{new_message_id, RelayOutcome, SeenIds, INITIAL_HOPS, MAX_HOP_COUNT, SEEN_ID_TTL};

// Re-export gossip types
pub use gossip::{MeshPeer, MeshTable, GOSSIP_INITIAL_DELAY, GOSSIP_INTERVAL, MESH_PEER_TTL};

// Re-export transfer types
pub use transfer::{FileRx, SendTarget, TransferError, CHUNK_SIZE};

// Re-export transport types
pub use transport::memory::{MemoryNet, MemoryRadio};
pub use transport::tcp::TcpRadio;
pub use transport::{
    stream_channel, DeviceInfo, LinkDirection, Radio, RadioStream, StreamEvent, StreamRx,
    StreamTx, TransportError, SERVICE_UUID,
};

// Re-export link types
pub use link::Link;

// Re-export node types
pub use node::{event_channel, EventRx, EventTx, Node, NodeError, NodeEvent, NodeState};

// Re-export command types
pub use command::{Command, HELP_TEXT};

// Re-export config types
pub use config::{Config, ConfigError, FilesConfig, NodeConfig, TcpConfig, TcpPeerConfig};

// Re-export UI types
pub use ui::{ui_channel, UiEvent, UiRx, UiTx};
