//! Peer Discovery Gossip
//!
//! Each node periodically announces everyone it can name: itself, its
//! direct links, and every mesh peer it has heard of. Recipients fold the
//! entries into their own view of indirectly reachable peers, recording
//! which direct link the knowledge arrived through. Duplicates inside an
//! announcement are acceptable; the table deduplicates by address.
//!
//! A direct connection shadows any indirect record for the same address at
//! the next tick, and entries that no announcement has refreshed within
//! [`MESH_PEER_TTL`] are pruned so a stable mesh does not grow the table
//! without bound.

use crate::address::RadioAddr;
use crate::protocol::PeerEntry;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// How often `PEERS:` announcements are broadcast.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the first announcement after startup.
pub const GOSSIP_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Mesh peers unseen for this long are pruned at the gossip tick.
pub const MESH_PEER_TTL: Duration = Duration::from_secs(10 * 60);

/// A node known to exist but not directly linked, reachable via a relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshPeer {
    /// Last nickname announced for this peer.
    pub nickname: String,
    /// The direct link the announcement arrived through.
    pub via_addr: RadioAddr,
    /// Display name of that direct link at receipt time.
    pub via_nickname: String,
    /// When the last announcement naming this peer arrived.
    pub last_seen: Instant,
}

/// The local view of indirectly reachable peers.
///
/// Never contains the local address nor any directly connected address.
#[derive(Debug, Default)]
pub struct MeshTable {
    peers: HashMap<RadioAddr, MeshPeer>,
}

impl MeshTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one announcement entry into the table.
    ///
    /// Entries naming ourselves or a directly connected peer are ignored;
    /// anything else is upserted with fresh via/last-seen info. Returns
    /// whether the table changed.
    pub fn apply(
        &mut self,
        entry: &PeerEntry,
        source_addr: &RadioAddr,
        source_name: &str,
        local_addr: &RadioAddr,
        connected: &HashSet<RadioAddr>,
        now: Instant,
    ) -> bool {
        if entry.addr == *local_addr {
            return false;
        }
        if connected.contains(&entry.addr) {
            return false;
        }

        self.peers.insert(
            entry.addr.clone(),
            MeshPeer {
                nickname: entry.nickname.clone(),
                via_addr: source_addr.clone(),
                via_nickname: source_name.to_string(),
                last_seen: now,
            },
        );
        true
    }

    /// Remove entries shadowed by a direct connection.
    pub fn shadow_direct(&mut self, connected: &HashSet<RadioAddr>) {
        self.peers.retain(|addr, _| !connected.contains(addr));
    }

    /// Prune entries unseen for longer than [`MESH_PEER_TTL`].
    pub fn prune_expired(&mut self, now: Instant) {
        self.peers
            .retain(|_, peer| now.duration_since(peer.last_seen) < MESH_PEER_TTL);
    }

    pub fn get(&self, addr: &RadioAddr) -> Option<&MeshPeer> {
        self.peers.get(addr)
    }

    pub fn contains(&self, addr: &RadioAddr) -> bool {
        self.peers.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RadioAddr, &MeshPeer)> {
        self.peers.iter()
    }

    /// Announcement entries for every known mesh peer.
    pub fn entries(&self) -> impl Iterator<Item = PeerEntry> + '_ {
        self.peers.iter().map(|(addr, peer)| PeerEntry {
            nickname: peer.nickname.clone(),
            addr: addr.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
