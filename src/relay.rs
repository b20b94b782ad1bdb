//! Mesh Relay Engine
//!
//! Loop-free hop-by-hop forwarding. Every relay frame carries a globally
//! unique id; each node forwards a given id at most once (first insertion
//! into the seen set is the gate) and the hop count bounds total traversal
//! independently of id memory. The seen set's TTL only frees memory, it
//! does not affect correctness while id collisions inside the window stay
//! negligible.

use crate::address::RadioAddr;
use crate::protocol::RelayFrame;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum hop budget for a relay traversing the mesh.
pub const MAX_HOP_COUNT: u32 = 7;

/// Hop count stamped on a fresh relay. The first hop was the
/// originator-to-neighbor transmission of the plain `MSG`, so the relay
/// enters the mesh with one hop already spent.
pub const INITIAL_HOPS: u32 = MAX_HOP_COUNT - 1;

/// How long a seen message id is remembered.
pub const SEEN_ID_TTL: Duration = Duration::from_secs(5 * 60);

/// Generate a fresh relay message id (8 hex chars).
pub fn new_message_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

// ============================================================================
// Seen-Id Set
// ============================================================================

/// Message ids already processed, with their first-sighting timestamps.
#[derive(Debug, Default)]
pub struct SeenIds {
    entries: HashMap<String, Instant>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns `true` if this is the first time the id
    /// is seen (the caller may deliver/forward), `false` on a duplicate.
    pub fn first_sighting(&mut self, id: &str, now: Instant) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), now);
        true
    }

    /// Evict entries older than [`SEEN_ID_TTL`].
    pub fn evict_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, seen_at| now.duration_since(*seen_at) < SEEN_ID_TTL);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Relay Disposition
// ============================================================================

/// What to do with an incoming relay frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Render the content locally.
    pub deliver: bool,
    /// The frame arrived from a node other than the original sender.
    pub via_mesh: bool,
    /// Re-emit with this hop count to every link except the source.
    pub forward_hops: Option<u32>,
}

impl RelayOutcome {
    /// Dropped: no local delivery, no forwarding.
    pub fn is_drop(&self) -> bool {
        !self.deliver && self.forward_hops.is_none()
    }
}

/// Decide the disposition of a relay frame that arrived from `source_addr`.
///
/// `origin_is_direct` is whether the frame's original sender is currently a
/// direct link of ours. In that case the plain `MSG` already rendered this
/// text locally, so a reflection of it is forwarded but not delivered
/// again.
///
/// The seen set is armed before any forwarding decision, so a neighbor
/// echoing the frame straight back cannot cause re-entry.
pub fn process(
    seen: &mut SeenIds,
    local_addr: &RadioAddr,
    source_addr: &RadioAddr,
    origin_is_direct: bool,
    frame: &RelayFrame,
    now: Instant,
) -> RelayOutcome {
    // Loop guard: forward a given id at most once.
    if !seen.first_sighting(&frame.message_id, now) {
        return RelayOutcome::default();
    }

    seen.evict_expired(now);

    // Hop guard: 0 means expired (or a malformed hop field).
    if frame.hops == 0 {
        return RelayOutcome::default();
    }

    // Self-origin guard: our own message came back around.
    if frame.from_addr == local_addr.as_str() {
        return RelayOutcome::default();
    }

    let is_for_us = frame.is_broadcast() || frame.to_addr == local_addr.as_str();
    let deliver = is_for_us && !origin_is_direct;
    let via_mesh = source_addr.as_str() != frame.from_addr;

    let new_hops = frame.hops - 1;
    let forward_hops = (new_hops > 0).then_some(new_hops);

    RelayOutcome {
        deliver,
        via_mesh,
        forward_hops,
    }
}

// ============================================================================
// Tests
// ============================================================================
