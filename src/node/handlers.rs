//! Event dispatch: frames, commands, timers, and the gossip tick.

use super::{Node, NodeEvent, TYPING_CLEAR};
use crate::address::RadioAddr;
use crate::command::{Command, HELP_TEXT};
use crate::protocol::{
    FileChunk, FileEnd, FileStart, Frame, PeerEntry, RelayFrame, BROADCAST_ADDR,
};
use crate::relay::{self, INITIAL_HOPS};
use crate::transfer::{self, FileRx, SendTarget, TransferError, PROGRESS_STRIDE, RECEIVED_FILE_PREFIX};
use crate::ui::UiEvent;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

impl Node {
    /// Process one event from the loop.
    pub(super) async fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Frame { addr, frame } => self.handle_frame(addr, frame).await,
            NodeEvent::LinkClosed { addr, reason } => self.teardown_link(&addr, reason),
            NodeEvent::Command(line) => self.handle_command(line),
            NodeEvent::DialFailed { address, error } => {
                warn!(address = %address, error = %error, "Dial failed");
                self.transcript(format!("[ERROR] Connection failed: {}", error));
            }
            NodeEvent::TypingExpired { addr, seq } => self.handle_typing_expired(addr, seq),
            NodeEvent::Shutdown => {}
        }
    }

    // === Frame Dispatch ===

    async fn handle_frame(&mut self, addr: RadioAddr, frame: Frame) {
        // A reader can still be draining when its link is torn down.
        if !self.connected_addrs.contains(&addr) {
            debug!(peer = %addr, tag = frame.tag(), "Frame from departed link, dropping");
            return;
        }

        match frame {
            Frame::Chat(text) => self.handle_chat(addr, text),
            Frame::Relay(relay) => self.handle_relay(addr, relay),
            Frame::Peers(entries) => self.handle_peers(addr, entries),
            Frame::Typing(active) => self.handle_typing(addr, active),
            Frame::Nick(nick) => self.handle_nick(addr, nick),
            Frame::FileStart(header) => self.handle_file_start(addr, header),
            Frame::FileChunk(chunk) => self.handle_file_chunk(addr, chunk),
            Frame::FileEnd(end) => self.handle_file_end(addr, end).await,
            Frame::Raw(line) => {
                // Legacy fallback: show the line as chat from that peer.
                let name = self.display_name(&addr);
                self.transcript(format!("[{}]: {}", name, line));
            }
        }
    }

    /// A plain `MSG:` from a direct neighbor: render it, then give it
    /// relay metadata and push it into the mesh on every other link.
    fn handle_chat(&mut self, addr: RadioAddr, text: String) {
        let name = self.display_name(&addr);
        self.transcript(format!("[{}]: {}", name, text));

        let message_id = relay::new_message_id();
        // Arm the seen set first: a reflection of this id must never be
        // delivered or forwarded by us again.
        self.seen_ids.first_sighting(&message_id, Instant::now());

        let relay = RelayFrame {
            message_id,
            from_addr: addr.as_str().to_string(),
            from_nick: name,
            to_addr: BROADCAST_ADDR.to_string(),
            hops: INITIAL_HOPS,
            content: text,
        };
        self.broadcast(&Frame::Relay(relay), Some(&addr));
    }

    /// A `RELAY:` frame: the mesh relay engine decides delivery and
    /// forwarding; this just renders and re-emits.
    fn handle_relay(&mut self, addr: RadioAddr, frame: RelayFrame) {
        let origin = RadioAddr::normalize(&frame.from_addr);
        let origin_is_direct = self.connected_addrs.contains(&origin);

        let outcome = relay::process(
            &mut self.seen_ids,
            &self.local_addr,
            &addr,
            origin_is_direct,
            &frame,
            Instant::now(),
        );

        if outcome.deliver {
            let tag = if outcome.via_mesh { " [via mesh]" } else { "" };
            self.transcript(format!("[{}]{}: {}", frame.from_nick, tag, frame.content));
        }

        if let Some(hops) = outcome.forward_hops {
            let mut forward = frame;
            forward.hops = hops;
            self.broadcast(&Frame::Relay(forward), Some(&addr));
        }
    }

    fn handle_peers(&mut self, addr: RadioAddr, entries: Vec<PeerEntry>) {
        let source_name = self.display_name(&addr);
        let now = Instant::now();
        let mut changed = 0usize;
        for entry in &entries {
            if self.mesh.apply(
                entry,
                &addr,
                &source_name,
                &self.local_addr,
                &self.connected_addrs,
                now,
            ) {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(
                source = %addr,
                entries = entries.len(),
                changed,
                mesh_peers = self.mesh.len(),
                "Gossip applied"
            );
        }
    }

    fn handle_typing(&mut self, addr: RadioAddr, active: bool) {
        let seq = {
            let counter = self.typing_seq.entry(addr.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let name = self.display_name(&addr);
        self.ui(UiEvent::Typing {
            addr: addr.clone(),
            name,
            active,
        });

        if active {
            // Auto-clear unless a newer typing signal bumps the sequence.
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(TYPING_CLEAR).await;
                let _ = event_tx.send(NodeEvent::TypingExpired { addr, seq }).await;
            });
        }
    }

    fn handle_typing_expired(&mut self, addr: RadioAddr, seq: u64) {
        if self.typing_seq.get(&addr) != Some(&seq) {
            return; // a newer signal superseded this timer
        }
        let name = self.display_name(&addr);
        self.ui(UiEvent::Typing {
            addr,
            name,
            active: false,
        });
    }

    fn handle_nick(&mut self, addr: RadioAddr, nick: String) {
        let old = self.display_name(&addr);
        self.remote_nicknames.insert(addr, nick.clone());
        if old != nick {
            self.transcript(format!("[NICK] {} is now known as {}", old, nick));
        }
    }

    // === File Transfer (Receiver) ===

    fn handle_file_start(&mut self, addr: RadioAddr, header: FileStart) {
        let peer = self.display_name(&addr);
        match FileRx::new(&header, Instant::now()) {
            Ok(rx) => {
                if self.transfers.insert(addr.clone(), rx).is_some() {
                    debug!(peer = %addr, "New header replaces in-progress transfer");
                }
                self.transcript(format!(
                    "[FILE] Receiving {} ({} bytes, {} chunks) from {}",
                    header.file_name, header.original_size, header.total_chunks, peer
                ));
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "Rejected transfer header");
                self.transcript(format!("[ERROR] Rejected transfer from {}: {}", peer, e));
            }
        }
    }

    fn handle_file_chunk(&mut self, addr: RadioAddr, chunk: FileChunk) {
        let progress = {
            let Some(rx) = self.transfers.get_mut(&addr) else {
                debug!(peer = %addr, index = chunk.index, "Chunk without transfer state, dropping");
                return;
            };
            if !rx.store_chunk(&chunk) {
                debug!(
                    peer = %addr,
                    index = chunk.index,
                    total = rx.total_chunks,
                    "Chunk index out of range, dropping"
                );
                return;
            }
            let due = rx.chunks_received % PROGRESS_STRIDE == 0
                || rx.chunks_received == rx.total_chunks;
            due.then(|| (rx.file_name.clone(), rx.progress_percent()))
        };

        if let Some((file_name, percent)) = progress {
            let peer = self.display_name(&addr);
            self.ui(UiEvent::TransferProgress {
                peer,
                file_name,
                percent,
                outgoing: false,
            });
        }
    }

    async fn handle_file_end(&mut self, addr: RadioAddr, _end: FileEnd) {
        let Some(rx) = self.transfers.remove(&addr) else {
            debug!(peer = %addr, "Trailer without transfer state, dropping");
            return;
        };
        let peer = self.display_name(&addr);
        let file_name = rx.file_name.clone();

        let bytes = match rx.assemble() {
            Ok(bytes) => bytes,
            Err(TransferError::ChecksumMismatch { expected, actual }) => {
                warn!(peer = %addr, expected = %expected, actual = %actual, "Transfer checksum mismatch");
                self.transcript(format!(
                    "[ERROR] File checksum mismatch for {} (expected {}, got {})",
                    file_name, expected, actual
                ));
                return;
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "Transfer reassembly failed");
                self.transcript(format!("[ERROR] File assembly failed: {}", e));
                return;
            }
        };

        // Keep only the final path component of whatever name the sender
        // chose; the downloads directory is not theirs to traverse.
        let safe_name = Path::new(&file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let path = self
            .download_dir
            .join(format!("{}{}", RECEIVED_FILE_PREFIX, safe_name));

        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => {
                info!(peer = %addr, path = %path.display(), bytes = bytes.len(), "File received");
                self.transcript(format!(
                    "[FILE] Saved {} ({} bytes) from {}",
                    path.display(),
                    bytes.len(),
                    peer
                ));
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "Failed to write received file");
                self.transcript(format!("[ERROR] File assembly failed: {}", e));
            }
        }
    }

    // === Command Surface ===

    fn handle_command(&mut self, line: String) {
        let Some(command) = Command::parse(&line) else {
            return;
        };
        match command {
            Command::Say(text) => {
                self.transcript(format!("[{}]: {}", self.local_nickname, text));
                // Plain text goes out as MSG; recipients give it relay
                // metadata when they push it into the mesh.
                self.broadcast(&Frame::Chat(text), None);
            }
            Command::Clear => self.ui(UiEvent::Clear),
            Command::Nick(name) => {
                self.local_nickname = name.clone();
                self.broadcast(&Frame::Nick(name.clone()), None);
                self.transcript(format!("[NICK] You are now known as {}", name));
                self.ui(UiEvent::Status(format!(
                    "Listening as {} [{}]",
                    self.local_nickname, self.local_addr
                )));
                self.gossip_tick();
            }
            Command::SendFile(path) => self.send_file(path),
            Command::Peers => self.print_peers(),
            Command::Connect(address) => self.dial(address),
            Command::Devices => self.print_devices(),
            Command::Unknown(cmd) => {
                self.transcript(format!("[HELP] Unknown command {}. {}", cmd, HELP_TEXT));
            }
        }
    }

    fn send_file(&self, path: PathBuf) {
        if self.links.is_empty() {
            self.transcript("[ERROR] No active links to send to".to_string());
            return;
        }
        let targets: Vec<SendTarget> = self
            .links
            .iter()
            .map(|(addr, link)| SendTarget {
                addr: addr.clone(),
                name: self.display_name(addr),
                frames: link.sender(),
            })
            .collect();
        self.transcript(format!(
            "[FILE] Sending {} to {} link(s)",
            path.display(),
            targets.len()
        ));
        tokio::spawn(transfer::send_file(path, targets, self.ui_tx.clone()));
    }

    fn print_peers(&self) {
        self.transcript(format!("[PEERS] Direct links: {}", self.links.len()));
        for (addr, link) in &self.links {
            self.transcript(format!(
                "  {} ({}) {}",
                self.display_name(addr),
                addr,
                link.direction()
            ));
        }
        self.transcript(format!("[PEERS] Mesh peers: {}", self.mesh.len()));
        for (addr, peer) in self.mesh.iter() {
            self.transcript(format!(
                "  {} ({}) via {}",
                peer.nickname, addr, peer.via_nickname
            ));
        }
    }

    fn print_devices(&self) {
        let devices = self.radio.paired_devices();
        self.transcript(format!("[DEVICES] Paired: {}", devices.len()));
        for device in devices {
            self.transcript(format!(
                "  {} ({})",
                device.name,
                RadioAddr::normalize(&device.address)
            ));
        }
    }

    // === Gossip ===

    /// Periodic `PEERS:` announcement: shadow and prune the mesh table,
    /// then broadcast everyone we can name.
    pub(super) fn gossip_tick(&mut self) {
        let now = Instant::now();
        self.mesh.shadow_direct(&self.connected_addrs);
        self.mesh.prune_expired(now);

        let mut entries = Vec::with_capacity(1 + self.links.len() + self.mesh.len());
        entries.push(PeerEntry {
            nickname: self.local_nickname.clone(),
            addr: self.local_addr.clone(),
        });
        for addr in self.links.keys() {
            entries.push(PeerEntry {
                nickname: self.display_name(addr),
                addr: addr.clone(),
            });
        }
        entries.extend(self.mesh.entries());

        debug!(entries = entries.len(), "Gossip tick");
        self.broadcast(&Frame::Peers(entries), None);
    }
}
