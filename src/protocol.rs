//! Wire Protocol Frames
//!
//! The chat protocol is newline-delimited UTF-8 text. Every frame starts
//! with a fixed prefix tag ending in `:` and carries a payload whose
//! internal field separator is `|` (entries in `PEERS:` use `,` and `@`).
//!
//! Frames are decoded exactly once, here, into the [`Frame`] variant; the
//! dispatcher switches over the variant and never re-parses strings. Lines
//! that carry a known tag but a malformed payload are a protocol error and
//! are dropped by the codec. Lines with no known tag fall back to
//! [`Frame::Raw`] so peers speaking an older dialect still show up as
//! chat text, except for long unbroken tokens which are dropped silently.

use crate::address::RadioAddr;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;
use thiserror::Error;

/// Destination address meaning "every node".
pub const BROADCAST_ADDR: &str = "*";

/// Unknown lines longer than this with no space are dropped instead of
/// surfaced as raw text (garbage guard for binary noise on the stream).
pub const MAX_UNKNOWN_TOKEN_LEN: usize = 500;

/// Errors related to frame parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("relay frame has {got} fields, expected 6")]
    RelayFieldCount { got: usize },

    #[error("file start frame has {got} fields, expected 5")]
    FileStartFieldCount { got: usize },

    #[error("invalid number in {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("missing `|` separator in {0} payload")]
    MissingSeparator(&'static str),

    #[error("invalid base64 chunk payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Payload Types
// ============================================================================

/// A mesh relay frame: `RELAY:<id>|<from>|<nick>|<to>|<hops>|<content>`.
///
/// The payload split is limited to 6 fields so only the first five `|`
/// separators are structural; the content may itself contain `|`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayFrame {
    /// Globally unique message id (8 hex chars).
    pub message_id: String,
    /// Canonical address of the original sender.
    pub from_addr: String,
    /// Display name of the original sender at send time.
    pub from_nick: String,
    /// Destination: a canonical address, or `*` for broadcast.
    pub to_addr: String,
    /// Remaining permissible forwards. A hop field that does not parse to
    /// a positive integer decodes as 0, which the relay engine treats as
    /// expired.
    pub hops: u32,
    /// Chat text.
    pub content: String,
}

impl RelayFrame {
    /// Check whether this frame is addressed to everyone.
    pub fn is_broadcast(&self) -> bool {
        self.to_addr == BROADCAST_ADDR
    }
}

/// One `<nick>@<addr>` entry of a `PEERS:` announcement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    pub nickname: String,
    pub addr: RadioAddr,
}

/// Transfer header: `FSTART:<name>|<orig>|<comp>|<chunks>|<checksum>`.
///
/// The filename is free text; only the last four `|` separators are
/// structural, so a name containing `|` still parses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStart {
    pub file_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub total_chunks: u32,
    pub checksum: String,
}

/// One transfer chunk: `FCHUNK:<index>|<base64>`. The payload is base64
/// decoded at parse time; carrying encoded text further in would just move
/// the error handling away from the codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChunk {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Transfer trailer: `FEND:success|<checksum>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEnd {
    pub status: String,
    pub checksum: String,
}

// ============================================================================
// Frame
// ============================================================================

/// A single decoded protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// `MSG:` direct chat text from a neighbor.
    Chat(String),
    /// `RELAY:` mesh-forwarded chat.
    Relay(RelayFrame),
    /// `PEERS:` gossip announcement.
    Peers(Vec<PeerEntry>),
    /// `TYPING:` transient typing signal.
    Typing(bool),
    /// `NICK:` nickname update.
    Nick(String),
    /// `FSTART:` transfer header.
    FileStart(FileStart),
    /// `FCHUNK:` transfer chunk.
    FileChunk(FileChunk),
    /// `FEND:` transfer trailer.
    FileEnd(FileEnd),
    /// Unrecognized line surfaced as chat under the peer's display name.
    Raw(String),
}

impl Frame {
    /// Parse one complete, trimmed, non-empty line.
    ///
    /// Returns `Ok(None)` for lines that are dropped silently (long
    /// unbroken tokens with no known tag), `Err` for known tags with
    /// malformed payloads, and `Ok(Some(..))` otherwise.
    pub fn parse(line: &str) -> Result<Option<Frame>, ProtocolError> {
        if let Some(payload) = line.strip_prefix("MSG:") {
            return Ok(Some(Frame::Chat(payload.to_string())));
        }
        if let Some(payload) = line.strip_prefix("RELAY:") {
            return parse_relay(payload).map(Some);
        }
        if let Some(payload) = line.strip_prefix("PEERS:") {
            return Ok(Some(Frame::Peers(parse_peers(payload))));
        }
        if let Some(payload) = line.strip_prefix("TYPING:") {
            return Ok(Some(Frame::Typing(payload.trim() == "1")));
        }
        if let Some(payload) = line.strip_prefix("NICK:") {
            return Ok(Some(Frame::Nick(payload.to_string())));
        }
        if let Some(payload) = line.strip_prefix("FSTART:") {
            return parse_file_start(payload).map(Some);
        }
        if let Some(payload) = line.strip_prefix("FCHUNK:") {
            return parse_file_chunk(payload).map(Some);
        }
        if let Some(payload) = line.strip_prefix("FEND:") {
            return parse_file_end(payload).map(Some);
        }

        // No known tag. Long unbroken tokens are line noise, not chat.
        if line.len() > MAX_UNKNOWN_TOKEN_LEN && !line.contains(' ') {
            return Ok(None);
        }
        Ok(Some(Frame::Raw(line.to_string())))
    }

    /// Encode this frame as its newline-terminated wire string.
    pub fn encode(&self) -> String {
        match self {
            Frame::Chat(text) => format!("MSG:{}\n", text),
            Frame::Relay(r) => format!(
                "RELAY:{}|{}|{}|{}|{}|{}\n",
                r.message_id, r.from_addr, r.from_nick, r.to_addr, r.hops, r.content
            ),
            Frame::Peers(entries) => {
                let list: Vec<String> = entries
                    .iter()
                    .map(|e| format!("{}@{}", e.nickname, e.addr))
                    .collect();
                format!("PEERS:{}\n", list.join(","))
            }
            Frame::Typing(active) => {
                format!("TYPING:{}\n", if *active { "1" } else { "0" })
            }
            Frame::Nick(name) => format!("NICK:{}\n", name),
            Frame::FileStart(f) => format!(
                "FSTART:{}|{}|{}|{}|{}\n",
                f.file_name, f.original_size, f.compressed_size, f.total_chunks, f.checksum
            ),
            Frame::FileChunk(c) => {
                format!("FCHUNK:{}|{}\n", c.index, BASE64.encode(&c.data))
            }
            Frame::FileEnd(e) => format!("FEND:{}|{}\n", e.status, e.checksum),
            Frame::Raw(line) => format!("{}\n", line),
        }
    }

    /// Short tag name for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::Chat(_) => "MSG",
            Frame::Relay(_) => "RELAY",
            Frame::Peers(_) => "PEERS",
            Frame::Typing(_) => "TYPING",
            Frame::Nick(_) => "NICK",
            Frame::FileStart(_) => "FSTART",
            Frame::FileChunk(_) => "FCHUNK",
            Frame::FileEnd(_) => "FEND",
            Frame::Raw(_) => "RAW",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

// ============================================================================
// Per-Tag Parsers
// ============================================================================

fn parse_relay(payload: &str) -> Result<Frame, ProtocolError> {
    // Split limit 6: only the first five separators are structural, the
    // content keeps any `|` it contains.
    let fields: Vec<&str> = payload.splitn(6, '|').collect();
    if fields.len() != 6 {
        return Err(ProtocolError::RelayFieldCount { got: fields.len() });
    }
    Ok(Frame::Relay(RelayFrame {
        message_id: fields[0].to_string(),
        from_addr: fields[1].to_string(),
        from_nick: fields[2].to_string(),
        to_addr: fields[3].to_string(),
        hops: fields[4].trim().parse().unwrap_or(0),
        content: fields[5].to_string(),
    }))
}

fn parse_peers(payload: &str) -> Vec<PeerEntry> {
    let mut entries = Vec::new();
    for entry in payload.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        // The address is the suffix after the last `@`, so nicknames
        // containing `@` still parse.
        let Some((nick, addr)) = entry.rsplit_once('@') else {
            continue;
        };
        let addr = RadioAddr::normalize(addr);
        if addr.is_empty() {
            continue;
        }
        entries.push(PeerEntry {
            nickname: nick.to_string(),
            addr,
        });
    }
    entries
}

fn parse_file_start(payload: &str) -> Result<Frame, ProtocolError> {
    // The filename is free text and may itself contain `|`. It comes
    // first on the wire, so the structural separators are the LAST four:
    // split from the right and let the remainder be the filename.
    let mut fields: Vec<&str> = payload.rsplitn(5, '|').collect();
    if fields.len() != 5 {
        return Err(ProtocolError::FileStartFieldCount { got: fields.len() });
    }
    fields.reverse(); // rsplitn yields the trailing fields first
    let original_size = fields[1]
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber {
            field: "original_size",
            value: fields[1].to_string(),
        })?;
    let compressed_size = fields[2]
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber {
            field: "compressed_size",
            value: fields[2].to_string(),
        })?;
    let total_chunks = fields[3]
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber {
            field: "total_chunks",
            value: fields[3].to_string(),
        })?;
    Ok(Frame::FileStart(FileStart {
        file_name: fields[0].to_string(),
        original_size,
        compressed_size,
        total_chunks,
        checksum: fields[4].to_string(),
    }))
}

fn parse_file_chunk(payload: &str) -> Result<Frame, ProtocolError> {
    let (index, data) = payload
        .split_once('|')
        .ok_or(ProtocolError::MissingSeparator("FCHUNK"))?;
    let index = index
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidNumber {
            field: "chunk_index",
            value: index.to_string(),
        })?;
    let data = BASE64.decode(data.trim())?;
    Ok(Frame::FileChunk(FileChunk { index, data }))
}

fn parse_file_end(payload: &str) -> Result<Frame, ProtocolError> {
    let (status, checksum) = payload
        .split_once('|')
        .ok_or(ProtocolError::MissingSeparator("FEND"))?;
    Ok(Frame::FileEnd(FileEnd {
        status: status.to_string(),
        checksum: checksum.to_string(),
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat() {
        let frame = Frame::parse("MSG:hello there").unwrap().unwrap();
        assert_eq!(frame, Frame::Chat("hello there".to_string()));
    }

    #[test]
    fn test_parse_relay() {
        let frame = Frame::parse("RELAY:a1b2c3d4|AABB|Alice|*|6|hi")
            .unwrap()
            .unwrap();
        let Frame::Relay(r) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(r.message_id, "a1b2c3d4");
        assert_eq!(r.from_addr, "AABB");
        assert_eq!(r.from_nick, "Alice");
        assert!(r.is_broadcast());
        assert_eq!(r.hops, 6);
        assert_eq!(r.content, "hi");
    }

    #[test]
    fn test_parse_relay_content_keeps_pipes() {
        let frame = Frame::parse("RELAY:id|AA|A|*|3|a|b|c").unwrap().unwrap();
        let Frame::Relay(r) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(r.content, "a|b|c");
    }

    #[test]
    fn test_parse_relay_too_few_fields() {
        let result = Frame::parse("RELAY:id|AA|A|*|3");
        assert!(matches!(
            result,
            Err(ProtocolError::RelayFieldCount { got: 5 })
        ));
    }

    #[test]
    fn test_parse_relay_malformed_hops_decode_as_zero() {
        for hops in ["abc", "-1", "6.5", ""] {
            let line = format!("RELAY:id|AA|A|*|{}|text", hops);
            let Frame::Relay(r) = Frame::parse(&line).unwrap().unwrap() else {
                panic!("wrong variant");
            };
            assert_eq!(r.hops, 0, "hops field {:?}", hops);
        }
    }

    #[test]
    fn test_parse_peers() {
        let frame = Frame::parse("PEERS:Alice@AA:11,Bob@BB22").unwrap().unwrap();
        let Frame::Peers(entries) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].nickname, "Alice");
        assert_eq!(entries[0].addr.as_str(), "AA11");
        assert_eq!(entries[1].addr.as_str(), "BB22");
    }

    #[test]
    fn test_parse_peers_nick_with_at_sign() {
        let frame = Frame::parse("PEERS:a@home@CC33").unwrap().unwrap();
        let Frame::Peers(entries) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(entries[0].nickname, "a@home");
        assert_eq!(entries[0].addr.as_str(), "CC33");
    }

    #[test]
    fn test_parse_peers_skips_malformed_entries() {
        let frame = Frame::parse("PEERS:no-separator,Alice@AA11,,@")
            .unwrap()
            .unwrap();
        let Frame::Peers(entries) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].nickname, "Alice");
    }

    #[test]
    fn test_parse_typing() {
        assert_eq!(
            Frame::parse("TYPING:1").unwrap().unwrap(),
            Frame::Typing(true)
        );
        assert_eq!(
            Frame::parse("TYPING:0").unwrap().unwrap(),
            Frame::Typing(false)
        );
        // Anything other than "1" lowers the signal.
        assert_eq!(
            Frame::parse("TYPING:yes").unwrap().unwrap(),
            Frame::Typing(false)
        );
    }

    #[test]
    fn test_parse_nick() {
        assert_eq!(
            Frame::parse("NICK:Alice").unwrap().unwrap(),
            Frame::Nick("Alice".to_string())
        );
    }

    #[test]
    fn test_parse_file_start() {
        let frame = Frame::parse("FSTART:notes.txt|50000|12345|1|AbCdEf12")
            .unwrap()
            .unwrap();
        let Frame::FileStart(f) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(f.file_name, "notes.txt");
        assert_eq!(f.original_size, 50000);
        assert_eq!(f.compressed_size, 12345);
        assert_eq!(f.total_chunks, 1);
        assert_eq!(f.checksum, "AbCdEf12");
    }

    #[test]
    fn test_parse_file_start_filename_keeps_pipes() {
        let frame = Frame::parse("FSTART:odd|name.txt|50000|12345|1|AbCdEf12")
            .unwrap()
            .unwrap();
        let Frame::FileStart(f) = frame else {
            panic!("wrong variant");
        };
        assert_eq!(f.file_name, "odd|name.txt");
        assert_eq!(f.original_size, 50000);
        assert_eq!(f.checksum, "AbCdEf12");
    }

    #[test]
    fn test_parse_file_start_too_few_fields() {
        let result = Frame::parse("FSTART:notes.txt|100");
        assert!(matches!(
            result,
            Err(ProtocolError::FileStartFieldCount { got: 2 })
        ));
    }

    #[test]
    fn test_parse_file_start_bad_number() {
        let result = Frame::parse("FSTART:notes.txt|big|12345|1|sum");
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidNumber {
                field: "original_size",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_file_chunk_roundtrip() {
        let chunk = FileChunk {
            index: 3,
            data: vec![0, 1, 2, 250, 251, 252],
        };
        let wire = Frame::FileChunk(chunk.clone()).encode();
        let frame = Frame::parse(wire.trim_end()).unwrap().unwrap();
        assert_eq!(frame, Frame::FileChunk(chunk));
    }

    #[test]
    fn test_parse_file_chunk_bad_base64() {
        let result = Frame::parse("FCHUNK:0|not base64!!");
        assert!(matches!(result, Err(ProtocolError::InvalidBase64(_))));
    }

    #[test]
    fn test_parse_file_end() {
        let frame = Frame::parse("FEND:success|AbCdEf12").unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::FileEnd(FileEnd {
                status: "success".to_string(),
                checksum: "AbCdEf12".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_line_falls_back_to_raw() {
        let frame = Frame::parse("PING A1B2").unwrap().unwrap();
        assert_eq!(frame, Frame::Raw("PING A1B2".to_string()));
    }

    #[test]
    fn test_long_unbroken_token_dropped() {
        let noise = "x".repeat(MAX_UNKNOWN_TOKEN_LEN + 1);
        assert!(Frame::parse(&noise).unwrap().is_none());

        // With a space it is chat, however long.
        let chatty = format!("y {}", "x".repeat(MAX_UNKNOWN_TOKEN_LEN));
        assert!(Frame::parse(&chatty).unwrap().is_some());
    }

    #[test]
    fn test_encode_relay() {
        let relay = RelayFrame {
            message_id: "0badcafe".to_string(),
            from_addr: "AA11".to_string(),
            from_nick: "Alice".to_string(),
            to_addr: BROADCAST_ADDR.to_string(),
            hops: 6,
            content: "hi|there".to_string(),
        };
        assert_eq!(
            Frame::Relay(relay).encode(),
            "RELAY:0badcafe|AA11|Alice|*|6|hi|there\n"
        );
    }

    #[test]
    fn test_encode_peers() {
        let frame = Frame::Peers(vec![
            PeerEntry {
                nickname: "Alice".to_string(),
                addr: RadioAddr::normalize("aa11"),
            },
            PeerEntry {
                nickname: "Bob".to_string(),
                addr: RadioAddr::normalize("bb22"),
            },
        ]);
        assert_eq!(frame.encode(), "PEERS:Alice@AA11,Bob@BB22\n");
    }

    #[test]
    fn test_every_frame_terminates_with_newline() {
        let frames = [
            Frame::Chat("x".into()),
            Frame::Typing(true),
            Frame::Nick("n".into()),
            Frame::Raw("r".into()),
        ];
        for frame in frames {
            assert!(frame.encode().ends_with('\n'));
        }
    }
}
