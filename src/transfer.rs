//! Chunked File Transfer
//!
//! Sender pipeline: read the file fully, gzip at the strongest level,
//! checksum the uncompressed bytes, split the compressed buffer into
//! fixed-size chunks, and emit the `FSTART` / `FCHUNK`* / `FEND` sequence
//! to each active link with small pacing delays so slow radios keep up.
//!
//! Receiver: per-peer [`FileRx`] state holds a sparse chunk buffer; `FEND`
//! triggers reassembly, decompression, checksum verification, and the
//! write to the downloads directory. At most one inbound transfer per
//! peer; a later `FSTART` replaces the state.

use crate::address::RadioAddr;
use crate::protocol::{FileChunk, FileEnd, FileStart, Frame};
use crate::ui::{UiEvent, UiTx};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Maximum chunk payload before base64 encoding.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on the advertised chunk count; a header beyond this is
/// rejected rather than allocating a matching chunk buffer.
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 16;

/// Pause after `FSTART` before the first chunk.
pub const HEADER_PACING: Duration = Duration::from_millis(50);

/// Pause between consecutive chunks.
pub const CHUNK_PACING: Duration = Duration::from_millis(10);

/// A progress signal is emitted roughly every this many chunks.
pub const PROGRESS_STRIDE: u32 = 10;

/// Prefix for files written to the downloads directory.
pub const RECEIVED_FILE_PREFIX: &str = "OffGrid_";

/// Errors related to file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer advertises {got} chunks, max {max}")]
    TooManyChunks { got: u32, max: u32 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

// ============================================================================
// Helpers
// ============================================================================

/// Gzip-compress at the strongest level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, TransferError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gzip-decompress a complete buffer.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, TransferError> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Transfer checksum: SHA-256 of the uncompressed bytes, base64, first 8
/// characters.
pub fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let encoded = BASE64.encode(digest);
    encoded[..8].to_string()
}

/// Number of chunks needed for a compressed buffer.
pub fn chunk_count(compressed_len: usize) -> u32 {
    compressed_len.div_ceil(CHUNK_SIZE) as u32
}

// ============================================================================
// Receiver State
// ============================================================================

/// In-progress inbound transfer from one peer.
#[derive(Debug)]
pub struct FileRx {
    pub file_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub total_chunks: u32,
    pub checksum: String,
    /// Sparse chunk buffer, one slot per advertised chunk.
    chunks: Vec<Option<Vec<u8>>>,
    pub chunks_received: u32,
    pub started_at: Instant,
}

impl FileRx {
    /// Allocate state for an announced transfer.
    pub fn new(header: &FileStart, now: Instant) -> Result<Self, TransferError> {
        if header.total_chunks > MAX_TOTAL_CHUNKS {
            return Err(TransferError::TooManyChunks {
                got: header.total_chunks,
                max: MAX_TOTAL_CHUNKS,
            });
        }
        Ok(Self {
            file_name: header.file_name.clone(),
            original_size: header.original_size,
            compressed_size: header.compressed_size,
            total_chunks: header.total_chunks,
            checksum: header.checksum.clone(),
            chunks: vec![None; header.total_chunks as usize],
            chunks_received: 0,
            started_at: now,
        })
    }

    /// Store one chunk. Out-of-range indices are rejected; re-writes are
    /// tolerated, last writer wins.
    pub fn store_chunk(&mut self, chunk: &FileChunk) -> bool {
        let Some(slot) = self.chunks.get_mut(chunk.index as usize) else {
            return false;
        };
        if slot.is_none() {
            self.chunks_received += 1;
        }
        *slot = Some(chunk.data.clone());
        true
    }

    /// Percentage of advertised chunks received.
    pub fn progress_percent(&self) -> u8 {
        if self.total_chunks == 0 {
            return 100;
        }
        ((self.chunks_received as u64 * 100) / self.total_chunks as u64) as u8
    }

    /// Reassemble, decompress, and verify the completed transfer.
    pub fn assemble(self) -> Result<Vec<u8>, TransferError> {
        let mut compressed = Vec::with_capacity(self.compressed_size as usize);
        for chunk in self.chunks.into_iter().flatten() {
            compressed.extend_from_slice(&chunk);
        }

        let plain = decompress(&compressed)?;

        let actual = checksum(&plain);
        if actual != self.checksum {
            return Err(TransferError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(plain)
    }
}

// ============================================================================
// Sender
// ============================================================================

/// One destination link for an outbound transfer.
pub struct SendTarget {
    pub addr: RadioAddr,
    pub name: String,
    pub frames: mpsc::UnboundedSender<Frame>,
}

/// Send a file to every target, in sequence, with pacing.
///
/// Runs as a detached task; everything user-visible goes through the UI
/// channel and failures are per-target, never fatal.
pub async fn send_file(path: PathBuf, targets: Vec<SendTarget>, ui: UiTx) {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => {
            let _ = ui.send(UiEvent::Transcript(format!(
                "[ERROR] Not a file: {}",
                path.display()
            )));
            return;
        }
    };

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            let _ = ui.send(UiEvent::Transcript(format!(
                "[ERROR] Failed to read {}: {}",
                path.display(),
                e
            )));
            return;
        }
    };
    let original_size = data.len() as u64;

    // Compression can chew on multi-megabyte files; keep it off the
    // async threads.
    let compressed = tokio::task::spawn_blocking(move || {
        let sum = checksum(&data);
        compress(&data).map(|compressed| (compressed, sum))
    })
    .await;
    let (compressed, sum) = match compressed {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            let _ = ui.send(UiEvent::Transcript(format!(
                "[ERROR] Compression failed: {}",
                e
            )));
            return;
        }
        Err(e) => {
            let _ = ui.send(UiEvent::Transcript(format!(
                "[ERROR] Compression failed: {}",
                e
            )));
            return;
        }
    };

    let total_chunks = chunk_count(compressed.len());
    let header = FileStart {
        file_name: file_name.clone(),
        original_size,
        compressed_size: compressed.len() as u64,
        total_chunks,
        checksum: sum.clone(),
    };

    for target in &targets {
        if target.frames.send(Frame::FileStart(header.clone())).is_err() {
            debug!(peer = %target.addr, "Link gone, skipping transfer target");
            continue;
        }
        sleep(HEADER_PACING).await;

        let mut aborted = false;
        for (index, chunk) in compressed.chunks(CHUNK_SIZE).enumerate() {
            let frame = Frame::FileChunk(FileChunk {
                index: index as u32,
                data: chunk.to_vec(),
            });
            if target.frames.send(frame).is_err() {
                warn!(peer = %target.addr, "Link dropped mid-transfer");
                aborted = true;
                break;
            }
            sleep(CHUNK_PACING).await;

            let sent = index as u32 + 1;
            if sent % PROGRESS_STRIDE == 0 || sent == total_chunks {
                let _ = ui.send(UiEvent::TransferProgress {
                    peer: target.name.clone(),
                    file_name: file_name.clone(),
                    percent: ((sent as u64 * 100) / total_chunks.max(1) as u64) as u8,
                    outgoing: true,
                });
            }
        }
        if aborted {
            continue;
        }

        let _ = target.frames.send(Frame::FileEnd(FileEnd {
            status: "success".to_string(),
            checksum: sum.clone(),
        }));
        let _ = ui.send(UiEvent::Transcript(format!(
            "[FILE] Sent {} ({} bytes, {} chunks) to {}",
            file_name, original_size, total_chunks, target.name
        )));
    }
}

// ============================================================================
// Tests
// ============================================================================
