//! Newline-Delimited Frame Codec
//!
//! Byte-stream framing for the chat protocol. A single read may yield
//! zero, one, or many complete frames plus a trailing partial; the partial
//! stays in the buffer until the next read completes it. Malformed lines
//! are logged and skipped so one bad frame never kills a link.

use crate::protocol::{Frame, ProtocolError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Codec for framing [`Frame`] values over a byte stream.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Everything up to and including a newline is a complete line;
            // anything after the last newline is retained as the partial.
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };

            let line_bytes = src.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Frame::parse(line) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, "Dropping malformed frame");
                    continue;
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // A trailing fragment with no newline will never complete.
                if !src.is_empty() {
                    debug!(bytes = src.len(), "Discarding partial line at EOF");
                    src.advance(src.len());
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.encode().as_bytes());
        Ok(())
    }
}
