//! Links
//!
//! One live bidirectional stream to a directly reachable node. Each link
//! owns a reader task (decoding frames into the node's event channel) and
//! a writer task (draining an unbounded outbound queue onto the stream).
//! The single writer task is what keeps frames on one stream from
//! interleaving even though gossip, the dispatcher, and the file sender
//! all produce traffic for it.

use crate::address::RadioAddr;
use crate::codec::FrameCodec;
use crate::node::{EventTx, NodeEvent};
use crate::protocol::Frame;
use crate::transport::{LinkDirection, RadioStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

/// Outbound frame queue sender for one link.
pub type FrameTx = mpsc::UnboundedSender<Frame>;

/// A live link to a directly connected node.
pub struct Link {
    remote_addr: RadioAddr,
    device_name: String,
    direction: LinkDirection,
    frame_tx: FrameTx,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Link {
    /// Take ownership of a stream and spawn its reader and writer tasks.
    ///
    /// The reader decodes frames into the node's event channel and reports
    /// EOF or stream errors as a `LinkClosed` event. The writer drains the
    /// outbound queue; it ends when the queue's last sender drops.
    pub fn spawn(
        stream: RadioStream,
        remote_addr: RadioAddr,
        device_name: String,
        direction: LinkDirection,
        events: EventTx,
    ) -> Self {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
        let (read_half, write_half) = tokio::io::split(stream);

        let writer_addr = remote_addr.clone();
        let writer_task = tokio::spawn(async move {
            let mut sink = FramedWrite::new(write_half, FrameCodec);
            while let Some(frame) = frame_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(peer = %writer_addr, error = %e, "Link write failed");
                    break;
                }
            }
        });

        let reader_addr = remote_addr.clone();
        let reader_task = tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, FrameCodec);
            let reason = loop {
                match frames.next().await {
                    Some(Ok(frame)) => {
                        let event = NodeEvent::Frame {
                            addr: reader_addr.clone(),
                            frame,
                        };
                        if events.send(event).await.is_err() {
                            return; // node gone, no one to notify
                        }
                    }
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None, // EOF
                }
            };
            let _ = events
                .send(NodeEvent::LinkClosed {
                    addr: reader_addr,
                    reason,
                })
                .await;
        });

        Self {
            remote_addr,
            device_name,
            direction,
            frame_tx,
            reader_task,
            writer_task,
        }
    }

    /// Queue a frame for this link. Best-effort: returns false if the
    /// writer is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.frame_tx.send(frame).is_ok()
    }

    /// Clone of the outbound queue sender, for detached producers like the
    /// file sender.
    pub fn sender(&self) -> FrameTx {
        self.frame_tx.clone()
    }

    pub fn remote_addr(&self) -> &RadioAddr {
        &self.remote_addr
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Tear the link down. The reader is aborted; the writer drains any
    /// queued frames and exits once the queue sender drops.
    pub fn shutdown(self) {
        self.reader_task.abort();
        drop(self.frame_tx);
        drop(self.writer_task);
    }
}
