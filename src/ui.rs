//! UI Surface
//!
//! The engine never touches a widget. Everything user-visible flows as
//! [`UiEvent`]s through a single unbounded channel; whatever shell is
//! attached (the console binary, tests, a windowed frontend) drains the
//! channel and renders. Unbounded because the engine must never block on
//! a slow display.

use crate::address::RadioAddr;
use tokio::sync::mpsc;

/// One user-visible update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UiEvent {
    /// Append a line to the scrolling transcript.
    Transcript(String),
    /// Clear the transcript.
    Clear,
    /// Number of active links changed.
    LinkCount(usize),
    /// Status string changed.
    Status(String),
    /// Typing indicator for a peer raised or lowered.
    Typing {
        addr: RadioAddr,
        name: String,
        active: bool,
    },
    /// File transfer progress (either direction).
    TransferProgress {
        peer: String,
        file_name: String,
        percent: u8,
        outgoing: bool,
    },
}

/// Channel sender for UI events.
pub type UiTx = mpsc::UnboundedSender<UiEvent>;

/// Channel receiver for UI events.
pub type UiRx = mpsc::UnboundedReceiver<UiEvent>;

/// Create the UI event channel.
pub fn ui_channel() -> (UiTx, UiRx) {
    mpsc::unbounded_channel()
}
