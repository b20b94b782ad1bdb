//! Command Surface
//!
//! Input lines starting with `/` are commands; anything else is chat text
//! sent to every active link. Parsing happens here so the node's handler
//! switches over a typed command, not strings.

use std::path::PathBuf;

/// Help line shown for unrecognized commands.
pub const HELP_TEXT: &str =
    "Commands: /clear /nick <name> /sendfile <path> /peers /connect <address> /devices";

/// A parsed input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Plain chat text, sent as `MSG:` to every link.
    Say(String),
    /// Clear the local transcript.
    Clear,
    /// Set the local nickname and announce it.
    Nick(String),
    /// Send a file to every link.
    SendFile(PathBuf),
    /// Print direct links and mesh peers.
    Peers,
    /// Dial a paired device by address.
    Connect(String),
    /// List the transport's paired devices.
    Devices,
    /// Anything else starting with `/`.
    Unknown(String),
}

impl Command {
    /// Parse one input line. Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Say(line.to_string()));
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "/clear" => Command::Clear,
            "/nick" if !rest.is_empty() => Command::Nick(rest.to_string()),
            "/sendfile" if !rest.is_empty() => Command::SendFile(PathBuf::from(rest)),
            "/peers" => Command::Peers,
            "/connect" if !rest.is_empty() => Command::Connect(rest.to_string()),
            "/devices" => Command::Devices,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}
