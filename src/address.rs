//! Radio Addresses
//!
//! Every node is identified by the canonical form of its radio address:
//! ASCII alphanumerics only, uppercased, all punctuation removed. The
//! canonical form is the single admission key for the connection manager,
//! so normalization happens once, at the edge, before any table is touched.

use std::fmt;

/// A normalized radio address.
///
/// Transports report addresses in whatever form the platform uses
/// (`AA:BB:CC:DD:EE:FF`, `aabb-ccdd-eeff`, ...). All of them collapse to
/// the same canonical key here, so two nodes that dial each other
/// simultaneously agree on which address they are fighting over.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RadioAddr(String);

impl RadioAddr {
    /// Normalize a raw transport-reported address.
    ///
    /// Keeps ASCII alphanumerics, uppercases them, and drops everything
    /// else (colons, dashes, whitespace).
    pub fn normalize(raw: &str) -> Self {
        let canonical: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(canonical)
    }

    /// Get the canonical address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether normalization left anything usable.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RadioAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RadioAddr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
