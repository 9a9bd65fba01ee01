//! Session messages exchanged with the terminal bridge
//!
//! A [`SessionMessage`] is the unit carried by the bridge's inbound and
//! outbound queues. Each variant carries exactly the payload its kind needs;
//! the optional-field record used on the wire lives in [`crate::wire`].
//!
//! # Message Flow
//!
//! 1. Input topic payloads decode to `Data` (keystrokes) or `Resize`
//! 2. The bridge writes `Data` to the terminal and applies `Resize` to it
//! 3. Terminal output comes back as `Data`
//! 4. A terminal read failure produces a single `Fault`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Number of rows
    pub rows: u16,
    /// Number of columns
    pub cols: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Default terminal size (24x80)
    pub fn default_size() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::default_size()
    }
}

/// A message on the bridge's inbound or outbound queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// Raw terminal bytes (input keystrokes or shell output)
    Data(Bytes),
    /// New terminal dimensions
    Resize(TerminalSize),
    /// The terminal failed and the bridge took a recovery action.
    ///
    /// Only ever produced by the bridge, never consumed by it.
    Fault {
        /// What went wrong
        error: String,
        /// What the bridge did about it
        recovery: String,
    },
}

impl SessionMessage {
    /// Build a data message
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Self::Data(bytes.into())
    }

    /// Build a resize message
    pub fn resize(rows: u16, cols: u16) -> Self {
        Self::Resize(TerminalSize::new(rows, cols))
    }

    /// Build a fault message
    pub fn fault(error: impl Into<String>, recovery: impl Into<String>) -> Self {
        Self::Fault {
            error: error.into(),
            recovery: recovery.into(),
        }
    }

    /// Whether this message reports a failure
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_size() {
        assert_eq!(TerminalSize::default(), TerminalSize::new(24, 80));
    }

    #[test]
    fn test_constructors() {
        assert_eq!(
            SessionMessage::data(&b"ls\n"[..]),
            SessionMessage::Data(Bytes::from_static(b"ls\n"))
        );
        assert_eq!(
            SessionMessage::resize(40, 120),
            SessionMessage::Resize(TerminalSize { rows: 40, cols: 120 })
        );
        assert!(SessionMessage::fault("eof", "reset tty").is_fault());
        assert!(!SessionMessage::resize(1, 1).is_fault());
    }
}
