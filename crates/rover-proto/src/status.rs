use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Text shown on the operator console status line.
    pub fn status_text(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Status: CONNECTING...",
            ConnectionState::Connected => "Status: CONNECTED",
            ConnectionState::Reconnecting => "Status: RECONNECTING...",
        }
    }
}

/// Shown before the command channel has reported anything.
pub const STATUS_DISCONNECTED: &str = "Status: Disconnected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_counts_as_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
    }

    #[test]
    fn status_line_text() {
        assert_eq!(ConnectionState::Connected.status_text(), "Status: CONNECTED");
        assert_eq!(
            ConnectionState::Reconnecting.status_text(),
            "Status: RECONNECTING..."
        );
    }
}
