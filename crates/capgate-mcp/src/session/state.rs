//! Per-session lifecycle.

use std::fmt;

/// `Initializing → Negotiated → Active → Closing → Closed`.
///
/// `Initializing` may also go straight to `Closing` (failed negotiation or
/// early disconnect). `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Negotiated,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Initializing, Negotiated)
                | (Initializing, Closing)
                | (Negotiated, Active)
                | (Negotiated, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initializing => "initializing",
            SessionState::Negotiated => "negotiated",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
