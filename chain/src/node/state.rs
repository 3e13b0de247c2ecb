//! Peer lifecycle state.

use std::fmt;

/// What the peer is currently doing, as seen by the receive-processor's
/// state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerState {
    /// Started but not yet bootstrapped.
    Idle,
    /// Normal operation: mining and processing inbound blocks.
    Mining,
    /// A fork was detected; a full-chain fetch is in flight.
    WaitingForChain,
    /// Shutdown has been requested; loops are draining.
    ShuttingDown,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Idle => "idle",
            PeerState::Mining => "mining",
            PeerState::WaitingForChain => "waiting_for_chain",
            PeerState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_display_as_snake_case() {
        assert_eq!(PeerState::Idle.to_string(), "idle");
        assert_eq!(PeerState::WaitingForChain.to_string(), "waiting_for_chain");
    }
}
