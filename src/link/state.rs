//! Link lifecycle states and the state machine's exit conditions.

use std::fmt;

/// Lifecycle of the reliable link.
///
/// Construction leaves the link in [`Start`](Self::Start); `open` drives it
/// through the reset and handshake states; only [`Active`](Self::Active)
/// carries application data. [`Failed`](Self::Failed),
/// [`Closed`](Self::Closed) and [`NoResponse`](Self::NoResponse) are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created; waiting for `open`.
    Start,
    /// Peer reset sent; holding off while it reboots.
    Reset,
    /// Sending SYNC, waiting for the SYNC response.
    Uninitialized,
    /// SYNC exchange done; sending CONFIG, waiting for the CONFIG response.
    Initialized,
    /// Handshake complete; DATA/ACK traffic flows.
    Active,
    /// Unrecoverable failure (I/O resources gone).
    Failed,
    /// Closed by the application.
    Closed,
    /// The peer never answered the handshake within the retry budget.
    NoResponse,
}

impl LinkState {
    /// True for states the machine never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed | Self::NoResponse)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Reset => "reset",
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Closed => "closed",
            Self::NoResponse => "no-response",
        };
        f.write_str(name)
    }
}

/// Conditions that let the state machine leave its current state.
///
/// All flags live under the machine mutex and are signalled through its
/// condvar; they are cleared on every state transition. This replaces
/// per-state condition objects with one flat, lock-guarded record.
#[derive(Debug, Default, Clone)]
pub(crate) struct ExitFlags {
    /// The byte-stream endpoint failed; nothing more can be sent.
    pub io_error: bool,
    /// The application asked the link to close.
    pub close: bool,
    /// `open` finished wiring the channel (leaves Start).
    pub opened: bool,
    /// A SYNC was written this state (handshake bookkeeping).
    pub sync_sent: bool,
    /// The peer answered our SYNC.
    pub sync_response_received: bool,
    /// A CONFIG was written this state.
    pub config_sent: bool,
    /// The peer answered our CONFIG.
    pub config_response_received: bool,
    /// The peer sent SYNC while the link was Active (peer rebooted).
    pub peer_sync_received: bool,
    /// Sequence/acknowledgement numbers no longer agree with the peer.
    pub desync: bool,
}

impl ExitFlags {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the given state's exit condition holds.
    pub fn fulfilled(&self, state: LinkState) -> bool {
        let state_specific = match state {
            LinkState::Start => self.opened,
            // Reset exits on a timer; only failure/close exit it early.
            LinkState::Reset => false,
            LinkState::Uninitialized => self.sync_sent && self.sync_response_received,
            LinkState::Initialized => self.config_sent && self.config_response_received,
            LinkState::Active => self.peer_sync_received || self.desync,
            LinkState::Failed | LinkState::Closed | LinkState::NoResponse => true,
        };
        self.io_error || self.close || state_specific
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(LinkState::Failed.is_terminal());
        assert!(LinkState::Closed.is_terminal());
        assert!(LinkState::NoResponse.is_terminal());
        assert!(!LinkState::Active.is_terminal());
        assert!(!LinkState::Start.is_terminal());
    }

    #[test]
    fn test_start_exit() {
        let mut flags = ExitFlags::default();
        assert!(!flags.fulfilled(LinkState::Start));
        flags.opened = true;
        assert!(flags.fulfilled(LinkState::Start));
    }

    #[test]
    fn test_handshake_exit_needs_send_and_response() {
        let mut flags = ExitFlags::default();
        flags.sync_response_received = true;
        assert!(!flags.fulfilled(LinkState::Uninitialized));
        flags.sync_sent = true;
        assert!(flags.fulfilled(LinkState::Uninitialized));
    }

    #[test]
    fn test_close_exits_every_state() {
        let mut flags = ExitFlags::default();
        flags.close = true;
        for state in [
            LinkState::Start,
            LinkState::Reset,
            LinkState::Uninitialized,
            LinkState::Initialized,
            LinkState::Active,
        ] {
            assert!(flags.fulfilled(state), "close should exit {state}");
        }
    }

    #[test]
    fn test_active_exit_on_desync_or_peer_sync() {
        let mut flags = ExitFlags::default();
        assert!(!flags.fulfilled(LinkState::Active));
        flags.desync = true;
        assert!(flags.fulfilled(LinkState::Active));

        flags.clear();
        flags.peer_sync_received = true;
        assert!(flags.fulfilled(LinkState::Active));
    }

    #[test]
    fn test_clear() {
        let mut flags = ExitFlags::default();
        flags.io_error = true;
        flags.opened = true;
        flags.clear();
        assert!(!flags.fulfilled(LinkState::Start));
    }
}
