//! Link state reporting for the connection lifecycle.
//!
//! The supervisor broadcasts a [`LinkState`] over a `tokio::sync::watch`
//! channel on every transition, so application tasks can react to the
//! lifecycle (defer publishes while reconnecting, surface status to an
//! operator console) without participating in it.
//!
//! The state flows through:
//!
//! ```text
//! Disconnected -> Connecting -> Running -> Faulted -> Reconnecting -> Running -> ...
//!                                  |
//!                            (clean shutdown)
//!                                  v
//!                               Stopped
//! ```
//!
//! `Stopped` is terminal and only reachable through the protocol engine's
//! clean-termination signal; every other exit from `Running` cycles back
//! through `Reconnecting` forever.

use std::fmt;

/// Observable state of the broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempt has been made yet.
    Disconnected,

    /// Opening the secured transport and performing the handshake.
    ///
    /// Covers both the backoff-retry loop of the transport establisher and
    /// the CONNECT/CONNACK exchange. Subscriptions and publishes queued in
    /// this state are drained once the run loop starts.
    Connecting,

    /// Connected, handshake acknowledged, run loop active.
    ///
    /// The only state in which traffic flows.
    Running,

    /// The run loop reported an error termination.
    ///
    /// The transport is being torn down best-effort; the supervisor moves
    /// to `Reconnecting` immediately afterwards.
    Faulted,

    /// Re-establishing the transport and renegotiating the session after a
    /// fault, with session resumption requested.
    Reconnecting,

    /// The run loop terminated cleanly and the supervisor halted.
    ///
    /// Terminal. Models an intentional shutdown, not a failure.
    Stopped,
}

impl LinkState {
    /// Short static identifier, handy for logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Running => "Running",
            LinkState::Faulted => "Faulted",
            LinkState::Reconnecting => "Reconnecting",
            LinkState::Stopped => "Stopped",
        }
    }

    /// True only while the run loop is active and traffic can flow.
    pub fn is_running(&self) -> bool {
        matches!(self, LinkState::Running)
    }

    /// True while a connection attempt (initial or repeat) is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Reconnecting)
    }

    /// True once the supervisor has halted for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Stopped)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
