//! Connection state types

/// Lifecycle of one NNTP session
///
/// An [`NntpConnection`](super::NntpConnection) only exists once the TCP
/// (and TLS) handshake succeeded and the greeting was read, so there is no
/// value for the created or connecting phases: those are the
/// [`connect`](super::NntpConnection::connect) future itself. `Connected`
/// means the greeting was accepted but AUTHINFO has not run yet. Sessions
/// for providers without credentials go straight to `Ready`.
///
/// Being in use is not a state of the session but of its owner: a `Ready`
/// session is in use while a [`ConnectionLock`](crate::ConnectionLock)
/// borrows it, and idle while it sits in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Greeted, not yet authenticated
    Connected,
    /// AUTHINFO USER sent, waiting for the exchange to finish
    Authenticating,
    /// Usable for commands
    Ready,
    /// QUIT sent or peer closed
    Closed,
    /// Protocol sync lost; must be discarded
    Faulted,
}
