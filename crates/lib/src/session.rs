//! The live-session collaborator interface.
//!
//! A session is a live connection to the chat server, authenticated or
//! anonymous. The account manager never owns sessions; it observes and tags
//! them through this trait, which the server's connection type implements.

use std::fmt;
use std::sync::Arc;

/// Stable identifier of a live session, assigned by the embedding server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Client capabilities the account manager cares about when selecting
/// observers for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The peer asked to be told when a session's account tag changes.
    AccountNotify,
}

/// A live connection to the chat server.
///
/// Implementations must be safe to share across threads; the account
/// manager calls into sessions while holding its cache lock and from
/// detached notification threads.
pub trait Session: Send + Sync {
    /// The session's stable identifier.
    fn id(&self) -> SessionId;

    /// The folded account name this session is logged in to, or the empty
    /// string when it is not logged in.
    fn account(&self) -> String;

    /// Set the session's account tag to a folded account name (or clear it
    /// with the empty string). Returns whether the tag actually changed.
    fn set_account_name(&self, account: &str) -> bool;

    /// The fingerprint of the client certificate presented on this
    /// connection, or the empty string.
    fn cert_fingerprint(&self) -> String;

    /// The `nick!user@host` mask identifying this session on the wire.
    fn nick_mask(&self) -> String;

    /// Peer sessions that share a channel with this one and have declared
    /// the given capability.
    fn friends(&self, capability: Capability) -> Vec<Arc<dyn Session>>;

    /// Deliver a protocol message to this session.
    fn send(&self, source: &str, command: &str, params: &[String]);

    /// Re-arm the timer that reclaims held nicks; called whenever the
    /// session's account tag changes.
    fn touch_nick_timer(&self);
}
