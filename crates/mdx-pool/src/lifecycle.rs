//! Connection lifecycle contract.
//!
//! The pool does not speak the OLAP wire protocol. It only needs a narrow
//! view of a client connection: a target string it was built from, a
//! session identity that can be assigned before opening, an open/close
//! lifecycle and a readable state. This module defines that view along
//! with the identity types the pool keys its queues by.
//!
//! ## Session residency
//!
//! ```text
//! Absent -> CheckedOut (fresh session established)
//! CheckedOut -> Idle (released healthy, transport closed)
//! Idle -> CheckedOut (resumed on a new transport)
//! CheckedOut -> Discarded (broken, close failure, or idle cap reached)
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of a set of interchangeable sessions, usually a connection string.
///
/// Targets are compared byte-for-byte: two strings that only differ in
/// whitespace or key order name different pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionTarget(Arc<str>);

impl ConnectionTarget {
    /// Create a target from a connection string.
    pub fn new(target: impl Into<Arc<str>>) -> Self {
        Self(target.into())
    }

    /// The target as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionTarget {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConnectionTarget {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&ConnectionTarget> for ConnectionTarget {
    fn from(value: &ConnectionTarget) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ConnectionTarget {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-issued token naming a live logical session.
///
/// A session outlives the transport connection that created it; any later
/// connection that is given this identity before opening resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Wrap a server-issued session token.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport state reported by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport is closed. The only state in which a session is reclaimed.
    #[default]
    Closed,
    /// Transport is open and usable.
    Open,
    /// Transport failed and is in an undefined state.
    Broken,
}

impl ConnectionState {
    /// Check if the transport is fully closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// The part of an OLAP client connection the pool relies on.
///
/// Uses `#[async_trait]` so that [`open`](Self::open) yields a `Send`
/// future and acquisition can run on any executor thread.
#[async_trait::async_trait]
pub trait OlapConnection: Send + 'static {
    /// Error reported by the connection.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The connection string this connection was constructed from.
    fn connection_string(&self) -> &str;

    /// The session this connection is bound to, if any.
    ///
    /// After a successful fresh [`open`](Self::open) this is the identity
    /// the server issued.
    fn session_id(&self) -> Option<&SessionId>;

    /// Bind the connection to an existing session.
    ///
    /// Must be called before [`open`](Self::open) for the open to resume
    /// the session instead of starting a new one.
    fn set_session_id(&mut self, session: SessionId);

    /// Open the transport, resuming the bound session or starting a new one.
    async fn open(&mut self) -> Result<(), Self::Error>;

    /// Close the transport.
    ///
    /// With `end_session` set to `false` the remote session stays alive so
    /// it can be resumed later. This runs from `Drop`, so it must not wait
    /// on the network for long.
    fn close(&mut self, end_session: bool) -> Result<(), Self::Error>;

    /// Current transport state.
    fn state(&self) -> ConnectionState;
}

/// Builds unopened connections for a target.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Connection: OlapConnection;

    /// Construct a connection for `target` without opening it.
    fn create(&self, target: &ConnectionTarget) -> Self::Connection;
}

/// Metadata about one checkout of a pooled session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Target the session belongs to.
    pub target: ConnectionTarget,
    /// Session identity, when the connection reported one.
    pub session_id: Option<SessionId>,
    /// Whether this checkout resumed an idle session.
    pub resumed: bool,
    /// When the session was handed to the caller.
    pub checked_out_at: Instant,
}

impl SessionInfo {
    pub(crate) fn new(target: ConnectionTarget, session_id: Option<SessionId>, resumed: bool) -> Self {
        Self {
            target,
            session_id,
            resumed,
            checked_out_at: Instant::now(),
        }
    }

    /// How long the session has been checked out.
    #[must_use]
    pub fn checkout_age(&self) -> Duration {
        self.checked_out_at.elapsed()
    }
}
