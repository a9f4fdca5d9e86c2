//! Pooled session handle.

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

use crate::extra::ExtraData;
use crate::lifecycle::{ConnectionTarget, OlapConnection, SessionId, SessionInfo};
use crate::pool::ReturnPath;

/// A session checked out of a [`SessionPool`](crate::SessionPool).
///
/// Grants exclusive use of an open connection and the extra data stored
/// with its session. Dropping the handle (or calling
/// [`release`](Self::release)) closes the transport and, unless the handle
/// was marked broken, returns the session to the pool for reuse. This
/// happens exactly once, on every exit path: normal return, `?`, panic
/// unwind, or cancellation of the owning future.
///
/// A handle that is leaked with [`std::mem::forget`] never returns its
/// session.
pub struct PooledSession<C: OlapConnection> {
    connection: C,
    extra: ExtraData,
    broken: bool,
    info: SessionInfo,
    returns: Option<ReturnPath>,
}

impl<C: OlapConnection> PooledSession<C> {
    pub(crate) fn new(
        connection: C,
        extra: ExtraData,
        info: SessionInfo,
        returns: ReturnPath,
    ) -> Self {
        Self {
            connection,
            extra,
            broken: false,
            info,
            returns: Some(returns),
        }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// The underlying connection, mutably.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Extra data stored with this session.
    #[must_use]
    pub fn extra_data(&self) -> &ExtraData {
        &self.extra
    }

    /// Extra data stored with this session, mutably.
    ///
    /// Changes travel with the session into the pool and come back on
    /// its next checkout.
    pub fn extra_data_mut(&mut self) -> &mut ExtraData {
        &mut self.extra
    }

    /// Check if the handle has been marked broken.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Mark the session as untrustworthy so it is discarded on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Set or clear the broken flag. Only its value at release time counts.
    pub fn set_broken(&mut self, broken: bool) {
        self.broken = broken;
    }

    /// Metadata about this checkout.
    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// The session identity the connection is bound to.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.connection.session_id()
    }

    /// The target this session belongs to.
    #[must_use]
    pub fn target(&self) -> &ConnectionTarget {
        &self.info.target
    }

    /// Check if this checkout resumed a previously pooled session.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.info.resumed
    }

    /// Release the session back to the pool.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(self) {
        drop(self);
    }

    /// Release the session without returning it to the pool.
    pub fn discard(mut self) {
        self.broken = true;
    }

    fn return_to_pool(&mut self) {
        if let Some(returns) = self.returns.take() {
            let extra = mem::take(&mut self.extra);
            returns.reclaim(&mut self.connection, extra, self.broken);
        }
    }
}

impl<C: OlapConnection> Deref for PooledSession<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<C: OlapConnection> DerefMut for PooledSession<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<C: OlapConnection> Drop for PooledSession<C> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl<C: OlapConnection> fmt::Debug for PooledSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("target", &self.info.target)
            .field("session_id", &self.connection.session_id())
            .field("state", &self.connection.state())
            .field("resumed", &self.info.resumed)
            .field("broken", &self.broken)
            .field("extra", &self.extra)
            .finish()
    }
}
