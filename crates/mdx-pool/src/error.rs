//! Pool error types.

use thiserror::Error;

use crate::lifecycle::{ConnectionTarget, SessionId};

/// Boxed error raised by the underlying OLAP connection.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
///
/// Only acquisition can fail. Releasing a session never surfaces an error;
/// problems on the return path only mean the session is not reused.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Opening a brand-new connection and session failed.
    #[error("failed to establish session for {target}: {source}")]
    Establish {
        /// Target the connection was opened against.
        target: ConnectionTarget,
        /// Error reported by the connection.
        #[source]
        source: BoxError,
    },

    /// Reopening a connection bound to an idle session failed.
    ///
    /// Only returned when falling back to another session is disabled in
    /// [`PoolConfig`](crate::PoolConfig).
    #[error("failed to resume session {session} for {target}: {source}")]
    Resume {
        /// Target the connection was opened against.
        target: ConnectionTarget,
        /// Session that could not be resumed. It has been discarded.
        session: SessionId,
        /// Error reported by the connection.
        #[source]
        source: BoxError,
    },

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error came from opening a connection, fresh or resumed.
    #[must_use]
    pub fn is_establishment(&self) -> bool {
        matches!(self, Self::Establish { .. } | Self::Resume { .. })
    }

    /// The connection target involved in the failure, if any.
    #[must_use]
    pub fn target(&self) -> Option<&ConnectionTarget> {
        match self {
            Self::Establish { target, .. } | Self::Resume { target, .. } => Some(target),
            Self::Configuration(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_establish_error_display_and_source() {
        let err = PoolError::Establish {
            target: ConnectionTarget::from("Data Source=olap;Catalog=Sales"),
            source: "access denied".into(),
        };

        assert!(err.is_establishment());
        assert_eq!(
            err.to_string(),
            "failed to establish session for Data Source=olap;Catalog=Sales: access denied"
        );
        assert_eq!(err.source().unwrap().to_string(), "access denied");
        assert_eq!(
            err.target().map(ConnectionTarget::as_str),
            Some("Data Source=olap;Catalog=Sales")
        );
    }

    #[test]
    fn test_configuration_error_is_not_establishment() {
        let err = PoolError::Configuration("bad".into());
        assert!(!err.is_establishment());
        assert!(err.target().is_none());
    }
}
