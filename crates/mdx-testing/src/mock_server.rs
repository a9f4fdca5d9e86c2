//! Mock OLAP server for unit testing.
//!
//! This module provides an in-process stand-in for an OLAP server that
//! issues session identities, remembers which sessions are alive and lets
//! tests inject failures, so pool behavior can be exercised without a
//! real server.
//!
//! ## Features
//!
//! - Sequential session identities (`S1`, `S2`, ...)
//! - Session resume on a new connection, including expiry
//! - Injected establishment, close and query failures
//! - Closes that leave the transport open
//! - Optional open delay to widen race windows in concurrency tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use mdx_session_pool::SessionPool;
//! use mdx_testing::mock_server::MockOlapServer;
//!
//! #[tokio::test]
//! async fn test_recycle() {
//!     let server = MockOlapServer::new();
//!     let pool = SessionPool::new(server.factory());
//!
//!     let session = pool.acquire("Catalog=Sales").await.unwrap();
//!     drop(session);
//!     assert_eq!(server.live_sessions(), 1);
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mdx_session_pool::{
    ConnectionFactory, ConnectionState, ConnectionTarget, OlapConnection, SessionId,
};
use parking_lot::Mutex;
use thiserror::Error;

/// Error type for mock connection operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// The server refused a new connection.
    #[error("connection refused by mock server")]
    Refused,

    /// The session the connection tried to resume no longer exists.
    #[error("session {0} does not exist or has expired")]
    SessionExpired(SessionId),

    /// The transport failed.
    #[error("transport fault: {0}")]
    Transport(String),

    /// The connection is not open.
    #[error("connection is not open")]
    NotOpen,
}

/// Result type for mock connection operations.
pub type Result<T> = std::result::Result<T, MockError>;

#[derive(Debug, Default)]
struct Faults {
    refuse_opens: usize,
    fail_closes: usize,
    leave_open_on_close: usize,
    fail_queries: usize,
}

/// Take one shot from an injected fault counter.
fn take_fault(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug, Default)]
struct Counters {
    issued: AtomicU64,
    opens: AtomicU64,
    resumes: AtomicU64,
    closes: AtomicU64,
    ended: AtomicU64,
    queries: AtomicU64,
}

#[derive(Debug)]
struct ServerState {
    name: String,
    open_delay: Duration,
    live: Mutex<HashSet<SessionId>>,
    faults: Mutex<Faults>,
    counters: Counters,
}

/// In-process mock OLAP server.
///
/// Cloning yields another handle to the same server.
#[derive(Debug, Clone)]
pub struct MockOlapServer {
    state: Arc<ServerState>,
}

impl Default for MockOlapServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOlapServer {
    /// Create a server with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for a customized server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// Server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// A connection factory bound to this server.
    #[must_use]
    pub fn factory(&self) -> MockConnectionFactory {
        MockConnectionFactory {
            server: self.clone(),
        }
    }

    /// Build an unopened connection for `target`.
    #[must_use]
    pub fn connection(&self, target: impl Into<String>) -> MockConnection {
        MockConnection {
            server: self.clone(),
            target: target.into(),
            session: None,
            state: ConnectionState::Closed,
        }
    }

    /// Refuse the next `count` connection attempts, fresh or resumed.
    pub fn refuse_next_opens(&self, count: usize) {
        self.state.faults.lock().refuse_opens += count;
    }

    /// Make the next `count` closes fail.
    pub fn fail_next_closes(&self, count: usize) {
        self.state.faults.lock().fail_closes += count;
    }

    /// Make the next `count` closes report success but leave the transport open.
    pub fn leave_next_closes_open(&self, count: usize) {
        self.state.faults.lock().leave_open_on_close += count;
    }

    /// Make the next `count` queries fail with a transport fault.
    pub fn fail_next_queries(&self, count: usize) {
        self.state.faults.lock().fail_queries += count;
    }

    /// End a session on the server side, as a session timeout would.
    ///
    /// Returns whether the session was alive.
    pub fn expire_session(&self, session: &SessionId) -> bool {
        let removed = self.state.live.lock().remove(session);
        if removed {
            tracing::debug!(server = %self.state.name, session = %session, "mock session expired");
        }
        removed
    }

    /// End every session on the server.
    pub fn expire_all(&self) -> usize {
        let mut live = self.state.live.lock();
        let count = live.len();
        live.clear();
        count
    }

    /// Check if a session is alive.
    #[must_use]
    pub fn is_live(&self, session: &SessionId) -> bool {
        self.state.live.lock().contains(session)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn live_sessions(&self) -> usize {
        self.state.live.lock().len()
    }

    /// Number of sessions issued so far.
    #[must_use]
    pub fn sessions_issued(&self) -> u64 {
        self.state.counters.issued.load(Ordering::SeqCst)
    }

    /// Number of successful opens, fresh and resumed.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.state.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of successful resumes.
    #[must_use]
    pub fn resumes(&self) -> u64 {
        self.state.counters.resumes.load(Ordering::SeqCst)
    }

    /// Number of close calls.
    #[must_use]
    pub fn closes(&self) -> u64 {
        self.state.counters.closes.load(Ordering::SeqCst)
    }

    /// Number of sessions ended through a close.
    #[must_use]
    pub fn sessions_ended(&self) -> u64 {
        self.state.counters.ended.load(Ordering::SeqCst)
    }

    /// Number of successful queries.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.state.counters.queries.load(Ordering::SeqCst)
    }

    fn open_session(&self, requested: Option<&SessionId>) -> Result<SessionId> {
        if take_fault(&mut self.state.faults.lock().refuse_opens) {
            return Err(MockError::Refused);
        }

        let counters = &self.state.counters;
        let session = match requested {
            Some(session) => {
                if !self.is_live(session) {
                    return Err(MockError::SessionExpired(session.clone()));
                }
                counters.resumes.fetch_add(1, Ordering::SeqCst);
                session.clone()
            }
            None => {
                let n = counters.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let session = SessionId::new(format!("S{n}"));
                self.state.live.lock().insert(session.clone());
                session
            }
        };
        counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }
}

/// Builder for [`MockOlapServer`].
#[derive(Debug)]
pub struct MockServerBuilder {
    name: String,
    open_delay: Duration,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            name: "MockOlap".into(),
            open_delay: Duration::ZERO,
        }
    }
}

impl MockServerBuilder {
    /// Set the server name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Delay every open by `delay`.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> MockOlapServer {
        MockOlapServer {
            state: Arc::new(ServerState {
                name: self.name,
                open_delay: self.open_delay,
                live: Mutex::new(HashSet::new()),
                faults: Mutex::new(Faults::default()),
                counters: Counters::default(),
            }),
        }
    }
}

/// Connection to a [`MockOlapServer`].
pub struct MockConnection {
    server: MockOlapServer,
    target: String,
    session: Option<SessionId>,
    state: ConnectionState,
}

impl MockConnection {
    /// Run a statement on the session.
    ///
    /// Returns the number of statements this server has executed so far.
    pub async fn execute(&mut self, statement: &str) -> Result<u64> {
        if !self.state.is_open() {
            return Err(MockError::NotOpen);
        }
        let Some(session) = self.session.clone() else {
            return Err(MockError::NotOpen);
        };
        if take_fault(&mut self.server.state.faults.lock().fail_queries) {
            self.state = ConnectionState::Broken;
            return Err(MockError::Transport(format!(
                "connection reset while executing `{statement}`"
            )));
        }
        if !self.server.is_live(&session) {
            return Err(MockError::SessionExpired(session));
        }
        Ok(self.server.state.counters.queries.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("server", &self.server.state.name)
            .field("target", &self.target)
            .field("session", &self.session)
            .field("state", &self.state)
            .finish()
    }
}

#[async_trait]
impl OlapConnection for MockConnection {
    type Error = MockError;

    fn connection_string(&self) -> &str {
        &self.target
    }

    fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    fn set_session_id(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    async fn open(&mut self) -> Result<()> {
        if !self.server.state.open_delay.is_zero() {
            tokio::time::sleep(self.server.state.open_delay).await;
        }
        let session = self.server.open_session(self.session.as_ref())?;
        self.session = Some(session);
        self.state = ConnectionState::Open;
        Ok(())
    }

    fn close(&mut self, end_session: bool) -> Result<()> {
        let server = &self.server.state;
        server.counters.closes.fetch_add(1, Ordering::SeqCst);

        let mut faults = server.faults.lock();
        if take_fault(&mut faults.fail_closes) {
            self.state = ConnectionState::Broken;
            return Err(MockError::Transport("close failed".into()));
        }
        let leave_open = take_fault(&mut faults.leave_open_on_close);
        drop(faults);

        if end_session {
            if let Some(session) = &self.session {
                if server.live.lock().remove(session) {
                    server.counters.ended.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        if !leave_open {
            self.state = ConnectionState::Closed;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// [`ConnectionFactory`] producing [`MockConnection`]s for one server.
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    server: MockOlapServer,
}

impl MockConnectionFactory {
    /// The server this factory connects to.
    #[must_use]
    pub fn server(&self) -> &MockOlapServer {
        &self.server
    }
}

impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    fn create(&self, target: &ConnectionTarget) -> Self::Connection {
        self.server.connection(target.as_str())
    }
}
