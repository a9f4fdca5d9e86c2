//! In-crate stub connection for unit tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::lifecycle::{
    ConnectionFactory, ConnectionState, ConnectionTarget, OlapConnection, SessionId,
};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StubBehavior {
    pub fail_open: bool,
    pub fail_close: bool,
    pub stay_open_on_close: bool,
}

#[derive(Debug)]
pub(crate) struct StubConnection {
    target: String,
    session: Option<SessionId>,
    state: ConnectionState,
    behavior: StubBehavior,
    next_session: Arc<AtomicU64>,
    closes: Arc<AtomicUsize>,
    ended_session: Arc<AtomicBool>,
}

impl StubConnection {
    fn new(target: &str, behavior: StubBehavior, next_session: Arc<AtomicU64>) -> Self {
        Self {
            target: target.to_owned(),
            session: None,
            state: ConnectionState::Closed,
            behavior,
            next_session,
            closes: Arc::new(AtomicUsize::new(0)),
            ended_session: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An already open connection on target `T1` bound to `session`.
    pub(crate) fn open_with(session: &str, behavior: StubBehavior) -> Self {
        let mut connection = Self::new("T1", behavior, Arc::new(AtomicU64::new(0)));
        connection.session = Some(SessionId::from(session));
        connection.state = ConnectionState::Open;
        connection
    }

    pub(crate) fn closes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }

    pub(crate) fn ended_session(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ended_session)
    }
}

#[async_trait::async_trait]
impl OlapConnection for StubConnection {
    type Error = io::Error;

    fn connection_string(&self) -> &str {
        &self.target
    }

    fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    fn set_session_id(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    async fn open(&mut self) -> Result<(), Self::Error> {
        if self.behavior.fail_open {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        if self.session.is_none() {
            let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
            self.session = Some(SessionId::new(format!("S{n}")));
        }
        self.state = ConnectionState::Open;
        Ok(())
    }

    fn close(&mut self, end_session: bool) -> Result<(), Self::Error> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_close {
            self.state = ConnectionState::Broken;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        if end_session {
            self.ended_session.store(true, Ordering::SeqCst);
        }
        if !self.behavior.stay_open_on_close {
            self.state = ConnectionState::Closed;
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

#[derive(Debug, Default)]
pub(crate) struct StubFactory {
    behavior: Mutex<StubBehavior>,
    next_session: Arc<AtomicU64>,
}

impl StubFactory {
    pub(crate) fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock() = behavior;
    }
}

impl ConnectionFactory for StubFactory {
    type Connection = StubConnection;

    fn create(&self, target: &ConnectionTarget) -> Self::Connection {
        StubConnection::new(
            target.as_str(),
            *self.behavior.lock(),
            Arc::clone(&self.next_session),
        )
    }
}
