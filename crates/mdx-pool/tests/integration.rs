//! Session pool integration tests.
//!
//! These tests run the pool against the in-process mock OLAP server from
//! `mdx-testing`, so no real server is required:
//!
//! ```bash
//! cargo test -p mdx-session-pool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdx_session_pool::{PoolError, SessionId, SessionPool};
use mdx_testing::{MockConnectionFactory, MockError, MockOlapServer, TestTarget};
use parking_lot::Mutex;

fn pool_for(server: &MockOlapServer) -> SessionPool<MockConnectionFactory> {
    SessionPool::new(server.factory())
}

// =============================================================================
// Recycling
// =============================================================================

#[tokio::test]
async fn test_release_then_acquire_recycles_session() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let first = pool.acquire("T1").await.expect("fresh session");
    assert!(!first.is_resumed());
    let s1 = first.session_id().cloned().unwrap();
    assert_eq!(s1.as_str(), "S1");

    first.release();
    assert_eq!(pool.idle_count("T1"), 1);
    assert!(pool.is_idle("T1", &s1));
    // The transport is closed but the session stays alive on the server.
    assert!(server.is_live(&s1));

    let second = pool.acquire("T1").await.expect("recycled session");
    assert!(second.is_resumed());
    assert_eq!(second.session_id(), Some(&s1));
    assert_eq!(pool.idle_count("T1"), 0);
    assert_eq!(server.sessions_issued(), 1);
    assert_eq!(server.resumes(), 1);
}

#[tokio::test]
async fn test_broken_session_is_never_recycled() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let mut first = pool.acquire("T1").await.unwrap();
    let s1 = first.session_id().cloned().unwrap();
    first.mark_broken();
    drop(first);

    assert_eq!(pool.idle_count("T1"), 0);

    let second = pool.acquire("T1").await.unwrap();
    assert!(!second.is_resumed());
    assert_ne!(second.session_id(), Some(&s1));
    assert_eq!(server.sessions_issued(), 2);
}

#[tokio::test]
async fn test_query_fault_marks_session_broken() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);
    let target = TestTarget::default().connection_string();

    server.fail_next_queries(1);
    {
        let mut session = pool.acquire(target.as_str()).await.unwrap();
        if let Err(MockError::Transport(_)) = session.execute("SELECT FROM [Sales]").await {
            session.mark_broken();
        }
    }

    assert_eq!(pool.idle_count(&target), 0);
    assert_eq!(pool.status().discarded, 1);
}

#[tokio::test]
async fn test_extra_data_survives_recycling() {
    #[derive(Debug, Clone, PartialEq)]
    struct LastCube(String);

    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let mut first = pool.acquire("T1").await.unwrap();
    assert!(first.extra_data().is_empty());
    first.extra_data_mut().insert(LastCube("Sales".into()));
    drop(first);

    let second = pool.acquire("T1").await.unwrap();
    assert!(second.is_resumed());
    assert_eq!(
        second.extra_data().get::<LastCube>(),
        Some(&LastCube("Sales".into()))
    );
}

#[tokio::test]
async fn test_targets_are_byte_exact() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    pool.acquire("Catalog=Sales").await.unwrap().release();
    let other = pool.acquire("Catalog=Sales ").await.unwrap();

    assert!(!other.is_resumed());
    assert_eq!(pool.idle_count("Catalog=Sales"), 1);
    assert_eq!(pool.status().targets, 2);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_establish_failure_is_returned() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);
    server.refuse_next_opens(1);

    let err = pool.acquire("T1").await.unwrap_err();
    assert!(err.is_establishment());
    assert!(matches!(err, PoolError::Establish { .. }));

    // Not retried internally; the next call succeeds on its own.
    let session = pool.acquire("T1").await.unwrap();
    assert_eq!(session.session_id().unwrap().as_str(), "S1");
}

#[tokio::test]
async fn test_close_failure_discards_session() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let session = pool.acquire("T1").await.unwrap();
    server.fail_next_closes(1);
    session.release();

    assert_eq!(pool.idle_count("T1"), 0);
    let status = pool.status();
    assert_eq!(status.discarded, 1);
    assert_eq!(status.checked_out, 0);

    let next = pool.acquire("T1").await.unwrap();
    assert!(!next.is_resumed());
}

#[tokio::test]
async fn test_close_leaving_transport_open_discards_session() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let session = pool.acquire("T1").await.unwrap();
    server.leave_next_closes_open(1);
    drop(session);

    assert_eq!(pool.idle_count("T1"), 0);
}

#[tokio::test]
async fn test_expired_session_falls_back_to_fresh_one() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let first = pool.acquire("T1").await.unwrap();
    let s1 = first.session_id().cloned().unwrap();
    drop(first);
    server.expire_session(&s1);

    let second = pool.acquire("T1").await.unwrap();
    assert!(!second.is_resumed());
    assert_eq!(second.session_id().unwrap().as_str(), "S2");
    assert_eq!(pool.idle_count("T1"), 0);
}

#[tokio::test]
async fn test_expired_session_error_without_fallback() {
    let server = MockOlapServer::new();
    let pool = SessionPool::builder(server.factory())
        .fallback_on_resume_failure(false)
        .build()
        .unwrap();

    let first = pool.acquire("T1").await.unwrap();
    let s1 = first.session_id().cloned().unwrap();
    drop(first);
    server.expire_session(&s1);

    match pool.acquire("T1").await {
        Err(PoolError::Resume { session, .. }) => assert_eq!(session, s1),
        other => panic!("expected resume error, got {other:?}"),
    }
    // The unusable session is gone; the next call starts fresh.
    assert_eq!(pool.idle_count("T1"), 0);
    assert!(!pool.acquire("T1").await.unwrap().is_resumed());
}

#[tokio::test]
async fn test_end_session_on_discard() {
    let server = MockOlapServer::new();
    let pool = SessionPool::builder(server.factory())
        .end_session_on_discard(true)
        .build()
        .unwrap();

    let healthy = pool.acquire("T1").await.unwrap();
    let broken = pool.acquire("T1").await.unwrap();
    let broken_id = broken.session_id().cloned().unwrap();
    drop(healthy);
    broken.discard();

    assert_eq!(server.sessions_ended(), 1);
    assert!(!server.is_live(&broken_id));
    assert_eq!(server.live_sessions(), 1);
}

// =============================================================================
// Scoped release
// =============================================================================

async fn run_failing_query(pool: &SessionPool<MockConnectionFactory>) -> Result<(), MockError> {
    let mut session = pool.acquire("T1").await.expect("session");
    session.execute("SELECT").await?;
    Err(MockError::NotOpen)
}

#[tokio::test]
async fn test_error_path_returns_session() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    assert!(run_failing_query(&pool).await.is_err());

    assert_eq!(pool.idle_count("T1"), 1);
    assert_eq!(pool.status().checked_out, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panic_returns_session() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);

    let task_pool = pool.clone();
    let result = tokio::spawn(async move {
        let _session = task_pool.acquire("T1").await.unwrap();
        panic!("caller failed while holding a session");
    })
    .await;

    assert!(result.unwrap_err().is_panic());
    assert_eq!(pool.idle_count("T1"), 1);
}

#[tokio::test]
async fn test_cancelled_acquire_leaves_pool_consistent() {
    let server = MockOlapServer::builder()
        .with_open_delay(Duration::from_millis(200))
        .build();
    let pool = pool_for(&server);

    let attempt = tokio::time::timeout(Duration::from_millis(10), pool.acquire("T1")).await;
    assert!(attempt.is_err());

    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.created, 0);
    assert_eq!(pool.idle_count("T1"), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_acquirers_race_for_one_idle_session() {
    let server = MockOlapServer::builder()
        .with_open_delay(Duration::from_millis(20))
        .build();
    let pool = pool_for(&server);

    pool.acquire("T1").await.unwrap().release();
    assert_eq!(pool.idle_count("T1"), 1);

    let (a, b) = tokio::join!(
        tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire("T1").await }
        }),
        tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire("T1").await }
        }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    let ids: HashSet<String> = [&a, &b]
        .iter()
        .map(|s| s.session_id().unwrap().to_string())
        .collect();
    assert_eq!(ids, HashSet::from(["S1".to_string(), "S2".to_string()]));
    assert_eq!(u8::from(a.is_resumed()) + u8::from(b.is_resumed()), 1);
    assert_eq!(pool.idle_count("T1"), 0);

    drop(a);
    drop(b);
    assert_eq!(pool.idle_count("T1"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distinct_targets_establish_in_parallel() {
    let delay = Duration::from_millis(200);
    let server = MockOlapServer::builder().with_open_delay(delay).build();
    let pool = pool_for(&server);
    let targets = TestTarget::catalogs("olap01", 8);

    let start = Instant::now();
    let tasks: Vec<_> = targets
        .iter()
        .cloned()
        .map(|target| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(target).await })
        })
        .collect();
    let mut sessions = Vec::new();
    for task in tasks {
        sessions.push(task.await.unwrap().unwrap());
    }
    let elapsed = start.elapsed();

    // Serialized establishment would take 8 * 200ms.
    assert!(elapsed < delay * 4, "establishment was serialized: {elapsed:?}");
    assert_eq!(pool.status().targets, 8);
    assert_eq!(pool.status().checked_out, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_double_checkout_under_contention() {
    let server = MockOlapServer::new();
    let pool = pool_for(&server);
    let held: Arc<Mutex<HashSet<SessionId>>> = Arc::new(Mutex::new(HashSet::new()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            tokio::spawn(async move {
                for i in 0..50 {
                    let mut session = pool.acquire("T1").await.unwrap();
                    let id = session.session_id().cloned().unwrap();
                    assert!(!pool.is_idle("T1", &id), "checked-out session {id} is idle");
                    assert!(held.lock().insert(id.clone()), "session {id} handed out twice");

                    tokio::task::yield_now().await;
                    if i % 7 == 0 {
                        session.mark_broken();
                    }

                    held.lock().remove(&id);
                    drop(session);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let status = pool.status();
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.created + status.resumed, 400);
    assert_eq!(status.reclaimed + status.discarded, 400);
    assert_eq!(status.idle as u64, status.reclaimed - status.resumed);
}

// =============================================================================
// Process-wide pool
// =============================================================================

#[tokio::test]
async fn test_global_pool_initialized_once() {
    let pool = SessionPool::<MockConnectionFactory>::global();
    assert!(std::ptr::eq(pool, SessionPool::<MockConnectionFactory>::global()));

    let target = "Data Source=global-test;";
    pool.acquire(target).await.unwrap().release();

    let again = SessionPool::<MockConnectionFactory>::global()
        .acquire(target)
        .await
        .unwrap();
    assert!(again.is_resumed());
}
