//! # mdx-testing
//!
//! Test infrastructure for the OLAP session pool.
//!
//! This crate provides an in-process mock OLAP server and a matching
//! connection type implementing the pool's connection contract, so that
//! pooling behavior can be tested without a real server.
//!
//! ## Features
//!
//! - Mock server issuing and tracking session identities
//! - Fault injection for establishment, close and query paths
//! - Connection factory ready to plug into `SessionPool`
//! - Connection-target fixtures
//!
//! ## Example
//!
//! ```rust,ignore
//! use mdx_session_pool::SessionPool;
//! use mdx_testing::{MockOlapServer, TestTarget};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockOlapServer::new();
//!     let pool = SessionPool::new(server.factory());
//!     let target = TestTarget::default().connection_string();
//!
//!     let mut session = pool.acquire(target.as_str()).await.unwrap();
//!     session.execute("SELECT FROM [Adventure Works]").await.unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;

pub use fixtures::TestTarget;
pub use mock_server::{
    MockConnection, MockConnectionFactory, MockError, MockOlapServer, MockServerBuilder,
};
