//! # mdx-session-pool
//!
//! Session pooling for OLAP (MDX/XMLA) client connections.
//!
//! Opening an OLAP session is expensive: the server authenticates the
//! caller, loads cube metadata and builds per-session caches. This crate
//! keeps sessions alive between logical connections. A released handle
//! closes its transport connection but leaves the remote session open,
//! and the next caller for the same connection target gets a new
//! transport bound to that session.
//!
//! ## Features
//!
//! - One idle queue per connection target, created on first use
//! - Two-tier locking: targets never contend on each other's queues
//! - Connection establishment outside of every lock
//! - Broken-session eviction driven by the caller
//! - Per-session extra data carried through recycling
//! - Return to the pool on drop, exactly once
//!
//! ## Example
//!
//! ```rust,ignore
//! use mdx_session_pool::{PoolConfig, SessionPool};
//!
//! let pool = SessionPool::builder(MyConnectionFactory::new())
//!     .max_idle_per_target(16)
//!     .build()?;
//!
//! let mut session = pool.acquire("Data Source=olap01;Catalog=Sales").await?;
//! if let Err(e) = session.execute(mdx).await {
//!     session.mark_broken();
//! }
//! // Session returned to the pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod extra;
pub mod lifecycle;
pub mod pool;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::PoolConfig;
pub use error::{BoxError, PoolError};
pub use extra::ExtraData;
pub use lifecycle::{
    ConnectionFactory, ConnectionState, ConnectionTarget, OlapConnection, SessionId, SessionInfo,
};
pub use pool::{PoolBuilder, PoolStatus, SessionPool};
pub use session::PooledSession;
