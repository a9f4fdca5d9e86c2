//! Session pooling example.
//!
//! This example runs the pool against the in-process mock OLAP server and
//! shows session recycling, broken-session eviction and pool status.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=mdx_session_pool=debug cargo run --example session_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use mdx_session_pool::{PoolError, SessionPool};
use mdx_testing::{MockConnectionFactory, MockOlapServer, TestTarget};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server = MockOlapServer::builder()
        .with_name("olap01")
        .with_open_delay(Duration::from_millis(50))
        .build();
    let target = TestTarget::new("olap01")
        .with_catalog("Adventure Works DW")
        .connection_string();

    println!("=== OLAP Session Pool Example ===\n");

    let pool = SessionPool::builder(server.factory())
        .max_idle_per_target(8)
        .build()?;

    // Example 1: Fresh session, then recycled
    println!("1. Recycling:");
    {
        let mut session = pool.acquire(target.as_str()).await?;
        session.execute("SELECT [Measures].[Sales Amount] ON 0 FROM [Adventure Works]").await?;
        println!("  first checkout:  {:?} (resumed: {})", session.session_id(), session.is_resumed());
        // Session returned to the pool when dropped
    }
    {
        let session = pool.acquire(target.as_str()).await?;
        println!("  second checkout: {:?} (resumed: {})", session.session_id(), session.is_resumed());
    }

    // Example 2: Broken sessions are evicted
    println!("\n2. Broken-session eviction:");
    server.fail_next_queries(1);
    {
        let mut session = pool.acquire(target.as_str()).await?;
        if let Err(e) = session.execute("SELECT FROM [Adventure Works]").await {
            println!("  query failed ({e}), marking session broken");
            session.mark_broken();
        }
    }
    println!("  idle sessions after eviction: {}", pool.idle_count(&target));

    // Example 3: Concurrent usage
    println!("\n3. Concurrent usage (10 parallel checkouts):");
    let start = Instant::now();
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let pool = pool.clone();
            let target = target.clone();
            tokio::spawn(async move {
                let mut session = pool.acquire(target).await?;
                session.execute(&format!("SELECT {i}")).await.ok();
                Ok::<_, PoolError>(session.is_resumed())
            })
        })
        .collect();
    let mut resumed = 0;
    for handle in handles {
        if handle.await?? {
            resumed += 1;
        }
    }
    println!("  completed in {:?}, {resumed} resumed", start.elapsed());

    print_pool_status(&pool, &server);
    Ok(())
}

fn print_pool_status(pool: &SessionPool<MockConnectionFactory>, server: &MockOlapServer) {
    let status = pool.status();
    println!("\nPool status:");
    println!("  Targets:     {}", status.targets);
    println!("  Idle:        {}", status.idle);
    println!("  Checked out: {}", status.checked_out);
    println!("  Created:     {}", status.created);
    println!("  Resumed:     {}", status.resumed);
    println!("  Reclaimed:   {}", status.reclaimed);
    println!("  Discarded:   {}", status.discarded);
    println!("Server ({}): {} live sessions", server.name(), server.live_sessions());
}
