//! Stress Tests - Concurrent calls at scale
//!
//! These tests look for cross-call interference under load:
//! - Many tasks sharing one connection
//! - Many clients against one server
//! - Context negotiation while calls are in flight
//!
//! Every call checks that its response is the listing for its own request,
//! so a response routed to the wrong caller or decoded with another call's
//! referent state shows up as a mismatch.

use futures::future::join_all;
use integration_tests::*;
use msrpc_dcerpc::{
    CallOptions, Conn, ConnConfig, DceRpcServerConfig, ServerHandle, SyntaxId, Uuid,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

/// Outcome counters shared by the tasks of one test
#[derive(Debug, Default)]
struct CallStats {
    success: AtomicU64,
    mismatch: AtomicU64,
    failure: AtomicU64,
}

impl CallStats {
    async fn run(&self, conn: &Conn, path: String, limit: u32) {
        let query = ModuleQuery::new(path, limit);
        let expected = catalog_listing(&query);
        match conn
            .call::<_, ListModulesResponse>(ListModulesRequest(query), &CallOptions::new())
            .await
        {
            Ok(response) if response.0.modules == expected.modules => {
                self.success.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.mismatch.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                eprintln!("call failed: {}", e);
                self.failure.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn report(&self, name: &str, expected: u64, elapsed: Duration) {
        let success = self.success.load(Ordering::Relaxed);
        println!("\n=== {} ===", name);
        println!("Expected: {}", expected);
        println!("Successful: {}", success);
        println!("Mismatched: {}", self.mismatch.load(Ordering::Relaxed));
        println!("Failed: {}", self.failure.load(Ordering::Relaxed));
        println!(
            "Throughput: {:.0} calls/sec",
            success as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
        assert_eq!(self.mismatch.load(Ordering::Relaxed), 0);
        assert_eq!(self.failure.load(Ordering::Relaxed), 0);
        assert_eq!(success, expected);
    }
}

/// Test: Many tasks invoking concurrently over one connection
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_calls_share_one_connection() {
    init_logging();

    const TASKS: usize = 64;
    const CALLS_PER_TASK: usize = 20;

    let (server, service) = catalog_server(DceRpcServerConfig::default()).await;
    let mut conn = connect_in_memory(&server, ConnConfig::default());
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();

    let stats = Arc::new(CallStats::default());
    let start = Instant::now();
    let tasks = (0..TASKS).map(|task| {
        let conn = conn.clone();
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            for call in 0..CALLS_PER_TASK {
                let path = format!("T{}\\C{}", task, call);
                stats.run(&conn, path, (task % 7 + call % 5) as u32).await;
            }
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let expected = (TASKS * CALLS_PER_TASK) as u64;
    stats.report("One connection, many tasks", expected, start.elapsed());
    assert_eq!(service.calls(), expected);
    assert_eq!(server.stats().snapshot().requests_processed, expected);
}

/// Test: Many clients, each with its own TCP connection
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_clients_over_tcp() {
    init_logging();

    const CLIENTS: usize = 24;
    const CALLS_PER_CLIENT: usize = 25;

    let (server, service) = catalog_server(DceRpcServerConfig::default()).await;
    let running = RunningServer::start(Arc::clone(&server)).await.unwrap();
    let addr = running.addr;

    let stats = Arc::new(CallStats::default());
    let barrier = Arc::new(Barrier::new(CLIENTS));
    let start = Instant::now();
    let clients = (0..CLIENTS).map(|client| {
        let stats = Arc::clone(&stats);
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            let mut conn = Conn::connect(addr, ConnConfig::default()).await.unwrap();
            conn.bind(&[CATALOG_SYNTAX]).await.unwrap();
            barrier.wait().await;
            for call in 0..CALLS_PER_CLIENT {
                let path = format!("client{}\\{}", client, call);
                stats.run(&conn, path, (call % 9) as u32).await;
            }
            conn.close().await.unwrap();
        })
    });
    for result in join_all(clients).await {
        result.unwrap();
    }

    let expected = (CLIENTS * CALLS_PER_CLIENT) as u64;
    stats.report("Many clients over TCP", expected, start.elapsed());
    assert_eq!(service.calls(), expected);
    assert_eq!(
        server.stats().snapshot().connections_accepted,
        CLIENTS as u64
    );
    running.stop().await;
}

/// Test: Adding a presentation context while calls run on the first one
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alter_context_during_calls() {
    init_logging();

    const BACKGROUND_CALLS: usize = 200;

    let mirror_syntax = SyntaxId::new(
        Uuid::parse("6b5dc2e3-3a41-4c8e-9f12-005056c00008").unwrap(),
        1,
        0,
    );
    let (server, primary) = catalog_server(DceRpcServerConfig::default()).await;
    let mirror = Arc::new(CatalogService::default());
    server
        .register(mirror_syntax, Arc::clone(&mirror) as Arc<dyn ServerHandle>)
        .await;

    let mut conn = connect_in_memory(&server, ConnConfig::default());
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();

    let stats = Arc::new(CallStats::default());
    let start = Instant::now();
    let background = {
        let conn = conn.clone();
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            for call in 0..BACKGROUND_CALLS {
                stats.run(&conn, format!("bg{}", call), 4).await;
            }
        })
    };

    let sub = conn.sub_conn(mirror_syntax).await.unwrap();
    assert_eq!(sub.scope(), Some(mirror_syntax));
    let sub_calls = (0..20).map(|i| {
        let sub = sub.clone();
        let stats = Arc::clone(&stats);
        async move { stats.run(&sub, format!("mirror{}", i), 2).await }
    });
    join_all(sub_calls).await;
    background.await.unwrap();

    stats.report(
        "Alter context under load",
        (BACKGROUND_CALLS + 20) as u64,
        start.elapsed(),
    );
    assert_eq!(primary.calls(), BACKGROUND_CALLS as u64);
    assert_eq!(mirror.calls(), 20);
    assert_eq!(conn.scope(), Some(CATALOG_SYNTAX));
}
