//! Fragmentation Tests - Large stub data over small fragments
//!
//! These tests push catalog listings far larger than one fragment:
//! - Responses split across many fragments
//! - Requests split across many fragments
//! - Fragment size negotiation at bind
//! - Large calls running concurrently on one connection

use futures::future::join_all;
use integration_tests::*;
use msrpc_dcerpc::{CallOptions, Conn, ConnConfig, DceRpcServerConfig};
use std::time::Instant;

const SMALL_FRAG: u16 = 1024;

fn small_frag_server() -> DceRpcServerConfig {
    DceRpcServerConfig {
        max_xmit_frag: SMALL_FRAG,
        max_recv_frag: SMALL_FRAG,
        ..Default::default()
    }
}

fn small_frag_client() -> ConnConfig {
    ConnConfig::new()
        .max_xmit_frag(SMALL_FRAG)
        .max_recv_frag(SMALL_FRAG)
}

async fn list(conn: &Conn, query: ModuleQuery) -> ListModulesResponse {
    conn.call(ListModulesRequest(query), &CallOptions::new())
        .await
        .unwrap()
}

fn assert_listing(list: &ModuleList, path: &str, limit: u32) {
    assert_eq!(list.modules_count, limit);
    let modules = list.modules.as_ref().expect("modules");
    let flags = list.module_flags.as_ref().expect("module flags");
    assert_eq!(modules.len(), limit as usize);
    assert_eq!(flags.len(), limit as usize);
    for (i, (module, flag)) in modules.iter().zip(flags).enumerate() {
        assert_eq!(module, &module_name(path, i as u32));
        assert_eq!(*flag, i as u32);
    }
}

/// Test: A response of ~100 KB arrives intact over 1 KB fragments
#[tokio::test]
async fn test_large_response_over_small_fragments() {
    init_logging();

    let (server, service) = catalog_server(small_frag_server()).await;
    let mut conn = connect_in_memory(&server, small_frag_client());
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();

    let start = Instant::now();
    let response = list(&conn, ModuleQuery::new("C:\\big", 2000)).await;
    println!("2000-module listing took {:?}", start.elapsed());

    assert_listing(&response.0, "C:\\big", 2000);
    assert_eq!(service.calls(), 1);
    assert_eq!(server.stats().snapshot().requests_processed, 1);
}

/// Test: A request whose path alone spans dozens of fragments
#[tokio::test]
async fn test_large_request_over_small_fragments() {
    init_logging();

    let (server, _service) = catalog_server(small_frag_server()).await;
    let mut conn = connect_in_memory(&server, small_frag_client());
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();

    let path: String = std::iter::repeat("segment\\").take(2500).collect();
    let response = list(&conn, ModuleQuery::new(path.clone(), 3)).await;
    assert_listing(&response.0, &path, 3);
    assert!(server.stats().snapshot().bytes_received > 40_000);
}

/// Test: The client sends no fragment larger than the server accepts
#[tokio::test]
async fn test_fragment_size_negotiated_at_bind() {
    init_logging();

    let (server, _service) = catalog_server(small_frag_server()).await;
    let mut conn = connect_in_memory(&server, ConnConfig::new().max_xmit_frag(8192));
    assert_eq!(conn.max_xmit_frag(), 8192);
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();
    assert_eq!(conn.max_xmit_frag(), SMALL_FRAG);

    let path: String = std::iter::repeat('p').take(6000).collect();
    let response = list(&conn, ModuleQuery::new(path.clone(), 2)).await;
    assert_listing(&response.0, &path, 2);
}

/// Test: Fragmented calls in flight together do not mix their fragments
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fragmented_calls() {
    init_logging();

    const CALLS: u32 = 8;

    let (server, service) = catalog_server(small_frag_server()).await;
    let mut conn = connect_in_memory(&server, small_frag_client());
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();

    let calls = (0..CALLS).map(|i| {
        let conn = conn.clone();
        async move {
            let path = format!("C:\\call{}", i);
            let limit = 200 + i * 50;
            let response = list(&conn, ModuleQuery::new(path.clone(), limit)).await;
            (path, limit, response)
        }
    });
    for (path, limit, response) in join_all(calls).await {
        assert_listing(&response.0, &path, limit);
    }
    assert_eq!(service.calls(), u64::from(CALLS));
}

/// Test: Large listings over a real TCP connection
#[tokio::test]
async fn test_large_listing_over_tcp() {
    init_logging();

    let (server, _service) = catalog_server(small_frag_server()).await;
    let running = RunningServer::start(server).await.unwrap();

    let mut conn = Conn::connect(running.addr, small_frag_client()).await.unwrap();
    conn.bind(&[CATALOG_SYNTAX]).await.unwrap();
    let response = list(&conn, ModuleQuery::new("D:\\tcp", 1500)).await;
    assert_listing(&response.0, "D:\\tcp", 1500);

    conn.close().await.unwrap();
    running.stop().await;
}
