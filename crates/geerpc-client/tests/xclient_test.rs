//! Multi-server client tests: discovery-based calls and broadcast.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use geerpc_client::{MultiServersDiscovery, SelectMode, XClient};
use geerpc_common::Options;
use geerpc_server::{Server, Service};

/// Starts a server whose `Job.Run` behavior is chosen per test, plus a
/// `Who.Am` method answering with the server's tag.
async fn start_server(
    tag: &str,
    run: impl Fn(i64, &mut i64) -> Result<(), String> + Send + Sync + 'static,
) -> String {
    let tag = tag.to_string();
    let server = Arc::new(Server::new());
    server
        .register(
            Service::builder("Job")
                .method("Run", run)
                .build()
                .unwrap(),
        )
        .unwrap();
    server
        .register(
            Service::builder("Who")
                .method("Am", move |_args: i64, reply: &mut String| -> Result<(), String> {
                    *reply = tag.clone();
                    Ok(())
                })
                .build()
                .unwrap(),
        )
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.accept(listener));
    format!("tcp@{}", addr)
}

#[tokio::test]
async fn test_round_robin_call_visits_both_servers() {
    let addr_a = start_server("a", |_, reply| {
        *reply = 0;
        Ok(())
    })
    .await;
    let addr_b = start_server("b", |_, reply| {
        *reply = 0;
        Ok(())
    })
    .await;

    let discovery = MultiServersDiscovery::new(vec![addr_a, addr_b]);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let tag: String = xclient.call("Who.Am", &0i64).await.unwrap();
        seen.insert(tag);
    }
    assert_eq!(seen.len(), 2, "round robin alternates between servers");
}

#[tokio::test]
async fn test_broadcast_returns_first_reply_and_first_error() {
    // A answers quickly; B fails after a delay, so the success is already
    // recorded when the error lands.
    let addr_a = start_server("a", |_, reply| {
        *reply = 7;
        Ok(())
    })
    .await;
    let addr_b = start_server("b", |_, _| {
        std::thread::sleep(Duration::from_millis(300));
        Err("node down".to_string())
    })
    .await;

    let discovery = MultiServersDiscovery::new(vec![addr_a, addr_b]);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let mut reply = 0i64;
    let err = xclient
        .broadcast("Job.Run", &1i64, &mut reply)
        .await
        .unwrap_err();
    assert_eq!(reply, 7, "the successful reply survives the sibling error");
    assert!(
        err.to_string().contains("node down"),
        "the first error is retained, got: {}",
        err
    );
}

#[tokio::test]
async fn test_broadcast_all_success() {
    let addr_a = start_server("a", |args, reply| {
        *reply = args * 2;
        Ok(())
    })
    .await;
    let addr_b = start_server("b", |args, reply| {
        *reply = args * 2;
        Ok(())
    })
    .await;

    let discovery = MultiServersDiscovery::new(vec![addr_a, addr_b]);
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let mut reply = 0i64;
    xclient.broadcast("Job.Run", &21i64, &mut reply).await.unwrap();
    assert_eq!(reply, 42);
}

#[tokio::test]
async fn test_broadcast_error_aborts_siblings_early() {
    // The sibling sleeps far longer than the failing server takes to err;
    // the cancellation scope must end the broadcast well before the
    // sibling's natural completion.
    let slow = start_server("slow", |_, reply| {
        std::thread::sleep(Duration::from_secs(2));
        *reply = 1;
        Ok(())
    })
    .await;
    let failing = start_server("failing", |_, _| Err("instant failure".to_string())).await;

    let discovery = MultiServersDiscovery::new(vec![slow, failing]);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let started = std::time::Instant::now();
    let mut reply = 0i64;
    let err = xclient
        .broadcast("Job.Run", &1i64, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("instant failure"), "got: {}", err);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "siblings abort instead of running to completion"
    );
}

#[tokio::test]
async fn test_cached_client_is_reused_while_available() {
    let addr = start_server("a", |_, reply| {
        *reply = 1;
        Ok(())
    })
    .await;

    let discovery = MultiServersDiscovery::new(vec![addr]);
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    for _ in 0..3 {
        let tag: String = xclient.call("Who.Am", &0i64).await.unwrap();
        assert_eq!(tag, "a");
    }
    xclient.close().await;
}
