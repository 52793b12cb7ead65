//! Start/stop semantics of the tracker service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use peer_tracker::net::ListenerError;
use peer_tracker::{LifecycleError, MemoryRegistry, TrackerService};
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn test_stop_without_start_and_twice() {
    let service = TrackerService::new(common::test_config(), Arc::new(MemoryRegistry::new(None)));
    service.stop().await;
    assert!(!service.is_running().await);

    service.start().await.unwrap();
    service.stop().await;
    service.stop().await;
    assert!(!service.is_running().await);
}

#[tokio::test]
async fn test_port_released_after_stop() {
    let (service, addr, _) = common::start_memory_tracker(common::test_config()).await;
    service.stop().await;

    assert!(TcpStream::connect(addr).await.is_err());
    let rebound = std::net::TcpListener::bind(addr).expect("port should be free after stop");
    drop(rebound);
}

#[tokio::test]
async fn test_restart_on_same_port() {
    let (service, addr, _) = common::start_memory_tracker(common::test_config()).await;
    service.stop().await;

    let mut config = common::test_config();
    config.listener.bind_address = addr.to_string();
    let restarted = TrackerService::new(config, Arc::new(MemoryRegistry::new(None)));
    assert_eq!(restarted.start().await.unwrap(), addr);

    let res = common::client().get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    restarted.stop().await;
}

#[tokio::test]
async fn test_bind_conflict_is_fatal_to_start() {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = common::test_config();
    config.listener.bind_address = blocker.local_addr().unwrap().to_string();

    let service = TrackerService::new(config, Arc::new(MemoryRegistry::new(None)));
    let err = service.start().await.unwrap_err();

    assert!(matches!(err, LifecycleError::Bind(ListenerError::Bind { .. })));
    assert!(!service.is_running().await);
}

#[tokio::test]
async fn test_stop_drains_in_flight_requests() {
    let registry = Arc::new(common::InstrumentedRegistry::slow(Duration::from_millis(500)));
    let (service, addr) = common::start_tracker(common::test_config(), registry).await;

    let request = tokio::spawn(async move {
        common::client()
            .get(format!("http://{}/nodes/1", addr))
            .send()
            .await
            .map(|res| res.status())
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    service.stop().await;
    assert_eq!(request.await.unwrap().unwrap(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_aborts_after_drain_deadline() {
    let mut config = common::test_config();
    config.shutdown.drain_timeout_secs = 1;
    let registry = Arc::new(common::InstrumentedRegistry::slow(Duration::from_secs(30)));
    let (service, addr) = common::start_tracker(config, registry).await;

    let request = tokio::spawn(async move {
        common::client().get(format!("http://{}/nodes/1", addr)).send().await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    service.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn test_stop_closes_idle_keep_alive_connections() {
    let (service, addr, _) = common::start_memory_tracker(common::test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).contains("connection: keep-alive"));

    let started = Instant::now();
    service.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
}

#[tokio::test]
async fn test_same_service_restarts_and_keeps_rate_table() {
    let mut config = common::test_config();
    config.rate_limit.threshold = 1;
    let (service, addr, _) = common::start_memory_tracker(config).await;

    let res = common::client().get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    service.stop().await;

    let addr = service.start().await.unwrap();
    let res = common::client().get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    service.stop().await;
}

#[tokio::test]
async fn test_stop_finishes_partly_received_request() {
    let (service, addr, registry) = common::start_memory_tracker(common::test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"PUT /nodes/1 HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"port\"",
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let finish = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stream.write_all(b":4000}").await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    };
    let ((), response) = tokio::join!(service.stop(), finish);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert_eq!(registry.len(), 1);
}
