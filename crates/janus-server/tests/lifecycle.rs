//! Startup and graceful shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{config, eventually, get, http_client, rpc_client, start, url, widgets, HEALTH_PATH};
use http::StatusCode;
use janus_server::rpc::{Code, RpcClient};
use janus_server::{HealthConfig, LifecycleState, Server, ServerError};

#[tokio::test]
async fn test_stop_drains_in_flight_requests() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = http_client();

    let requests: Vec<_> = (0..200)
        .map(|_| {
            let request = client.get(url(&server, "/v1/sleep/1500")).send();
            tokio::spawn(async move { request.await.map(|r| r.status()) })
        })
        .collect();
    assert!(eventually(|| server.activity().count() == 200).await);

    server.stop().await.unwrap();
    assert_eq!(server.activity().count(), 0);
    assert_eq!(server.state(), LifecycleState::Stopped);

    for request in requests {
        assert_eq!(request.await.unwrap().unwrap(), StatusCode::OK);
    }
    let record = server.metrics().lookup("/v1/sleep/{ms}.GET").unwrap();
    assert_eq!(record.status_count("2xx"), 200);
}

#[tokio::test]
async fn test_listeners_closed_after_stop() {
    let server = start(config().build(), vec![widgets()]).await;
    let http_addr = server.http_addr().unwrap();
    let rpc_addr = server.rpc_addr().unwrap();

    server.stop().await.unwrap();

    assert!(http_client()
        .get(format!("http://{http_addr}/v1/widgets/1"))
        .send()
        .await
        .is_err());
    assert!(RpcClient::connect(rpc_addr).await.is_err());
}

#[tokio::test]
async fn test_stop_waits_for_rpc_drain() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = Arc::new(rpc_client(&server).await);

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("Sleep", Bytes::from_static(b"300")).await })
    };
    assert!(eventually(|| server.activity().count() == 1).await);

    server.stop().await.unwrap();
    assert_eq!(call.await.unwrap().unwrap().as_ref(), b"300");
    assert_eq!(server.metrics().lookup("rpc.Sleep").unwrap().success_count(), 1);
}

#[tokio::test]
async fn test_rpc_drain_timeout_cancels_calls() {
    let config = config()
        .health(HealthConfig::Simple {
            path: HEALTH_PATH.to_string(),
        })
        .rpc_drain_timeout(Duration::from_millis(100))
        .build();
    let server = start(config, vec![widgets()]).await;
    let client = Arc::new(rpc_client(&server).await);

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("Sleep", Bytes::from_static(b"10000")).await })
    };
    assert!(eventually(|| server.activity().count() == 1).await);

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .unwrap()
        .unwrap();

    let status = call.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Cancelled);
    assert_eq!(server.activity().count(), 0);
    assert_eq!(server.metrics().lookup("rpc.Sleep").unwrap().error_count(), 1);
}

#[tokio::test]
async fn test_cancelled_call_logs_elapsed_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc.log");
    let config = config()
        .health(HealthConfig::Simple {
            path: HEALTH_PATH.to_string(),
        })
        .rpc_drain_timeout(Duration::from_millis(200))
        .rpc_access_log(&path)
        .build();
    let server = start(config, vec![widgets()]).await;
    let client = Arc::new(rpc_client(&server).await);

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("Sleep", Bytes::from_static(b"10000")).await })
    };
    assert!(eventually(|| server.activity().count() == 1).await);

    server.stop().await.unwrap();
    assert_eq!(call.await.unwrap().unwrap_err().code(), Code::Cancelled);

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["name"], "rpc.Sleep");
    assert_eq!(lines[0]["error"], "Cancelled: server shutting down");
    assert!(lines[0]["duration_ms"].as_f64().unwrap() >= 200.0);
}

#[tokio::test]
async fn test_health_reports_draining_during_stop() {
    let config = config()
        .health(HealthConfig::Draining {
            path: HEALTH_PATH.to_string(),
            withdraw_delay: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(5),
        })
        .build();
    let server = Arc::new(start(config, vec![widgets()]).await);

    assert_eq!(get(&server, HEALTH_PATH).await.status(), StatusCode::OK);

    let stopping = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.stop().await })
    };
    assert!(eventually(|| server.state() == LifecycleState::Draining).await);

    let response = get(&server, HEALTH_PATH).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "draining\n");

    stopping.await.unwrap().unwrap();
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_second_stop_is_not_running() {
    let server = start(config().build(), vec![widgets()]).await;
    server.stop().await.unwrap();
    assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
}

#[tokio::test]
async fn test_bind_failure_is_returned() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let mut server = Server::new(config().http_addr(addr.clone()).build());
    let err = server.start().await.unwrap_err();
    match err {
        ServerError::Bind { protocol, addr: failed, .. } => {
            assert_eq!(protocol, "http");
            assert_eq!(failed, addr);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.state(), LifecycleState::Created);
}

#[tokio::test]
async fn test_records_exist_before_start() {
    let mut server = Server::new(config().build());
    server.register(widgets()).unwrap();

    assert_eq!(
        server.metrics().names(),
        vec![
            "/v1/sleep/{ms}.GET",
            "/v1/widgets/{id}.GET",
            "rpc.GetWidget",
            "rpc.Sleep",
        ]
    );
    assert_eq!(server.state(), LifecycleState::Created);
}

#[tokio::test]
async fn test_independent_servers_do_not_share_metrics() {
    let first = start(config().build(), vec![widgets()]).await;
    let second = start(config().build(), vec![widgets()]).await;

    get(&first, "/v1/widgets/1").await;

    let name = "/v1/widgets/{id}.GET";
    assert_eq!(first.metrics().lookup(name).unwrap().status_count("2xx"), 1);
    assert_eq!(second.metrics().lookup(name).unwrap().status_count("2xx"), 0);

    first.stop().await.unwrap();
    second.stop().await.unwrap();
}
