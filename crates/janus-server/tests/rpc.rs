//! RPC supervision through real listeners, over gRPC.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{config, rpc_client, start, widgets, GetWidget, Widget};
use janus_server::rpc::{Code, RpcClient, RpcMethod, Status};
use tonic::Request;
use janus_server::supervise::PANIC_STATUS_MESSAGE;
use janus_server::{RpcContext, ServiceDescriptor};
use serde_json::Value;

#[tokio::test]
async fn test_rpc_success() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let widget: Widget = client.call_json("GetWidget", &GetWidget { id: 42 }).await.unwrap();
    assert_eq!(widget, Widget { id: 42 });

    let record = server.metrics().lookup("rpc.GetWidget").unwrap();
    assert_eq!(record.success_count(), 1);
    assert_eq!(record.error_count(), 0);
    assert_eq!(record.latency().count(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_rpc_error_counts_error() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let status = client
        .call_json::<_, Widget>("GetWidget", &GetWidget { id: 0 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "no widget 0");

    let record = server.metrics().lookup("rpc.GetWidget").unwrap();
    assert_eq!(record.error_count(), 1);
    assert_eq!(record.success_count(), 0);
    assert_eq!(record.latency().count(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_rpc_panic_is_isolated() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let status = client
        .call_json::<_, Widget>("GetWidget", &GetWidget { id: 13 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), PANIC_STATUS_MESSAGE);

    let record = server.metrics().lookup("rpc.GetWidget").unwrap();
    assert_eq!(record.panic_count(), 1);
    assert_eq!(server.metrics().panic_count(), 1);

    // The connection and the method keep working.
    let widget: Widget = client.call_json("GetWidget", &GetWidget { id: 5 }).await.unwrap();
    assert_eq!(widget.id, 5);
    assert_eq!(server.activity().count(), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let status = client.call("Missing", Bytes::new()).await.unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    assert!(!server.metrics().contains("rpc.Missing"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_interceptor_rejects_call() {
    let config = config()
        .rpc_interceptor(|request: Request<()>| {
            if request.metadata().contains_key("authorization") {
                Ok(request)
            } else {
                Err(Status::unauthenticated("missing authorization"))
            }
        })
        .build();
    let server = start(config, vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let status = client.call("Sleep", Bytes::from_static(b"1")).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "missing authorization");
    assert_eq!(server.activity().count(), 0);

    let mut metadata = BTreeMap::new();
    metadata.insert("authorization".to_string(), "token".to_string());
    let out = client
        .call_with_metadata("Sleep", metadata, Bytes::from_static(b"1"))
        .await
        .unwrap();
    assert_eq!(out.as_ref(), b"1");

    // Rejected calls never reach the method, so only the second is recorded.
    let record = server.metrics().lookup("rpc.Sleep").unwrap();
    assert_eq!(record.error_count(), 0);
    assert_eq!(record.success_count(), 1);
    assert_eq!(record.latency().count(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_compression_round_trip() {
    let server = start(config().rpc_compression(true).build(), vec![widgets()]).await;
    let client = rpc_client(&server).await.with_compression(true);

    let widget: Widget = client.call_json("GetWidget", &GetWidget { id: 9 }).await.unwrap();
    assert_eq!(widget.id, 9);

    // Callers that do not compress are still served.
    let plain = rpc_client(&server).await;
    let widget: Widget = plain.call_json("GetWidget", &GetWidget { id: 10 }).await.unwrap();
    assert_eq!(widget.id, 10);
    assert_eq!(server.metrics().lookup("rpc.GetWidget").unwrap().success_count(), 2);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_metadata_reaches_access_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpc.log");
    let server = start(config().rpc_access_log(&path).build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let mut metadata = BTreeMap::new();
    metadata.insert("tenant".to_string(), "acme".to_string());
    let payload = Bytes::from(serde_json::to_vec(&GetWidget { id: 0 }).unwrap());
    let _ = client.call_with_metadata("GetWidget", metadata, payload).await;
    server.stop().await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let entry: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["msg"], "access");
    assert_eq!(entry["name"], "rpc.GetWidget");
    assert_eq!(entry["tenant"], "acme");
    assert_eq!(entry["error"], "NotFound: no widget 0");
    assert!(entry["duration_ms"].is_number());
}

#[tokio::test]
async fn test_max_concurrent_streams_serializes_calls() {
    let config = config().rpc_max_concurrent_streams(Some(1)).build();
    let server = start(config, vec![widgets()]).await;
    let client = Arc::new(rpc_client(&server).await);
    // Settle the connection so the stream limit is known to the client.
    client.call("Sleep", Bytes::from_static(b"0")).await.unwrap();

    let started = Instant::now();
    let calls: Vec<_> = (0..2)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("Sleep", Bytes::from_static(b"150")).await })
        })
        .collect();
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(300));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_calls_are_multiplexed() {
    let server = start(config().build(), vec![widgets()]).await;
    let client = Arc::new(rpc_client(&server).await);

    // Id 13 panics in the fixture.
    let ids: Vec<u64> = (1..=50).filter(|&id| id != 13).collect();
    let calls: Vec<_> = ids
        .iter()
        .map(|&id| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let widget: Widget = client.call_json("GetWidget", &GetWidget { id }).await.unwrap();
                assert_eq!(widget.id, id);
            })
        })
        .collect();
    for call in calls {
        call.await.unwrap();
    }

    let record = server.metrics().lookup("rpc.GetWidget").unwrap();
    assert_eq!(record.success_count(), 49);
    assert_eq!(record.panic_count(), 0);
    assert_eq!(server.activity().count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_raw_method_sees_context() {
    let echo = ServiceDescriptor::new("").rpc(RpcMethod::raw("Echo", |ctx: RpcContext, payload| async move {
        if ctx.remote_addr().is_none() {
            return Err(Status::failed_precondition("no peer address"));
        }
        // Only caller metadata, no transport headers.
        let keys: Vec<&str> = ctx.metadata().keys().map(String::as_str).collect();
        let mut out = keys.join(",").into_bytes();
        out.push(b':');
        out.extend_from_slice(&payload);
        Ok(Bytes::from(out))
    }));
    let server = start(config().build(), vec![echo]).await;
    let client = RpcClient::connect(server.rpc_addr().unwrap()).await.unwrap();

    let mut metadata = BTreeMap::new();
    metadata.insert("tenant".to_string(), "acme".to_string());
    let out = client
        .call_with_metadata("Echo", metadata, Bytes::from_static(b"hi"))
        .await
        .unwrap();
    assert_eq!(out.as_ref(), b"tenant:hi");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_message_rejected_before_method() {
    let server = start(config().rpc_max_message_bytes(64).build(), vec![widgets()]).await;
    let client = rpc_client(&server).await;

    let status = client.call("Sleep", Bytes::from(vec![b'1'; 1024])).await.unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);

    let record = server.metrics().lookup("rpc.Sleep").unwrap();
    assert_eq!(record.success_count() + record.error_count(), 0);

    let slept = client.call("Sleep", Bytes::from_static(b"1")).await.unwrap();
    assert_eq!(slept.as_ref(), b"1");
    server.stop().await.unwrap();
}
