//! End-to-end tests driving the duplex pipeline through its public API
//! against an in-process mock transport — no real socket involved.

use std::time::Duration;

use serde_json::Value;
use surreal_ws_rpc::{Client, ClientConfig};
use surreal_ws_rpc::error::ClientError;
use surreal_ws_rpc::transport::ReadOutcome;
use surreal_ws_rpc::transport::mock::mock_pair;

async fn open_mocked(client: &Client) -> (
    tokio::sync::mpsc::UnboundedReceiver<surreal_ws_rpc::transport::OutboundFrame>,
    tokio::sync::mpsc::UnboundedSender<ReadOutcome>,
) {
    let (sink, source, out_rx, in_tx) = mock_pair();
    client
        .open_with_mock_transport(Box::new(sink), Box::new(source))
        .await
        .unwrap();
    (out_rx, in_tx)
}

fn sent_request_id(out_rx_frame: surreal_ws_rpc::transport::OutboundFrame) -> (String, Value) {
    let surreal_ws_rpc::transport::OutboundFrame::Text(json) = out_rx_frame else {
        panic!("expected a text frame");
    };
    let request: Value = serde_json::from_str(&json).unwrap();
    let id = request["id"].as_str().unwrap().to_string();
    (id, request)
}

#[tokio::test]
async fn echo_request_response() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let send = tokio::spawn(async move { client.send("ping", vec![]).await });

    let (id, _request) = sent_request_id(out_rx.recv().await.unwrap());
    let reply = serde_json::json!({ "id": id, "result": 42 }).to_string();
    in_tx
        .send(ReadOutcome::Frame { data: reply.into_bytes(), end_of_message: true })
        .unwrap();

    let response = send.await.unwrap().unwrap();
    assert_eq!(response.id.as_str(), id);
    assert!(response.error.is_none());
    assert_eq!(response.result, Value::from(42));
}

#[tokio::test]
async fn unknown_method_error() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let send = tokio::spawn(async move { client.send("nope", vec![]).await });

    let (id, _request) = sent_request_id(out_rx.recv().await.unwrap());
    let reply = serde_json::json!({
        "id": id,
        "error": { "code": -32601, "message": "not found" }
    })
    .to_string();
    in_tx
        .send(ReadOutcome::Frame { data: reply.into_bytes(), end_of_message: true })
        .unwrap();

    let response = send.await.unwrap().unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert_eq!(error.message.as_deref(), Some("not found"));
}

#[tokio::test]
async fn unsolicited_notify_is_dropped_silently() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let send = tokio::spawn(async move { client.send("ping", vec![]).await });
    let (id, _request) = sent_request_id(out_rx.recv().await.unwrap());

    let stray = serde_json::json!({
        "id": "zzz",
        "method": "live.update",
        "params": [1, 2, 3]
    })
    .to_string();
    in_tx
        .send(ReadOutcome::Frame { data: stray.into_bytes(), end_of_message: true })
        .unwrap();

    let reply = serde_json::json!({ "id": id, "result": "ok" }).to_string();
    in_tx
        .send(ReadOutcome::Frame { data: reply.into_bytes(), end_of_message: true })
        .unwrap();

    let response = send.await.unwrap().unwrap();
    assert_eq!(response.result, Value::from("ok"));
}

#[tokio::test]
async fn notify_shaped_reply_to_a_response_waiter_fails_with_expected_response_got_notify() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let send = tokio::spawn(async move { client.send("ping", vec![]).await });
    let (id, _request) = sent_request_id(out_rx.recv().await.unwrap());

    let notify = serde_json::json!({
        "id": id,
        "method": "live.update",
        "params": []
    })
    .to_string();
    in_tx
        .send(ReadOutcome::Frame { data: notify.into_bytes(), end_of_message: true })
        .unwrap();

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::ExpectedResponseGotNotify));
}

#[tokio::test]
async fn close_during_a_pending_send_cancels_it_and_rejects_further_sends() {
    let client = Client::with_defaults();
    let (mut out_rx, _in_tx) = open_mocked(&client).await;
    let cancel = tokio_util::sync::CancellationToken::new();

    let cancel_for_send = cancel.clone();
    let send = tokio::spawn(async move {
        client
            .send_cancelable("ping", vec![], cancel_for_send)
            .await
    });

    let _outbound = out_rx.recv().await.unwrap();
    cancel.cancel();

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Canceled));
}

#[tokio::test]
async fn message_spanning_many_frames_reassembles_in_order() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let send = tokio::spawn(async move { client.send("ping", vec![]).await });
    let (id, _request) = sent_request_id(out_rx.recv().await.unwrap());

    let reply = serde_json::json!({ "id": id, "result": "a-fairly-long-result-value" }).to_string();
    let bytes = reply.into_bytes();
    let chunk = (bytes.len() / 4).max(1);
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + chunk).min(bytes.len());
        let end_of_message = end == bytes.len();
        in_tx
            .send(ReadOutcome::Frame { data: bytes[offset..end].to_vec(), end_of_message })
            .unwrap();
        offset = end;
    }

    let response = send.await.unwrap().unwrap();
    assert_eq!(response.result, Value::from("a-fairly-long-result-value"));
}

#[tokio::test]
async fn subscription_style_waiter_receives_repeated_notifications() {
    let client = Client::with_defaults();
    let (mut out_rx, in_tx) = open_mocked(&client).await;

    let (sub_id, mut rx) = client.subscribe("live.select", vec![]).await.unwrap();
    let _outbound = out_rx.recv().await.unwrap();

    for i in 0..3 {
        let notify = serde_json::json!({
            "id": sub_id.as_str(),
            "method": "live.update",
            "params": [i]
        })
        .to_string();
        in_tx
            .send(ReadOutcome::Frame { data: notify.into_bytes(), end_of_message: true })
            .unwrap();
    }

    for i in 0..3 {
        let reader = rx.recv().await.unwrap();
        let notify = surreal_ws_rpc::client::decode_notify(&reader).await.unwrap();
        assert_eq!(notify.params[0], Value::from(i));
    }
}

#[tokio::test]
async fn abandoned_waiter_is_evicted_after_its_sliding_expiration() {
    let config = ClientConfig::default()
        .with_cache_sliding_expiration(Duration::from_millis(20))
        .with_cache_eviction_interval(Duration::from_millis(10));
    let client = Client::new(config);
    let (mut out_rx, _in_tx) = open_mocked(&client).await;

    // Nothing ever replies to this request's id, so its waiter sits
    // unregistered-from-use until the sweep evicts it.
    let send = tokio::spawn(async move { client.send("ping", vec![]).await });
    let _outbound = out_rx.recv().await.unwrap();

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}
