use std::time::Duration;

use anyhow::Result;
use mcp_test_support::DEFAULT_READ_TIMEOUT;
use mcp_test_support::add_tool_server;
use mcp_test_support::connect_pair;
use mcp_test_support::connect_to_script;
use mcp_test_support::test_client;
use mcp_types::JSONRPCBatchResponseItem;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JsonRpcVersion;
use mcp_transport::Transport as _;
use mcp_types::PingRequest;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::timeout;

#[tokio::test]
async fn batch_with_mixed_outcomes_resolves_each_handle() -> Result<()> {
    let client = test_client(false);
    let server_end = connect_to_script(&client).await?;

    let mut batch = client.batch();
    let first = batch.add::<PingRequest>(&()).await?;
    let second = batch.add::<PingRequest>(&()).await?;
    assert_eq!(batch.len(), 2);
    batch.send().await?;

    // Exactly one write, a JSON array in insertion order.
    let raw = timeout(DEFAULT_READ_TIMEOUT, server_end.receive()).await??;
    let requests: Vec<JSONRPCRequest> = serde_json::from_str(&raw)?;
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|request| request.method == "ping"));
    assert_ne!(requests[0].id, requests[1].id);

    // Reply out of order to prove responses dispatch by id, not position.
    let reply = JSONRPCMessage::BatchResponse(vec![
        JSONRPCBatchResponseItem::Error(JSONRPCError {
            jsonrpc: JsonRpcVersion,
            id: requests[1].id.clone(),
            error: JSONRPCErrorError {
                code: -32603,
                message: "Simulated".to_string(),
                data: None,
            },
        }),
        JSONRPCBatchResponseItem::Response(JSONRPCResponse {
            jsonrpc: JsonRpcVersion,
            id: requests[0].id.clone(),
            result: json!({}),
        }),
    ]);
    server_end.send(serde_json::to_string(&reply)?).await?;

    first.await_result().await?;
    let err = second
        .await_result()
        .await
        .expect_err("second request must fail");
    assert_eq!(err.code(), -32603);
    assert_eq!(err.detail(), Some("Simulated"));
    Ok(())
}

#[tokio::test]
async fn empty_batch_sends_nothing() -> Result<()> {
    let client = test_client(false);
    let server_end = connect_to_script(&client).await?;

    let batch = client.batch();
    assert!(batch.is_empty());
    batch.send().await?;

    let nothing = timeout(Duration::from_millis(100), server_end.receive()).await;
    assert!(nothing.is_err(), "no frame should have been written");
    Ok(())
}

#[tokio::test]
async fn server_answers_request_batches_with_one_array() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let mut batch = client.batch();
    let first = batch.add::<PingRequest>(&()).await?;
    let second = batch.add::<PingRequest>(&()).await?;
    batch.send().await?;

    timeout(DEFAULT_READ_TIMEOUT, first.await_result()).await??;
    timeout(DEFAULT_READ_TIMEOUT, second.await_result()).await??;
    Ok(())
}
