use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mcp_test_support::DEFAULT_READ_TIMEOUT;
use mcp_test_support::add_tool_server;
use mcp_test_support::connect_pair;
use mcp_test_support::connect_to_script;
use mcp_test_support::respond_to_initialize;
use mcp_test_support::test_client;
use mcp_transport::Transport as _;
use mcp_transport::TransportError;
use mcp_types::InitializedNotification;
use mcp_types::ResourceContents;
use mcp_types::ResourceUpdatedNotification;
use mcp_types::ResourceUpdatedNotificationParams;
use mcp_types::ServerCapabilities;
use pretty_assertions::assert_eq;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn strict_gate_fails_without_a_round_trip() -> Result<()> {
    let client = test_client(true);
    let server_end = connect_to_script(&client).await?;

    let responder = tokio::spawn(async move {
        let result = respond_to_initialize(&server_end, ServerCapabilities::default()).await;
        (server_end, result)
    });
    client.initialize().await?;
    let (server_end, responded) = responder.await?;
    responded?;

    let err = client
        .list_prompts(None)
        .await
        .expect_err("gated call must fail locally");
    assert_eq!(err.code(), -32601);
    assert_eq!(err.detail(), Some("Prompts is not supported by the server"));

    // No bytes crossed the transport for the gated call.
    let nothing = timeout(Duration::from_millis(100), server_end.receive()).await;
    assert!(nothing.is_err(), "strict gate must not write to the wire");
    Ok(())
}

#[tokio::test]
async fn subscribe_requires_the_subscribe_flag() -> Result<()> {
    let client = test_client(true);
    let server_end = connect_to_script(&client).await?;

    let responder = tokio::spawn(async move {
        let capabilities = ServerCapabilities {
            resources: Some(mcp_types::ResourcesCapability {
                list: Some(true),
                read: Some(true),
                subscribe: None,
                list_changed: None,
            }),
            ..Default::default()
        };
        let result = respond_to_initialize(&server_end, capabilities).await;
        (server_end, result)
    });
    client.initialize().await?;
    let (_server_end, responded) = responder.await?;
    responded?;

    let err = client
        .subscribe_to_resource("file:///watched.txt".to_string())
        .await
        .expect_err("subscribe without the capability flag must fail");
    assert_eq!(err.code(), -32601);
    assert_eq!(
        err.detail(),
        Some("Resource subscription is not supported by the server")
    );
    Ok(())
}

#[tokio::test]
async fn lenient_client_skips_the_gate() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    // The server has no prompts handler, so the error comes from the wire
    // rather than from a local gate.
    let err = client
        .list_prompts(None)
        .await
        .expect_err("server must reject the unsupported method");
    assert_eq!(err.code(), -32601);
    Ok(())
}

#[tokio::test]
async fn disconnect_fails_pending_requests() -> Result<()> {
    let client = Arc::new(test_client(false));
    let server_end = connect_to_script(&client).await?;

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.ping().await })
    };
    // Wait until the request is on the wire so the pending entry exists.
    let raw = timeout(DEFAULT_READ_TIMEOUT, server_end.receive()).await??;
    assert!(raw.contains("\"ping\""));

    client.disconnect().await?;
    let err = in_flight
        .await?
        .expect_err("pending request must resolve with the disconnect error");
    assert_eq!(err.code(), -32603);
    assert_eq!(err.detail(), Some("Client disconnected"));

    // The transport was torn down and later sends fail fast.
    assert!(matches!(
        server_end.receive().await,
        Err(TransportError::Closed)
    ));
    let err = client.ping().await.expect_err("sends after disconnect fail");
    assert_eq!(err.code(), -32603);
    Ok(())
}

#[tokio::test]
async fn notification_handlers_run_in_registration_order() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;

    let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    for tag in [1u8, 2, 3] {
        let order = order.clone();
        server
            .on_notification::<InitializedNotification, _, _>(move |()| {
                let order = order.clone();
                async move {
                    order.lock().await.push(tag);
                    Ok(())
                }
            })
            .await;
    }

    client.initialize().await?;
    client
        .send_notification::<InitializedNotification>(&())
        .await?;

    // Handlers run on the server's dispatch loop; poll until they did.
    let deadline = tokio::time::Instant::now() + DEFAULT_READ_TIMEOUT;
    loop {
        if order.lock().await.len() == 3 {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "handlers did not all run"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*order.lock().await, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn resource_update_reaches_client_handler() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let (updated_tx, mut updated_rx) = mpsc::channel(1);
    client
        .on_notification::<ResourceUpdatedNotification, _, _>(move |params| {
            let updated_tx = updated_tx.clone();
            async move {
                let _ = updated_tx.send(params).await;
                Ok(())
            }
        })
        .await;

    server
        .send_notification::<ResourceUpdatedNotification>(&ResourceUpdatedNotificationParams {
            uri: "file:///watched.txt".to_string(),
            content: ResourceContents::Text {
                uri: "file:///watched.txt".to_string(),
                mime_type: Some("text/plain".to_string()),
                text: "new contents".to_string(),
            },
        })
        .await?;

    let params = timeout(DEFAULT_READ_TIMEOUT, updated_rx.recv())
        .await
        .expect("update should arrive")
        .expect("channel should stay open");
    assert_eq!(params.uri, "file:///watched.txt");
    Ok(())
}
