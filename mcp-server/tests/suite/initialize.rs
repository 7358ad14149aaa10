use anyhow::Result;
use mcp_server::InitializeHook;
use mcp_test_support::DEFAULT_READ_TIMEOUT;
use mcp_test_support::add_tool_server;
use mcp_test_support::connect_pair;
use mcp_test_support::test_client;
use mcp_transport::InMemoryTransport;
use mcp_types::ClientCapabilities;
use mcp_types::Error;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializedNotification;
use mcp_types::MCP_SCHEMA_VERSION;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn initialize_round_trip_populates_peer_state() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;

    let (notified_tx, mut notified_rx) = mpsc::channel(1);
    client
        .on_notification::<InitializedNotification, _, _>(move |()| {
            let notified_tx = notified_tx.clone();
            async move {
                let _ = notified_tx.send(()).await;
                Ok(())
            }
        })
        .await;

    let result = client.initialize().await?;
    assert_eq!(result.protocol_version, MCP_SCHEMA_VERSION);
    assert_eq!(result.server_info.name, "S");
    assert_eq!(result.server_info.version, "1");

    assert!(client.is_initialized());
    assert!(server.is_initialized());
    assert!(
        client
            .server_capabilities()
            .await
            .is_some_and(|caps| caps.tools.is_some())
    );
    assert_eq!(
        server.client_info().await,
        Some(Implementation {
            name: "C".to_string(),
            version: "1".to_string(),
        })
    );
    assert_eq!(
        client.negotiated_protocol_version().await.as_deref(),
        Some(MCP_SCHEMA_VERSION)
    );

    // The server announces itself shortly after responding.
    timeout(DEFAULT_READ_TIMEOUT, notified_rx.recv())
        .await
        .expect("initialized notification should arrive")
        .expect("notification channel should stay open");
    Ok(())
}

#[tokio::test]
async fn strict_server_rejects_requests_before_initialize() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(true).await;
    connect_pair(&client, &server).await?;

    let err = client
        .list_tools(None)
        .await
        .expect_err("request before initialize must be rejected");
    assert_eq!(err.code(), -32600);
    assert_eq!(err.detail(), Some("Server is not initialized"));

    // ping is exempt from the lifecycle gate.
    client.ping().await?;
    Ok(())
}

#[tokio::test]
async fn double_initialize_is_rejected() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let err = client
        .send_request::<InitializeRequest>(&InitializeRequestParams {
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "C".to_string(),
                version: "1".to_string(),
            },
        })
        .await
        .expect_err("second initialize must be rejected");
    assert_eq!(err.code(), -32600);
    Ok(())
}

#[tokio::test]
async fn mismatched_protocol_version_is_rejected() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;

    let err = client
        .send_request::<InitializeRequest>(&InitializeRequestParams {
            protocol_version: "2023-01-01".to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "C".to_string(),
                version: "1".to_string(),
            },
        })
        .await
        .expect_err("version mismatch must be rejected");
    assert_eq!(err.code(), -32600);
    assert!(
        err.detail().is_some_and(|detail| detail.contains("2023-01-01")),
        "detail should name the received version: {err:?}"
    );
    assert!(!server.is_initialized());
    Ok(())
}

#[tokio::test]
async fn initialize_hook_error_leaves_server_uninitialized() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    let hook: InitializeHook = Box::new(|client_info, _capabilities| {
        if client_info.name == "C" {
            Err(Error::invalid_request("client is not allowed"))
        } else {
            Ok(())
        }
    });

    let (client_end, server_end) = InMemoryTransport::pair();
    server.start(server_end, Some(hook)).await?;
    client.connect(client_end).await?;

    let err = client
        .initialize()
        .await
        .expect_err("hook rejection must fail initialize");
    assert_eq!(err.code(), -32600);
    assert_eq!(err.detail(), Some("client is not allowed"));
    assert!(!server.is_initialized());
    assert!(!client.is_initialized());
    assert_eq!(server.client_info().await, None);
    Ok(())
}
