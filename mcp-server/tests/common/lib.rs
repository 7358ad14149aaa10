//! Shared helpers for the integration suite: in-process client/server
//! pairs over the in-memory transport, plus a scriptable raw peer for
//! tests that need to inspect or forge frames.

use anyhow::Context;
use anyhow::Result;
use mcp_client::ClientConfig;
use mcp_client::McpClient;
use mcp_server::McpServer;
use mcp_server::ServerConfig;
use mcp_transport::InMemoryTransport;
use mcp_transport::Transport;
use mcp_types::CallToolRequest;
use mcp_types::CallToolResult;
use mcp_types::Error;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JsonRpcVersion;
use mcp_types::ListToolsRequest;
use mcp_types::ListToolsResult;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ServerCapabilities;
use mcp_types::Tool;
use mcp_types::ToolResultContent;
use mcp_types::ToolsCapability;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_client(strict: bool) -> McpClient {
    McpClient::new("C", "1", None, ClientConfig { strict })
}

/// A server named `S` advertising only the tools capability, with an
/// `add` tool that sums its two integer arguments.
pub async fn add_tool_server(strict: bool) -> McpServer {
    let server = McpServer::new(
        "S",
        "1",
        Some(ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        }),
        ServerConfig { strict },
    );
    server
        .register_method::<ListToolsRequest, _, _>(|_params| async move {
            Ok(ListToolsResult {
                tools: vec![Tool {
                    name: "add".to_string(),
                    description: Some("Add two numbers".to_string()),
                    input_schema: json!({
                        "type": "object",
                        "properties": {
                            "a": { "type": "number" },
                            "b": { "type": "number" },
                        },
                        "required": ["a", "b"],
                    }),
                }],
                next_cursor: None,
            })
        })
        .await;
    server
        .register_method::<CallToolRequest, _, _>(|params| async move {
            if params.name != "add" {
                return Err(Error::invalid_params(format!(
                    "unknown tool: {}",
                    params.name
                )));
            }
            let arguments = params.arguments.unwrap_or(json!({}));
            let a = arguments.get("a").and_then(serde_json::Value::as_i64);
            let b = arguments.get("b").and_then(serde_json::Value::as_i64);
            match (a, b) {
                (Some(a), Some(b)) => Ok(CallToolResult {
                    content: vec![ToolResultContent::text((a + b).to_string())],
                    is_error: None,
                }),
                _ => Err(Error::invalid_params("expected integer arguments a and b")),
            }
        })
        .await;
    server
}

/// Wire `client` and `server` together over an in-memory duplex and start
/// both peers.
pub async fn connect_pair(client: &McpClient, server: &McpServer) -> Result<()> {
    let (client_end, server_end) = InMemoryTransport::pair();
    server
        .start(server_end, None)
        .await
        .context("server should start")?;
    client
        .connect(client_end)
        .await
        .context("client should connect")?;
    Ok(())
}

/// Connect `client` to a raw transport the test scripts by hand. The
/// returned end plays the server: `receive` observes the client's frames
/// and `send` forges replies.
pub async fn connect_to_script(client: &McpClient) -> Result<InMemoryTransport> {
    let (client_end, server_end) = InMemoryTransport::pair();
    client
        .connect(client_end)
        .await
        .context("client should connect")?;
    Ok(server_end)
}

/// Script-side half of the Initialize exchange: read the client's
/// `initialize` request and answer it with `capabilities`.
pub async fn respond_to_initialize(
    server_end: &InMemoryTransport,
    capabilities: ServerCapabilities,
) -> Result<InitializeResult> {
    let raw = tokio::time::timeout(DEFAULT_READ_TIMEOUT, server_end.receive())
        .await
        .context("timed out waiting for initialize request")??;
    let request: JSONRPCRequest =
        serde_json::from_str(&raw).context("initialize frame should decode as a request")?;
    anyhow::ensure!(
        request.method == "initialize",
        "expected initialize, got {}",
        request.method
    );
    let result = InitializeResult {
        protocol_version: MCP_SCHEMA_VERSION.to_string(),
        capabilities,
        server_info: mcp_types::Implementation {
            name: "S".to_string(),
            version: "1".to_string(),
        },
        instructions: None,
    };
    let response = JSONRPCMessage::Response(JSONRPCResponse {
        jsonrpc: JsonRpcVersion,
        id: request.id,
        result: serde_json::to_value(&result)?,
    });
    server_end.send(serde_json::to_string(&response)?).await?;
    Ok(result)
}
