use anyhow::Result;
use mcp_test_support::add_tool_server;
use mcp_test_support::connect_pair;
use mcp_test_support::test_client;
use mcp_types::ToolResultContent;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn call_tool_returns_typed_content() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let result = client
        .call_tool("add".to_string(), Some(json!({ "a": 1, "b": 2 })))
        .await?;
    assert_eq!(result.content, vec![ToolResultContent::text("3")]);
    assert_eq!(result.is_error, None);
    Ok(())
}

#[tokio::test]
async fn list_tools_returns_tools_and_cursor() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let result = client.list_tools(None).await?;
    assert_eq!(result.tools.len(), 1);
    assert_eq!(result.tools[0].name, "add");
    assert_eq!(result.next_cursor, None);
    Ok(())
}

#[tokio::test]
async fn unknown_method_is_answered_and_loop_survives() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    // prompts/* is not registered on this server.
    let err = client
        .list_prompts(None)
        .await
        .expect_err("unregistered method must fail");
    assert_eq!(err.code(), -32601);

    // The receive loop keeps serving after the error reply.
    client.ping().await?;
    Ok(())
}

#[tokio::test]
async fn handler_error_becomes_error_response() -> Result<()> {
    let client = test_client(false);
    let server = add_tool_server(false).await;
    connect_pair(&client, &server).await?;
    client.initialize().await?;

    let err = client
        .call_tool("add".to_string(), Some(json!({ "a": "one" })))
        .await
        .expect_err("bad arguments must fail");
    assert_eq!(err.code(), -32602);
    Ok(())
}
