//! An async client peer for the Model Context Protocol (MCP).
//!
//! [`McpClient`] owns a [`mcp_transport::Transport`] for the lifetime of a
//! connection, multiplexes any number of in-flight requests over it, and
//! hides the JSON-RPC framing behind the typed
//! [`mcp_types::ModelContextProtocolRequest`] surface. Batches of requests
//! can be sent in a single frame via [`RequestBatch`].

mod batch;
mod client;

pub use batch::BatchHandle;
pub use batch::RequestBatch;
pub use client::ClientConfig;
pub use client::McpClient;
