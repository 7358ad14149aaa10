//! A server peer for the Model Context Protocol (MCP).
//!
//! [`McpServer`] drives one connection: a receive task decodes inbound
//! frames and dispatches them to typed method and notification handlers,
//! while a writer task drains the outbound queue so dispatch never blocks
//! on the transport. The MCP lifecycle (`initialize`, capability exchange,
//! strict mode) is enforced here; handler semantics live with the
//! embedder.

mod outgoing;
mod registry;
mod server;

pub use server::InitializeHook;
pub use server::McpServer;
pub use server::ServerConfig;
