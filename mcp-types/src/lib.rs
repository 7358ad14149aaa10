//! Wire-level types for the Model Context Protocol (MCP).
//!
//! This crate defines the JSON-RPC 2.0 envelopes, the typed method and
//! notification descriptors, the capability structs exchanged during
//! initialization, and the serializable error model. It contains no I/O:
//! the peer runtimes in `mcp-client` and `mcp-server` drive these types
//! over an `mcp-transport` channel.

mod capabilities;
mod error;
mod jsonrpc;
mod notifications;
mod requests;
mod schema;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use capabilities::*;
pub use error::*;
pub use jsonrpc::*;
pub use notifications::*;
pub use requests::*;
pub use schema::*;

/// Protocol revision implemented by this workspace, as a `YYYY-MM-DD`
/// string. Peers reject any other value during the Initialize exchange.
pub const MCP_SCHEMA_VERSION: &str = "2024-11-05";

/// Compile-time association of a method name with its parameter and result
/// shapes. Implemented by uninhabited marker enums such as
/// [`InitializeRequest`]; the peers use the associated types to encode
/// outbound params and decode inbound results without reflection.
///
/// Methods whose params or result are nullary use `()`, which travels as
/// `{}` in requests/responses per JSON-RPC convention.
pub trait ModelContextProtocolRequest {
    const METHOD: &'static str;
    type Params: DeserializeOwned + Serialize + Send + Sync + 'static;
    type Result: DeserializeOwned + Serialize + Send + Sync + 'static;
}

/// Compile-time association of a notification name with its parameter
/// shape. Nullary params are `()` and are omitted on the wire.
pub trait ModelContextProtocolNotification {
    const METHOD: &'static str;
    type Params: DeserializeOwned + Serialize + Send + Sync + 'static;
}
