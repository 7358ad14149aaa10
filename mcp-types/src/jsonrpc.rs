//! JSON-RPC 2.0 envelopes and the frame decoder.
//!
//! A *frame* is one JSON value on the wire. [`JSONRPCMessage`] is the
//! untagged union of every frame shape this SDK understands; the order of
//! its variants is load-bearing (see the type-level docs).

use serde::Deserialize;
use serde::Serialize;
use serde::de::Error as _;

/// The only JSON-RPC version this SDK speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Zero-sized stand-in for the `jsonrpc` field. Serializes as the literal
/// `"2.0"` and fails to decode anything else, so a frame with a bad
/// version is rejected at parse time rather than somewhere downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(D::Error::custom(format!(
                "unsupported JSON-RPC version: {version}"
            )))
        }
    }
}

/// ID of a request, which can be either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Integer(i) => i.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

/// The `error` member of an error response: `{ code, message, data? }`.
/// `data.detail` carries the optional prose detail of [`crate::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCNotification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// One element of an inbound batch of replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCBatchResponseItem {
    Response(JSONRPCResponse),
    Error(JSONRPCError),
}

impl JSONRPCBatchResponseItem {
    pub fn id(&self) -> &RequestId {
        match self {
            JSONRPCBatchResponseItem::Response(response) => &response.id,
            JSONRPCBatchResponseItem::Error(error) => &error.id,
        }
    }
}

/// One element of an inbound batch of requests and/or notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCBatchRequestItem {
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
}

/// Any frame a peer can receive.
///
/// Decoding relies on `serde(untagged)` trying variants top to bottom, so
/// the order below is exactly the disambiguation order the receive loop
/// needs: array-of-responses, single response, single error, single
/// request, single notification, array-of-requests. A request would also
/// satisfy the notification shape (its extra `id` would be ignored), which
/// is why `Request` must precede `Notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    BatchResponse(Vec<JSONRPCBatchResponseItem>),
    Response(JSONRPCResponse),
    Error(JSONRPCError),
    Request(JSONRPCRequest),
    Notification(JSONRPCNotification),
    BatchRequest(Vec<JSONRPCBatchRequestItem>),
}

/// Serialize typed params for the wire. A value that serializes to JSON
/// `null` (for example `()` or `None`) collapses to "no params".
pub fn params_to_value<P: Serialize>(
    params: &P,
) -> Result<Option<serde_json::Value>, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    if value.is_null() { Ok(None) } else { Ok(Some(value)) }
}

/// Decode wire params into the typed shape, treating an absent `params`,
/// `params: null`, and `params: {}` interchangeably. The retry covers both
/// directions: `()` only decodes from `null`, while param structs with all
/// fields optional only decode from an object.
pub fn params_from_value<P: serde::de::DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> Result<P, serde_json::Error> {
    let value = params.unwrap_or(serde_json::Value::Null);
    let empty_equivalent = match &value {
        serde_json::Value::Null => Some(serde_json::Value::Object(serde_json::Map::new())),
        serde_json::Value::Object(map) if map.is_empty() => Some(serde_json::Value::Null),
        _ => None,
    };
    match serde_json::from_value(value) {
        Ok(params) => Ok(params),
        Err(err) => match empty_equivalent {
            Some(alternate) => serde_json::from_value(alternate).map_err(|_| err),
            None => Err(err),
        },
    }
}

/// Encode a result for a response frame. Nullary results (`()`) travel as
/// `{}` so the response always carries a `result` member.
pub fn result_to_value<R: Serialize>(result: &R) -> Result<serde_json::Value, serde_json::Error> {
    let value = serde_json::to_value(result)?;
    if value.is_null() {
        Ok(serde_json::Value::Object(serde_json::Map::new()))
    } else {
        Ok(value)
    }
}

/// Decode a response `result` member into the typed shape, with the same
/// `null`/`{}` tolerance as [`params_from_value`].
pub fn result_from_value<R: serde::de::DeserializeOwned>(
    result: serde_json::Value,
) -> Result<R, serde_json::Error> {
    params_from_value(Some(result))
}

impl JSONRPCRequest {
    /// Build a request for method `R`. Requests always carry a `params`
    /// member: nullary params are encoded as `{}`.
    pub fn new<R: crate::ModelContextProtocolRequest>(
        id: RequestId,
        params: &R::Params,
    ) -> Result<Self, serde_json::Error> {
        let params = params_to_value(params)?
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        Ok(Self {
            jsonrpc: JsonRpcVersion,
            id,
            method: R::METHOD.to_string(),
            params: Some(params),
        })
    }
}

impl JSONRPCNotification {
    /// Build a notification for `N`. Unlike requests, a notification with
    /// nullary params omits the `params` member entirely.
    pub fn new<N: crate::ModelContextProtocolNotification>(
        params: &N::Params,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JsonRpcVersion,
            method: N::METHOD.to_string(),
            params: params_to_value(params)?,
        })
    }
}
