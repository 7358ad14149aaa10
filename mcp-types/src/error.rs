//! The MCP error model.
//!
//! Over the wire an error is `{ code, message, data? }` (see
//! [`crate::JSONRPCErrorError`]); in process it is the [`Error`] sum below.
//! Equality is by code so a decoded wire error compares equal to the local
//! variant that produced it; hashing folds in the detail string.

use std::hash::Hash;
use std::hash::Hasher;

use serde_json::json;

use crate::JSONRPCErrorError;

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const INVALID_REQUEST_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;
pub const CONNECTION_CLOSED_CODE: i64 = -32000;
pub const TRANSPORT_ERROR_CODE: i64 = -32001;

/// Implementation-defined server errors occupy −32000..−32099.
pub const SERVER_ERROR_RANGE: std::ops::RangeInclusive<i64> = -32099..=-32000;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Parse error{}", detail_suffix(.0))]
    ParseError(Option<String>),
    #[error("Invalid request{}", detail_suffix(.0))]
    InvalidRequest(Option<String>),
    #[error("Method not found{}", detail_suffix(.0))]
    MethodNotFound(Option<String>),
    #[error("Invalid parameters{}", detail_suffix(.0))]
    InvalidParams(Option<String>),
    #[error("Internal error{}", detail_suffix(.0))]
    InternalError(Option<String>),
    #[error("Server error {code}: {message}")]
    ServerError { code: i64, message: String },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Transport error: {0}")]
    TransportError(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl Error {
    pub fn code(&self) -> i64 {
        match self {
            Error::ParseError(_) => PARSE_ERROR_CODE,
            Error::InvalidRequest(_) => INVALID_REQUEST_CODE,
            Error::MethodNotFound(_) => METHOD_NOT_FOUND_CODE,
            Error::InvalidParams(_) => INVALID_PARAMS_CODE,
            Error::InternalError(_) => INTERNAL_ERROR_CODE,
            Error::ServerError { code, .. } => *code,
            Error::ConnectionClosed => CONNECTION_CLOSED_CODE,
            Error::TransportError(_) => TRANSPORT_ERROR_CODE,
        }
    }

    /// The fixed human-readable message for this code, without the detail.
    pub fn message(&self) -> &str {
        match self {
            Error::ParseError(_) => "Parse error",
            Error::InvalidRequest(_) => "Invalid request",
            Error::MethodNotFound(_) => "Method not found",
            Error::InvalidParams(_) => "Invalid parameters",
            Error::InternalError(_) => "Internal error",
            Error::ServerError { message, .. } => message,
            Error::ConnectionClosed => "Connection closed",
            Error::TransportError(_) => "Transport error",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::ParseError(detail)
            | Error::InvalidRequest(detail)
            | Error::MethodNotFound(detail)
            | Error::InvalidParams(detail)
            | Error::InternalError(detail) => detail.as_deref(),
            Error::ServerError { .. } | Error::ConnectionClosed => None,
            Error::TransportError(cause) => Some(cause),
        }
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Error::InternalError(Some(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Error::InvalidRequest(Some(detail.into()))
    }

    pub fn method_not_found(detail: impl Into<String>) -> Self {
        Error::MethodNotFound(Some(detail.into()))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Error::InvalidParams(Some(detail.into()))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Error {}

impl Hash for Error {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
        self.detail().hash(state);
    }
}

impl From<Error> for JSONRPCErrorError {
    fn from(error: Error) -> Self {
        let data = error
            .detail()
            .map(|detail| json!({ "detail": detail }));
        JSONRPCErrorError {
            code: error.code(),
            message: error.message().to_string(),
            data,
        }
    }
}

impl From<JSONRPCErrorError> for Error {
    fn from(wire: JSONRPCErrorError) -> Self {
        let detail = wire
            .data
            .as_ref()
            .and_then(|data| data.get("detail"))
            .and_then(|detail| detail.as_str())
            .map(str::to_string);
        match wire.code {
            PARSE_ERROR_CODE => Error::ParseError(detail),
            INVALID_REQUEST_CODE => Error::InvalidRequest(detail),
            METHOD_NOT_FOUND_CODE => Error::MethodNotFound(detail),
            INVALID_PARAMS_CODE => Error::InvalidParams(detail),
            INTERNAL_ERROR_CODE => Error::InternalError(detail.or(Some(wire.message))),
            TRANSPORT_ERROR_CODE => {
                Error::TransportError(detail.unwrap_or(wire.message))
            }
            code => Error::ServerError {
                code,
                message: wire.message,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(Some(err.to_string()))
    }
}
