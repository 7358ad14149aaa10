//! Outbound half of the server peer.
//!
//! Dispatch never writes to the transport directly: it enqueues an
//! [`OutgoingMessage`] on an unbounded channel drained by a single writer
//! task, so a slow transport cannot stall the receive loop. Server-
//! initiated requests register a callback here that the receive loop
//! resumes when the client's response arrives.

use std::collections::HashMap;

use mcp_types::Error;
use mcp_types::JSONRPCBatchResponseItem;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JsonRpcVersion;
use mcp_types::RequestId;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::warn;

/// Sends messages to the client and manages callbacks for
/// server-initiated requests.
pub(crate) struct OutgoingMessageSender {
    sender: mpsc::UnboundedSender<OutgoingMessage>,
    request_id_to_callback: Mutex<HashMap<RequestId, oneshot::Sender<JSONRPCMessage>>>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        Self {
            sender,
            request_id_to_callback: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue a request to the client and return the receiver its
    /// response will resume. The callback is registered before the frame
    /// is queued so the response cannot win the race.
    pub(crate) async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> oneshot::Receiver<JSONRPCMessage> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut callbacks = self.request_id_to_callback.lock().await;
            let id = loop {
                let candidate = RequestId::Integer(i64::from(rand::random::<u32>()));
                if !callbacks.contains_key(&candidate) {
                    break candidate;
                }
            };
            callbacks.insert(id.clone(), tx);
            id
        };

        let _ = self.sender.send(OutgoingMessage::Request(OutgoingRequest {
            id,
            method: method.to_string(),
            params,
        }));
        rx
    }

    /// Resume the callback registered for `id`, if any.
    pub(crate) async fn notify_client_response(&self, id: RequestId, message: JSONRPCMessage) {
        let entry = {
            let mut callbacks = self.request_id_to_callback.lock().await;
            callbacks.remove_entry(&id)
        };
        match entry {
            Some((id, tx)) => {
                if tx.send(message).is_err() {
                    warn!("could not resume callback for request id {id}");
                }
            }
            None => {
                warn!("no callback registered for response id {id}");
            }
        }
    }

    pub(crate) async fn send_response(&self, id: RequestId, result: Value) {
        let _ = self
            .sender
            .send(OutgoingMessage::Response(OutgoingResponse { id, result }));
    }

    pub(crate) async fn send_error(&self, id: RequestId, error: JSONRPCErrorError) {
        let _ = self
            .sender
            .send(OutgoingMessage::Error(OutgoingError { id, error }));
    }

    pub(crate) async fn send_notification(&self, method: &str, params: Option<Value>) {
        let _ = self
            .sender
            .send(OutgoingMessage::Notification(OutgoingNotification {
                method: method.to_string(),
                params,
            }));
    }

    pub(crate) async fn send_batch_response(&self, replies: Vec<JSONRPCBatchResponseItem>) {
        let _ = self.sender.send(OutgoingMessage::BatchResponse(replies));
    }

    /// Fail every outstanding server-initiated request, e.g. at shutdown.
    pub(crate) async fn drain_callbacks(&self, reason: &str) {
        let entries: Vec<(RequestId, oneshot::Sender<JSONRPCMessage>)> = {
            let mut callbacks = self.request_id_to_callback.lock().await;
            callbacks.drain().collect()
        };
        for (id, tx) in entries {
            let error = JSONRPCError {
                jsonrpc: JsonRpcVersion,
                id,
                error: Error::internal_error(reason).into(),
            };
            let _ = tx.send(JSONRPCMessage::Error(error));
        }
    }
}

/// Outgoing message from the server to the client.
pub(crate) enum OutgoingMessage {
    Request(OutgoingRequest),
    Notification(OutgoingNotification),
    Response(OutgoingResponse),
    Error(OutgoingError),
    BatchResponse(Vec<JSONRPCBatchResponseItem>),
}

pub(crate) struct OutgoingRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

pub(crate) struct OutgoingNotification {
    pub method: String,
    pub params: Option<Value>,
}

pub(crate) struct OutgoingResponse {
    pub id: RequestId,
    pub result: Value,
}

pub(crate) struct OutgoingError {
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

impl From<OutgoingMessage> for JSONRPCMessage {
    fn from(val: OutgoingMessage) -> Self {
        match val {
            OutgoingMessage::Request(OutgoingRequest { id, method, params }) => {
                JSONRPCMessage::Request(JSONRPCRequest {
                    jsonrpc: JsonRpcVersion,
                    id,
                    method,
                    params,
                })
            }
            OutgoingMessage::Notification(OutgoingNotification { method, params }) => {
                JSONRPCMessage::Notification(JSONRPCNotification {
                    jsonrpc: JsonRpcVersion,
                    method,
                    params,
                })
            }
            OutgoingMessage::Response(OutgoingResponse { id, result }) => {
                JSONRPCMessage::Response(JSONRPCResponse {
                    jsonrpc: JsonRpcVersion,
                    id,
                    result,
                })
            }
            OutgoingMessage::Error(OutgoingError { id, error }) => {
                JSONRPCMessage::Error(JSONRPCError {
                    jsonrpc: JsonRpcVersion,
                    id,
                    error,
                })
            }
            OutgoingMessage::BatchResponse(replies) => JSONRPCMessage::BatchResponse(replies),
        }
    }
}
