//! JSON-RPC batching.
//!
//! A [`RequestBatch`] accumulates requests and writes them to the
//! transport as a single JSON array in one `send` call. Every added
//! request yields a [`BatchHandle`] that resolves independently once the
//! matching response (batched or not) arrives.

use std::marker::PhantomData;

use mcp_types::Error;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCRequest;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::RequestId;
use tokio::sync::oneshot;

use crate::McpClient;
use crate::client::decode_reply;
use crate::client::send_error;

pub struct RequestBatch<'a> {
    client: &'a McpClient,
    requests: Vec<JSONRPCRequest>,
}

impl<'a> RequestBatch<'a> {
    pub(crate) fn new(client: &'a McpClient) -> Self {
        Self {
            client,
            requests: Vec::new(),
        }
    }

    /// Append a request for method `R`. The pending-table entry is
    /// installed immediately, before the batch frame is ever written, so a
    /// fast server cannot race the registration.
    pub async fn add<R>(&mut self, params: &R::Params) -> Result<BatchHandle<R>, Error>
    where
        R: ModelContextProtocolRequest,
    {
        let shared = self.client.shared();
        let (id, rx) = shared.install_pending().await;
        let request = match JSONRPCRequest::new::<R>(id.clone(), params) {
            Ok(request) => request,
            Err(err) => {
                shared.remove_pending(&id).await;
                return Err(Error::internal_error(format!(
                    "failed to encode request: {err}"
                )));
            }
        };
        self.requests.push(request);
        Ok(BatchHandle {
            rx,
            _method: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Write the accumulated requests as one JSON array in a single
    /// transport write, in insertion order. An empty batch sends nothing.
    pub async fn send(self) -> Result<(), Error> {
        if self.requests.is_empty() {
            return Ok(());
        }
        let shared = self.client.shared();
        let ids: Vec<RequestId> = self
            .requests
            .iter()
            .map(|request| request.id.clone())
            .collect();
        let json = serde_json::to_string(&self.requests)
            .map_err(|err| Error::internal_error(format!("failed to serialize batch: {err}")))?;

        let transport = match shared.transport_handle().await {
            Ok(transport) => transport,
            Err(err) => {
                for id in &ids {
                    shared.remove_pending(id).await;
                }
                return Err(err);
            }
        };
        if let Err(err) = transport.send(json).await {
            for id in &ids {
                shared.remove_pending(id).await;
            }
            return Err(send_error(err));
        }
        Ok(())
    }
}

/// A handle to one request inside a batch, resolving to that request's
/// typed result.
pub struct BatchHandle<R: ModelContextProtocolRequest> {
    rx: oneshot::Receiver<JSONRPCMessage>,
    _method: PhantomData<fn() -> R>,
}

impl<R: ModelContextProtocolRequest> BatchHandle<R> {
    /// Await this request's response. Resolves at most once; if the peer
    /// disconnects first, the result is the disconnect error.
    pub async fn await_result(self) -> Result<R::Result, Error> {
        match self.rx.await {
            Ok(reply) => decode_reply::<R>(reply),
            Err(_) => Err(Error::internal_error(
                "response channel closed before a reply was received",
            )),
        }
    }
}
