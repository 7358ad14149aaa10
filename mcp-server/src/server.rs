use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mcp_transport::Transport;
use mcp_transport::TransportError;
use mcp_types::ClientCapabilities;
use mcp_types::Error;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::InitializedNotification;
use mcp_types::JSONRPCBatchRequestItem;
use mcp_types::JSONRPCBatchResponseItem;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JsonRpcVersion;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::PingRequest;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::params_from_value;
use mcp_types::params_to_value;
use mcp_types::result_to_value;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::outgoing::OutgoingMessage;
use crate::outgoing::OutgoingMessageSender;
use crate::registry::MethodHandlerFn;
use crate::registry::NotificationHandlerFn;
use crate::registry::wrap_method_handler;
use crate::registry::wrap_notification_handler;

/// Back-off applied when the transport reports a transient
/// "temporarily unavailable" read failure.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long after answering `initialize` the server waits before
/// announcing `notifications/initialized`.
const INITIALIZED_NOTIFICATION_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
    /// Reject requests and drop notifications that arrive before the
    /// Initialize exchange has completed (`initialize` and `ping`
    /// excepted).
    pub strict: bool,
}

/// Validation hook run on `initialize` before any client state is stored.
/// An error becomes the initialize response and leaves the server
/// uninitialized.
pub type InitializeHook =
    Box<dyn Fn(&Implementation, &ClientCapabilities) -> Result<(), Error> + Send + Sync>;

/// A server peer on one MCP connection.
///
/// `initialize` and `ping` are handled built-in; every other method is
/// dispatched through the typed registry populated via
/// [`McpServer::register_method`]. Handlers run serially on the dispatch
/// loop, in arrival order; a handler that needs to do long-running work
/// should spawn its own task and return promptly.
pub struct McpServer {
    shared: Arc<ServerShared>,
    receive_task: Mutex<Option<ReceiveTask>>,
}

struct ReceiveTask {
    token: CancellationToken,
    receiver: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct ServerShared {
    server_info: Implementation,
    capabilities: ServerCapabilities,
    config: ServerConfig,
    instructions: Mutex<Option<String>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    outgoing: Mutex<Option<Arc<OutgoingMessageSender>>>,
    methods: Mutex<HashMap<String, MethodHandlerFn>>,
    notification_handlers: Mutex<HashMap<String, Vec<NotificationHandlerFn>>>,
    client_info: Mutex<Option<Implementation>>,
    client_capabilities: Mutex<Option<ClientCapabilities>>,
    negotiated_version: Mutex<Option<String>>,
    initialized: AtomicBool,
    init_hook: Mutex<Option<InitializeHook>>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: Option<ServerCapabilities>,
        config: ServerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                server_info: Implementation {
                    name: name.into(),
                    version: version.into(),
                },
                capabilities: capabilities.unwrap_or_default(),
                config,
                instructions: Mutex::new(None),
                transport: Mutex::new(None),
                outgoing: Mutex::new(None),
                methods: Mutex::new(HashMap::new()),
                notification_handlers: Mutex::new(HashMap::new()),
                client_info: Mutex::new(None),
                client_capabilities: Mutex::new(None),
                negotiated_version: Mutex::new(None),
                initialized: AtomicBool::new(false),
                init_hook: Mutex::new(None),
            }),
            receive_task: Mutex::new(None),
        }
    }

    /// Free-form guidance included in the initialize result.
    pub async fn set_instructions(&self, instructions: Option<String>) {
        *self.shared.instructions.lock().await = instructions;
    }

    /// Register a typed handler for method `R`. `initialize` and `ping`
    /// are built-in and take precedence over registry entries.
    pub async fn register_method<R, F, Fut>(&self, handler: F)
    where
        R: ModelContextProtocolRequest,
        F: Fn(R::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Result, Error>> + Send + 'static,
    {
        let previous = self
            .shared
            .methods
            .lock()
            .await
            .insert(R::METHOD.to_string(), wrap_method_handler::<R, F, Fut>(handler));
        if previous.is_some() {
            warn!("replacing existing handler for {}", R::METHOD);
        }
    }

    /// Register a handler for notification `N`. Handlers for the same
    /// method run sequentially in registration order; one handler's error
    /// is logged and does not stop the rest.
    pub async fn on_notification<N, F, Fut>(&self, handler: F)
    where
        N: ModelContextProtocolNotification,
        F: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.shared
            .notification_handlers
            .lock()
            .await
            .entry(N::METHOD.to_string())
            .or_default()
            .push(wrap_notification_handler::<N, F, Fut>(handler));
    }

    /// Take ownership of `transport`, open it, and start the writer and
    /// receive tasks.
    pub async fn start(
        &self,
        transport: impl Transport,
        init_hook: Option<InitializeHook>,
    ) -> Result<(), Error> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let mut slot = self.shared.transport.lock().await;
        if slot.is_some() {
            return Err(Error::internal_error("McpServer is already started"));
        }
        transport
            .connect()
            .await
            .map_err(|err| Error::TransportError(err.to_string()))?;
        *slot = Some(transport.clone());
        drop(slot);

        *self.shared.init_hook.lock().await = init_hook;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let outgoing = Arc::new(OutgoingMessageSender::new(outgoing_tx));
        *self.shared.outgoing.lock().await = Some(outgoing.clone());
        let writer = tokio::spawn(run_writer_loop(transport.clone(), outgoing_rx));

        let token = CancellationToken::new();
        let receiver = tokio::spawn(run_receive_loop(
            self.shared.clone(),
            transport,
            outgoing,
            token.clone(),
        ));
        *self.receive_task.lock().await = Some(ReceiveTask {
            token,
            receiver,
            writer,
        });
        Ok(())
    }

    /// Emit a typed notification to the client.
    pub async fn send_notification<N>(&self, params: &N::Params) -> Result<(), Error>
    where
        N: ModelContextProtocolNotification,
    {
        let outgoing = self.shared.outgoing_handle().await?;
        let params = params_to_value(params)
            .map_err(|err| Error::internal_error(format!("failed to encode notification: {err}")))?;
        outgoing.send_notification(N::METHOD, params).await;
        Ok(())
    }

    /// Send a server-initiated request to the client and await its raw
    /// result. The request/notification schema is client-defined, so the
    /// surface stays dynamic.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, Error> {
        let outgoing = self.shared.outgoing_handle().await?;
        let rx = outgoing.send_request(method, params).await;
        match rx.await {
            Ok(JSONRPCMessage::Response(response)) => Ok(response.result),
            Ok(JSONRPCMessage::Error(error)) => Err(error.error.into()),
            Ok(other) => Err(Error::internal_error(format!(
                "unexpected message variant in reply path: {other:?}"
            ))),
            Err(_) => Err(Error::internal_error(
                "response channel closed before a reply was received",
            )),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub async fn client_info(&self) -> Option<Implementation> {
        self.shared.client_info.lock().await.clone()
    }

    pub async fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.shared.client_capabilities.lock().await.clone()
    }

    pub async fn negotiated_protocol_version(&self) -> Option<String> {
        self.shared.negotiated_version.lock().await.clone()
    }

    /// Stop both tasks, fail outstanding server-initiated requests, and
    /// release the transport.
    pub async fn stop(&self) -> Result<(), Error> {
        if let Some(task) = self.receive_task.lock().await.take() {
            task.token.cancel();
            let _ = task.receiver.await;
            if let Some(outgoing) = self.shared.outgoing.lock().await.take() {
                outgoing.drain_callbacks("Server disconnected").await;
            }
            let _ = task.writer.await;
        }
        if let Some(transport) = self.shared.transport.lock().await.take() {
            let _ = transport.disconnect().await;
        }
        self.shared.initialized.store(false, Ordering::SeqCst);
        *self.shared.client_info.lock().await = None;
        *self.shared.client_capabilities.lock().await = None;
        *self.shared.negotiated_version.lock().await = None;
        Ok(())
    }
}

impl ServerShared {
    async fn outgoing_handle(&self) -> Result<Arc<OutgoingMessageSender>, Error> {
        self.outgoing
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::internal_error("McpServer is not initialized"))
    }

    async fn handle_frame(&self, outgoing: &Arc<OutgoingMessageSender>, raw: &str) {
        let message = match serde_json::from_str::<JSONRPCMessage>(raw) {
            Ok(message) => message,
            Err(err) => {
                // Answer with a parse error when the broken frame still
                // carries a recoverable request id; otherwise drop it.
                match recover_request_id(raw) {
                    Some(id) => {
                        let error = Error::ParseError(Some(err.to_string()));
                        outgoing.send_error(id, error.into()).await;
                    }
                    None => error!("failed to decode inbound frame: {err}; frame = {raw}"),
                }
                return;
            }
        };
        match message {
            JSONRPCMessage::Request(request) => {
                match self.evaluate_request(outgoing, request).await {
                    JSONRPCBatchResponseItem::Response(response) => {
                        outgoing.send_response(response.id, response.result).await;
                    }
                    JSONRPCBatchResponseItem::Error(reply) => {
                        outgoing.send_error(reply.id, reply.error).await;
                    }
                }
            }
            JSONRPCMessage::Notification(notification) => {
                self.process_notification(notification).await;
            }
            JSONRPCMessage::Response(response) => {
                let id = response.id.clone();
                outgoing
                    .notify_client_response(id, JSONRPCMessage::Response(response))
                    .await;
            }
            JSONRPCMessage::Error(error) => {
                let id = error.id.clone();
                outgoing
                    .notify_client_response(id, JSONRPCMessage::Error(error))
                    .await;
            }
            JSONRPCMessage::BatchRequest(items) => {
                self.process_batch(outgoing, items).await;
            }
            JSONRPCMessage::BatchResponse(items) => {
                for item in items {
                    let (id, message) = match item {
                        JSONRPCBatchResponseItem::Response(response) => {
                            (response.id.clone(), JSONRPCMessage::Response(response))
                        }
                        JSONRPCBatchResponseItem::Error(error) => {
                            (error.id.clone(), JSONRPCMessage::Error(error))
                        }
                    };
                    outgoing.notify_client_response(id, message).await;
                }
            }
        }
    }

    /// Run one request to completion and produce its reply. Shared by the
    /// single-request and batch paths.
    async fn evaluate_request(
        &self,
        outgoing: &Arc<OutgoingMessageSender>,
        request: JSONRPCRequest,
    ) -> JSONRPCBatchResponseItem {
        let JSONRPCRequest {
            id, method, params, ..
        } = request;

        if self.config.strict
            && !self.initialized.load(Ordering::SeqCst)
            && method != InitializeRequest::METHOD
            && method != PingRequest::METHOD
        {
            let error = Error::invalid_request("Server is not initialized");
            warn!("rejecting {method} before initialization");
            return error_reply(id, error);
        }

        if method == InitializeRequest::METHOD {
            return self.handle_initialize(outgoing, id, params).await;
        }
        if method == PingRequest::METHOD {
            debug!("ping");
            return response_reply(id, Value::Object(serde_json::Map::new()));
        }

        let handler = self.methods.lock().await.get(&method).cloned();
        match handler {
            None => error_reply(id, Error::MethodNotFound(Some(method))),
            Some(handler) => match handler(params).await {
                Ok(result) => response_reply(id, result),
                Err(error) => {
                    error!("handler for {method} failed: {error}");
                    error_reply(id, error)
                }
            },
        }
    }

    async fn handle_initialize(
        &self,
        outgoing: &Arc<OutgoingMessageSender>,
        id: RequestId,
        params: Option<Value>,
    ) -> JSONRPCBatchResponseItem {
        if self.initialized.load(Ordering::SeqCst) {
            return error_reply(id, Error::invalid_request("initialize called more than once"));
        }
        let params: InitializeRequestParams = match params_from_value(params) {
            Ok(params) => params,
            Err(err) => return error_reply(id, Error::invalid_params(err.to_string())),
        };
        if params.protocol_version != MCP_SCHEMA_VERSION {
            return error_reply(
                id,
                Error::invalid_request(format!(
                    "unsupported protocol version: {}",
                    params.protocol_version
                )),
            );
        }
        if let Some(hook) = &*self.init_hook.lock().await
            && let Err(error) = hook(&params.client_info, &params.capabilities)
        {
            error!("initialize hook rejected client: {error}");
            return error_reply(id, error);
        }

        info!(
            "initialized by {} {}",
            params.client_info.name, params.client_info.version
        );
        *self.client_info.lock().await = Some(params.client_info);
        *self.client_capabilities.lock().await = Some(params.capabilities);
        *self.negotiated_version.lock().await = Some(params.protocol_version.clone());
        self.initialized.store(true, Ordering::SeqCst);

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.lock().await.clone(),
        };

        // Announce readiness shortly after the response hits the wire.
        let outgoing = outgoing.clone();
        tokio::spawn(async move {
            time::sleep(INITIALIZED_NOTIFICATION_DELAY).await;
            outgoing
                .send_notification(InitializedNotification::METHOD, None)
                .await;
        });

        match result_to_value(&result) {
            Ok(value) => response_reply(id, value),
            Err(err) => error_reply(
                id,
                Error::internal_error(format!("failed to encode initialize result: {err}")),
            ),
        }
    }

    async fn process_notification(&self, notification: JSONRPCNotification) {
        if self.config.strict
            && !self.initialized.load(Ordering::SeqCst)
            && notification.method != InitializedNotification::METHOD
        {
            error!(
                "dropping notification {} received before initialization",
                notification.method
            );
            return;
        }
        let handlers: Vec<NotificationHandlerFn> = {
            let registry = self.notification_handlers.lock().await;
            match registry.get(&notification.method) {
                Some(handlers) => handlers.clone(),
                None => {
                    debug!("no handlers registered for {}", notification.method);
                    return;
                }
            }
        };
        for handler in handlers {
            if let Err(err) = handler(notification.params.clone()).await {
                error!(
                    "notification handler for {} failed: {err}",
                    notification.method
                );
            }
        }
    }

    /// Dispatch every element of an inbound batch, then write the
    /// collected replies back as one array.
    async fn process_batch(
        &self,
        outgoing: &Arc<OutgoingMessageSender>,
        items: Vec<JSONRPCBatchRequestItem>,
    ) {
        let mut replies = Vec::new();
        for item in items {
            match item {
                JSONRPCBatchRequestItem::Request(request) => {
                    replies.push(self.evaluate_request(outgoing, request).await);
                }
                JSONRPCBatchRequestItem::Notification(notification) => {
                    self.process_notification(notification).await;
                }
            }
        }
        if !replies.is_empty() {
            outgoing.send_batch_response(replies).await;
        }
    }
}

fn response_reply(id: RequestId, result: Value) -> JSONRPCBatchResponseItem {
    JSONRPCBatchResponseItem::Response(JSONRPCResponse {
        jsonrpc: JsonRpcVersion,
        id,
        result,
    })
}

fn error_reply(id: RequestId, error: Error) -> JSONRPCBatchResponseItem {
    JSONRPCBatchResponseItem::Error(JSONRPCError {
        jsonrpc: JsonRpcVersion,
        id,
        error: error.into(),
    })
}

fn recover_request_id(raw: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(raw).ok()?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}

async fn run_receive_loop(
    shared: Arc<ServerShared>,
    transport: Arc<dyn Transport>,
    outgoing: Arc<OutgoingMessageSender>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = transport.receive() => frame,
        };
        match frame {
            Ok(raw) => shared.handle_frame(&outgoing, &raw).await,
            Err(err) if err.is_would_block() => time::sleep(RETRY_DELAY).await,
            Err(TransportError::Closed) => {
                info!("transport closed; stopping receive loop");
                break;
            }
            Err(err) => {
                error!("transport receive failed: {err}");
                break;
            }
        }
    }
    debug!("server receive loop exited");
}

async fn run_writer_loop(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<OutgoingMessage>,
) {
    while let Some(outgoing_message) = rx.recv().await {
        let message: JSONRPCMessage = outgoing_message.into();
        match serde_json::to_string(&message) {
            Ok(json) => {
                if let Err(err) = transport.send(json).await {
                    error!("failed to write outbound frame: {err}");
                    break;
                }
            }
            Err(err) => error!("failed to serialize outbound message: {err}"),
        }
    }
    debug!("server writer loop exited");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn request_id_is_recovered_from_undecodable_frames() {
        assert_eq!(
            recover_request_id(r#"{"jsonrpc":"2.0","id":7}"#),
            Some(RequestId::Integer(7))
        );
        assert_eq!(
            recover_request_id(r#"{"jsonrpc":"2.0","id":"abc"}"#),
            Some(RequestId::String("abc".to_string()))
        );
        assert_eq!(recover_request_id("not json"), None);
        assert_eq!(recover_request_id(r#"{"jsonrpc":"2.0"}"#), None);
    }
}
