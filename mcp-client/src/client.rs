use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::BoxFuture;
use mcp_transport::Transport;
use mcp_transport::TransportError;
use mcp_types::CallToolRequest;
use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::ClientCapabilities;
use mcp_types::Error;
use mcp_types::GetPromptRequest;
use mcp_types::GetPromptRequestParams;
use mcp_types::GetPromptResult;
use mcp_types::Implementation;
use mcp_types::InitializeRequest;
use mcp_types::InitializeRequestParams;
use mcp_types::InitializeResult;
use mcp_types::JSONRPCBatchResponseItem;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::JsonRpcVersion;
use mcp_types::ListPromptsRequest;
use mcp_types::ListPromptsResult;
use mcp_types::ListResourcesRequest;
use mcp_types::ListResourcesResult;
use mcp_types::ListToolsRequest;
use mcp_types::ListToolsResult;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::ModelContextProtocolNotification;
use mcp_types::ModelContextProtocolRequest;
use mcp_types::PaginatedRequestParams;
use mcp_types::PingRequest;
use mcp_types::ReadResourceRequest;
use mcp_types::ReadResourceRequestParams;
use mcp_types::ReadResourceResult;
use mcp_types::RequestId;
use mcp_types::ServerCapabilities;
use mcp_types::SubscribeRequest;
use mcp_types::SubscribeRequestParams;
use mcp_types::params_from_value;
use mcp_types::result_from_value;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Back-off applied when the transport reports a transient
/// "temporarily unavailable" read failure.
const RETRY_DELAY: Duration = Duration::from_millis(10);

pub(crate) type PendingSender = oneshot::Sender<JSONRPCMessage>;

type NotificationHandlerFn =
    Arc<dyn Fn(Option<serde_json::Value>) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientConfig {
    /// Enforce lifecycle and capability preconditions locally: gated
    /// requests fail with `MethodNotFound` before any bytes are written
    /// when the server never advertised the capability. In lenient mode
    /// the server's own response carries the error instead.
    pub strict: bool,
}

/// A client peer on one MCP connection.
///
/// All methods take `&self`: the client is internally synchronized and is
/// normally shared behind an `Arc` between the caller and its receive
/// task.
pub struct McpClient {
    client_info: Implementation,
    capabilities: ClientCapabilities,
    config: ClientConfig,
    shared: Arc<ClientShared>,
    receive_task: Mutex<Option<ReceiveTask>>,
}

struct ReceiveTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the public API and the receive task.
pub(crate) struct ClientShared {
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Map of `request.id -> oneshot::Sender` used to route responses back
    /// to the originating caller.
    pending: Mutex<HashMap<RequestId, PendingSender>>,
    notification_handlers: Mutex<HashMap<String, Vec<NotificationHandlerFn>>>,
    server_capabilities: Mutex<Option<ServerCapabilities>>,
    server_info: Mutex<Option<Implementation>>,
    negotiated_version: Mutex<Option<String>>,
    initialized: AtomicBool,
}

impl McpClient {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: Option<ClientCapabilities>,
        config: ClientConfig,
    ) -> Self {
        Self {
            client_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            capabilities: capabilities.unwrap_or_default(),
            config,
            shared: Arc::new(ClientShared {
                transport: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                notification_handlers: Mutex::new(HashMap::new()),
                server_capabilities: Mutex::new(None),
                server_info: Mutex::new(None),
                negotiated_version: Mutex::new(None),
                initialized: AtomicBool::new(false),
            }),
            receive_task: Mutex::new(None),
        }
    }

    /// Take ownership of `transport`, open it, and start the receive task.
    pub async fn connect(&self, transport: impl Transport) -> Result<(), Error> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let mut slot = self.shared.transport.lock().await;
        if slot.is_some() {
            return Err(Error::internal_error("McpClient is already connected"));
        }
        transport.connect().await.map_err(transport_error)?;
        *slot = Some(transport.clone());
        drop(slot);

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_receive_loop(
            self.shared.clone(),
            transport,
            token.clone(),
        ));
        *self.receive_task.lock().await = Some(ReceiveTask { token, handle });
        Ok(())
    }

    /// Perform the Initialize exchange and record the server's
    /// capabilities, info, and negotiated protocol version.
    pub async fn initialize(&self) -> Result<InitializeResult, Error> {
        let params = InitializeRequestParams {
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };
        let result = self.send_request::<InitializeRequest>(&params).await?;
        if result.protocol_version != MCP_SCHEMA_VERSION {
            return Err(Error::invalid_request(format!(
                "unsupported protocol version: {}",
                result.protocol_version
            )));
        }
        *self.shared.server_capabilities.lock().await = Some(result.capabilities.clone());
        *self.shared.server_info.lock().await = Some(result.server_info.clone());
        *self.shared.negotiated_version.lock().await = Some(result.protocol_version.clone());
        self.shared.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Send an arbitrary MCP request and await the typed result.
    pub async fn send_request<R>(&self, params: &R::Params) -> Result<R::Result, Error>
    where
        R: ModelContextProtocolRequest,
    {
        let transport = self.shared.transport_handle().await?;
        // Register in the pending map *before* sending the message so a
        // response that arrives immediately cannot be lost.
        let (id, rx) = self.shared.install_pending().await;
        let request = JSONRPCRequest::new::<R>(id.clone(), params)
            .map_err(|err| Error::internal_error(format!("failed to encode request: {err}")))?;
        let json = serialize_message(JSONRPCMessage::Request(request))?;

        if let Err(err) = transport.send(json).await {
            self.shared.remove_pending(&id).await;
            return Err(send_error(err));
        }

        match rx.await {
            Ok(reply) => decode_reply::<R>(reply),
            Err(_) => {
                self.shared.remove_pending(&id).await;
                Err(Error::internal_error(
                    "response channel closed before a reply was received",
                ))
            }
        }
    }

    pub async fn send_notification<N>(&self, params: &N::Params) -> Result<(), Error>
    where
        N: ModelContextProtocolNotification,
    {
        let transport = self.shared.transport_handle().await?;
        let notification = JSONRPCNotification::new::<N>(params)
            .map_err(|err| Error::internal_error(format!("failed to encode notification: {err}")))?;
        let json = serialize_message(JSONRPCMessage::Notification(notification))?;
        transport.send(json).await.map_err(send_error)
    }

    /// Register a handler for notification `N`. Handlers for the same
    /// method run sequentially in registration order; a handler error is
    /// logged and does not stop the remaining handlers.
    pub async fn on_notification<N, F, Fut>(&self, handler: F)
    where
        N: ModelContextProtocolNotification,
        F: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let wrapped: NotificationHandlerFn = Arc::new(
            move |params| -> BoxFuture<'static, Result<(), Error>> {
                match params_from_value::<N::Params>(params) {
                    Ok(params) => Box::pin(handler(params)),
                    Err(err) => Box::pin(std::future::ready(Err(Error::invalid_params(
                        err.to_string(),
                    )))),
                }
            },
        );
        self.shared
            .notification_handlers
            .lock()
            .await
            .entry(N::METHOD.to_string())
            .or_default()
            .push(wrapped);
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.send_request::<PingRequest>(&()).await
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult, Error> {
        self.ensure_capability("Tools", |caps| caps.tools.is_some())
            .await?;
        self.send_request::<ListToolsRequest>(&PaginatedRequestParams { cursor })
            .await
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, Error> {
        self.ensure_capability("Tools", |caps| caps.tools.is_some())
            .await?;
        self.send_request::<CallToolRequest>(&CallToolRequestParams { name, arguments })
            .await
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult, Error> {
        self.ensure_capability("Prompts", |caps| caps.prompts.is_some())
            .await?;
        self.send_request::<ListPromptsRequest>(&PaginatedRequestParams { cursor })
            .await
    }

    pub async fn get_prompt(
        &self,
        name: String,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult, Error> {
        self.ensure_capability("Prompts", |caps| caps.prompts.is_some())
            .await?;
        self.send_request::<GetPromptRequest>(&GetPromptRequestParams { name, arguments })
            .await
    }

    pub async fn list_resources(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, Error> {
        self.ensure_capability("Resources", |caps| caps.resources.is_some())
            .await?;
        self.send_request::<ListResourcesRequest>(&PaginatedRequestParams { cursor })
            .await
    }

    pub async fn read_resource(&self, uri: String) -> Result<ReadResourceResult, Error> {
        self.ensure_capability("Resources", |caps| caps.resources.is_some())
            .await?;
        self.send_request::<ReadResourceRequest>(&ReadResourceRequestParams { uri })
            .await
    }

    pub async fn subscribe_to_resource(&self, uri: String) -> Result<(), Error> {
        self.ensure_capability("Resource subscription", |caps| {
            caps.resources
                .as_ref()
                .is_some_and(|resources| resources.subscribe == Some(true))
        })
        .await?;
        self.send_request::<SubscribeRequest>(&SubscribeRequestParams { uri })
            .await
    }

    /// Open a batch. Requests added to it are sent as a single JSON array
    /// in one transport write when [`RequestBatch::send`] is called.
    pub fn batch(&self) -> crate::RequestBatch<'_> {
        crate::RequestBatch::new(self)
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.shared.server_capabilities.lock().await.clone()
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.shared.server_info.lock().await.clone()
    }

    pub async fn negotiated_protocol_version(&self) -> Option<String> {
        self.shared.negotiated_version.lock().await.clone()
    }

    /// Stop the receive task, fail every outstanding request with
    /// `InternalError("Client disconnected")`, and release the transport.
    pub async fn disconnect(&self) -> Result<(), Error> {
        if let Some(task) = self.receive_task.lock().await.take() {
            task.token.cancel();
            let _ = task.handle.await;
        }
        self.shared.drain_pending("Client disconnected").await;
        if let Some(transport) = self.shared.transport.lock().await.take() {
            let _ = transport.disconnect().await;
        }
        self.shared.initialized.store(false, Ordering::SeqCst);
        *self.shared.server_capabilities.lock().await = None;
        *self.shared.server_info.lock().await = None;
        *self.shared.negotiated_version.lock().await = None;
        Ok(())
    }

    async fn ensure_capability(
        &self,
        feature: &str,
        supported: impl FnOnce(&ServerCapabilities) -> bool,
    ) -> Result<(), Error> {
        if !self.config.strict {
            return Ok(());
        }
        let capabilities = self.shared.server_capabilities.lock().await;
        if capabilities.as_ref().is_some_and(supported) {
            Ok(())
        } else {
            Err(Error::method_not_found(format!(
                "{feature} is not supported by the server"
            )))
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ClientShared> {
        &self.shared
    }
}

impl ClientShared {
    pub(crate) async fn transport_handle(&self) -> Result<Arc<dyn Transport>, Error> {
        self.transport
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::internal_error("McpClient is not initialized"))
    }

    /// Allocate a fresh random request id and install its single-shot
    /// resumption slot, atomically with respect to the pending table.
    pub(crate) async fn install_pending(&self) -> (RequestId, oneshot::Receiver<JSONRPCMessage>) {
        let mut pending = self.pending.lock().await;
        let id = loop {
            let candidate = RequestId::Integer(i64::from(rand::random::<u32>()));
            if !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        pending.insert(id.clone(), tx);
        (id, rx)
    }

    pub(crate) async fn remove_pending(&self, id: &RequestId) {
        self.pending.lock().await.remove(id);
    }

    pub(crate) async fn drain_pending(&self, reason: &str) {
        let entries: Vec<(RequestId, PendingSender)> =
            self.pending.lock().await.drain().collect();
        for (id, tx) in entries {
            let error = JSONRPCError {
                jsonrpc: JsonRpcVersion,
                id,
                error: Error::internal_error(reason).into(),
            };
            let _ = tx.send(JSONRPCMessage::Error(error));
        }
    }

    async fn handle_frame(&self, raw: &str) {
        let message = match serde_json::from_str::<JSONRPCMessage>(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("failed to decode inbound frame: {err}; frame = {raw}");
                return;
            }
        };
        match message {
            JSONRPCMessage::BatchResponse(items) => {
                for item in items {
                    match item {
                        JSONRPCBatchResponseItem::Response(response) => {
                            self.dispatch_response(response).await;
                        }
                        JSONRPCBatchResponseItem::Error(error) => {
                            self.dispatch_error(error).await;
                        }
                    }
                }
            }
            JSONRPCMessage::Response(response) => self.dispatch_response(response).await,
            JSONRPCMessage::Error(error) => self.dispatch_error(error).await,
            JSONRPCMessage::Notification(notification) => {
                self.dispatch_notification(notification).await;
            }
            JSONRPCMessage::Request(request) => {
                warn!("ignoring server-initiated request: {}", request.method);
            }
            JSONRPCMessage::BatchRequest(_) => {
                warn!("ignoring inbound request batch on client connection");
            }
        }
    }

    async fn dispatch_response(&self, response: JSONRPCResponse) {
        let tx = self.pending.lock().await.remove(&response.id);
        match tx {
            Some(tx) => {
                // Ignore send errors: the awaiting task may have been
                // cancelled, which leaves resumption a no-op.
                let _ = tx.send(JSONRPCMessage::Response(response));
            }
            None => warn!("no pending request found for response id {}", response.id),
        }
    }

    async fn dispatch_error(&self, error: JSONRPCError) {
        let tx = self.pending.lock().await.remove(&error.id);
        match tx {
            Some(tx) => {
                if tx.send(JSONRPCMessage::Error(error)).is_err() {
                    warn!("pending awaiter dropped before error delivery");
                }
            }
            None => warn!("no pending request found for error id {}", error.id),
        }
    }

    async fn dispatch_notification(&self, notification: JSONRPCNotification) {
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
                error!("notification handler for {} failed: {err}", notification.method);
            }
        }
    }
}

async fn run_receive_loop(
    shared: Arc<ClientShared>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = transport.receive() => frame,
        };
        match frame {
            Ok(raw) => shared.handle_frame(&raw).await,
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
    debug!("client receive loop exited");
}

pub(crate) fn serialize_message(message: JSONRPCMessage) -> Result<String, Error> {
    serde_json::to_string(&message)
        .map_err(|err| Error::internal_error(format!("failed to serialize message: {err}")))
}

pub(crate) fn decode_reply<R>(reply: JSONRPCMessage) -> Result<R::Result, Error>
where
    R: ModelContextProtocolRequest,
{
    match reply {
        JSONRPCMessage::Response(JSONRPCResponse { result, .. }) => result_from_value(result)
            .map_err(|err| Error::ParseError(Some(format!("failed to decode result: {err}")))),
        JSONRPCMessage::Error(error) => Err(error.error.into()),
        other => Err(Error::internal_error(format!(
            "unexpected message variant in reply path: {other:?}"
        ))),
    }
}

pub(crate) fn transport_error(err: TransportError) -> Error {
    Error::TransportError(err.to_string())
}

pub(crate) fn send_error(err: TransportError) -> Error {
    match err {
        TransportError::SessionExpired => Error::internal_error("session expired"),
        other => Error::TransportError(other.to_string()),
    }
}
