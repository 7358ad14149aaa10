//! HTTP+SSE transport.
//!
//! Outbound frames are POSTed as JSON to the endpoint URL; inbound frames
//! arrive as server-sent events on a long-lived GET with
//! `Accept: text/event-stream`. The `endpoint` SSE event is a vendor
//! extension to plain SSE: its `data` is a path resolved against the
//! stream origin to obtain the POST URL. Session affinity rides on the
//! `Mcp-Session-Id` header, SSE resumption on `Last-Event-ID`.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::Transport;
use crate::TransportError;

/// How long to wait for the server's `endpoint` event before giving up on
/// the connection attempt.
const ENDPOINT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(45);

/// Delay between SSE reconnect attempts when the server does not supply a
/// `retry` field.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 128;

const MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");
const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

pub struct SseTransportBuilder {
    stream_url: String,
    post_url: Option<String>,
    bearer_token: Option<String>,
    endpoint_timeout: Duration,
}

impl SseTransportBuilder {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            post_url: None,
            bearer_token: None,
            endpoint_timeout: ENDPOINT_DISCOVERY_TIMEOUT,
        }
    }

    /// Skip endpoint discovery and POST to a fixed URL.
    pub fn post_url(mut self, url: impl Into<String>) -> Self {
        self.post_url = Some(url.into());
        self
    }

    /// Send `Authorization: Bearer <token>` on every request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SseTransport, TransportError> {
        let stream_url = Url::parse(&self.stream_url)
            .map_err(|err| TransportError::Setup(format!("invalid SSE stream URL: {err}")))?;
        let configured_post_url = match self.post_url {
            Some(url) => Some(
                Url::parse(&url)
                    .map_err(|err| TransportError::Setup(format!("invalid POST URL: {err}")))?,
            ),
            None => None,
        };
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Setup(format!("failed to build HTTP client: {err}")))?;
        Ok(SseTransport {
            http,
            stream_url,
            configured_post_url,
            bearer_token: self.bearer_token,
            endpoint_timeout: self.endpoint_timeout,
            session: Mutex::new(SessionState::default()),
            incoming: Mutex::new(None),
            shutdown: Mutex::new(None),
        })
    }
}

#[derive(Default)]
struct SessionState {
    post_url: Option<Url>,
    session_id: Option<String>,
}

pub struct SseTransport {
    http: reqwest::Client,
    stream_url: Url,
    configured_post_url: Option<Url>,
    bearer_token: Option<String>,
    endpoint_timeout: Duration,
    session: Mutex<SessionState>,
    incoming: Mutex<Option<mpsc::Receiver<String>>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl SseTransport {
    pub fn builder(stream_url: impl Into<String>) -> SseTransportBuilder {
        SseTransportBuilder::new(stream_url)
    }

    fn base_headers(&self, session_id: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.bearer_token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(session_id) = session_id
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert(MCP_SESSION_ID, value);
        }
        headers
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (endpoint_tx, mut endpoint_rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let reader = SseReader {
            http: self.http.clone(),
            stream_url: self.stream_url.clone(),
            headers: self.base_headers(None),
            frame_tx,
            endpoint_tx,
            token: token.clone(),
        };
        tokio::spawn(reader.run());

        *self.incoming.lock().await = Some(frame_rx);
        *self.shutdown.lock().await = Some(token);

        let post_url = match &self.configured_post_url {
            Some(url) => url.clone(),
            None => time::timeout(self.endpoint_timeout, endpoint_rx.recv())
                .await
                .map_err(|_| {
                    TransportError::Setup("timed out waiting for endpoint event".to_string())
                })?
                .ok_or_else(|| {
                    TransportError::Setup("SSE stream ended before endpoint event".to_string())
                })?,
        };
        self.session.lock().await.post_url = Some(post_url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(token) = self.shutdown.lock().await.take() {
            token.cancel();
        }
        self.incoming.lock().await.take();
        *self.session.lock().await = SessionState::default();
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let (post_url, session_id) = {
            let session = self.session.lock().await;
            let post_url = session
                .post_url
                .clone()
                .ok_or(TransportError::NotConnected)?;
            (post_url, session.session_id.clone())
        };

        let response = self
            .http
            .post(post_url)
            .headers(self.base_headers(session_id.as_deref()))
            .header(CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND && session_id.is_some() {
            // The server no longer recognizes our session.
            self.session.lock().await.session_id = None;
            return Err(TransportError::SessionExpired);
        }
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "POST returned {}",
                response.status()
            )));
        }
        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID)
            .and_then(|value| value.to_str().ok())
        {
            self.session.lock().await.session_id = Some(session_id.to_string());
        }
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut guard = self.incoming.lock().await;
        let incoming = guard.as_mut().ok_or(TransportError::NotConnected)?;
        incoming.recv().await.ok_or(TransportError::Closed)
    }
}

struct SseReader {
    http: reqwest::Client,
    stream_url: Url,
    headers: HeaderMap,
    frame_tx: mpsc::Sender<String>,
    endpoint_tx: mpsc::Sender<Url>,
    token: CancellationToken,
}

impl SseReader {
    async fn run(self) {
        let mut last_event_id: Option<String> = None;
        let mut reconnect_delay = RECONNECT_DELAY;
        loop {
            if self.token.is_cancelled() {
                return;
            }

            let mut request = self
                .http
                .get(self.stream_url.clone())
                .headers(self.headers.clone())
                .header(ACCEPT, "text/event-stream");
            if let Some(id) = &last_event_id
                && let Ok(value) = HeaderValue::from_str(id)
            {
                request = request.header(LAST_EVENT_ID, value);
            }

            let attempt = async {
                match request.send().await {
                    Ok(response) => {
                        if let Err(err) = self
                            .process_stream(response, &mut last_event_id, &mut reconnect_delay)
                            .await
                        {
                            warn!("SSE stream error: {err}");
                        }
                    }
                    Err(err) => warn!("failed to establish SSE stream: {err}"),
                }
            };
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = attempt => {}
            }

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = time::sleep(reconnect_delay) => {}
            }
        }
    }

    async fn process_stream(
        &self,
        response: reqwest::Response,
        last_event_id: &mut Option<String>,
        reconnect_delay: &mut Duration,
    ) -> Result<(), TransportError> {
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "SSE stream returned {}",
                response.status()
            )));
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|err| TransportError::Http(err.to_string()))?;
            if !event.id.is_empty() {
                *last_event_id = Some(event.id.clone());
            }
            if let Some(retry) = event.retry {
                *reconnect_delay = retry;
            }
            match event.event.as_str() {
                "endpoint" => match resolve_endpoint(&self.stream_url, &event.data) {
                    Ok(endpoint) => {
                        debug!("SSE endpoint resolved: {endpoint}");
                        let _ = self.endpoint_tx.send(endpoint).await;
                    }
                    Err(err) => warn!("invalid endpoint event data {:?}: {err}", event.data),
                },
                _ => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if self.frame_tx.send(data.to_string()).await.is_err() {
                        // Receiver dropped; the transport is gone.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Resolve the `endpoint` event payload against the stream origin. The
/// payload is usually an absolute path (`/messages?session=…`) but a full
/// URL on the same origin is accepted too.
fn resolve_endpoint(stream_url: &Url, data: &str) -> Result<Url, TransportError> {
    stream_url
        .join(data.trim())
        .map_err(|err| TransportError::Setup(format!("bad endpoint path: {err}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn endpoint_path_is_appended_to_the_origin() {
        let stream_url = Url::parse("https://mcp.example.com/sse").expect("valid URL");
        let endpoint =
            resolve_endpoint(&stream_url, "/messages?sessionId=abc").expect("should resolve");
        assert_eq!(
            endpoint.as_str(),
            "https://mcp.example.com/messages?sessionId=abc"
        );
    }

    #[test]
    fn absolute_endpoint_urls_pass_through() {
        let stream_url = Url::parse("https://mcp.example.com/sse").expect("valid URL");
        let endpoint = resolve_endpoint(&stream_url, "https://mcp.example.com/rpc")
            .expect("should resolve");
        assert_eq!(endpoint.as_str(), "https://mcp.example.com/rpc");
    }

    #[test]
    fn builder_rejects_invalid_stream_url() {
        let err = SseTransport::builder("not a url").build().err();
        assert!(matches!(err, Some(TransportError::Setup(_))));
    }

    #[test]
    fn bearer_token_and_session_id_become_headers() {
        let transport = SseTransport::builder("https://mcp.example.com/sse")
            .bearer_token("jwt-token")
            .build()
            .expect("transport should build");
        let headers = transport.base_headers(Some("session-1"));
        assert_eq!(
            headers.get(AUTHORIZATION).map(|v| v.to_str().ok()),
            Some(Some("Bearer jwt-token"))
        );
        assert_eq!(
            headers.get(MCP_SESSION_ID).map(|v| v.to_str().ok()),
            Some(Some("session-1"))
        );
    }
}
