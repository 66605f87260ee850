use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{Connection, DEFAULT_HTTP_PORT, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::domains::message::Message;
use crate::error::{Result, RouterError};
use crate::interfaces::transport::{MessageContext, Transport};

/// HTTP and WebSocket transport. Every registered namespace is served as a
/// path: POST bodies and websocket frames on that path become messages.
pub struct HttpTransport {
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Message>>>,
    namespaces: Arc<RwLock<BTreeSet<String>>>,
    request_timeout: Duration,
    local_addr: Option<SocketAddr>,
}

#[derive(Clone)]
struct HttpState {
    namespaces: Arc<RwLock<BTreeSet<String>>>,
    inbound: mpsc::Sender<Message>,
    request_timeout: Duration,
}

impl HttpState {
    fn has_namespace(&self, path: &str) -> bool {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

pub struct HttpContext {
    reply: Mutex<Option<oneshot::Sender<Bytes>>>,
}

#[async_trait]
impl MessageContext for HttpContext {
    fn connection_type(&self) -> &str {
        "HTTP"
    }

    async fn send(&self, message: Message) -> Result<()> {
        let sender = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RouterError::Transport("http reply already sent".to_string()))?;
        let mut body = Vec::with_capacity(message.data.len() + 1);
        body.extend_from_slice(&message.data);
        body.push(b'\n');
        sender
            .send(Bytes::from(body))
            .map_err(|_| RouterError::Transport("http connection closed".to_string()))
    }
}

pub struct WsContext {
    sender: mpsc::Sender<Bytes>,
}

#[async_trait]
impl MessageContext for WsContext {
    fn connection_type(&self) -> &str {
        "WebSocket"
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message.data)
            .await
            .map_err(|_| RouterError::Transport("websocket closed".to_string()))
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(Some(inbound_rx)),
            namespaces: Arc::new(RwLock::new(BTreeSet::new())),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            local_addr: None,
        }
    }

    /// The axum service behind the listener, usable without binding a socket.
    pub fn router(&self) -> Router {
        let state = HttpState {
            namespaces: self.namespaces.clone(),
            inbound: self.inbound_tx.clone(),
            request_timeout: self.request_timeout,
        };
        Router::new().fallback(handle_request).with_state(state)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_request(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    ws: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    if !state.has_namespace(&path) {
        return (StatusCode::NOT_FOUND, "namespace not found\n").into_response();
    }
    if let Some(ws) = ws {
        return ws.on_upgrade(move |socket| serve_socket(socket, path, state));
    }
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "use POST or a websocket\n").into_response();
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let context = HttpContext {
        reply: Mutex::new(Some(reply_tx)),
    };
    let message = Message::new(path, body, Some(Arc::new(context)));
    if state.inbound.send(message).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "router unavailable\n").into_response();
    }

    // Hold the connection open until a reply is sent or the request times out.
    match tokio::time::timeout(state.request_timeout, reply_rx).await {
        Ok(Ok(data)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            data,
        )
            .into_response(),
        Ok(Err(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "request abandoned\n").into_response(),
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "request timed out\n").into_response(),
    }
}

async fn serve_socket(socket: WebSocket, namespace: String, state: HttpState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        while let Some(data) = out_rx.recv().await {
            let text = String::from_utf8_lossy(&data).into_owned();
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let context: Arc<dyn MessageContext> = Arc::new(WsContext { sender: out_tx });
    while let Some(frame) = stream.next().await {
        let data = match frame {
            Ok(WsMessage::Text(text)) => Bytes::from(text),
            Ok(WsMessage::Binary(data)) => Bytes::from(data),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!("websocket read failed: {err}");
                break;
            }
        };
        let message = Message::new(namespace.clone(), data, Some(context.clone()));
        if state.inbound.send(message).await.is_err() {
            break;
        }
    }
    debug!("websocket on {namespace} closed");
}

#[async_trait]
impl Transport for HttpTransport {
    async fn init(&mut self, connection: &Connection) -> Result<()> {
        self.request_timeout = connection.request_timeout();
        let addr = format!(
            "{}:{}",
            connection.listen_host(),
            connection.port.unwrap_or(DEFAULT_HTTP_PORT)
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RouterError::Transport(format!("cannot bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        self.local_addr = Some(local_addr);
        info!("http transport listening on {local_addr}");

        let app = self.router();
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!("http server stopped: {err}");
            }
        });
        Ok(())
    }

    async fn listen(&self, receiver: mpsc::Sender<Message>) {
        let Some(mut inbound) = self.inbound_rx.lock().await.take() else {
            warn!("http transport is already listening");
            return;
        };
        while let Some(message) = inbound.recv().await {
            if receiver.send(message).await.is_err() {
                break;
            }
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        match message.context.clone() {
            Some(context) => context.send(message).await,
            None => Err(RouterError::Transport(
                "http transport cannot send without a reply context".to_string(),
            )),
        }
    }

    async fn send_unicast(&self, _address: &str, message: Message) -> Result<()> {
        self.send(message).await
    }

    fn add_namespace(&self, namespace: &str) -> Result<()> {
        if !namespace.starts_with('/') {
            return Err(RouterError::Transport(
                "namespace on http must start with /".to_string(),
            ));
        }
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string());
        Ok(())
    }

    async fn add_peer(&self, _peer: &str) -> Result<()> {
        Ok(())
    }

    async fn set_bootnodes(&self, _bootnodes: Vec<String>) {}

    fn address(&self) -> String {
        self.local_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unbound".to_string())
    }

    fn connection_type(&self) -> &str {
        "HTTPWS"
    }

    fn describe(&self) -> String {
        let namespaces = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        format!("http+ws on {} [{}]", self.address(), namespaces)
    }
}
