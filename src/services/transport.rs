use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::config::Connection;
use crate::domains::message::Message;
use crate::error::{Result, RouterError};
use crate::interfaces::transport::{MessageContext, Transport};

/// Channel backed transport for embedding and tests. Requests are pushed with
/// [`MemoryTransport::inject`]; each one gets a context whose reply lands on
/// the returned receiver. Clones share the same channels.
#[derive(Clone)]
pub struct MemoryTransport {
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Message>>>>,
    namespaces: Arc<RwLock<BTreeSet<String>>>,
    broadcast_tx: broadcast::Sender<Message>,
}

pub struct MemoryContext {
    reply: Mutex<Option<oneshot::Sender<Message>>>,
}

impl MemoryContext {
    pub fn pair() -> (Self, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                reply: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl MessageContext for MemoryContext {
    fn connection_type(&self) -> &str {
        "memory"
    }

    async fn send(&self, message: Message) -> Result<()> {
        let sender = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RouterError::Transport("reply already sent".to_string()))?;
        sender
            .send(message)
            .map_err(|_| RouterError::Transport("caller went away".to_string()))
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(64);
        Self {
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(Some(inbound_rx))),
            namespaces: Arc::new(RwLock::new(BTreeSet::new())),
            broadcast_tx,
        }
    }

    pub async fn inject(
        &self,
        namespace: &str,
        data: impl Into<Bytes>,
    ) -> Result<oneshot::Receiver<Message>> {
        let (context, reply) = MemoryContext::pair();
        let message = Message::new(namespace, data, Some(Arc::new(context)));
        self.inbound_tx
            .send(message)
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        Ok(reply)
    }

    /// Receives messages sent without a reply context.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.broadcast_tx.subscribe()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn init(&mut self, _connection: &Connection) -> Result<()> {
        Ok(())
    }

    async fn listen(&self, receiver: mpsc::Sender<Message>) {
        let Some(mut inbound) = self.inbound_rx.lock().await.take() else {
            warn!("memory transport is already listening");
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
            None => {
                let _ = self.broadcast_tx.send(message);
                Ok(())
            }
        }
    }

    async fn send_unicast(&self, _address: &str, message: Message) -> Result<()> {
        self.send(message).await
    }

    fn add_namespace(&self, namespace: &str) -> Result<()> {
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
        "memory".to_string()
    }

    fn connection_type(&self) -> &str {
        "memory"
    }

    fn describe(&self) -> String {
        format!("memory transport, namespaces {:?}", self.namespaces())
    }
}
