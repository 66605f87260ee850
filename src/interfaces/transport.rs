use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Connection;
use crate::domains::message::Message;
use crate::error::Result;

/// Reply hook bound to exactly one inbound message (an HTTP exchange, a
/// websocket, a remote peer). The transport that received the message creates
/// it; whoever handles the request uses it to answer.
#[async_trait]
pub trait MessageContext: Send + Sync {
    fn connection_type(&self) -> &str;
    async fn send(&self, message: Message) -> Result<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One-time setup: bind sockets, join the pub/sub group.
    async fn init(&mut self, connection: &Connection) -> Result<()>;
    /// Pushes a message on `receiver` for every inbound network event. Does not
    /// return while the transport is alive.
    async fn listen(&self, receiver: mpsc::Sender<Message>);
    async fn send(&self, message: Message) -> Result<()>;
    async fn send_unicast(&self, address: &str, message: Message) -> Result<()>;
    fn add_namespace(&self, namespace: &str) -> Result<()>;
    async fn add_peer(&self, peer: &str) -> Result<()>;
    async fn set_bootnodes(&self, bootnodes: Vec<String>);
    fn address(&self) -> String;
    fn connection_type(&self) -> &str;
    fn describe(&self) -> String;
}
