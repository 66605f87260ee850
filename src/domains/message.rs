use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::crypto::{Address, AuthorizedSet, SignKeys};
use crate::error::{Result, RouterError};
use crate::interfaces::message::MessageApi;
use crate::interfaces::transport::MessageContext;
use crate::services::reply::build_reply;

/// A payload received from (or going out to) a transport.
#[derive(Clone)]
pub struct Message {
    pub data: Bytes,
    pub timestamp: i64,
    pub namespace: String,
    pub context: Option<Arc<dyn MessageContext>>,
}

impl Message {
    pub fn new(
        namespace: impl Into<String>,
        data: impl Into<Bytes>,
        context: Option<Arc<dyn MessageContext>>,
    ) -> Self {
        Self {
            data: data.into(),
            timestamp: now_ts(),
            namespace: namespace.into(),
            context,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("data", &String::from_utf8_lossy(&self.data))
            .field("timestamp", &self.timestamp)
            .field("namespace", &self.namespace)
            .field(
                "context",
                &self.context.as_ref().map(|ctx| ctx.connection_type().to_string()),
            )
            .finish()
    }
}

/// Outer wire frame. `request` keeps the exact bytes the peer sent, since the
/// signature covers them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub request: Box<RawValue>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub signature: String,
}

impl Envelope {
    pub fn request_bytes(&self) -> &[u8] {
        self.request.get().as_bytes()
    }
}

/// One admitted request, handed to the method handler.
pub struct RouterRequest<M> {
    pub message: M,
    pub method: String,
    pub namespace: String,
    pub id: String,
    pub authenticated: bool,
    pub private: bool,
    pub address: Option<Address>,
    pub signature_public_key: Option<String>,
    pub context: Option<Arc<dyn MessageContext>>,
    pub signer: Arc<SignKeys>,
    pub authorized: Arc<AuthorizedSet>,
}

impl<M: MessageApi> RouterRequest<M> {
    pub async fn send(&self, message: Message) -> Result<()> {
        match &self.context {
            Some(context) => context.send(message).await,
            None => Err(RouterError::Transport(format!(
                "no reply context for request {}",
                self.id
            ))),
        }
    }

    /// Stamps, signs and sends `response` back to the caller.
    pub async fn reply(&self, response: M) -> Result<()> {
        self.send(build_reply(response, self)).await
    }
}

impl<M: fmt::Debug> fmt::Debug for RouterRequest<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterRequest")
            .field("message", &self.message)
            .field("method", &self.method)
            .field("namespace", &self.namespace)
            .field("id", &self.id)
            .field("authenticated", &self.authenticated)
            .field("private", &self.private)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_keeps_raw_request_bytes() {
        let raw = r#"{"request":{"method":"hello", "id":"1234"},"id":"1234"}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.id, "1234");
        assert_eq!(envelope.signature, "");
        assert_eq!(
            envelope.request_bytes(),
            br#"{"method":"hello", "id":"1234"}"#
        );
    }

    #[test]
    fn envelope_without_request_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"id":"1"}"#).is_err());
    }

    #[test]
    fn message_debug_shows_connection_kind() {
        let message = Message::new("/main", b"{}".to_vec(), None);
        let debug = format!("{message:?}");
        assert!(debug.contains("/main"));
        assert!(debug.contains("None"));
        assert!(message.timestamp > 0);
    }
}
