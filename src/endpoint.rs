use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Connection;
use crate::domains::message::Message;
use crate::error::Result;
use crate::interfaces::transport::Transport;
use crate::services::gossip::SubPubTransport;
use crate::services::http::HttpTransport;

pub const HTTP_ENDPOINT_ID: &str = "httpws";
pub const SUBPUB_ENDPOINT_ID: &str = "subpub";

/// A started transport together with the id it is registered under in the router.
#[derive(Clone)]
pub struct Endpoint {
    pub id: String,
    pub transport: Arc<dyn Transport>,
}

impl Endpoint {
    /// HTTP and WebSocket endpoint. Every namespace becomes a URL path.
    pub async fn http(
        connection: &Connection,
        namespaces: &[String],
        inbound: mpsc::Sender<Message>,
    ) -> Result<Self> {
        Self::start(HTTP_ENDPOINT_ID, HttpTransport::new(), connection, namespaces, inbound).await
    }

    /// Pub/sub endpoint. Only the first namespace is carried.
    pub async fn subpub(
        connection: &Connection,
        namespaces: &[String],
        inbound: mpsc::Sender<Message>,
    ) -> Result<Self> {
        let namespace = namespaces.first().cloned().unwrap_or_default();
        Self::start(
            SUBPUB_ENDPOINT_ID,
            SubPubTransport::new(),
            connection,
            &[namespace],
            inbound,
        )
        .await
    }

    /// Initializes `transport`, registers the namespaces and spawns its listen task.
    pub async fn start<T>(
        id: &str,
        mut transport: T,
        connection: &Connection,
        namespaces: &[String],
        inbound: mpsc::Sender<Message>,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        transport.init(connection).await?;
        for namespace in namespaces {
            transport.add_namespace(namespace)?;
        }
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let listener = transport.clone();
        tokio::spawn(async move { listener.listen(inbound).await });
        info!("endpoint {id} started: {}", transport.describe());
        Ok(Self {
            id: id.to_string(),
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::MemoryTransport;

    #[tokio::test]
    async fn start_registers_namespaces_and_listens() {
        let memory = MemoryTransport::new();
        let (tx, mut rx) = mpsc::channel(4);
        let endpoint = Endpoint::start(
            "memory",
            memory.clone(),
            &Connection::default(),
            &["/main".to_string()],
            tx,
        )
        .await
        .unwrap();
        assert_eq!(endpoint.id, "memory");
        assert_eq!(memory.namespaces(), vec!["/main".to_string()]);

        let _reply = memory.inject("/main", b"{}".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().namespace, "/main");
    }

    #[tokio::test]
    async fn http_endpoint_rejects_bad_namespace() {
        let (tx, _rx) = mpsc::channel(4);
        let connection = Connection {
            address: Some("127.0.0.1".to_string()),
            port: Some(0),
            ..Connection::default()
        };
        assert!(Endpoint::http(&connection, &["main".to_string()], tx.clone())
            .await
            .is_err());
        let endpoint = Endpoint::http(&connection, &["/main".to_string()], tx)
            .await
            .unwrap();
        assert_eq!(endpoint.id, HTTP_ENDPOINT_ID);
        assert_eq!(endpoint.transport.connection_type(), "HTTPWS");
    }

    #[tokio::test]
    async fn subpub_endpoint_needs_group_key() {
        let (tx, _rx) = mpsc::channel(4);
        assert!(Endpoint::subpub(&Connection::default(), &[], tx).await.is_err());
    }
}
