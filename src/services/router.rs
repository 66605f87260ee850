use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::crypto::{self, Address, AuthorizedSet, SignKeys, SIGNATURE_LENGTH};
use crate::domains::message::{Envelope, Message, RouterRequest};
use crate::error::{Result, RouterError};
use crate::interfaces::message::{MessageApi, MessageFactory};
use crate::interfaces::transport::Transport;
use crate::services::registry::{MethodHandler, MethodRegistry};
use crate::services::reply::build_error;

pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// A request refused before reaching a handler, with the id to answer to.
#[derive(Debug)]
pub struct Rejection {
    pub id: String,
    pub error: RouterError,
}

type Admitted<M> = (RouterRequest<M>, Arc<dyn MethodHandler<M>>);

pub struct Router<M: MessageApi> {
    transports: HashMap<String, Arc<dyn Transport>>,
    factory: MessageFactory<M>,
    methods: MethodRegistry<M>,
    inbound: mpsc::Receiver<Message>,
    signer: Arc<SignKeys>,
    authorized: Arc<AuthorizedSet>,
}

impl<M: MessageApi> Router<M> {
    pub fn new(
        inbound: mpsc::Receiver<Message>,
        transports: HashMap<String, Arc<dyn Transport>>,
        signer: Arc<SignKeys>,
        authorized: Arc<AuthorizedSet>,
        factory: MessageFactory<M>,
    ) -> Self {
        Self {
            transports,
            factory,
            methods: MethodRegistry::new(),
            inbound,
            signer,
            authorized,
        }
    }

    pub fn add_handler<H>(
        &mut self,
        namespace: &str,
        method: &str,
        handler: H,
        private: bool,
        skip_signature: bool,
    ) -> Result<()>
    where
        H: MethodHandler<M> + 'static,
    {
        debug!("adding new handler {method} for namespace {namespace}");
        if private && skip_signature {
            warn!("private method {namespace}/{method} skips signatures, its handler runs unauthenticated");
        }
        self.methods
            .register(namespace, method, Arc::new(handler), private, skip_signature)
    }

    pub fn add_transport(&mut self, id: &str, transport: Arc<dyn Transport>) {
        self.transports.insert(id.to_string(), transport);
    }

    pub fn transport(&self, id: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(id).cloned()
    }

    pub fn transports(&self) -> &HashMap<String, Arc<dyn Transport>> {
        &self.transports
    }

    pub fn add_auth_key(&self, address: Address) -> bool {
        self.authorized.add(address)
    }

    pub fn del_auth_key(&self, address: &Address) -> bool {
        self.authorized.remove(address)
    }

    pub fn authorized(&self) -> Arc<AuthorizedSet> {
        self.authorized.clone()
    }

    pub fn signer(&self) -> Arc<SignKeys> {
        self.signer.clone()
    }

    pub fn methods(&self) -> &MethodRegistry<M> {
        &self.methods
    }

    /// Drains the inbound channel until every transport has dropped its sender.
    pub async fn route(mut self) {
        if self.methods.is_empty() {
            warn!("router methods are not properly initialized");
            return;
        }
        info!(methods = self.methods.len(), "router started");
        while let Some(message) = self.inbound.recv().await {
            let _ = self.dispatch(message);
        }
        info!("inbound channel closed, router stopped");
    }

    /// Admits one message and spawns its handler, or answers it with an error
    /// reply. Returns once the admission decision is made; the handler's
    /// completion is not awaited.
    pub fn dispatch(&self, message: Message) -> Result<()> {
        debug!("got request: {}", String::from_utf8_lossy(&message.data));
        match self.admit(&message) {
            Ok((request, handler)) => {
                info!("api method {}/{}", request.namespace, request.method);
                tokio::spawn(async move {
                    handler.handle(request).await;
                });
                Ok(())
            }
            Err(rejection) => {
                self.send_error(&rejection.id, &rejection.error.to_string(), &message);
                Err(rejection.error)
            }
        }
    }

    pub fn admit(&self, message: &Message) -> std::result::Result<Admitted<M>, Rejection> {
        let envelope: Envelope = serde_json::from_slice(&message.data).map_err(|e| Rejection {
            id: String::new(),
            error: RouterError::Decode(e.to_string()),
        })?;
        let id = envelope.id.clone();
        let reject = |error: RouterError| Rejection {
            id: id.clone(),
            error,
        };

        let inner: M = codec::decode(envelope.request_bytes()).map_err(&reject)?;
        if inner.id() != id {
            return Err(reject(RouterError::ReplayMismatch {
                envelope: id.clone(),
                message: inner.id().to_string(),
            }));
        }
        let method_name = inner.method().to_string();
        if method_name.is_empty() {
            return Err(reject(RouterError::EmptyMethod));
        }

        let method = self
            .methods
            .get(&message.namespace, &method_name)
            .ok_or_else(|| reject(RouterError::Routing(method_name.clone())))?;

        let mut request = RouterRequest {
            message: inner,
            method: method_name,
            namespace: message.namespace.clone(),
            id: id.clone(),
            authenticated: method.public,
            private: !method.public,
            address: None,
            signature_public_key: None,
            context: message.context.clone(),
            signer: self.signer.clone(),
            authorized: self.authorized.clone(),
        };

        if !method.skip_signature {
            let (public_key, address) = authenticate(&envelope).map_err(&reject)?;
            debug!("recovered signer address: {address}");
            request.authenticated = method.public || self.authorized.contains(&address);
            request.signature_public_key = Some(public_key);
            request.address = Some(address);
            if !request.authenticated {
                return Err(reject(RouterError::Authorization));
            }
        }

        Ok((request, method.handler.clone()))
    }

    fn send_error(&self, id: &str, reason: &str, message: &Message) {
        warn!(namespace = %message.namespace, id, "{reason}");
        let Some(context) = message.context.clone() else {
            debug!("no reply context, dropping error for request {id:?}");
            return;
        };
        let reply = build_error(
            (self.factory)(),
            id,
            reason,
            &self.signer,
            &message.namespace,
            Some(context.clone()),
        );
        tokio::spawn(async move {
            if let Err(err) = context.send(reply).await {
                warn!("cannot deliver error reply: {err}");
            }
        });
    }
}

fn authenticate(envelope: &Envelope) -> Result<(String, Address)> {
    let signature = envelope.signature.trim();
    let hex_len = signature.trim_start_matches("0x").len();
    if hex_len < SIGNATURE_LENGTH * 2 {
        return Err(RouterError::Signature("no signature provided".to_string()));
    }
    let public_key = crypto::pubkey_from_signature(envelope.request_bytes(), signature)?;
    if public_key.is_empty() {
        return Err(RouterError::Signature(
            "could not extract public key from signature".to_string(),
        ));
    }
    let address = crypto::address_from_public_key(&public_key)?;
    Ok((public_key, address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_request;
    use crate::domains::api::ApiMessage;

    fn router() -> Router<ApiMessage> {
        let (_tx, rx) = mpsc::channel(1);
        Router::new(
            rx,
            HashMap::new(),
            Arc::new(SignKeys::generate()),
            Arc::new(AuthorizedSet::new()),
            Arc::new(ApiMessage::default),
        )
    }

    fn noop(_request: RouterRequest<ApiMessage>) -> futures::future::Ready<()> {
        futures::future::ready(())
    }

    fn message(data: &[u8]) -> Message {
        Message::new("/main", data.to_vec(), None)
    }

    #[test]
    fn public_unsigned_request_is_admitted() {
        let mut router = router();
        router.add_handler("/main", "hello", noop, false, true).unwrap();
        let (request, _) = router
            .admit(&message(br#"{"request":{"method":"hello","id":"1234"},"id":"1234"}"#))
            .unwrap();
        assert_eq!(request.id, "1234");
        assert_eq!(request.method, "hello");
        assert!(request.authenticated);
        assert!(!request.private);
        assert!(request.address.is_none());
    }

    #[test]
    fn garbage_is_rejected_with_empty_id() {
        let router = router();
        let rejection = router.admit(&message(b"not json")).err().unwrap();
        assert_eq!(rejection.id, "");
        assert!(matches!(rejection.error, RouterError::Decode(_)));
    }

    #[test]
    fn mismatched_ids_are_rejected() {
        let mut router = router();
        router.add_handler("/main", "hello", noop, false, true).unwrap();
        let rejection = router
            .admit(&message(br#"{"request":{"method":"hello","id":"2"},"id":"1"}"#))
            .err()
            .unwrap();
        assert_eq!(rejection.id, "1");
        assert!(matches!(rejection.error, RouterError::ReplayMismatch { .. }));
    }

    #[test]
    fn empty_and_unknown_methods_are_rejected() {
        let mut router = router();
        router.add_handler("/main", "hello", noop, false, true).unwrap();
        let rejection = router
            .admit(&message(br#"{"request":{"id":"1"},"id":"1"}"#))
            .err()
            .unwrap();
        assert!(matches!(rejection.error, RouterError::EmptyMethod));

        let rejection = router
            .admit(&message(br#"{"request":{"method":"nope","id":"1"},"id":"1"}"#))
            .err()
            .unwrap();
        assert_eq!(rejection.error.to_string(), "method not valid: (nope)");
    }

    #[test]
    fn namespace_is_part_of_the_lookup() {
        let mut router = router();
        router.add_handler("/other", "hello", noop, false, true).unwrap();
        let rejection = router
            .admit(&message(br#"{"request":{"method":"hello","id":"1"},"id":"1"}"#))
            .err()
            .unwrap();
        assert!(matches!(rejection.error, RouterError::Routing(_)));
    }

    #[test]
    fn signed_public_request_recovers_signer() {
        let mut router = router();
        router.add_handler("/main", "ping", noop, false, false).unwrap();
        let client = SignKeys::generate();
        let data = build_request(&ApiMessage::request("5", "ping"), Some(&client)).unwrap();
        let (request, _) = router.admit(&message(&data)).unwrap();
        assert!(request.authenticated);
        assert_eq!(request.address, Some(client.address()));
        assert_eq!(request.signature_public_key, Some(client.public_key_hex()));
    }

    #[test]
    fn missing_signature_is_reported() {
        let mut router = router();
        router.add_handler("/main", "ping", noop, false, false).unwrap();
        let data = build_request(&ApiMessage::request("5", "ping"), None).unwrap();
        let rejection = router.admit(&message(&data)).err().unwrap();
        assert_eq!(rejection.error.to_string(), "no signature provided");
    }

    #[test]
    fn private_method_follows_authorized_set() {
        let mut router = router();
        router.add_handler("/main", "getsecret", noop, true, false).unwrap();
        let client = SignKeys::generate();
        let data = build_request(&ApiMessage::request("9", "getsecret"), Some(&client)).unwrap();

        let rejection = router.admit(&message(&data)).err().unwrap();
        assert!(matches!(rejection.error, RouterError::Authorization));

        assert!(router.add_auth_key(client.address()));
        let (request, _) = router.admit(&message(&data)).unwrap();
        assert!(request.private);
        assert!(request.authenticated);

        assert!(router.del_auth_key(&client.address()));
        assert!(router.admit(&message(&data)).is_err());
    }

    #[test]
    fn private_method_without_signature_check_is_never_authenticated() {
        let mut router = router();
        router.add_handler("/main", "odd", noop, true, true).unwrap();
        let (request, _) = router
            .admit(&message(br#"{"request":{"method":"odd","id":"1"},"id":"1"}"#))
            .unwrap();
        assert!(!request.authenticated);
        assert!(request.private);
    }

    #[test]
    fn signature_over_other_bytes_recovers_other_signer() {
        let mut router = router();
        router.add_handler("/main", "getsecret", noop, true, false).unwrap();
        let client = SignKeys::generate();
        router.add_auth_key(client.address());
        let signature = client
            .sign(br#"{"id":"9","method":"getsecret"}"#)
            .unwrap();
        // Same logical content, different bytes: the signature no longer matches.
        let data = format!(
            r#"{{"request":{{"method":"getsecret","id":"9"}},"id":"9","signature":"{signature}"}}"#
        );
        let rejection = router.admit(&message(data.as_bytes())).err().unwrap();
        assert!(matches!(
            rejection.error,
            RouterError::Authorization | RouterError::Signature(_)
        ));
    }
}
