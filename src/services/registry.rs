use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domains::message::RouterRequest;
use crate::error::{Result, RouterError};
use crate::interfaces::message::MessageApi;

#[async_trait]
pub trait MethodHandler<M: MessageApi>: Send + Sync {
    async fn handle(&self, request: RouterRequest<M>);
}

#[async_trait]
impl<M, F, Fut> MethodHandler<M> for F
where
    M: MessageApi,
    F: Fn(RouterRequest<M>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, request: RouterRequest<M>) {
        (self)(request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub namespace: String,
    pub method: String,
}

impl MethodKey {
    pub fn new(namespace: &str, method: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            method: method.to_string(),
        }
    }
}

pub struct RegisteredMethod<M: MessageApi> {
    pub public: bool,
    pub skip_signature: bool,
    pub handler: Arc<dyn MethodHandler<M>>,
}

impl<M: MessageApi> Clone for RegisteredMethod<M> {
    fn clone(&self) -> Self {
        Self {
            public: self.public,
            skip_signature: self.skip_signature,
            handler: self.handler.clone(),
        }
    }
}

pub struct MethodRegistry<M: MessageApi> {
    methods: HashMap<MethodKey, RegisteredMethod<M>>,
}

impl<M: MessageApi> Default for MethodRegistry<M> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<M: MessageApi> MethodRegistry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        namespace: &str,
        method: &str,
        handler: Arc<dyn MethodHandler<M>>,
        private: bool,
        skip_signature: bool,
    ) -> Result<()> {
        let key = MethodKey::new(namespace, method);
        if self.methods.contains_key(&key) {
            return Err(RouterError::DuplicateMethod {
                namespace: namespace.to_string(),
                method: method.to_string(),
            });
        }
        self.methods.insert(
            key,
            RegisteredMethod {
                public: !private,
                skip_signature,
                handler,
            },
        );
        Ok(())
    }

    pub fn get(&self, namespace: &str, method: &str) -> Option<&RegisteredMethod<M>> {
        self.methods.get(&MethodKey::new(namespace, method))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn keys(&self) -> Vec<MethodKey> {
        self.methods.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domains::api::ApiMessage;

    fn noop() -> Arc<dyn MethodHandler<ApiMessage>> {
        Arc::new(|_request: RouterRequest<ApiMessage>| async {})
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = MethodRegistry::<ApiMessage>::new();
        registry.register("/main", "hello", noop(), false, true).unwrap();
        let err = registry
            .register("/main", "hello", noop(), true, false)
            .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateMethod { .. }));

        let kept = registry.get("/main", "hello").unwrap();
        assert!(kept.public);
        assert!(kept.skip_signature);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn compound_key_does_not_collide() {
        let mut registry = MethodRegistry::<ApiMessage>::new();
        registry.register("/a", "b", noop(), false, false).unwrap();
        registry.register("/ab", "", noop(), true, false).unwrap();
        assert!(registry.get("/a", "b").unwrap().public);
        assert!(!registry.get("/ab", "").unwrap().public);
        assert!(registry.get("/a", "").is_none());
    }

    #[test]
    fn same_method_in_two_namespaces() {
        let mut registry = MethodRegistry::<ApiMessage>::new();
        registry.register("/one", "x", noop(), false, false).unwrap();
        registry.register("/two", "x", noop(), false, false).unwrap();
        let mut keys = registry.keys();
        keys.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        assert_eq!(keys, vec![MethodKey::new("/one", "x"), MethodKey::new("/two", "x")]);
    }

    #[tokio::test]
    async fn closure_handlers_are_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler: Arc<dyn MethodHandler<ApiMessage>> =
            Arc::new(move |_request: RouterRequest<ApiMessage>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });
        let request = RouterRequest {
            message: ApiMessage::request("1", "x"),
            method: "x".to_string(),
            namespace: "/main".to_string(),
            id: "1".to_string(),
            authenticated: true,
            private: false,
            address: None,
            signature_public_key: None,
            context: None,
            signer: Arc::new(crate::crypto::SignKeys::generate()),
            authorized: Arc::new(crate::crypto::AuthorizedSet::new()),
        };
        handler.handle(request).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
