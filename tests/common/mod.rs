#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use multiroute::client::open_reply;
use multiroute::client::OpenedReply;
use multiroute::config::Connection;
use multiroute::services::transport::MemoryTransport;
use multiroute::{
    Address, ApiMessage, AuthorizedSet, Endpoint, MessageApi, Router, RouterRequest, SignKeys,
};

pub const NAMESPACE: &str = "/main";

pub async fn hello(request: RouterRequest<ApiMessage>) {
    let reply = ApiMessage::with_reply(format!(
        "hello! got your message with ID {}",
        request.id
    ));
    request.reply(reply).await.unwrap();
}

pub async fn add_key(request: RouterRequest<ApiMessage>) {
    let mut reply = ApiMessage::default();
    match request.address {
        Some(address) if request.authorized.add(address) => {
            reply.reply = Some(format!("added new authorized address {address}"));
        }
        Some(address) => reply.set_error(format!("address {address} already authorized")),
        None => reply.set_error("no signer address".to_string()),
    }
    request.reply(reply).await.unwrap();
}

pub async fn get_secret(request: RouterRequest<ApiMessage>) {
    request
        .reply(ApiMessage::with_reply("the secret is foobar123456"))
        .await
        .unwrap();
}

pub struct TestNode {
    pub memory: MemoryTransport,
    pub signer: Arc<SignKeys>,
    pub authorized: Arc<AuthorizedSet>,
}

/// Router with the demo methods in `/main`, fed by a memory transport.
pub fn demo_router(
    authorized: &[Address],
) -> (Router<ApiMessage>, mpsc::Sender<multiroute::Message>) {
    let (tx, rx) = mpsc::channel(16);
    let mut router = Router::new(
        rx,
        HashMap::new(),
        Arc::new(SignKeys::generate()),
        Arc::new(AuthorizedSet::with_addresses(authorized.iter().copied())),
        Arc::new(ApiMessage::default),
    );
    router.add_handler(NAMESPACE, "hello", hello, false, true).unwrap();
    router.add_handler(NAMESPACE, "addkey", add_key, false, false).unwrap();
    router
        .add_handler(NAMESPACE, "getsecret", get_secret, true, false)
        .unwrap();
    (router, tx)
}

pub async fn start_node(router: Router<ApiMessage>, tx: mpsc::Sender<multiroute::Message>) -> TestNode {
    let memory = MemoryTransport::new();
    let endpoint = Endpoint::start(
        "memory",
        memory.clone(),
        &Connection::default(),
        &[NAMESPACE.to_string()],
        tx,
    )
    .await
    .unwrap();
    let mut router = router;
    router.add_transport(&endpoint.id, endpoint.transport);
    let node = TestNode {
        memory,
        signer: router.signer(),
        authorized: router.authorized(),
    };
    tokio::spawn(router.route());
    node
}

impl TestNode {
    pub async fn call(&self, data: Vec<u8>) -> OpenedReply<ApiMessage> {
        let reply = self.memory.inject(NAMESPACE, data).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), reply)
            .await
            .expect("reply timed out")
            .unwrap();
        let opened = open_reply::<ApiMessage>(&message.data).unwrap();
        assert_eq!(opened.signer, Some(self.signer.address()));
        opened
    }
}
