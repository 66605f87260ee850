mod common;

use std::sync::Arc;
use std::time::Duration;

use multiroute::client::{build_request, open_reply};
use multiroute::config::Connection;
use multiroute::services::gossip::SubPubTransport;
use multiroute::{ApiMessage, Message, SignKeys, Transport};
use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{demo_router, NAMESPACE};

const GROUP_KEY: &str = "sharedSecret123";

async fn joined_with(connection: Connection, tx: mpsc::Sender<Message>) -> Arc<SubPubTransport> {
    let mut transport = SubPubTransport::new();
    transport.init(&connection).await.unwrap();
    transport.add_namespace(NAMESPACE).unwrap();
    let transport = Arc::new(transport);
    let listener = transport.clone();
    tokio::spawn(async move { listener.listen(tx).await });
    transport
}

async fn joined(connection: Connection) -> (Arc<SubPubTransport>, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(64);
    (joined_with(connection, tx).await, rx)
}

fn local(group_key: &str) -> Connection {
    Connection {
        transport_key: Some(group_key.to_string()),
        address: Some("127.0.0.1".to_string()),
        port: Some(0),
        ..Connection::default()
    }
}

async fn dial_address(transport: &SubPubTransport) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(addr) = transport.listen_addrs().await.first() {
            return format!("{addr}/p2p/{}", transport.address());
        }
        assert!(Instant::now() < deadline, "no listen address");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_group(transport: &SubPubTransport) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while transport.subscribers().await == 0 {
        assert!(Instant::now() < deadline, "group never formed");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Broadcasts `data` until a reply for `id` arrives on `replies`.
async fn request(
    transport: &SubPubTransport,
    replies: &mut mpsc::Receiver<Message>,
    id: &str,
    data: &[u8],
) -> multiroute::client::OpenedReply<ApiMessage> {
    for _ in 0..20 {
        transport
            .send(Message::new("", data.to_vec(), None))
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_millis(500);
        while let Ok(Some(message)) = tokio::time::timeout_at(deadline, replies.recv()).await {
            if let Ok(reply) = open_reply::<ApiMessage>(&message.data) {
                if reply.id == id {
                    return reply;
                }
            }
        }
    }
    panic!("no reply for request {id}");
}

#[tokio::test]
async fn request_and_reply_between_group_members() {
    let (mut router, tx) = demo_router(&[]);
    let node = joined_with(local(GROUP_KEY), tx).await;
    let node_addr = dial_address(&node).await;
    router.add_transport("subpub", node.clone());
    let node_signer = router.signer();
    tokio::spawn(router.route());

    let (client, mut client_rx) = joined(local(GROUP_KEY)).await;
    client.add_peer(&node_addr).await.unwrap();
    let (bystander, mut bystander_rx) = joined(local(GROUP_KEY)).await;
    bystander.add_peer(&node_addr).await.unwrap();
    wait_for_group(&client).await;
    wait_for_group(&bystander).await;

    let keys = SignKeys::generate();
    let data = build_request(&ApiMessage::request("55", "hello"), Some(&keys)).unwrap();
    let reply = request(&client, &mut client_rx, "55", &data).await;
    assert_eq!(reply.signer, Some(node_signer.address()));
    assert_eq!(
        reply.message.reply.as_deref(),
        Some("hello! got your message with ID 55")
    );

    // The bystander sees the broadcast request but never the addressed reply.
    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Ok(message) = bystander_rx.try_recv() {
        assert_eq!(message.namespace, NAMESPACE);
        let opened = open_reply::<ApiMessage>(&message.data).unwrap();
        assert_eq!(opened.id, "55");
        assert_eq!(opened.message.method, "hello");
        assert_eq!(opened.signer, Some(keys.address()));
    }
}

#[tokio::test]
async fn members_with_another_group_key_cannot_read_frames() {
    let (node, mut node_rx) = joined(local(GROUP_KEY)).await;
    let node_addr = dial_address(&node).await;

    let (outsider, _outsider_rx) = joined(Connection {
        topic: node.topic().map(str::to_string),
        ..local("anotherSecret")
    })
    .await;
    outsider.add_peer(&node_addr).await.unwrap();
    wait_for_group(&outsider).await;

    for _ in 0..5 {
        outsider
            .send(Message::new("", b"{\"request\":{}}".to_vec(), None))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(node_rx.try_recv().is_err());
}
