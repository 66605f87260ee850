use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use futures::StreamExt;
use hkdf::Hkdf;
use libp2p::gossipsub::{
    self, AllowAllSubscriptionFilter, IdentTopic, IdentityTransform, MessageAuthenticity,
    ValidationMode,
};
use libp2p::kad::{self, store::MemoryStore};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::Transport as _;
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, Swarm};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{Connection, DEFAULT_SUBPUB_PORT};
use crate::domains::message::Message;
use crate::error::{Result as RouterResult, RouterError};
use crate::interfaces::transport::{MessageContext, Transport};

const GROUP_KEY_CONTEXT: &[u8] = b"multiroute-subpub-v1";
const NONCE_LEN: usize = 12;

/// What travels on the gossip topic. `to` is empty for broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubPubFrame {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub payload: String,
}

/// Seals payloads with a key every member derives from the shared group key.
pub struct GroupCipher {
    key: Key,
}

impl GroupCipher {
    pub fn new(group_key: &[u8]) -> RouterResult<Self> {
        let hk = Hkdf::<Sha256>::new(None, group_key);
        let mut okm = [0u8; 32];
        hk.expand(GROUP_KEY_CONTEXT, &mut okm)
            .map_err(|_| RouterError::Config("HKDF expand failed".to_string()))?;
        Ok(Self {
            key: Key::from_slice(&okm).to_owned(),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> RouterResult<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(&self.key);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| RouterError::Transport("encrypt failed".to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> RouterResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(RouterError::Transport("sealed payload too short".to_string()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(&self.key);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| RouterError::Transport("decrypt failed".to_string()))
    }
}

pub fn default_topic(group_key: &str) -> String {
    hex::encode(Sha256::digest(group_key.as_bytes()))
}

enum SubPubCommand {
    Publish(Vec<u8>),
    Dial(Multiaddr),
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "SubPubBehaviourEvent")]
struct SubPubBehaviour {
    gossipsub: gossipsub::Behaviour<IdentityTransform, AllowAllSubscriptionFilter>,
    kademlia: kad::Behaviour<MemoryStore>,
}

enum SubPubBehaviourEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
}

impl From<gossipsub::Event> for SubPubBehaviourEvent {
    fn from(event: gossipsub::Event) -> Self {
        Self::Gossipsub(event)
    }
}

impl From<kad::Event> for SubPubBehaviourEvent {
    fn from(event: kad::Event) -> Self {
        Self::Kademlia(event)
    }
}

/// Handle on the running swarm task.
#[derive(Clone)]
struct SubPubNode {
    cmd_tx: mpsc::Sender<SubPubCommand>,
    peer_id: PeerId,
    topic: String,
    cipher: Arc<GroupCipher>,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    subscribers: Arc<RwLock<HashSet<PeerId>>>,
}

impl SubPubNode {
    fn frame(&self, to: Option<String>, data: &[u8]) -> RouterResult<SubPubFrame> {
        let payload = self.cipher.seal(data)?;
        Ok(SubPubFrame {
            from: self.peer_id.to_string(),
            to,
            payload: BASE64.encode(payload),
        })
    }

    fn unframe(&self, frame: &SubPubFrame) -> RouterResult<Vec<u8>> {
        let raw = BASE64
            .decode(frame.payload.as_bytes())
            .map_err(|e| RouterError::Decode(e.to_string()))?;
        self.cipher.open(&raw)
    }

    async fn publish(&self, to: Option<String>, data: &[u8]) -> RouterResult<()> {
        let frame = self.frame(to, data)?;
        let bytes = serde_json::to_vec(&frame).map_err(|e| RouterError::Encode(e.to_string()))?;
        self.cmd_tx
            .send(SubPubCommand::Publish(bytes))
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))
    }

    async fn dial(&self, addr: &str) -> RouterResult<()> {
        let addr: Multiaddr = addr
            .parse()
            .map_err(|e| RouterError::Transport(format!("invalid peer address {addr}: {e}")))?;
        self.cmd_tx
            .send(SubPubCommand::Dial(addr))
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))
    }
}

pub struct SubPubContext {
    node: SubPubNode,
    peer: String,
}

impl SubPubContext {
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl MessageContext for SubPubContext {
    fn connection_type(&self) -> &str {
        "SubPub"
    }

    async fn send(&self, message: Message) -> RouterResult<()> {
        self.node.publish(Some(self.peer.clone()), &message.data).await
    }
}

/// Publish/subscribe transport over a libp2p gossipsub topic shared by a group.
#[derive(Default)]
pub struct SubPubTransport {
    node: Option<SubPubNode>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Message>>>,
    namespace: Arc<StdRwLock<Option<String>>>,
    bootnodes: RwLock<Vec<String>>,
}

impl SubPubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self) -> RouterResult<&SubPubNode> {
        self.node
            .as_ref()
            .ok_or_else(|| RouterError::Transport("subpub transport is not initialized".to_string()))
    }

    pub fn topic(&self) -> Option<&str> {
        self.node.as_ref().map(|node| node.topic.as_str())
    }

    /// Number of group members currently subscribed to our topic.
    pub async fn subscribers(&self) -> usize {
        match &self.node {
            Some(node) => node.subscribers.read().await.len(),
            None => 0,
        }
    }

    pub async fn listen_addrs(&self) -> Vec<Multiaddr> {
        match &self.node {
            Some(node) => node.listen_addrs.read().await.clone(),
            None => Vec::new(),
        }
    }
}

/// Whether a frame published by `source` is meant for `own`. The reply
/// address is the gossipsub-signed source, so `from` must match it.
fn accepts_frame(frame: &SubPubFrame, own: &PeerId, source: Option<&PeerId>) -> bool {
    let Some(source) = source else {
        return false;
    };
    if source == own || frame.from != source.to_string() {
        return false;
    }
    frame
        .to
        .as_ref()
        .map_or(true, |to| *to == own.to_string())
}

fn node_keypair(seed: Option<&str>) -> RouterResult<identity::Keypair> {
    match seed.map(str::trim).filter(|seed| !seed.is_empty()) {
        Some(seed) => {
            let mut bytes = hex::decode(seed.trim_start_matches("0x"))
                .map_err(|e| RouterError::Config(format!("cannot import node key: {e}")))?;
            identity::Keypair::ed25519_from_bytes(&mut bytes)
                .map_err(|e| RouterError::Config(format!("cannot import node key: {e}")))
        }
        None => Ok(identity::Keypair::generate_ed25519()),
    }
}

#[async_trait]
impl Transport for SubPubTransport {
    async fn init(&mut self, connection: &Connection) -> RouterResult<()> {
        let group_key = connection
            .transport_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| RouterError::Config("group key not specified".to_string()))?;
        let port = connection.port.unwrap_or(DEFAULT_SUBPUB_PORT);
        let topic_name = connection
            .topic
            .clone()
            .filter(|topic| !topic.is_empty())
            .unwrap_or_else(|| default_topic(&group_key));
        let cipher = Arc::new(GroupCipher::new(group_key.as_bytes())?);

        let local_key = node_keypair(connection.key.as_deref())?;
        let peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
            .upgrade(libp2p::core::upgrade::Version::V1Lazy)
            .authenticate(
                noise::Config::new(&local_key)
                    .map_err(|e| RouterError::Transport(e.to_string()))?,
            )
            .multiplex(yamux::Config::default())
            .boxed();

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .validation_mode(ValidationMode::Strict)
            .heartbeat_interval(Duration::from_secs(1))
            .build()
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        let mut gossip = gossipsub::Behaviour::<IdentityTransform, AllowAllSubscriptionFilter>::new(
            MessageAuthenticity::Signed(local_key.clone()),
            gossipsub_config,
        )
        .map_err(|e| RouterError::Transport(e.to_string()))?;
        let topic = IdentTopic::new(topic_name.clone());
        gossip
            .subscribe(&topic)
            .map_err(|e| RouterError::Transport(e.to_string()))?;

        let mut kademlia = kad::Behaviour::new(peer_id, MemoryStore::new(peer_id));
        kademlia.set_mode(Some(kad::Mode::Server));

        let mut swarm = Swarm::new(
            transport,
            SubPubBehaviour {
                gossipsub: gossip,
                kademlia,
            },
            peer_id,
            libp2p::swarm::Config::with_tokio_executor(),
        );
        let listen_addr: Multiaddr = format!("/ip4/{}/tcp/{port}", connection.listen_host())
            .parse()
            .map_err(|e| RouterError::Config(format!("invalid listen address: {e}")))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| RouterError::Transport(e.to_string()))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SubPubCommand>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Message>(64);
        let listen_addrs = Arc::new(RwLock::new(Vec::<Multiaddr>::new()));
        let node = SubPubNode {
            cmd_tx,
            peer_id,
            topic: topic_name.clone(),
            cipher,
            listen_addrs: listen_addrs.clone(),
            subscribers: Arc::new(RwLock::new(HashSet::new())),
        };
        let node_task = node.clone();
        let namespace = self.namespace.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        match cmd {
                            SubPubCommand::Publish(data) => {
                                if let Err(err) = swarm
                                    .behaviour_mut()
                                    .gossipsub
                                    .publish(topic.clone(), data)
                                {
                                    warn!("cannot publish on {}: {err}", topic.hash());
                                }
                            }
                            SubPubCommand::Dial(addr) => {
                                if let Some(Protocol::P2p(peer)) = addr.iter().last() {
                                    swarm.behaviour_mut().kademlia.add_address(&peer, addr.clone());
                                    let _ = swarm.behaviour_mut().kademlia.bootstrap();
                                }
                                if let Err(err) = swarm.dial(addr.clone()) {
                                    warn!("cannot dial {addr}: {err}");
                                }
                            }
                        }
                    }
                    event = swarm.select_next_some() => {
                        match event {
                            SwarmEvent::Behaviour(SubPubBehaviourEvent::Gossipsub(
                                gossipsub::Event::Message { message, .. },
                            )) => {
                                let Ok(frame) = serde_json::from_slice::<SubPubFrame>(&message.data) else {
                                    debug!("ignoring malformed frame");
                                    continue;
                                };
                                if !accepts_frame(&frame, &node_task.peer_id, message.source.as_ref()) {
                                    continue;
                                }
                                let data = match node_task.unframe(&frame) {
                                    Ok(data) => data,
                                    Err(err) => {
                                        debug!("dropping frame from {}: {err}", frame.from);
                                        continue;
                                    }
                                };
                                let namespace = namespace
                                    .read()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .clone()
                                    .unwrap_or_default();
                                let context = SubPubContext {
                                    node: node_task.clone(),
                                    peer: frame.from,
                                };
                                let message = Message::new(namespace, data, Some(Arc::new(context)));
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            SwarmEvent::Behaviour(SubPubBehaviourEvent::Gossipsub(
                                gossipsub::Event::Subscribed { peer_id, .. },
                            )) => {
                                node_task.subscribers.write().await.insert(peer_id);
                            }
                            SwarmEvent::Behaviour(SubPubBehaviourEvent::Gossipsub(
                                gossipsub::Event::Unsubscribed { peer_id, .. },
                            )) => {
                                node_task.subscribers.write().await.remove(&peer_id);
                            }
                            SwarmEvent::ConnectionClosed { peer_id, num_established: 0, .. } => {
                                node_task.subscribers.write().await.remove(&peer_id);
                            }
                            SwarmEvent::Behaviour(SubPubBehaviourEvent::Kademlia(_)) => {}
                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                debug!("connected to peer {peer_id}");
                            }
                            SwarmEvent::NewListenAddr { address, .. } => {
                                let mut list = listen_addrs.write().await;
                                if !list.iter().any(|addr| addr == &address) {
                                    list.push(address);
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        info!("subpub transport {peer_id} joined topic {topic_name}");
        self.node = Some(node);
        *self.inbound_rx.get_mut() = Some(inbound_rx);

        if let Some(bootnodes) = connection.bootnodes.clone() {
            self.set_bootnodes(bootnodes).await;
        }
        Ok(())
    }

    async fn listen(&self, receiver: mpsc::Sender<Message>) {
        let Some(mut inbound) = self.inbound_rx.lock().await.take() else {
            warn!("subpub transport is not initialized or already listening");
            return;
        };
        while let Some(message) = inbound.recv().await {
            if receiver.send(message).await.is_err() {
                break;
            }
        }
    }

    async fn send(&self, message: Message) -> RouterResult<()> {
        match message.context.clone() {
            Some(context) => context.send(message).await,
            None => self.node()?.publish(None, &message.data).await,
        }
    }

    async fn send_unicast(&self, address: &str, message: Message) -> RouterResult<()> {
        self.node()?
            .publish(Some(address.to_string()), &message.data)
            .await
            .map_err(|e| RouterError::Transport(format!("cannot send message to {address}: ({e})")))
    }

    fn add_namespace(&self, namespace: &str) -> RouterResult<()> {
        let mut current = self.namespace.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_deref() {
            Some(existing) if existing != namespace => Err(RouterError::Transport(format!(
                "subpub transport already carries namespace {existing}"
            ))),
            _ => {
                *current = Some(namespace.to_string());
                Ok(())
            }
        }
    }

    async fn add_peer(&self, peer: &str) -> RouterResult<()> {
        self.node()?.dial(peer).await
    }

    async fn set_bootnodes(&self, bootnodes: Vec<String>) {
        if let Ok(node) = self.node() {
            for bootnode in &bootnodes {
                if let Err(err) = node.dial(bootnode).await {
                    warn!("bootnode {bootnode}: {err}");
                }
            }
        }
        *self.bootnodes.write().await = bootnodes;
    }

    fn address(&self) -> String {
        self.node
            .as_ref()
            .map(|node| node.peer_id.to_string())
            .unwrap_or_default()
    }

    fn connection_type(&self) -> &str {
        "SubPub"
    }

    fn describe(&self) -> String {
        match &self.node {
            Some(node) => format!("subpub peer {} on topic {}", node.peer_id, node.topic),
            None => "subpub (not initialized)".to_string(),
        }
    }
}
