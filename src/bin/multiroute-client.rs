use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use multiroute::client::{build_request, open_reply};
use multiroute::config::Connection;
use multiroute::error::{Result, RouterError};
use multiroute::services::gossip::SubPubTransport;
use multiroute::{codec, ApiMessage, Message, MessageApi, SignKeys, Transport};
use rand_core::{OsRng, RngCore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "multiroute-client")]
#[command(about = "Signs JSON requests read from stdin and sends them to a node")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:7788/main")]
    url: String,

    /// Hex private key used to sign requests; a fresh one is generated when empty.
    #[arg(long, env = "MULTIROUTE_KEY", default_value = "")]
    key: String,

    /// Send requests without a signature.
    #[arg(long)]
    unsigned: bool,

    /// Join the pub/sub group with this key instead of using HTTP.
    #[arg(long, env = "MULTIROUTE_GROUP_KEY")]
    group_key: Option<String>,

    /// Multiaddr of a group member to dial, repeatable.
    #[arg(long)]
    bootnode: Vec<String>,

    #[arg(long, default_value_t = 7799)]
    subpub_port: u16,

    /// Seconds to wait for the group and for each reply.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

/// Where requests go and replies come from.
enum Link {
    Http {
        client: reqwest::Client,
        url: String,
    },
    SubPub {
        transport: Arc<SubPubTransport>,
        replies: mpsc::Receiver<Message>,
        timeout: Duration,
    },
}

impl Link {
    async fn subpub(cli: &Cli, group_key: &str) -> Result<Self> {
        let timeout = Duration::from_secs(cli.timeout.max(1));
        let connection = Connection {
            transport_key: Some(group_key.to_string()),
            port: Some(cli.subpub_port),
            bootnodes: Some(cli.bootnode.clone()),
            ..Connection::default()
        };
        let mut transport = SubPubTransport::new();
        transport.init(&connection).await?;
        let transport = Arc::new(transport);
        let (tx, replies) = mpsc::channel(16);
        let listener = transport.clone();
        tokio::spawn(async move { listener.listen(tx).await });

        let deadline = Instant::now() + timeout;
        while transport.subscribers().await == 0 {
            if Instant::now() >= deadline {
                return Err(RouterError::Transport(
                    "no group member reachable".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!("joined group as {}", transport.describe());
        Ok(Self::SubPub {
            transport,
            replies,
            timeout,
        })
    }

    /// Sends one request envelope and returns the raw reply envelope for `id`.
    async fn exchange(&mut self, id: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Http { client, url } => {
                let response = client
                    .post(url.as_str())
                    .header("content-type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| RouterError::Transport(e.to_string()))?;
                let status = response.status();
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| RouterError::Transport(e.to_string()))?;
                if !status.is_success() {
                    return Err(RouterError::Transport(format!(
                        "{status}: {}",
                        String::from_utf8_lossy(&bytes).trim()
                    )));
                }
                Ok(bytes.to_vec())
            }
            Self::SubPub {
                transport,
                replies,
                timeout,
            } => {
                transport.send(Message::new("", body, None)).await?;
                let deadline = Instant::now() + *timeout;
                loop {
                    let message = tokio::time::timeout_at(deadline, replies.recv())
                        .await
                        .map_err(|_| RouterError::Transport(format!("no reply for request {id}")))?
                        .ok_or_else(|| RouterError::Transport("subpub transport stopped".to_string()))?;
                    // Other members' requests are broadcast to the whole group too.
                    match open_reply::<ApiMessage>(&message.data) {
                        Ok(reply) if reply.id == id => return Ok(message.data.to_vec()),
                        _ => debug!("ignoring group message"),
                    }
                }
            }
        }
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn call(link: &mut Link, keys: Option<&SignKeys>, line: &str) -> Result<String> {
    let mut message: ApiMessage = codec::decode(line.as_bytes())?;
    if message.id().is_empty() {
        message.set_id(random_id());
    }
    let body = build_request(&message, keys)?;
    debug!("sending {}", String::from_utf8_lossy(&body));
    let data = link.exchange(message.id(), body).await?;
    let reply = open_reply::<ApiMessage>(&data)?;
    if let Some(signer) = reply.signer {
        debug!("reply {} signed by {signer}", reply.id);
    }
    Ok(reply.raw)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let keys = if cli.key.is_empty() {
        SignKeys::generate()
    } else {
        SignKeys::from_hex(&cli.key)?
    };
    info!("client address {}", keys.address());
    let signer = (!cli.unsigned).then_some(&keys);

    let mut link = match cli.group_key.as_deref() {
        Some(group_key) => Link::subpub(&cli, group_key).await?,
        None => Link::Http {
            client: reqwest::Client::new(),
            url: cli.url.clone(),
        },
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| RouterError::Runtime(e.to_string()))?
    {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match call(&mut link, signer, line).await {
            Ok(reply) => println!("{reply}"),
            Err(err) => eprintln!("error: {err}"),
        }
    }
    Ok(())
}
