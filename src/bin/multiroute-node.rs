use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use multiroute::config::{Connection, NodeConfig, DEFAULT_HTTP_PORT};
use multiroute::error::Result;
use multiroute::services::router::DEFAULT_INBOUND_CAPACITY;
use multiroute::{ApiMessage, AuthorizedSet, Endpoint, MessageApi, Router, RouterRequest};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "multiroute-node")]
#[command(about = "Signed RPC router serving HTTP, WebSocket and pub/sub peers")]
struct Cli {
    /// JSON node configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Hex private key used to sign replies.
    #[arg(long, env = "MULTIROUTE_KEY", default_value = "")]
    key: String,

    /// Group key of a pub/sub network to join.
    #[arg(long, env = "MULTIROUTE_GROUP_KEY")]
    group_key: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

async fn hello(request: RouterRequest<ApiMessage>) {
    let reply = ApiMessage::with_reply(format!(
        "hello! got your message with ID {}",
        request.id
    ));
    if let Err(err) = request.reply(reply).await {
        warn!("hello: {err}");
    }
}

async fn add_key(request: RouterRequest<ApiMessage>) {
    let mut reply = ApiMessage::default();
    match request.address {
        Some(address) if request.authorized.add(address) => {
            info!("authorized new address {address}");
            reply.reply = Some(format!("added new authorized address {address}"));
            reply.address = Some(address.to_string());
        }
        Some(address) => reply.set_error(format!("address {address} already authorized")),
        None => reply.set_error("no signer address".to_string()),
    }
    if let Err(err) = request.reply(reply).await {
        warn!("addkey: {err}");
    }
}

async fn get_secret(request: RouterRequest<ApiMessage>) {
    let reply = ApiMessage::with_reply("the secret is foobar123456");
    if let Err(err) = request.reply(reply).await {
        warn!("getsecret: {err}");
    }
}

/// Registers the demo methods under every namespace the transports serve.
fn register_handlers(router: &mut Router<ApiMessage>, namespaces: &[String]) -> Result<()> {
    for namespace in namespaces {
        router.add_handler(namespace, "hello", hello, false, true)?;
        router.add_handler(namespace, "addkey", add_key, false, false)?;
        router.add_handler(namespace, "getsecret", get_secret, true, false)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info,multiroute=info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !cli.key.is_empty() {
        config.signing_key = Some(cli.key.clone());
    }
    if config.http.is_none() {
        config.http = Some(Connection {
            address: Some(cli.host.clone()),
            port: Some(cli.port),
            ..Connection::default()
        });
    }
    if let Some(group_key) = cli.group_key.clone() {
        let subpub = config.subpub.get_or_insert_with(Connection::default);
        subpub.transport_key = Some(group_key);
    }

    let signer = Arc::new(config.signer()?);
    let authorized = Arc::new(AuthorizedSet::with_addresses(config.authorized_addresses()?));
    info!("node address {}", signer.address());

    let namespaces = config.namespaces();
    let (tx, rx) = mpsc::channel(DEFAULT_INBOUND_CAPACITY);
    let mut endpoints = Vec::new();
    if let Some(http) = &config.http {
        endpoints.push(Endpoint::http(http, &namespaces, tx.clone()).await?);
    }
    if let Some(subpub) = &config.subpub {
        endpoints.push(Endpoint::subpub(subpub, &namespaces, tx.clone()).await?);
    }
    drop(tx);

    let transports: HashMap<_, _> = endpoints
        .into_iter()
        .map(|endpoint| (endpoint.id, endpoint.transport))
        .collect();
    let mut router = Router::new(
        rx,
        transports,
        signer,
        authorized,
        Arc::new(ApiMessage::default),
    );
    register_handlers(&mut router, &namespaces)?;

    router.route().await;
    Ok(())
}
