use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{Address, SignKeys};
use crate::error::{Result, RouterError};

pub const DEFAULT_HTTP_PORT: u16 = 7788;
pub const DEFAULT_SUBPUB_PORT: u16 = 45678;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings for one transport. Not every field applies to every transport.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Connection {
    /// Topic for pub/sub transports.
    pub topic: Option<String>,
    /// Group key shared by every member of a pub/sub network. Every pub/sub
    /// payload is sealed with a key derived from it.
    pub transport_key: Option<String>,
    /// Hex seed of this node's transport identity.
    pub key: Option<String>,
    /// Listen host.
    pub address: Option<String>,
    pub port: Option<u16>,
    pub bootnodes: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
}

impl Connection {
    pub fn listen_host(&self) -> &str {
        self.address.as_deref().unwrap_or("0.0.0.0")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
                .max(1),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    pub signing_key: Option<String>,
    pub authorized: Option<Vec<String>>,
    pub log_level: Option<String>,
    pub namespaces: Option<Vec<String>>,
    pub http: Option<Connection>,
    pub subpub: Option<Connection>,
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| RouterError::Config(e.to_string()))?;
        let config: NodeConfig =
            serde_json::from_str(&content).map_err(|e| RouterError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn signer(&self) -> Result<SignKeys> {
        match self.signing_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => SignKeys::from_hex(key),
            _ => Ok(SignKeys::generate()),
        }
    }

    pub fn authorized_addresses(&self) -> Result<Vec<Address>> {
        self.authorized
            .iter()
            .flatten()
            .map(|raw| raw.parse())
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .clone()
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec!["/main".to_string()])
    }
}
