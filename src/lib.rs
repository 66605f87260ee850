pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod domains;
pub mod endpoint;
pub mod error;
pub mod interfaces;
pub mod services;

pub use crate::config::{Connection, NodeConfig};
pub use crate::crypto::{Address, AuthorizedSet, SignKeys};
pub use crate::domains::api::ApiMessage;
pub use crate::domains::message::{Message, RouterRequest};
pub use crate::endpoint::Endpoint;
pub use crate::error::{Result, RouterError};
pub use crate::interfaces::message::{MessageApi, MessageFactory};
pub use crate::interfaces::transport::{MessageContext, Transport};
pub use crate::services::router::Router;
