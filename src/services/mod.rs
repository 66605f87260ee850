pub mod gossip;
pub mod http;
pub mod registry;
pub mod reply;
pub mod router;
pub mod transport;
