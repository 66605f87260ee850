use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The capability set the router needs from an application message schema.
pub trait MessageApi: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn method(&self) -> &str;
    fn set_timestamp(&mut self, timestamp: i64);
    fn set_error(&mut self, error: String);
}

/// Produces a fresh, empty message of the application schema.
pub type MessageFactory<M> = Arc<dyn Fn() -> M + Send + Sync>;
