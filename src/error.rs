use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request id and message id do not match")]
    ReplayMismatch { envelope: String, message: String },
    #[error("method is empty")]
    EmptyMethod,
    #[error("method not valid: ({0})")]
    Routing(String),
    #[error("{0}")]
    Signature(String),
    #[error("invalid authentication")]
    Authorization,
    #[error("duplicate method {method} for namespace {namespace}")]
    DuplicateMethod { namespace: String, method: String },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
