use crate::codec;
use crate::crypto::{self, Address, SignKeys};
use crate::domains::message::Envelope;
use crate::error::{Result, RouterError};
use crate::interfaces::message::MessageApi;
use crate::services::reply::encode_envelope;

/// A reply received from a node, after envelope checks.
#[derive(Debug)]
pub struct OpenedReply<M> {
    pub id: String,
    pub message: M,
    pub raw: String,
    pub signer: Option<Address>,
}

/// Wraps `message` in a request envelope, signing it when a key is given.
pub fn build_request<M: MessageApi>(message: &M, signer: Option<&SignKeys>) -> Result<Vec<u8>> {
    let inner = codec::encode(message)?;
    let signature = match signer {
        Some(signer) => signer.sign(&inner)?,
        None => String::new(),
    };
    encode_envelope(&inner, message.id(), &signature)
}

pub fn open_reply<M: MessageApi>(data: &[u8]) -> Result<OpenedReply<M>> {
    let envelope: Envelope = serde_json::from_slice(data).map_err(|e| {
        RouterError::Decode(format!("{e}: {}", String::from_utf8_lossy(data).trim()))
    })?;
    let message: M = codec::decode(envelope.request_bytes())?;
    if message.id() != envelope.id {
        return Err(RouterError::ReplayMismatch {
            envelope: envelope.id.clone(),
            message: message.id().to_string(),
        });
    }
    let signer = if envelope.signature.is_empty() {
        None
    } else {
        let public_key = crypto::pubkey_from_signature(envelope.request_bytes(), &envelope.signature)?;
        Some(crypto::address_from_public_key(&public_key)?)
    };
    Ok(OpenedReply {
        id: envelope.id.clone(),
        raw: envelope.request.get().to_string(),
        message,
        signer,
    })
}
