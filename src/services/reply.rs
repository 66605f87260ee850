use std::sync::Arc;

use serde_json::value::RawValue;
use tracing::{debug, error};

use crate::codec;
use crate::crypto::SignKeys;
use crate::domains::message::{now_ts, Envelope, Message, RouterRequest};
use crate::error::{Result, RouterError};
use crate::interfaces::message::MessageApi;
use crate::interfaces::transport::MessageContext;

/// Builds the signed reply for `request`. Never fails: if the payload cannot
/// be encoded the caller gets the failure reason as plain text instead.
pub fn build_reply<M: MessageApi>(mut response: M, request: &RouterRequest<M>) -> Message {
    response.set_id(request.id.clone());
    response.set_timestamp(now_ts());
    seal(
        &response,
        &request.id,
        &request.signer,
        &request.namespace,
        request.context.clone(),
    )
}

/// Builds a signed error reply carrying `reason`, addressed to `id`.
pub fn build_error<M: MessageApi>(
    mut message: M,
    id: &str,
    reason: &str,
    signer: &SignKeys,
    namespace: &str,
    context: Option<Arc<dyn MessageContext>>,
) -> Message {
    message.set_id(id.to_string());
    message.set_timestamp(now_ts());
    message.set_error(reason.to_string());
    seal(&message, id, signer, namespace, context)
}

pub fn encode_envelope(inner: &[u8], id: &str, signature: &str) -> Result<Vec<u8>> {
    let inner = std::str::from_utf8(inner).map_err(|e| RouterError::Encode(e.to_string()))?;
    let request =
        RawValue::from_string(inner.to_string()).map_err(|e| RouterError::Encode(e.to_string()))?;
    let envelope = Envelope {
        request,
        id: id.to_string(),
        signature: signature.to_string(),
    };
    // The outer frame is not signed, so field order does not matter here.
    serde_json::to_vec(&envelope).map_err(|e| RouterError::Encode(e.to_string()))
}

fn seal<M: MessageApi>(
    message: &M,
    id: &str,
    signer: &SignKeys,
    namespace: &str,
    context: Option<Arc<dyn MessageContext>>,
) -> Message {
    let inner = match codec::encode(message) {
        Ok(inner) => inner,
        Err(err) => {
            error!("cannot encode reply {id}: {err}");
            return Message::new(namespace, err.to_string().into_bytes(), context);
        }
    };

    let signature = match signer.sign(&inner) {
        Ok(signature) => signature,
        Err(err) => {
            error!("cannot sign reply {id}: {err}");
            String::new()
        }
    };

    match encode_envelope(&inner, id, &signature) {
        Ok(data) => {
            debug!("response: {}", String::from_utf8_lossy(&data));
            Message::new(namespace, data, context)
        }
        Err(err) => {
            error!("cannot marshal reply envelope {id}: {err}");
            Message::new(namespace, err.to_string().into_bytes(), context)
        }
    }
}
