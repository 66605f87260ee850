use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::error::{Result, RouterError};

pub mod authorized;

pub use authorized::AuthorizedSet;

pub const SIGNATURE_LENGTH: usize = 65;
pub const ADDRESS_LENGTH: usize = 20;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = RouterError;

    fn from_str(value: &str) -> Result<Self> {
        let raw = strip_hex_prefix(value.trim());
        let bytes = hex::decode(raw).map_err(|e| RouterError::Config(e.to_string()))?;
        let bytes: [u8; ADDRESS_LENGTH] = bytes
            .try_into()
            .map_err(|_| RouterError::Config(format!("invalid address length: {value}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Node signing identity: a secp256k1 key producing recoverable signatures.
#[derive(Clone)]
pub struct SignKeys {
    private: SigningKey,
}

impl SignKeys {
    pub fn generate() -> Self {
        Self {
            private: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = hex::decode(strip_hex_prefix(private_key.trim()))
            .map_err(|e| RouterError::Config(format!("cannot import private key: {e}")))?;
        let private = SigningKey::from_slice(&bytes)
            .map_err(|e| RouterError::Config(format!("cannot import private key: {e}")))?;
        Ok(Self { private })
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private.to_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(
            self.private
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes(),
        )
    }

    pub fn address(&self) -> Address {
        address_from_verifying_key(self.private.verifying_key())
    }

    /// Signs `message` and returns the hex encoded `r || s || v` signature.
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let digest = hash_message(message);
        let (signature, recovery_id) = self
            .private
            .sign_prehash_recoverable(&digest)
            .map_err(|e| RouterError::Encode(format!("cannot sign message: {e}")))?;
        let mut raw = Vec::with_capacity(SIGNATURE_LENGTH);
        raw.extend_from_slice(&signature.to_bytes());
        raw.push(recovery_id.to_byte());
        Ok(hex::encode(raw))
    }
}

impl fmt::Debug for SignKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignKeys")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX);
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Recovers the compressed hex public key that produced `signature` over `message`.
pub fn pubkey_from_signature(message: &[u8], signature: &str) -> Result<String> {
    let key = recover_verifying_key(message, signature)?;
    Ok(hex::encode(key.to_encoded_point(true).as_bytes()))
}

pub fn address_from_public_key(public_key: &str) -> Result<Address> {
    let bytes = hex::decode(strip_hex_prefix(public_key))
        .map_err(|e| RouterError::Signature(format!("invalid public key: {e}")))?;
    let key = VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| RouterError::Signature(format!("invalid public key: {e}")))?;
    Ok(address_from_verifying_key(&key))
}

pub fn verify(message: &[u8], signature: &str, address: &Address) -> Result<bool> {
    let key = recover_verifying_key(message, signature)?;
    Ok(address_from_verifying_key(&key) == *address)
}

fn recover_verifying_key(message: &[u8], signature: &str) -> Result<VerifyingKey> {
    let raw = hex::decode(strip_hex_prefix(signature.trim()))
        .map_err(|e| RouterError::Signature(format!("malformed signature: {e}")))?;
    if raw.len() != SIGNATURE_LENGTH {
        return Err(RouterError::Signature(format!(
            "malformed signature: expected {SIGNATURE_LENGTH} bytes, got {}",
            raw.len()
        )));
    }
    let mut signature = Signature::from_slice(&raw[..64])
        .map_err(|e| RouterError::Signature(format!("malformed signature: {e}")))?;
    let v = match raw[64] {
        27 | 28 => raw[64] - 27,
        v => v,
    };
    let mut recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| RouterError::Signature(format!("invalid recovery id {v}")))?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }
    VerifyingKey::recover_from_prehash(&hash_message(message), &signature, recovery_id)
        .map_err(|e| RouterError::Signature(format!("cannot recover public key: {e}")))
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; ADDRESS_LENGTH];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
