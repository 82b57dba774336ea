//! Signature verification and id hashing
//!
//! The service never holds private keys; everything here verifies material
//! produced by copayer devices.

use base64::Engine;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};

use crate::error::ServiceError;

/// Copayer id: hex sha256 of the extended public key string.
pub fn copayer_id_from_xpub(xpub: &str) -> String {
    hex::encode(sha256::Hash::hash(xpub.as_bytes()).to_byte_array())
}

/// Opaque 128-bit id, hex encoded.
pub fn new_random_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Opaque session token, 256 bits hex.
pub fn new_session_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

fn parse_pubkey(pubkey_hex: &str) -> Result<PublicKey, ServiceError> {
    let bytes = hex::decode(pubkey_hex).map_err(|_| ServiceError::InvalidSignature)?;
    PublicKey::from_slice(&bytes).map_err(|_| ServiceError::InvalidSignature)
}

fn parse_signature(bytes: &[u8]) -> Result<ecdsa::Signature, ServiceError> {
    if bytes.len() == 64 {
        ecdsa::Signature::from_compact(bytes).map_err(|_| ServiceError::InvalidSignature)
    } else {
        ecdsa::Signature::from_der(bytes).map_err(|_| ServiceError::InvalidSignature)
    }
}

/// Verify a hex ECDSA signature over the sha256 of a utf8 message.
pub fn verify_message(
    pubkey_hex: &str,
    message: &str,
    signature_hex: &str,
) -> Result<(), ServiceError> {
    let pubkey = parse_pubkey(pubkey_hex)?;
    let sig_bytes = hex::decode(signature_hex).map_err(|_| ServiceError::InvalidSignature)?;
    let signature = parse_signature(&sig_bytes)?;
    let digest = Message::from_digest(sha256_digest(message.as_bytes()));

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&digest, &signature, &pubkey)
        .map_err(|_| ServiceError::InvalidSignature)
}

/// Verify a base64 compact signature over a precomputed 32-byte digest, as
/// used for unit authentifiers.
pub fn verify_digest_signature(
    pubkey_hex: &str,
    digest: [u8; 32],
    signature_b64: &str,
) -> Result<(), ServiceError> {
    let pubkey = parse_pubkey(pubkey_hex)?;
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| ServiceError::InvalidSignature)?;
    let signature = parse_signature(&sig_bytes)?;
    let message = Message::from_digest(digest);

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&message, &signature, &pubkey)
        .map_err(|_| ServiceError::InvalidSignature)
}
