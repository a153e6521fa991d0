//! Message authentication for sensor reports.
//! HMAC-SHA256 built directly on the SHA-256 core, with base64 signature encoding.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// SHA-256 block size in bytes
pub const BLOCK_SIZE: usize = 64;

/// HMAC-SHA256 output size in bytes
pub const DIGEST_SIZE: usize = 32;

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid signature length: expected 32 bytes, got {0}")]
    InvalidSignatureLength(usize),
}

/// Compute HMAC-SHA256 (RFC 2104) of `message` keyed with `key`.
///
/// Keys longer than one block are hashed first; shorter keys are zero-padded.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut key_block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let hashed = Sha256::digest(key);
        key_block[..DIGEST_SIZE].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner_pad = [0u8; BLOCK_SIZE];
    let mut outer_pad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        inner_pad[i] = key_block[i] ^ IPAD;
        outer_pad[i] = key_block[i] ^ OPAD;
    }

    let mut inner = Sha256::new();
    inner.update(inner_pad);
    inner.update(message);
    let inner_hash = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(outer_pad);
    outer.update(inner_hash);
    outer.finalize().into()
}

/// Sign `message` and return the base64-encoded digest (padded)
pub fn sign_base64(key: &[u8], message: &[u8]) -> String {
    B64.encode(hmac_sha256(key, message))
}

/// Verify a base64 signature over `message`.
///
/// Returns `Ok(false)` for a well-formed signature that does not match.
pub fn verify_signature(
    key: &[u8],
    message: &[u8],
    signature_b64: &str,
) -> Result<bool, CryptoError> {
    let provided = B64.decode(signature_b64)?;
    if provided.len() != DIGEST_SIZE {
        return Err(CryptoError::InvalidSignatureLength(provided.len()));
    }

    let expected = hmac_sha256(key, message);
    let diff = expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    Ok(diff == 0)
}
