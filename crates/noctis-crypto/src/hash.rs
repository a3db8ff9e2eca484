use sha2::{Digest, Sha256};

use noctis_core::types::SignatureHash;

/// SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The anti-reuse key for a one-time signature: SHA-256 of the raw
/// signature bytes, computed regardless of validity.
pub fn signature_hash(signature_bytes: &[u8]) -> SignatureHash {
    SignatureHash(sha256(signature_bytes))
}

/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
