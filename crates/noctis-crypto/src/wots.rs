//! WOTS+ (Winternitz One-Time Signature Plus) over SHA-256.
//!
//! Parameters: n = 32, w = 16 → 64 message chains + 3 checksum chains = 67
//! chains of 32 bytes each. Signatures and public-key cores are both
//! 67 × 32 = 2144 bytes; the full public key appends the 32-byte `pub_seed`
//! and 32-byte `rand2` chain-randomization values (2208 bytes).
//!
//! Everything here is a pure function over byte slices. One keypair
//! authorizes exactly one message; signing twice with the same key reveals
//! enough chain preimages to forge, which is why callers track signature
//! hashes and reject any repeat.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use noctis_core::constants::{
    WOTS_LEN, WOTS_LEN1, WOTS_N, WOTS_PK_CORE_BYTES, WOTS_PUBLIC_KEY_BYTES,
    WOTS_SIGNATURE_BYTES, WOTS_W,
};
use noctis_core::error::NoctisError;
use noctis_core::types::SignatureHash;

use crate::hash::signature_hash;

/// Outcome of a verification attempt over well-formed inputs.
///
/// `signature_hash` is computed regardless of validity; callers persist it
/// only on success.
#[derive(Debug, Clone)]
pub struct Verification {
    pub valid: bool,
    pub signature_hash: SignatureHash,
}

/// One step of the hash chain for chain `i` at position `j`:
/// `H(pub_seed ∥ rand2 ∥ be16(i) ∥ u8(j) ∥ value)`.
fn chain_step(value: &[u8; 32], i: usize, j: u32, pub_seed: &[u8], rand2: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(pub_seed);
    h.update(rand2);
    h.update((i as u16).to_be_bytes());
    h.update([j as u8]);
    h.update(value);
    let mut out = [0u8; 32];
    out.copy_from_slice(&h.finalize());
    out
}

/// Apply `steps` chain iterations to `value`, starting at position `from`.
fn chain(
    value: &[u8; 32],
    i: usize,
    from: u32,
    steps: u32,
    pub_seed: &[u8],
    rand2: &[u8],
) -> [u8; 32] {
    let mut v = *value;
    for j in from..from + steps {
        v = chain_step(&v, i, j, pub_seed, rand2);
    }
    v
}

/// Split a 32-byte digest into 67 base-16 digits: 64 message nibbles
/// followed by a 3-digit checksum of `Σ (w−1−dᵢ)`, most significant first.
fn digits(msg_hash: &[u8; 32]) -> [u8; WOTS_LEN] {
    let mut d = [0u8; WOTS_LEN];
    for (i, byte) in msg_hash.iter().enumerate() {
        d[2 * i] = byte >> 4;
        d[2 * i + 1] = byte & 0x0f;
    }
    let checksum: u32 = d[..WOTS_LEN1].iter().map(|&x| WOTS_W - 1 - x as u32).sum();
    d[WOTS_LEN1] = ((checksum >> 8) & 0x0f) as u8;
    d[WOTS_LEN1 + 1] = ((checksum >> 4) & 0x0f) as u8;
    d[WOTS_LEN1 + 2] = (checksum & 0x0f) as u8;
    d
}

/// Reconstruct the candidate public-key core from a signature: each chain is
/// advanced from its signed position `dᵢ` to the end (`w−1`).
fn pk_core_from_signature(
    signature: &[u8],
    msg_hash: &[u8; 32],
    pub_seed: &[u8],
    rand2: &[u8],
) -> Vec<u8> {
    let d = digits(msg_hash);
    let mut core = Vec::with_capacity(WOTS_PK_CORE_BYTES);
    for i in 0..WOTS_LEN {
        let mut sig_i = [0u8; 32];
        sig_i.copy_from_slice(&signature[i * WOTS_N..(i + 1) * WOTS_N]);
        let end = chain(
            &sig_i,
            i,
            d[i] as u32,
            WOTS_W - 1 - d[i] as u32,
            pub_seed,
            rand2,
        );
        core.extend_from_slice(&end);
    }
    core
}

/// Verify a WOTS+ signature over `message` against a full 2208-byte public
/// key (`pk_core ∥ pub_seed ∥ rand2`).
///
/// Length violations are reported as errors; every other outcome, including
/// a failed reconstruction, is a well-formed `Verification` with
/// `valid = false`. Never panics on untrusted input.
pub fn verify(
    message: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> Result<Verification, NoctisError> {
    if signature.len() != WOTS_SIGNATURE_BYTES {
        return Err(NoctisError::LengthMismatch {
            what: "signature",
            expected: WOTS_SIGNATURE_BYTES,
            got: signature.len(),
        });
    }
    if public_key.len() != WOTS_PUBLIC_KEY_BYTES {
        return Err(NoctisError::LengthMismatch {
            what: "public key",
            expected: WOTS_PUBLIC_KEY_BYTES,
            got: public_key.len(),
        });
    }

    let msg_hash: [u8; 32] = Sha256::digest(message).into();
    let pk_core = &public_key[..WOTS_PK_CORE_BYTES];
    let pub_seed = &public_key[WOTS_PK_CORE_BYTES..WOTS_PK_CORE_BYTES + WOTS_N];
    let rand2 = &public_key[WOTS_PK_CORE_BYTES + WOTS_N..];

    let candidate = pk_core_from_signature(signature, &msg_hash, pub_seed, rand2);
    let valid = candidate.as_slice().ct_eq(pk_core).into();

    Ok(Verification {
        valid,
        signature_hash: signature_hash(signature),
    })
}

// ── Signing side ─────────────────────────────────────────────────────────────
//
// Used by the keygen tool and the test suite; the service itself only
// verifies.

/// Derive the secret chain-start value for chain `i` from a 32-byte seed.
pub(crate) fn secret_element(seed: &[u8; 32], i: usize) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(b"noctis-wots-sk");
    h.update(seed);
    h.update((i as u16).to_be_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&h.finalize());
    out
}

/// Compute the 2144-byte public-key core for a secret seed.
pub(crate) fn pk_core_from_seed(seed: &[u8; 32], pub_seed: &[u8], rand2: &[u8]) -> Vec<u8> {
    let mut core = Vec::with_capacity(WOTS_PK_CORE_BYTES);
    for i in 0..WOTS_LEN {
        let sk_i = secret_element(seed, i);
        let end = chain(&sk_i, i, 0, WOTS_W - 1, pub_seed, rand2);
        core.extend_from_slice(&end);
    }
    core
}

/// Sign `message` with the secret seed: each chain is advanced from its
/// start to the digit position.
pub(crate) fn sign_with_seed(
    message: &[u8],
    seed: &[u8; 32],
    pub_seed: &[u8],
    rand2: &[u8],
) -> Vec<u8> {
    let msg_hash: [u8; 32] = Sha256::digest(message).into();
    let d = digits(&msg_hash);
    let mut sig = Vec::with_capacity(WOTS_SIGNATURE_BYTES);
    for i in 0..WOTS_LEN {
        let sk_i = secret_element(seed, i);
        let v = chain(&sk_i, i, 0, d[i] as u32, pub_seed, rand2);
        sig.extend_from_slice(&v);
    }
    sig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::WotsKeyPair;

    #[test]
    fn digit_checksum_bounds() {
        // All-zero digest: checksum is maximal (64 × 15 = 960 = 0x3c0).
        let d = digits(&[0u8; 32]);
        assert_eq!(&d[WOTS_LEN1..], &[0x3, 0xc, 0x0]);
        // All-ones digest: checksum is zero.
        let d = digits(&[0xff; 32]);
        assert_eq!(&d[WOTS_LEN1..], &[0, 0, 0]);
    }

    #[test]
    fn sign_verify_round_trip() {
        let kp = WotsKeyPair::generate();
        let message = b"accept_quote:4f6b1c3a-0000-0000-0000-000000000000";
        let sig = kp.sign(message);
        let v = verify(message, &sig.0, &kp.public_key.0).unwrap();
        assert!(v.valid);
    }

    #[test]
    fn tampered_message_fails() {
        let kp = WotsKeyPair::generate();
        let sig = kp.sign(b"original");
        let v = verify(b"tampered", &sig.0, &kp.public_key.0).unwrap();
        assert!(!v.valid);
    }

    #[test]
    fn tampered_signature_fails() {
        let kp = WotsKeyPair::generate();
        let mut sig = kp.sign(b"message").0;
        sig[100] ^= 0x01;
        let v = verify(b"message", &sig, &kp.public_key.0).unwrap();
        assert!(!v.valid);
    }

    #[test]
    fn wrong_key_fails() {
        let kp = WotsKeyPair::generate();
        let other = WotsKeyPair::generate();
        let sig = kp.sign(b"message");
        let v = verify(b"message", &sig.0, &other.public_key.0).unwrap();
        assert!(!v.valid);
    }

    #[test]
    fn length_mismatch_is_an_error_not_a_panic() {
        let kp = WotsKeyPair::generate();
        let sig = kp.sign(b"m");
        assert!(verify(b"m", &sig.0[..100], &kp.public_key.0).is_err());
        assert!(verify(b"m", &sig.0, &kp.public_key.0[..2000]).is_err());
    }

    #[test]
    fn signature_hash_is_independent_of_validity() {
        let kp = WotsKeyPair::generate();
        let sig = kp.sign(b"first");
        let ok = verify(b"first", &sig.0, &kp.public_key.0).unwrap();
        let bad = verify(b"second", &sig.0, &kp.public_key.0).unwrap();
        assert!(ok.valid);
        assert!(!bad.valid);
        assert_eq!(ok.signature_hash, bad.signature_hash);
    }
}
