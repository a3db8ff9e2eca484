//! Privacy primitives: stealth-address derivation, settlement nullifiers,
//! and public-key fingerprints for logging.

use rand::rngs::OsRng;
use rand::RngCore;

use noctis_core::types::{SettlementNullifier, StealthAddress, WotsPublicKey};

use crate::hash::blake3_hash;

/// Derive a fresh one-time stealth address for a quote request.
///
/// Opaque and globally unique with overwhelming probability; deliberately
/// non-deterministic so addresses are unlinkable across requests. Makers
/// encrypt replies to this address without learning the taker's identity.
pub fn derive_stealth_address() -> StealthAddress {
    let mut entropy = [0u8; 32];
    OsRng.fill_bytes(&mut entropy);
    StealthAddress(blake3_hash(&entropy))
}

/// Mint a fresh 256-bit settlement nullifier. Recorded on a request when it
/// fills; blocks re-acceptance.
pub fn generate_nullifier() -> SettlementNullifier {
    let mut n = [0u8; 32];
    OsRng.fill_bytes(&mut n);
    SettlementNullifier(n)
}

/// Short tag of a WOTS+ public key for log lines and abuse tracking.
/// Never an authorization input: keys are one-time and unlinkable by design.
pub fn fingerprint(public_key: &WotsPublicKey) -> String {
    hex::encode(&blake3_hash(&public_key.0)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_addresses_do_not_collide() {
        let a = derive_stealth_address();
        let b = derive_stealth_address();
        assert_ne!(a, b);
    }

    #[test]
    fn nullifiers_are_fresh() {
        assert_ne!(generate_nullifier().0, generate_nullifier().0);
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let pk = WotsPublicKey(vec![7u8; 64]);
        let f1 = fingerprint(&pk);
        assert_eq!(f1.len(), 16);
        assert_eq!(f1, fingerprint(&pk));
    }
}
