use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use noctis_core::constants::{WOTS_N, WOTS_PK_CORE_BYTES};
use noctis_core::types::{WotsPublicKey, WotsSignature};

use crate::wots::{pk_core_from_seed, sign_with_seed};

/// A WOTS+ keypair. Strictly one-time: a keypair that has signed must never
/// sign again. Callers mint a fresh keypair per action.
///
/// The secret seed is wiped from memory on drop.
#[derive(Serialize, Deserialize)]
pub struct WotsKeyPair {
    pub public_key: WotsPublicKey,
    secret_seed: [u8; 32],
}

impl WotsKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        let mut pub_seed = [0u8; 32];
        let mut rand2 = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        OsRng.fill_bytes(&mut pub_seed);
        OsRng.fill_bytes(&mut rand2);

        let mut pk = pk_core_from_seed(&seed, &pub_seed, &rand2);
        pk.extend_from_slice(&pub_seed);
        pk.extend_from_slice(&rand2);

        Self {
            public_key: WotsPublicKey(pk),
            secret_seed: seed,
        }
    }

    /// Sign `message`. The digest and chain advancement happen internally;
    /// the caller supplies the exact canonical message bytes.
    pub fn sign(&self, message: &[u8]) -> WotsSignature {
        let seed = Zeroizing::new(self.secret_seed);
        let pub_seed = &self.public_key.0[WOTS_PK_CORE_BYTES..WOTS_PK_CORE_BYTES + WOTS_N];
        let rand2 = &self.public_key.0[WOTS_PK_CORE_BYTES + WOTS_N..];
        WotsSignature(sign_with_seed(message, &seed, pub_seed, rand2))
    }

    /// Restore a keypair from raw parts (e.g. a key file written by the
    /// keygen tool).
    pub fn from_raw(pk_bytes: Vec<u8>, seed: [u8; 32]) -> Self {
        Self {
            public_key: WotsPublicKey(pk_bytes),
            secret_seed: seed,
        }
    }

    pub fn secret_seed_bytes(&self) -> &[u8; 32] {
        &self.secret_seed
    }
}

impl Drop for WotsKeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_seed.zeroize();
    }
}

impl std::fmt::Debug for WotsKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WotsKeyPair {{ public_key: {:?} }}", self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noctis_core::constants::{WOTS_PUBLIC_KEY_BYTES, WOTS_SIGNATURE_BYTES};

    #[test]
    fn generated_sizes_match_the_wire_contract() {
        let kp = WotsKeyPair::generate();
        assert_eq!(kp.public_key.0.len(), WOTS_PUBLIC_KEY_BYTES);
        let sig = kp.sign(b"sizing");
        assert_eq!(sig.0.len(), WOTS_SIGNATURE_BYTES);
    }

    #[test]
    fn fresh_keypairs_are_distinct() {
        let a = WotsKeyPair::generate();
        let b = WotsKeyPair::generate();
        assert_ne!(a.public_key.0, b.public_key.0);
    }
}
