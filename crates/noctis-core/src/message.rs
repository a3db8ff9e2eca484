use serde::{Deserialize, Serialize};

use crate::types::{MessageId, RequestId, StealthAddress, TimestampMs, WotsPublicKey, WotsSignature};

/// A store-and-forward encrypted message between the parties of a quote
/// request. The relay never inspects or decrypts `encrypted_payload`;
/// recipients are protected by encryption to stealth addresses, not by
/// access control.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub request_id: RequestId,
    pub sender_public_key: WotsPublicKey,
    pub recipient_stealth_address: StealthAddress,
    pub encrypted_payload: Vec<u8>,
    pub created_at: TimestampMs,
    pub signature: WotsSignature,
}
