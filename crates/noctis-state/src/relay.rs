//! Store-and-forward relay for encrypted maker↔taker messages.
//!
//! The relay persists opaque ciphertexts keyed by quote request and never
//! attempts access control on reads: confidentiality comes from encryption
//! to stealth addresses, not from the relay.

use std::sync::Arc;

use tracing::{debug, info};

use noctis_core::constants::{MAX_MESSAGE_PAYLOAD_BYTES, MSG_PREFIX_SEND_MESSAGE};
use noctis_core::error::NoctisError;
use noctis_core::ledger::{OperationKind, UsedSignature};
use noctis_core::message::Message;
use noctis_core::request::RequestStatus;
use noctis_core::types::{
    MessageId, RequestId, StealthAddress, TimestampMs, WotsPublicKey, WotsSignature,
};
use noctis_crypto::stealth::fingerprint;

use crate::db::{SignatureReservation, StateDb};

pub struct SendMessageParams {
    pub request_id: RequestId,
    pub recipient_stealth_address: StealthAddress,
    pub encrypted_payload: Vec<u8>,
    pub signature: WotsSignature,
    pub public_key: WotsPublicKey,
}

#[derive(Clone)]
pub struct MessageRelay {
    db: Arc<StateDb>,
}

impl MessageRelay {
    pub fn new(db: Arc<StateDb>) -> Self {
        Self { db }
    }

    /// Accept a signed, encrypted message for a request. Insert-only; the
    /// payload is persisted without inspection. Allowed on filled and
    /// expired requests (after-trade comms); rejected on cancelled ones.
    pub fn send_message(
        &self,
        params: SendMessageParams,
        now: TimestampMs,
    ) -> Result<MessageId, NoctisError> {
        if params.encrypted_payload.is_empty() {
            return Err(NoctisError::MissingField("encryptedContent"));
        }
        if params.encrypted_payload.len() > MAX_MESSAGE_PAYLOAD_BYTES {
            return Err(NoctisError::PayloadTooLarge {
                max: MAX_MESSAGE_PAYLOAD_BYTES,
            });
        }

        let request = self
            .db
            .get_request(&params.request_id)?
            .ok_or_else(|| NoctisError::RequestNotFound(params.request_id.to_string()))?;
        if request.status == RequestStatus::Cancelled {
            return Err(NoctisError::RequestNotActive {
                status: request.status.as_str(),
            });
        }

        let canonical = format!(
            "{}{}:{}:{}",
            MSG_PREFIX_SEND_MESSAGE,
            params.request_id,
            params.recipient_stealth_address.to_hex(),
            hex::encode(&params.encrypted_payload),
        );
        let verification =
            noctis_crypto::verify(canonical.as_bytes(), &params.signature.0, &params.public_key.0)?;
        if !verification.valid {
            return Err(NoctisError::SignatureInvalid);
        }

        let reservation = self.db.reserve_signature(&UsedSignature {
            signature_hash: verification.signature_hash,
            used_at: now,
            operation: OperationKind::SendMessage,
            public_key: params.public_key.clone(),
        })?;
        if reservation == SignatureReservation::Reused {
            return Err(NoctisError::SignatureReused);
        }

        let message = Message {
            message_id: MessageId::generate(),
            request_id: params.request_id,
            sender_public_key: params.public_key,
            recipient_stealth_address: params.recipient_stealth_address,
            encrypted_payload: params.encrypted_payload,
            created_at: now,
            signature: params.signature,
        };
        self.db.append_message(&message)?;

        info!(
            request_id = %params.request_id,
            message_id = %message.message_id,
            bytes = message.encrypted_payload.len(),
            "message relayed"
        );
        Ok(message.message_id)
    }

    /// All messages for a request, ordered by `created_at`. The requester's
    /// key is logged for abuse tracking only; it gates nothing.
    pub fn get_messages(
        &self,
        request_id: &RequestId,
        requester_public_key: &WotsPublicKey,
    ) -> Result<Vec<Message>, NoctisError> {
        if self.db.get_request(request_id)?.is_none() {
            return Err(NoctisError::RequestNotFound(request_id.to_string()));
        }
        debug!(
            request_id = %request_id,
            requester = %fingerprint(requester_public_key),
            "messages fetched"
        );
        self.db.messages_for_request(request_id)
    }
}
