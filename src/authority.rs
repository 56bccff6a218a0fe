//! Checkpoint authority key handling
//!
//! The authority public key is fixed by consensus parameters; every node
//! verifies checkpoint messages against it. Holding the matching private
//! key is an attachable capability: a node either carries it and can issue
//! checkpoints, or it does not. There is no other behavioral difference.

use std::sync::Mutex;

use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{CheckpointError, CheckpointResult};
use crate::hash::{hash256, Hash256};
use crate::message::{CheckpointMessage, UnsignedCheckpoint};

/// Verifies checkpoint messages and, when a signing key is attached,
/// signs new ones
pub struct CheckpointAuthority {
    secp: Secp256k1<All>,
    public_key: PublicKey,
    signing_key: Mutex<Option<SecretKey>>,
}

impl CheckpointAuthority {
    /// Create an authority from the hex-encoded public key in the
    /// consensus parameters
    pub fn new(pubkey_hex: &str) -> CheckpointResult<Self> {
        let bytes = hex::decode(pubkey_hex)
            .map_err(|_| CheckpointError::InvalidKey("authority key is not valid hex".into()))?;
        let public_key = PublicKey::from_slice(&bytes)
            .map_err(|_| CheckpointError::InvalidKey("invalid authority public key".into()))?;

        Ok(Self {
            secp: Secp256k1::new(),
            public_key,
            signing_key: Mutex::new(None),
        })
    }

    /// Hex encoding of the authority public key (compressed form)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Attach the node's signing capability.
    ///
    /// The secret is hex-encoded 32-byte key material. A malformed key is
    /// rejected without disturbing any previously attached key.
    pub fn set_signing_key(&self, secret_hex: &str) -> CheckpointResult<()> {
        let bytes = hex::decode(secret_hex)
            .map_err(|_| CheckpointError::InvalidKey("signing key is not valid hex".into()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|_| CheckpointError::InvalidKey("invalid signing key".into()))?;

        let mut slot = self
            .signing_key
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?;
        *slot = Some(secret);
        Ok(())
    }

    /// Whether this node carries the authority signing capability
    pub fn has_signing_key(&self) -> bool {
        self.signing_key
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Verify a checkpoint message against the authority public key.
    ///
    /// On success the unsigned payload is decoded and returned whole; any
    /// failure leaves the message entirely untrusted, with no partially
    /// decoded fields observable to the caller.
    pub fn verify(&self, message: &CheckpointMessage) -> CheckpointResult<UnsignedCheckpoint> {
        let digest = message.signing_digest();
        let msg = Message::from_slice(&digest).map_err(|_| CheckpointError::BadSignature)?;
        let signature =
            Signature::from_compact(&message.signature).map_err(|_| CheckpointError::BadSignature)?;

        self.secp
            .verify_ecdsa(&msg, &signature, &self.public_key)
            .map_err(|_| CheckpointError::BadSignature)?;

        UnsignedCheckpoint::decode(&message.payload)
    }

    /// Sign a checkpoint payload with the attached signing key
    pub fn sign_payload(&self, payload: &[u8]) -> CheckpointResult<Vec<u8>> {
        let slot = self
            .signing_key
            .lock()
            .map_err(|_| CheckpointError::LockPoisoned)?;
        let secret = slot.as_ref().ok_or(CheckpointError::NoSigningKey)?;
        sign_with_key(&self.secp, secret, payload)
    }

    /// Build and sign a complete checkpoint message for a block hash
    pub fn sign_checkpoint(&self, checkpoint_hash: Hash256) -> CheckpointResult<CheckpointMessage> {
        let payload = UnsignedCheckpoint::new(checkpoint_hash).encode()?;
        let signature = self.sign_payload(&payload)?;
        Ok(CheckpointMessage::new(payload, signature))
    }
}

fn sign_with_key(
    secp: &Secp256k1<All>,
    secret: &SecretKey,
    payload: &[u8],
) -> CheckpointResult<Vec<u8>> {
    let digest = hash256(payload);
    let msg = Message::from_slice(&digest)
        .map_err(|e| CheckpointError::SigningFailed(e.to_string()))?;
    let signature = secp.sign_ecdsa(&msg, secret);
    Ok(signature.serialize_compact().to_vec())
}

/// Generate a fresh authority key pair.
///
/// Returns hex-encoded (secret, public) strings; the public half goes into
/// the consensus parameters, the secret half is kept by the operator and
/// attached via `set_signing_key` on the authority node.
pub fn generate_authority_keypair() -> (String, String) {
    let secp = Secp256k1::new();
    let (secret, public) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
    (hex::encode(secret.secret_bytes()), hex::encode(public.serialize()))
}
