//! Wire format for synchronized checkpoint messages
//!
//! A checkpoint message carries the exact serialized bytes of the unsigned
//! payload next to the signature over those bytes. Verification always runs
//! against the stored bytes, never a re-encoding, so the signed encoding
//! stays stable across serializer versions.

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::hash::{hash256, Hash256};

/// Version of the unsigned checkpoint payload encoding
pub const CHECKPOINT_PAYLOAD_VERSION: u32 = 1;

/// The signed content of a checkpoint message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedCheckpoint {
    /// Payload encoding version
    pub version: u32,
    /// Hash of the block designated as the checkpoint
    pub checkpoint_hash: Hash256,
}

impl UnsignedCheckpoint {
    /// Create a version-1 payload for the given block hash
    pub fn new(checkpoint_hash: Hash256) -> Self {
        Self {
            version: CHECKPOINT_PAYLOAD_VERSION,
            checkpoint_hash,
        }
    }

    /// Canonical byte encoding, the exact bytes covered by the signature
    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a payload from its canonical byte encoding
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A signed checkpoint message as relayed between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMessage {
    /// Exact serialized bytes of the `UnsignedCheckpoint` that were signed
    pub payload: Vec<u8>,
    /// Compact ECDSA signature over `hash256(payload)`
    pub signature: Vec<u8>,
}

impl CheckpointMessage {
    /// Assemble a message from payload bytes and a signature over them
    pub fn new(payload: Vec<u8>, signature: Vec<u8>) -> Self {
        Self { payload, signature }
    }

    /// Digest that the signature commits to
    pub fn signing_digest(&self) -> Hash256 {
        hash256(&self.payload)
    }
}
