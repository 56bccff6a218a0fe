//! Consensus parameters for the checkpoint subsystem

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash256;

/// Network parameters the checkpoint subsystem is configured with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Hash of the network's genesis block
    pub genesis_hash: Hash256,

    /// Hardened checkpoints baked into consensus parameters, by height.
    /// The highest entry serves as the trust anchor on reset.
    pub hardened_checkpoints: BTreeMap<u64, Hash256>,

    /// Hex-encoded public key of the checkpoint authority
    pub authority_pubkey: String,

    /// How many blocks auto-selected checkpoints lag behind the tip.
    /// 0 selects the tip itself; a negative depth disables automatic
    /// selection and leaves checkpointing to the operator.
    pub checkpoint_depth: i64,
}

impl CheckpointConfig {
    /// Create a configuration with no hardened checkpoints and manual
    /// checkpoint selection
    pub fn new(genesis_hash: Hash256, authority_pubkey: impl Into<String>) -> Self {
        Self {
            genesis_hash,
            hardened_checkpoints: BTreeMap::new(),
            authority_pubkey: authority_pubkey.into(),
            checkpoint_depth: -1,
        }
    }

    /// Hash of the most recent hardened checkpoint, if any
    pub fn latest_hardened_checkpoint(&self) -> Option<Hash256> {
        self.hardened_checkpoints
            .iter()
            .next_back()
            .map(|(_, hash)| *hash)
    }
}
