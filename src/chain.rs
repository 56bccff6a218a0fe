//! Chain abstraction consumed by the checkpoint subsystem
//!
//! The block index and chain selection engine live outside this crate; the
//! checkpoint logic only needs ancestor lookup, active-chain containment and
//! tip access, so that is all `ChainView` asks for. Ancestor walks are
//! expressed once, as `ancestor_at_height`, instead of raw parent-pointer
//! loops scattered through the callers.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CheckpointError;
use crate::hash::{Hash256, ZERO_HASH};

/// Minimal view of an indexed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    /// Block hash
    pub hash: Hash256,
    /// Height of this block in the chain
    pub height: u64,
    /// Hash of the previous block
    pub prev_hash: Hash256,
}

impl BlockRecord {
    /// Create a new block record
    pub fn new(hash: Hash256, height: u64, prev_hash: Hash256) -> Self {
        Self {
            hash,
            height,
            prev_hash,
        }
    }
}

/// Read access to the block index and the currently accepted chain
pub trait ChainView: Send + Sync {
    /// Look up an indexed block by hash, on any known branch
    fn lookup(&self, hash: &Hash256) -> Option<BlockRecord>;

    /// Whether the block with this hash is part of the active chain
    fn contains(&self, hash: &Hash256) -> bool;

    /// Current tip of the active chain, if any block is indexed
    fn tip(&self) -> Option<BlockRecord>;

    /// Walk parent links from `from` back to the block at `height`.
    ///
    /// Returns `from` itself when it is already at or below `height`.
    /// A missing parent link along the way is a structure failure in the
    /// index and is reported as an error, not skipped.
    fn ancestor_at_height(
        &self,
        from: &BlockRecord,
        height: u64,
    ) -> Result<BlockRecord, CheckpointError> {
        let mut current = *from;
        while current.height > height {
            current = self
                .lookup(&current.prev_hash)
                .ok_or_else(|| CheckpointError::StructureFailure(hex::encode(current.prev_hash)))?;
        }
        Ok(current)
    }
}

/// In-memory block index with an explicit active chain.
///
/// Used by embedders that keep their index in memory and throughout the
/// test suite. The active chain is the `main` vector, one hash per height.
pub struct MemoryChain {
    inner: RwLock<MemoryChainInner>,
}

#[derive(Default)]
struct MemoryChainInner {
    /// Known blocks by hash, active chain and side branches alike
    blocks: HashMap<Hash256, BlockRecord>,
    /// Active chain, indexed by height
    main: Vec<Hash256>,
}

impl MemoryChain {
    /// Create an empty chain with no indexed blocks
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryChainInner::default()),
        }
    }

    /// Create a chain holding only the genesis block with the given hash
    pub fn with_genesis(genesis_hash: Hash256) -> Self {
        let chain = Self::new();
        chain.extend_main(BlockRecord::new(genesis_hash, 0, ZERO_HASH));
        chain
    }

    /// Append a block to the active chain.
    ///
    /// The record's height must be exactly one past the current tip (or 0
    /// for the first block); anything else is ignored with a warning since
    /// it would corrupt the height index.
    pub fn extend_main(&self, record: BlockRecord) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if record.height != inner.main.len() as u64 {
            tracing::warn!(
                height = record.height,
                tip = inner.main.len(),
                "ignoring out-of-order extension of in-memory chain"
            );
            return;
        }
        inner.blocks.insert(record.hash, record);
        inner.main.push(record.hash);
    }

    /// Index a block without placing it on the active chain
    pub fn insert_side(&self, record: BlockRecord) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.blocks.insert(record.hash, record);
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainView for MemoryChain {
    fn lookup(&self, hash: &Hash256) -> Option<BlockRecord> {
        self.inner.read().ok()?.blocks.get(hash).copied()
    }

    fn contains(&self, hash: &Hash256) -> bool {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return false,
        };
        match inner.blocks.get(hash) {
            Some(record) => inner.main.get(record.height as usize) == Some(hash),
            None => false,
        }
    }

    fn tip(&self) -> Option<BlockRecord> {
        let inner = self.inner.read().ok()?;
        let tip_hash = inner.main.last()?;
        inner.blocks.get(tip_hash).copied()
    }
}
