//! Consistency validation of checkpoint candidates
//!
//! Checkpoints form a single strictly-extending line. A candidate either
//! extends the line from the currently active checkpoint, restates an older
//! point of the same line, or diverges from it. Divergence means the
//! authority key is compromised or the operator made a mistake, and is
//! never silently merged.

use tracing::debug;

use crate::chain::ChainView;
use crate::error::{CheckpointError, CheckpointResult};
use crate::hash::{short_hex, Hash256};

/// Outcome of checking a candidate checkpoint against the active one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// Candidate extends the active checkpoint line; adopt it
    Accept,
    /// Candidate is older than but consistent with the active line;
    /// a harmless no-op
    Stale,
    /// Candidate diverges from the active checkpoint line
    Conflict,
}

/// Check whether `candidate` is consistent with the `active` checkpoint.
///
/// Both hashes must resolve in the block index; a missing block is a
/// `MissingBlock` error ("not yet", resolved via the pending path), while a
/// broken parent link during the walk is a `StructureFailure`.
///
/// A candidate above the active height must have the active checkpoint as
/// its ancestor at the active height. A candidate at or below the active
/// height must itself lie on the active chain, i.e. be part of the lineage
/// the active checkpoint extends.
pub fn validate(
    chain: &dyn ChainView,
    candidate: &Hash256,
    active: &Hash256,
) -> CheckpointResult<CheckpointDecision> {
    let active_block = chain
        .lookup(active)
        .ok_or_else(|| CheckpointError::MissingBlock(hex::encode(active)))?;
    let candidate_block = chain
        .lookup(candidate)
        .ok_or_else(|| CheckpointError::MissingBlock(hex::encode(candidate)))?;

    if candidate_block.height <= active_block.height {
        // Received an older checkpoint. It is harmless exactly when it is
        // part of the chain the active checkpoint already locks in.
        if !chain.contains(candidate) {
            return Ok(CheckpointDecision::Conflict);
        }
        debug!(
            candidate = %short_hex(candidate),
            "ignoring stale checkpoint consistent with the active line"
        );
        return Ok(CheckpointDecision::Stale);
    }

    // Candidate is newer: trace back to the active checkpoint's height and
    // require that the block reached is the active checkpoint itself.
    let reached = chain.ancestor_at_height(&candidate_block, active_block.height)?;
    if reached.hash != *active {
        return Ok(CheckpointDecision::Conflict);
    }

    Ok(CheckpointDecision::Accept)
}
