//! Automatic checkpoint selection
//!
//! The depth policy decides how far checkpoints lag behind the tip. Depth 0
//! checkpoints the tip itself and gives the strongest reorganization
//! protection; larger depths are more conservative. A negative depth turns
//! automatic selection off, leaving checkpoints to the operator.

use crate::chain::ChainView;
use crate::error::CheckpointResult;
use crate::hash::Hash256;

/// Select the block that should become the next checkpoint under the given
/// depth policy.
///
/// Returns `None` when automatic selection is disabled (`depth < 0`) or the
/// chain has no tip yet. Otherwise returns the hash of the block exactly
/// `depth` blocks behind the tip, clamped at genesis for short chains.
pub fn auto_select(chain: &dyn ChainView, depth: i64) -> CheckpointResult<Option<Hash256>> {
    if depth < 0 {
        return Ok(None);
    }
    let tip = match chain.tip() {
        Some(tip) => tip,
        None => return Ok(None),
    };

    let target_height = tip.height.saturating_sub(depth as u64);
    let selected = chain.ancestor_at_height(&tip, target_height)?;
    Ok(Some(selected.hash))
}
