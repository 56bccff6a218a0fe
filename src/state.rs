//! Synchronized checkpoint state manager and consensus gate
//!
//! `CheckpointSync` is the single source of truth for the active, pending
//! and last-conflicting checkpoint. All state lives behind one mutex, and
//! every transition persists before the in-memory value changes, so a
//! promoted-but-not-persisted checkpoint is never observable. Network I/O
//! is never performed under the lock: methods hand relay work back to the
//! caller instead of touching peers themselves.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::authority::CheckpointAuthority;
use crate::chain::{BlockRecord, ChainView};
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};
use crate::hash::{short_hex, Hash256};
use crate::message::CheckpointMessage;
use crate::selector;
use crate::store::CheckpointStore;
use crate::validation::{validate, CheckpointDecision};

/// Result of processing a signed checkpoint message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Message verified, persisted and promoted to the active checkpoint
    Activated,
    /// Referenced block is not yet indexed; held as the pending checkpoint
    Pending,
    /// Older than but consistent with the active checkpoint; dropped
    Stale,
    /// Conflicts with the active checkpoint line; recorded and dropped
    Conflict,
}

/// Operator-facing snapshot of the checkpoint state
#[derive(Debug, Clone)]
pub struct CheckpointStatus {
    /// Currently enforced checkpoint hash
    pub active: Option<Hash256>,
    /// Signature-valid checkpoint whose block has not arrived yet
    pub pending: Option<Hash256>,
    /// Most recent candidate that conflicted with the active line
    pub invalid: Option<Hash256>,
    /// Human-readable warning raised by the last conflict
    pub warning: Option<String>,
}

#[derive(Default)]
struct SyncState {
    active_hash: Option<Hash256>,
    active_message: Option<CheckpointMessage>,
    pending_hash: Option<Hash256>,
    pending_message: Option<CheckpointMessage>,
    invalid_hash: Option<Hash256>,
    warning: Option<String>,
}

/// Synchronized checkpoint subsystem state manager
pub struct CheckpointSync {
    chain: Arc<dyn ChainView>,
    store: Arc<dyn CheckpointStore>,
    authority: CheckpointAuthority,
    config: CheckpointConfig,
    state: Mutex<SyncState>,
}

impl CheckpointSync {
    /// Create the state manager over the given chain view and store.
    ///
    /// The authority public key comes from the configuration; fails with
    /// `InvalidKey` when it does not parse.
    pub fn new(
        chain: Arc<dyn ChainView>,
        store: Arc<dyn CheckpointStore>,
        config: CheckpointConfig,
    ) -> CheckpointResult<Self> {
        let authority = CheckpointAuthority::new(&config.authority_pubkey)?;
        Ok(Self {
            chain,
            store,
            authority,
            config,
            state: Mutex::new(SyncState::default()),
        })
    }

    /// The authority component, for signing-key attachment and direct
    /// message verification
    pub fn authority(&self) -> &CheckpointAuthority {
        &self.authority
    }

    /// Consensus parameters this subsystem runs under
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Startup wiring: restore the persisted checkpoint into memory, then
    /// detect authority-key rotation (which forces a reset).
    pub fn initialize(&self) -> CheckpointResult<()> {
        let persisted = self.store.read_checkpoint_hash()?;
        {
            let mut state = self.lock_state()?;
            state.active_hash = persisted;
        }
        self.check_authority_key_changed()?;
        Ok(())
    }

    /// Consensus gate invoked for every proposed chain extension.
    ///
    /// `block_hash` is the proposed block at `parent.height + 1`. Returns
    /// whether the proposal is compatible with the active checkpoint. A
    /// broken index link during the ancestor walk is propagated as
    /// `StructureFailure` rather than silently rejecting the block.
    pub fn check_sync_checkpoint(
        &self,
        block_hash: &Hash256,
        parent: &BlockRecord,
    ) -> CheckpointResult<bool> {
        let height = parent.height + 1;
        let mut state = self.lock_state()?;

        // Not configured yet, or the recorded checkpoint fell out of the
        // index: lock in genesis and accept.
        let sync_block = match state.active_hash.and_then(|hash| self.chain.lookup(&hash)) {
            Some(block) => block,
            None => {
                let genesis = self.config.genesis_hash;
                self.write_checkpoint_locked(&mut state, genesis)?;
                return Ok(true);
            }
        };

        if height > sync_block.height {
            // Trace the proposed extension back to the checkpoint height;
            // only descendants of the checkpoint may pass.
            let reached = self.chain.ancestor_at_height(parent, sync_block.height)?;
            if !self.chain.contains(&reached.hash) {
                return Ok(false);
            }
        } else if height == sync_block.height {
            // Same height as the checkpoint: only the checkpoint itself
            if *block_hash != sync_block.hash {
                return Ok(false);
            }
        } else if self.chain.lookup(block_hash).is_none() {
            // No new block may appear strictly behind the checkpoint
            return Ok(false);
        }

        Ok(true)
    }

    /// Process a signed checkpoint message.
    ///
    /// Signature verification happens before the state lock is taken; a
    /// bad signature fails closed with no state change. A checkpoint for a
    /// block we have not indexed yet is held pending. Everything else runs
    /// through consistency validation against the active checkpoint and,
    /// on acceptance, the persist-then-promote sequence.
    pub fn process(&self, message: CheckpointMessage) -> CheckpointResult<ProcessOutcome> {
        let payload = self.authority.verify(&message)?;
        let checkpoint_hash = payload.checkpoint_hash;

        let mut state = self.lock_state()?;

        if self.chain.lookup(&checkpoint_hash).is_none() {
            debug!(
                checkpoint = %short_hex(&checkpoint_hash),
                "holding checkpoint for unknown block as pending"
            );
            state.pending_hash = Some(checkpoint_hash);
            state.pending_message = Some(message);
            return Ok(ProcessOutcome::Pending);
        }

        match self.validate_locked(&mut state, &checkpoint_hash)? {
            CheckpointDecision::Stale => Ok(ProcessOutcome::Stale),
            CheckpointDecision::Conflict => Ok(ProcessOutcome::Conflict),
            CheckpointDecision::Accept => {
                self.write_checkpoint_locked(&mut state, checkpoint_hash)?;
                state.active_message = Some(message);
                state.pending_hash = None;
                state.pending_message = None;
                Ok(ProcessOutcome::Activated)
            }
        }
    }

    /// Try to promote the pending checkpoint now that blocks have arrived.
    ///
    /// Returns the promoted message for relaying when promotion happened
    /// and the pending checkpoint came in by message. A pending value that
    /// turns out stale or conflicting is discarded so it can never
    /// resurface; a pending block that is indexed but not yet on the
    /// active chain stays pending.
    pub fn accept_pending(&self) -> CheckpointResult<Option<CheckpointMessage>> {
        let mut state = self.lock_state()?;

        let pending_hash = match state.pending_hash {
            Some(hash) => hash,
            None => return Ok(None),
        };
        if self.chain.lookup(&pending_hash).is_none() {
            return Ok(None);
        }

        match self.validate_locked(&mut state, &pending_hash)? {
            CheckpointDecision::Accept => {}
            _ => {
                state.pending_hash = None;
                state.pending_message = None;
                return Ok(None);
            }
        }

        // The block is indexed but not yet part of the accepted chain;
        // keep it pending until the chain catches up.
        if !self.chain.contains(&pending_hash) {
            return Ok(None);
        }

        self.write_checkpoint_locked(&mut state, pending_hash)?;
        let promoted = state.pending_message.take();
        state.pending_hash = None;
        state.active_message = promoted.clone();
        Ok(promoted)
    }

    /// Reset to the network's most recent hardened checkpoint.
    ///
    /// When the hardened block is not locally known it becomes the pending
    /// checkpoint and genesis is persisted as the interim active value.
    pub fn reset(&self) -> CheckpointResult<()> {
        let mut state = self.lock_state()?;

        let anchor = self
            .config
            .latest_hardened_checkpoint()
            .unwrap_or(self.config.genesis_hash);

        let anchor_known = self.chain.lookup(&anchor).is_some();
        if !anchor_known {
            state.pending_message = None;
            state.pending_hash = Some(anchor);
        }

        let target = if anchor_known && self.chain.contains(&anchor) {
            anchor
        } else {
            self.config.genesis_hash
        };

        self.write_checkpoint_locked(&mut state, target)?;
        state.active_message = None;
        Ok(())
    }

    /// Compare the configured authority key against the persisted one and
    /// force a reset on mismatch.
    ///
    /// A rotated key invalidates trust in the prior checkpoint's
    /// provenance, so the old active value must not survive it. Returns
    /// whether a reset was performed.
    pub fn check_authority_key_changed(&self) -> CheckpointResult<bool> {
        let configured = self.authority.public_key_hex();
        let persisted = self.store.read_authority_key()?;

        if persisted.as_deref() == Some(configured.as_str()) {
            return Ok(false);
        }
        if let Some(previous) = &persisted {
            warn!(
                previous = %previous,
                configured = %configured,
                "checkpoint authority key changed, resetting sync checkpoint"
            );
        }

        self.store.write_authority_key(&configured)?;
        self.store.flush()?;
        self.reset()?;
        Ok(true)
    }

    /// Hash of the pending checkpoint block that still needs fetching
    /// from a peer, if any
    pub fn pending_block_request(&self) -> CheckpointResult<Option<Hash256>> {
        let state = self.lock_state()?;
        Ok(state
            .pending_hash
            .filter(|hash| self.chain.lookup(hash).is_none()))
    }

    /// Select the next checkpoint under the configured depth policy
    pub fn auto_select_checkpoint(&self) -> CheckpointResult<Option<Hash256>> {
        selector::auto_select(self.chain.as_ref(), self.config.checkpoint_depth)
    }

    /// Currently enforced checkpoint hash
    pub fn active_checkpoint(&self) -> CheckpointResult<Option<Hash256>> {
        Ok(self.lock_state()?.active_hash)
    }

    /// The signed message behind the active checkpoint, when it was
    /// established by message rather than bootstrap or reset
    pub fn active_message(&self) -> CheckpointResult<Option<CheckpointMessage>> {
        Ok(self.lock_state()?.active_message.clone())
    }

    /// Operator-facing snapshot of the checkpoint state
    pub fn status(&self) -> CheckpointResult<CheckpointStatus> {
        let state = self.lock_state()?;
        Ok(CheckpointStatus {
            active: state.active_hash,
            pending: state.pending_hash,
            invalid: state.invalid_hash,
            warning: state.warning.clone(),
        })
    }

    fn lock_state(&self) -> CheckpointResult<MutexGuard<'_, SyncState>> {
        self.state.lock().map_err(|_| CheckpointError::LockPoisoned)
    }

    /// Run consistency validation against the active checkpoint, recording
    /// conflicts for the operator. With no active checkpoint established
    /// there is nothing to be consistent with (bootstrap).
    fn validate_locked(
        &self,
        state: &mut SyncState,
        candidate: &Hash256,
    ) -> CheckpointResult<CheckpointDecision> {
        let active = match state.active_hash {
            Some(active) => active,
            None => return Ok(CheckpointDecision::Accept),
        };

        let decision = validate(self.chain.as_ref(), candidate, &active)?;
        if decision == CheckpointDecision::Conflict {
            warn!(
                candidate = %short_hex(candidate),
                active = %short_hex(&active),
                "received checkpoint conflicts with active sync checkpoint"
            );
            state.invalid_hash = Some(*candidate);
            state.warning = Some(format!(
                "checkpoint {} conflicts with active checkpoint {}; \
                 the authority key may be compromised",
                hex::encode(candidate),
                hex::encode(active)
            ));
        }
        Ok(decision)
    }

    /// Persist-then-promote: the in-memory active hash only changes after
    /// the store write and flush both succeeded.
    fn write_checkpoint_locked(
        &self,
        state: &mut SyncState,
        hash: Hash256,
    ) -> CheckpointResult<()> {
        self.store.write_checkpoint_hash(&hash)?;
        self.store.flush()?;
        state.active_hash = Some(hash);
        debug!(checkpoint = %short_hex(&hash), "sync checkpoint persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::generate_authority_keypair;
    use crate::chain::MemoryChain;
    use crate::error::StoreError;
    use crate::store::MemoryCheckpointStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Store wrapper counting checkpoint writes and optionally failing them
    #[derive(Default)]
    struct InstrumentedStore {
        inner: MemoryCheckpointStore,
        checkpoint_writes: AtomicUsize,
        fail_writes: AtomicBool,
    }

    impl CheckpointStore for InstrumentedStore {
        fn read_checkpoint_hash(&self) -> Result<Option<Hash256>, StoreError> {
            self.inner.read_checkpoint_hash()
        }

        fn write_checkpoint_hash(&self, hash: &Hash256) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::WriteFailed("disk full".to_string()));
            }
            self.checkpoint_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write_checkpoint_hash(hash)
        }

        fn read_authority_key(&self) -> Result<Option<String>, StoreError> {
            self.inner.read_authority_key()
        }

        fn write_authority_key(&self, key: &str) -> Result<(), StoreError> {
            self.inner.write_authority_key(key)
        }

        fn flush(&self) -> Result<(), StoreError> {
            self.inner.flush()
        }
    }

    const GENESIS: Hash256 = [0x10; 32];

    /// Main chain [0x10] .. [0x10 + len - 1] at heights 0 .. len - 1
    fn build_chain(len: u8) -> Arc<MemoryChain> {
        let chain = Arc::new(MemoryChain::with_genesis(GENESIS));
        for height in 1..len {
            chain.extend_main(BlockRecord::new(
                [0x10 + height; 32],
                height as u64,
                [0x10 + height - 1; 32],
            ));
        }
        chain
    }

    struct Harness {
        chain: Arc<MemoryChain>,
        store: Arc<InstrumentedStore>,
        sync: CheckpointSync,
        secret_hex: String,
    }

    fn harness(chain_len: u8) -> Harness {
        let (secret_hex, public_hex) = generate_authority_keypair();
        let chain = build_chain(chain_len);
        let store = Arc::new(InstrumentedStore::default());
        let config = CheckpointConfig::new(GENESIS, public_hex);
        let sync = CheckpointSync::new(chain.clone(), store.clone(), config).unwrap();
        Harness {
            chain,
            store,
            sync,
            secret_hex,
        }
    }

    fn signed_checkpoint(h: &Harness, hash: Hash256) -> CheckpointMessage {
        h.sync.authority().set_signing_key(&h.secret_hex).unwrap();
        h.sync.authority().sign_checkpoint(hash).unwrap()
    }

    /// Drive the active checkpoint to a given known block via the message
    /// path
    fn activate(h: &Harness, hash: Hash256) {
        let message = signed_checkpoint(h, hash);
        assert_eq!(h.sync.process(message).unwrap(), ProcessOutcome::Activated);
    }

    #[test]
    fn test_bootstrap_locks_in_genesis() {
        let h = harness(1);
        let genesis = h.chain.tip().unwrap();

        let ok = h.sync.check_sync_checkpoint(&[0xab; 32], &genesis).unwrap();
        assert!(ok);
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some(GENESIS));
        assert_eq!(h.store.read_checkpoint_hash().unwrap(), Some(GENESIS));
    }

    #[test]
    fn test_enforcer_accepts_descendants_of_checkpoint() {
        let h = harness(6);
        activate(&h, [0x13; 32]);

        let tip = h.chain.tip().unwrap();
        let ok = h.sync.check_sync_checkpoint(&[0x99; 32], &tip).unwrap();
        assert!(ok);
    }

    #[test]
    fn test_enforcer_rejects_competing_branch() {
        let h = harness(6);
        activate(&h, [0x13; 32]);

        // Branch that disagrees at the checkpoint height: a block claiming
        // height 3 off the active chain, used as parent for a proposal at
        // height 4.
        h.chain
            .insert_side(BlockRecord::new([0xc3; 32], 3, [0x12; 32]));
        let bad_parent = h.chain.lookup(&[0xc3; 32]).unwrap();

        let ok = h.sync.check_sync_checkpoint(&[0xc4; 32], &bad_parent).unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_enforcer_same_height_requires_exact_checkpoint() {
        let h = harness(6);
        activate(&h, [0x13; 32]);
        let parent = h.chain.lookup(&[0x12; 32]).unwrap();

        assert!(h.sync.check_sync_checkpoint(&[0x13; 32], &parent).unwrap());
        assert!(!h.sync.check_sync_checkpoint(&[0xc3; 32], &parent).unwrap());
    }

    #[test]
    fn test_enforcer_below_height_requires_known_block() {
        let h = harness(6);
        activate(&h, [0x13; 32]);
        let parent = h.chain.lookup(&[0x11; 32]).unwrap();

        // Re-announcing an already indexed block behind the checkpoint is
        // fine; introducing a new one is not.
        assert!(h.sync.check_sync_checkpoint(&[0x12; 32], &parent).unwrap());
        assert!(!h.sync.check_sync_checkpoint(&[0xef; 32], &parent).unwrap());
    }

    #[test]
    fn test_process_unknown_block_goes_pending() {
        let h = harness(3);
        let message = signed_checkpoint(&h, [0x77; 32]);

        assert_eq!(h.sync.process(message).unwrap(), ProcessOutcome::Pending);
        assert_eq!(h.sync.status().unwrap().pending, Some([0x77; 32]));
        assert_eq!(
            h.sync.pending_block_request().unwrap(),
            Some([0x77; 32])
        );
        assert_eq!(h.store.checkpoint_writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reprocessing_active_checkpoint_writes_once() {
        let h = harness(6);
        let message = signed_checkpoint(&h, [0x13; 32]);

        assert_eq!(
            h.sync.process(message.clone()).unwrap(),
            ProcessOutcome::Activated
        );
        let writes_after_first = h.store.checkpoint_writes.load(Ordering::SeqCst);

        assert_eq!(h.sync.process(message).unwrap(), ProcessOutcome::Stale);
        assert_eq!(
            h.store.checkpoint_writes.load(Ordering::SeqCst),
            writes_after_first
        );
    }

    #[test]
    fn test_bad_signature_fails_closed() {
        let h = harness(6);
        let mut message = signed_checkpoint(&h, [0x13; 32]);
        message.signature[3] ^= 0x01;

        assert!(matches!(
            h.sync.process(message),
            Err(CheckpointError::BadSignature)
        ));
        assert_eq!(h.sync.active_checkpoint().unwrap(), None);
        assert_eq!(h.sync.status().unwrap().pending, None);
    }

    #[test]
    fn test_conflicting_checkpoint_recorded() {
        let h = harness(6);
        activate(&h, [0x13; 32]);

        h.chain
            .insert_side(BlockRecord::new([0xaa; 32], 3, [0x12; 32]));
        let message = signed_checkpoint(&h, [0xaa; 32]);

        assert_eq!(h.sync.process(message).unwrap(), ProcessOutcome::Conflict);
        let status = h.sync.status().unwrap();
        assert_eq!(status.invalid, Some([0xaa; 32]));
        assert!(status.warning.is_some());
        // The active checkpoint is untouched by the conflict
        assert_eq!(status.active, Some([0x13; 32]));
    }

    #[test]
    fn test_accept_pending_promotes_and_returns_message_once() {
        let h = harness(3);
        let message = signed_checkpoint(&h, [0x13; 32]);
        assert_eq!(h.sync.process(message.clone()).unwrap(), ProcessOutcome::Pending);

        // Pending block arrives on the active chain
        h.chain
            .extend_main(BlockRecord::new([0x13; 32], 3, [0x12; 32]));

        let promoted = h.sync.accept_pending().unwrap();
        assert_eq!(promoted, Some(message));
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x13; 32]));
        assert_eq!(h.sync.status().unwrap().pending, None);

        // Nothing left to promote
        assert_eq!(h.sync.accept_pending().unwrap(), None);
    }

    #[test]
    fn test_accept_pending_waits_for_active_chain() {
        let h = harness(3);
        let message = signed_checkpoint(&h, [0x77; 32]);
        assert_eq!(h.sync.process(message).unwrap(), ProcessOutcome::Pending);

        // Block shows up on a side branch only: stay pending
        h.chain
            .insert_side(BlockRecord::new([0x77; 32], 3, [0x12; 32]));
        assert_eq!(h.sync.accept_pending().unwrap(), None);
        assert_eq!(h.sync.status().unwrap().pending, Some([0x77; 32]));
        // The block is known now, so there is nothing to request
        assert_eq!(h.sync.pending_block_request().unwrap(), None);
    }

    #[test]
    fn test_conflicting_pending_is_discarded() {
        let h = harness(6);
        activate(&h, [0x14; 32]);

        let stale = signed_checkpoint(&h, [0x77; 32]);
        assert_eq!(h.sync.process(stale).unwrap(), ProcessOutcome::Pending);

        // The awaited block finally arrives, but behind the active
        // checkpoint on a side branch: discard, never resurface.
        h.chain
            .insert_side(BlockRecord::new([0x77; 32], 1, GENESIS));

        assert_eq!(h.sync.accept_pending().unwrap(), None);
        assert_eq!(h.sync.status().unwrap().pending, None);
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x14; 32]));
    }

    #[test]
    fn test_persistence_failure_leaves_memory_unchanged() {
        let h = harness(6);
        activate(&h, [0x12; 32]);

        h.store.fail_writes.store(true, Ordering::SeqCst);
        let message = signed_checkpoint(&h, [0x14; 32]);

        assert!(matches!(
            h.sync.process(message),
            Err(CheckpointError::Store(_))
        ));
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x12; 32]));
    }

    #[test]
    fn test_reset_to_known_hardened_checkpoint() {
        let mut h = harness(6);
        let config = CheckpointConfig {
            hardened_checkpoints: [(4, [0x14; 32])].into_iter().collect(),
            ..h.sync.config().clone()
        };
        h.sync = CheckpointSync::new(h.chain.clone(), h.store.clone(), config).unwrap();

        h.sync.reset().unwrap();
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x14; 32]));
        assert_eq!(h.sync.status().unwrap().pending, None);
    }

    #[test]
    fn test_reset_with_unknown_hardened_checkpoint() {
        let mut h = harness(3);
        let config = CheckpointConfig {
            hardened_checkpoints: [(50, [0x99; 32])].into_iter().collect(),
            ..h.sync.config().clone()
        };
        h.sync = CheckpointSync::new(h.chain.clone(), h.store.clone(), config).unwrap();

        h.sync.reset().unwrap();
        // Genesis becomes the interim active value; the hardened hash
        // waits as pending.
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some(GENESIS));
        assert_eq!(h.sync.status().unwrap().pending, Some([0x99; 32]));
    }

    #[test]
    fn test_authority_key_change_forces_reset() {
        let h = harness(6);
        activate(&h, [0x14; 32]);

        // Pretend the store carries a key from a previous authority
        h.store.write_authority_key("02deadbeef").unwrap();

        assert!(h.sync.check_authority_key_changed().unwrap());
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some(GENESIS));
        assert_eq!(
            h.store.read_authority_key().unwrap(),
            Some(h.sync.authority().public_key_hex())
        );

        // Stable key on the next check: no reset
        activate(&h, [0x14; 32]);
        assert!(!h.sync.check_authority_key_changed().unwrap());
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x14; 32]));
    }

    #[test]
    fn test_initialize_restores_persisted_checkpoint() {
        let h = harness(6);
        h.store.write_checkpoint_hash(&[0x13; 32]).unwrap();
        h.store
            .write_authority_key(&h.sync.authority().public_key_hex())
            .unwrap();

        h.sync.initialize().unwrap();
        assert_eq!(h.sync.active_checkpoint().unwrap(), Some([0x13; 32]));
    }
}
