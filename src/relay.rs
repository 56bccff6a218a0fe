//! Peer relay for checkpoint messages
//!
//! Broadcasts are fire-and-forget: no acknowledgment tracking and no
//! retries, propagation relies on best-effort gossip between peers. The
//! relay owns no checkpoint state; it drives `CheckpointSync` and performs
//! the network actions the state manager hands back, strictly after the
//! state lock has been released.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{CheckpointError, CheckpointResult};
use crate::hash::Hash256;
use crate::message::CheckpointMessage;
use crate::state::{CheckpointSync, ProcessOutcome};

/// Connected-peer access consumed by the relay.
///
/// The peer handle is whatever the embedding node uses to address peers;
/// the relay only enumerates, sends and requests.
pub trait PeerSet: Send + Sync {
    /// Peer handle type of the embedding network layer
    type PeerId: Clone + Eq + fmt::Debug;

    /// Currently connected peers
    fn peers(&self) -> Vec<Self::PeerId>;

    /// Send a checkpoint message to one peer, best effort
    fn send_checkpoint(&self, peer: &Self::PeerId, message: &CheckpointMessage);

    /// Ask one peer for a specific block
    fn request_block(&self, peer: &Self::PeerId, hash: &Hash256);
}

/// Relays checkpoint messages between the local subsystem and peers
pub struct CheckpointRelay<P: PeerSet> {
    sync: Arc<CheckpointSync>,
    peers: Arc<P>,
}

impl<P: PeerSet> CheckpointRelay<P> {
    /// Create a relay over the shared checkpoint state and peer set
    pub fn new(sync: Arc<CheckpointSync>, peers: Arc<P>) -> Self {
        Self { sync, peers }
    }

    /// The checkpoint state manager this relay drives
    pub fn sync(&self) -> &Arc<CheckpointSync> {
        &self.sync
    }

    /// Send a signed checkpoint message to every connected peer
    pub fn broadcast(&self, message: &CheckpointMessage) {
        self.broadcast_except(message, None);
    }

    fn broadcast_except(&self, message: &CheckpointMessage, skip: Option<&P::PeerId>) {
        for peer in self.peers.peers() {
            if skip == Some(&peer) {
                continue;
            }
            self.peers.send_checkpoint(&peer, message);
        }
    }

    /// Handle a checkpoint message received from the network.
    ///
    /// Returns whether the message advanced the local checkpoint. An
    /// activated checkpoint is rebroadcast to every peer except the
    /// sender; a pending one triggers a block request back to the sender
    /// so the missing block can catch up with its announcement.
    pub fn process_incoming(
        &self,
        message: CheckpointMessage,
        from: Option<&P::PeerId>,
    ) -> bool {
        let outcome = match self.sync.process(message.clone()) {
            Ok(outcome) => outcome,
            Err(CheckpointError::BadSignature) => {
                warn!(?from, "dropping checkpoint message with bad signature");
                return false;
            }
            Err(e) => {
                warn!(?from, error = %e, "failed to process checkpoint message");
                return false;
            }
        };

        match outcome {
            ProcessOutcome::Activated => {
                self.broadcast_except(&message, from);
                true
            }
            ProcessOutcome::Pending => {
                if let Some(peer) = from {
                    self.request_pending_block(peer);
                }
                false
            }
            ProcessOutcome::Stale | ProcessOutcome::Conflict => false,
        }
    }

    /// Authority-only entry point: sign `checkpoint_hash`, run the message
    /// through the identical path a received checkpoint takes, and
    /// broadcast it once it activated locally.
    pub fn submit_new(&self, checkpoint_hash: Hash256) -> CheckpointResult<()> {
        let message = self.sync.authority().sign_checkpoint(checkpoint_hash)?;

        // The authority never trusts its own checkpoint without running
        // full validation.
        match self.sync.process(message.clone())? {
            ProcessOutcome::Activated => {
                self.broadcast(&message);
                Ok(())
            }
            outcome => Err(CheckpointError::NotAccepted(format!("{outcome:?}"))),
        }
    }

    /// Promote the pending checkpoint if its block has arrived, relaying
    /// the promoted message to all peers. Returns whether a message was
    /// promoted and relayed.
    pub fn accept_pending(&self) -> CheckpointResult<bool> {
        match self.sync.accept_pending()? {
            Some(message) => {
                self.broadcast(&message);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask `peer` for the pending checkpoint's block when it is still
    /// missing from the local index
    pub fn request_pending_block(&self, peer: &P::PeerId) {
        match self.sync.pending_block_request() {
            Ok(Some(hash)) => self.peers.request_block(peer, &hash),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not query pending checkpoint"),
        }
    }
}
