//! Synchronized checkpoint subsystem
//!
//! A privileged checkpoint authority periodically designates a block as a
//! finality boundary, signs that designation, and every node enforces it as
//! a hard constraint on which chain history may be accepted. This gives a
//! network an additional layer of protection against majority-hashpower
//! reorganization attacks at the cost of temporary, consensual central
//! control over finality.
//!
//! Besides verifying the signature of every checkpoint message, each node
//! verifies consistency: checkpoints must form a single strictly-extending
//! line. A conflicting checkpoint means either the authority key is
//! compromised or the operator made a mistake; the node records the
//! offending hash, raises an operator warning and drops the message, which
//! bounds the damage either failure can cause.
//!
//! The subsystem is deliberately small at its seams. The block index, the
//! durable store and the peer transport stay outside, behind the
//! [`chain::ChainView`], [`store::CheckpointStore`] and [`relay::PeerSet`]
//! traits; everything stateful lives in one [`state::CheckpointSync`]
//! instance guarded by a single lock, with persistence completing before
//! any in-memory promotion becomes visible.

pub mod authority;
pub mod chain;
pub mod config;
pub mod error;
pub mod hash;
pub mod message;
pub mod relay;
pub mod selector;
pub mod state;
pub mod store;
pub mod validation;

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use crate::authority::{generate_authority_keypair, CheckpointAuthority};
pub use crate::chain::{BlockRecord, ChainView, MemoryChain};
pub use crate::config::CheckpointConfig;
pub use crate::error::{CheckpointError, CheckpointResult, StoreError};
pub use crate::hash::{hash256, Hash256};
pub use crate::message::{CheckpointMessage, UnsignedCheckpoint};
pub use crate::relay::{CheckpointRelay, PeerSet};
pub use crate::selector::auto_select;
pub use crate::state::{CheckpointStatus, CheckpointSync, ProcessOutcome};
pub use crate::store::{CheckpointStore, MemoryCheckpointStore, SledCheckpointStore};
pub use crate::validation::{validate, CheckpointDecision};
