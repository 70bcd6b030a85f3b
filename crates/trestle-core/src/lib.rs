//! # Trestle Core
//!
//! Verification and storage engine for the Trestle cross-chain bridge.
//!
//! This crate contains **no RPC dialing** and **no storage engine** — it is
//! the trust boundary of the bridge. Every foreign-chain header passes
//! through these checks before it is accepted, and every cross-chain message
//! must carry a receipt proof that verifies against an accepted header.
//!
//! ## Trust Model
//!
//! - **Header verification** (`consensus` module): protocol rule checks and
//!   the proof-of-work seal against per-epoch verification caches. Trusts
//!   that rewriting the accepted history would cost more work than honest
//!   mining (the same assumption as the foreign chain itself).
//!
//! - **Fork choice and retention** (`chain` module): total-difficulty fork
//!   choice over a bounded, fork-aware header store seeded from an
//!   explicitly trusted anchor.
//!
//! - **Receipt proof verification** (`execution` module): Merkle-Patricia
//!   inclusion proofs against the receipts root of an accepted header. Zero
//!   trust assumptions beyond that root.
//!
//! ## Usage
//!
//! ```ignore
//! use trestle_core::{Bridge, ForeignChain};
//!
//! let bridge = Bridge::new(ForeignChain::Mainnet, anchor, anchor_td, loader, kv)?;
//! bridge.submit_headers(&batch).await?;
//! let bytes = bridge.verify_receipt_inclusion(number, &receipt, &proof, index)?;
//! ```

pub mod bridge;
pub mod chain;
pub mod config;
pub mod consensus;
pub mod execution;
pub mod source;
pub mod storage;
pub mod types;

// Re-export commonly used types for convenience
pub use bridge::{Bridge, BridgeError};
pub use chain::store::{ChainStoreError, HeaderChainStore, InsertOutcome, InsertStatus};
pub use config::{ChainParams, ForeignChain};
pub use consensus::{
    cache::{DatasetLoader, ProofCacheManager},
    rules::RuleError,
    seal::{verify_seal, EpochCache, SealError},
    validator::{HeaderValidator, VerificationError},
};
pub use execution::{
    proof::{verify_trie_proof, ProofError},
    receipt::ReceiptProofVerifier,
    trie::{Trie, EMPTY_TRIE_ROOT},
};
pub use source::{BlockReceiptCache, BlockSource, ReceiptCacheError, VerifiedBlock};
pub use storage::{KeyValueStore, MemoryStore};
pub use types::{keccak256, keccak512, Address, Block, BlockHeader, Hash256, Log, Receipt};
