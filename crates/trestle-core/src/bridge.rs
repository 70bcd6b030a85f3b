//! The bridge facade: one handle over the store, validator, cache manager
//! and proof verifier, wired together at construction time.

use std::num::NonZeroUsize;
use std::sync::Arc;

use alloy_primitives::U256;
use thiserror::Error;
use tracing::info;

use crate::chain::store::{ChainStoreError, HeaderChainStore, InsertOutcome};
use crate::config::{ChainParams, ForeignChain};
use crate::consensus::cache::{DatasetLoader, ProofCacheManager};
use crate::consensus::validator::{HeaderValidator, VerificationError};
use crate::execution::proof::ProofError;
use crate::execution::receipt::ReceiptProofVerifier;
use crate::source::{BlockReceiptCache, BlockSource};
use crate::storage::KeyValueStore;
use crate::types::{BlockHeader, Hash256, Receipt};

/// Errors from the bridge's submission surface.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("header {index} rejected: {source}")]
    Rejected {
        index: usize,
        #[source]
        source: VerificationError,
    },

    #[error(transparent)]
    Store(#[from] ChainStoreError),
}

/// A light client following one foreign proof-of-work chain.
///
/// Owns the canonical chain store, the header validator, the epoch cache
/// manager and the receipt proof verifier, all sharing one explicit store
/// handle. Independent bridges never share state, so several can follow
/// different chains (or the same chain, in tests) side by side.
pub struct Bridge {
    chain: ForeignChain,
    store: Arc<HeaderChainStore>,
    validator: HeaderValidator,
    verifier: ReceiptProofVerifier,
}

impl Bridge {
    /// Bootstrap a bridge from a trusted anchor header and the total
    /// difficulty of the chain up to it. The anchor epoch's verification
    /// cache is prepared synchronously before this returns.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        chain: ForeignChain,
        anchor: BlockHeader,
        anchor_td: U256,
        loader: Arc<dyn DatasetLoader>,
        kv: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let params = chain.params();
        info!(
            chain_id = params.chain_id,
            anchor = anchor.number,
            "bootstrapping bridge from trusted anchor"
        );
        let caches = Arc::new(ProofCacheManager::new(
            loader,
            params.epoch_length,
            anchor.number,
        )?);
        let store = Arc::new(HeaderChainStore::new(params.retention, anchor, anchor_td, kv)?);
        let validator = HeaderValidator::new(params, Arc::clone(&store), caches);
        let verifier = ReceiptProofVerifier::new(Arc::clone(&store));
        Ok(Self { chain, store, validator, verifier })
    }

    /// Enable ancestor receipts-root cross-checks backed by `source`,
    /// memoized in a bounded cache of `capacity` blocks.
    pub fn with_block_source(mut self, source: Arc<dyn BlockSource>, capacity: NonZeroUsize) -> Self {
        let cache = Arc::new(BlockReceiptCache::new(source, capacity));
        self.validator = self.validator.with_receipt_cache(cache);
        self
    }

    /// The chain this bridge follows.
    pub fn chain(&self) -> &ForeignChain {
        &self.chain
    }

    /// Protocol parameters of the followed chain.
    pub fn params(&self) -> ChainParams {
        self.chain.params()
    }

    /// Validate and store a batch of candidate headers.
    ///
    /// The batch is rejected at its first invalid header; only a fully
    /// valid batch reaches the store and fork choice.
    pub async fn submit_headers(&self, batch: &[BlockHeader]) -> Result<InsertOutcome, BridgeError> {
        self.validator
            .verify_all(batch)
            .await
            .map_err(|(index, source)| BridgeError::Rejected { index, source })?;
        Ok(self.store.insert_headers(batch)?)
    }

    /// Current canonical head as `(number, hash)`.
    pub fn current_head(&self) -> (u64, Hash256) {
        self.store.current_head()
    }

    /// Header stored under `(number, hash)`, canonical or not.
    pub fn get_header(&self, number: u64, hash: &Hash256) -> Option<BlockHeader> {
        self.store.get_header(number, hash)
    }

    /// Canonical header at `number`.
    pub fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        self.store.header_by_number(number)
    }

    /// Total difficulty of the chain ending at `(number, hash)`.
    pub fn get_total_difficulty(&self, number: u64, hash: &Hash256) -> Option<U256> {
        self.store.get_total_difficulty(number, hash)
    }

    /// Canonical hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> Option<Hash256> {
        self.store.canonical_hash(number)
    }

    /// Verify a claimed receipt inclusion proof against the canonical
    /// header at `block_number`, returning the authenticated receipt bytes.
    pub fn verify_receipt_inclusion(
        &self,
        block_number: u64,
        receipt: &Receipt,
        proof_nodes: &[Vec<u8>],
        tx_index: u64,
    ) -> Result<Vec<u8>, ProofError> {
        self.verifier.verify(block_number, receipt, proof_nodes, tx_index)
    }

    /// Handle to the underlying chain store, for collaborators that read
    /// history directly.
    pub fn store(&self) -> &Arc<HeaderChainStore> {
        &self.store
    }
}
