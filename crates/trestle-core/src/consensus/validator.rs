use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use thiserror::Error;

use crate::chain::store::HeaderChainStore;
use crate::config::ChainParams;
use crate::consensus::cache::ProofCacheManager;
use crate::consensus::rules::{validate_header, RuleError};
use crate::consensus::seal::{verify_seal, SealError};
use crate::source::BlockReceiptCache;
use crate::types::{BlockHeader, Hash256};

/// Reasons a header fails validation.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("no known ancestor {ancestor} at height {number}", ancestor = hex::encode(.hash))]
    UnknownAncestor { hash: Hash256, number: u64 },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Seal(#[from] SealError),

    #[error("proof cache unavailable: {0}")]
    Cache(String),

    #[error("ancestor receipts root mismatch: {0}")]
    AncestorReceipts(String),
}

/// Validates batches of candidate headers against protocol rules and the
/// proof-of-work seal before they may enter the chain store.
///
/// Per-header work is fanned out to a bounded worker pool; an ordering stage
/// re-serializes completions so callers observe results exactly as if
/// validation ran sequentially.
pub struct HeaderValidator {
    params: ChainParams,
    store: Arc<HeaderChainStore>,
    caches: Arc<ProofCacheManager>,
    receipts: Option<Arc<BlockReceiptCache>>,
}

impl HeaderValidator {
    /// Build a validator over an explicit store and cache manager.
    pub fn new(
        params: ChainParams,
        store: Arc<HeaderChainStore>,
        caches: Arc<ProofCacheManager>,
    ) -> Self {
        Self { params, store, caches, receipts: None }
    }

    /// Enable deep ancestor checks: the resolved ancestor's receipts root is
    /// cross-checked against a trie rebuilt from fetched receipts.
    pub fn with_receipt_cache(mut self, receipts: Arc<BlockReceiptCache>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    /// Validate a batch of headers, returning one result per header in
    /// input order.
    ///
    /// The stream of results stops at the first failing header: the returned
    /// vector either holds `batch.len()` successes or ends with its single
    /// error. Work already dispatched for later headers is left to finish on
    /// the blocking pool and its outcome discarded.
    pub async fn verify_headers(&self, batch: &[BlockHeader]) -> Vec<Result<(), VerificationError>> {
        if batch.is_empty() {
            return Vec::new();
        }

        // Resolve the ancestor the batch claims to extend.
        let parent_number = batch[0].number.wrapping_sub(1);
        let Some(ancestor) = self.store.get_header(parent_number, &batch[0].parent_hash) else {
            return vec![Err(VerificationError::UnknownAncestor {
                hash: batch[0].parent_hash,
                number: parent_number,
            })];
        };

        if let Some(receipts) = &self.receipts {
            if let Err(err) = receipts.check_header(&ancestor).await {
                return vec![Err(VerificationError::AncestorReceipts(err.to_string()))];
            }
        }

        let now = unix_now();
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
            .min(batch.len());

        // Scatter: one blocking task per header, each owning its parent
        // copy. Gather: `buffered` yields completions in input order no
        // matter which worker finishes first.
        let jobs: Vec<(BlockHeader, BlockHeader)> = std::iter::once(ancestor)
            .chain(batch[..batch.len() - 1].iter().cloned())
            .zip(batch.iter().cloned())
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        let mut ordered = futures::stream::iter(jobs)
            .map(|(parent, header)| {
                let params = self.params.clone();
                let caches = Arc::clone(&self.caches);
                tokio::task::spawn_blocking(move || {
                    check_header(&header, &parent, now, &params, &caches)
                })
            })
            .buffered(workers);

        while let Some(joined) = ordered.next().await {
            let result = joined.expect("header validation worker panicked");
            let failed = result.is_err();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    /// Validate a batch and collapse the result stream: `Ok` when every
    /// header passed, otherwise the first failing index and its error.
    pub async fn verify_all(
        &self,
        batch: &[BlockHeader],
    ) -> Result<(), (usize, VerificationError)> {
        let mut results = self.verify_headers(batch).await;
        match results.pop() {
            Some(Err(err)) => Err((results.len(), err)),
            _ => Ok(()),
        }
    }
}

/// Every check for one header: protocol rules, then the seal against the
/// epoch's cache.
fn check_header(
    header: &BlockHeader,
    parent: &BlockHeader,
    now: u64,
    params: &ChainParams,
    caches: &ProofCacheManager,
) -> Result<(), VerificationError> {
    validate_header(header, parent, now, params)?;
    let cache = caches
        .get_cache(header.number)
        .map_err(|err| VerificationError::Cache(err.to_string()))?;
    verify_seal(header, &cache)?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::cache::DatasetLoader;
    use crate::consensus::seal::{hashimoto, EpochCache};
    use crate::storage::MemoryStore;
    use crate::types::keccak512;
    use alloy_primitives::U256;

    const EPOCH_LENGTH: u64 = 1_000;

    struct TestLoader;

    impl DatasetLoader for TestLoader {
        fn load_or_build_cache(&self, epoch: u64) -> anyhow::Result<EpochCache> {
            let rows = (0..8u64)
                .map(|i| {
                    let mut input = [0u8; 16];
                    input[..8].copy_from_slice(&epoch.to_be_bytes());
                    input[8..].copy_from_slice(&i.to_be_bytes());
                    keccak512(&input)
                })
                .collect();
            Ok(EpochCache::new(epoch, rows))
        }
    }

    fn params() -> ChainParams {
        ChainParams {
            chain_id: 1_337,
            epoch_length: EPOCH_LENGTH,
            base_fee_fork_block: None,
            retention: 2_000,
            max_extra_data_len: 32,
            min_gas_limit: 5_000,
            gas_limit_bound_divisor: 1_024,
            elasticity_multiplier: 2,
            base_fee_change_denominator: 8,
            allowed_future_secs: 15,
        }
    }

    fn anchor() -> BlockHeader {
        BlockHeader {
            parent_hash: [0; 32],
            number: 100,
            author: [0x0A; 20],
            state_root: [0x01; 32],
            transactions_root: [0x02; 32],
            receipts_root: [0x03; 32],
            logs_bloom: [0; 256],
            difficulty: U256::from(1u64),
            gas_limit: 8_000_000,
            gas_used: 0,
            timestamp: 1_600_000_000,
            extra_data: vec![],
            mix_digest: [0; 32],
            nonce: 0,
            base_fee: None,
        }
    }

    /// Child of `parent` carrying a valid difficulty-1 seal.
    fn sealed_child(parent: &BlockHeader, caches: &ProofCacheManager) -> BlockHeader {
        let mut header = parent.clone();
        header.parent_hash = parent.hash();
        header.number = parent.number + 1;
        header.timestamp = parent.timestamp + 13;
        header.difficulty = U256::from(1u64);
        let cache = caches.get_cache(header.number).unwrap();
        let (mix_digest, _) = hashimoto(&header.seal_hash(), header.nonce, &cache);
        header.mix_digest = mix_digest;
        header
    }

    fn sealed_chain(
        parent: &BlockHeader,
        length: usize,
        caches: &ProofCacheManager,
    ) -> Vec<BlockHeader> {
        let mut chain = Vec::with_capacity(length);
        let mut parent = parent.clone();
        for _ in 0..length {
            let header = sealed_child(&parent, caches);
            parent = header.clone();
            chain.push(header);
        }
        chain
    }

    fn setup() -> (HeaderValidator, Arc<ProofCacheManager>, Arc<HeaderChainStore>) {
        let store = Arc::new(
            HeaderChainStore::new(2_000, anchor(), U256::from(1u64), Arc::new(MemoryStore::new()))
                .unwrap(),
        );
        let caches =
            Arc::new(ProofCacheManager::new(Arc::new(TestLoader), EPOCH_LENGTH, 100).unwrap());
        (
            HeaderValidator::new(params(), Arc::clone(&store), Arc::clone(&caches)),
            caches,
            store,
        )
    }

    #[tokio::test]
    async fn test_valid_batch_passes_in_order() {
        let (validator, caches, _) = setup();
        let batch = sealed_chain(&anchor(), 12, &caches);
        let results = validator.verify_headers(&batch).await;
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(Result::is_ok));
        assert!(validator.verify_all(&batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_batch_yields_no_results() {
        let (validator, _, _) = setup();
        assert!(validator.verify_headers(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ancestor_fails_first() {
        let (validator, caches, _) = setup();
        let mut orphan = anchor();
        orphan.number = 500;
        let batch = sealed_chain(&orphan, 2, &caches);
        let results = validator.verify_headers(&batch).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(VerificationError::UnknownAncestor { number: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_first_failure_index_reported() {
        let (validator, caches, _) = setup();
        let mut batch = sealed_chain(&anchor(), 8, &caches);
        // Corrupt header 5's timestamp; headers 6 and 7 stay linked to the
        // corrupted encoding so only the rule check fails.
        batch[5].timestamp = batch[4].timestamp;
        let (mix, _) = {
            let cache = caches.get_cache(batch[5].number).unwrap();
            hashimoto(&batch[5].seal_hash(), batch[5].nonce, &cache)
        };
        batch[5].mix_digest = mix;
        for index in 6..8 {
            let parent_hash = batch[index - 1].hash();
            batch[index].parent_hash = parent_hash;
            let cache = caches.get_cache(batch[index].number).unwrap();
            let (mix, _) = hashimoto(&batch[index].seal_hash(), batch[index].nonce, &cache);
            batch[index].mix_digest = mix;
        }

        let (index, err) = validator.verify_all(&batch).await.unwrap_err();
        assert_eq!(index, 5);
        assert!(matches!(err, VerificationError::Rule(RuleError::OlderThanParent { .. })));

        let results = validator.verify_headers(&batch).await;
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(Result::is_ok));
        assert!(results[5].is_err());
    }

    #[tokio::test]
    async fn test_bad_seal_rejected() {
        let (validator, caches, _) = setup();
        let mut batch = sealed_chain(&anchor(), 3, &caches);
        batch[2].mix_digest[0] ^= 0x01;
        let (index, err) = validator.verify_all(&batch).await.unwrap_err();
        assert_eq!(index, 2);
        assert!(matches!(err, VerificationError::Seal(SealError::MixDigestMismatch { .. })));
    }

    #[tokio::test]
    async fn test_batch_spanning_epoch_boundary() {
        let (validator, caches, store) = setup();
        // Advance the canonical chain to just below the epoch boundary.
        let approach = sealed_chain(&anchor(), 897, &caches);
        store.insert_headers(&approach).unwrap();
        let last = approach.last().unwrap();
        assert_eq!(last.number, 997);

        let crossing = sealed_chain(last, 6, &caches);
        let results = validator.verify_headers(&crossing).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(Result::is_ok));
    }
}
