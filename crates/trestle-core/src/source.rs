//! On-demand block and receipt fetching with bounded memoization.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::execution::trie::Trie;
use crate::types::{Block, BlockHeader, Hash256, Receipt};

/// Collaborator that fetches foreign-chain blocks and their receipts,
/// typically over RPC. Implementations may batch receipt fetches but must
/// preserve receipt-to-transaction-index alignment.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch the block with the given hash.
    async fn get_block(&self, hash: &Hash256) -> anyhow::Result<Block>;

    /// Fetch the receipts of `block`, in transaction order.
    async fn get_receipts(&self, block: &Block) -> anyhow::Result<Vec<Receipt>>;
}

/// Errors resolving a block's receipts.
#[derive(Debug, Error)]
pub enum ReceiptCacheError {
    #[error("block source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("source returned block {have} for requested hash {want}",
        have = hex::encode(.got), want = hex::encode(.requested))]
    BlockHashMismatch { requested: Hash256, got: Hash256 },

    #[error("receipts root mismatch for block {hash}: declared {root}, rebuilt {recomputed}",
        hash = hex::encode(.block), root = hex::encode(.declared), recomputed = hex::encode(.rebuilt))]
    ReceiptsRootMismatch {
        block: Hash256,
        declared: Hash256,
        rebuilt: Hash256,
    },
}

/// A fetched block with its receipts and the trie rebuilt from them.
/// The trie root has been cross-checked against the header before the entry
/// exists, so everything here is verified data.
pub struct VerifiedBlock {
    /// The fetched block.
    pub block: Block,
    /// The block's receipts, in transaction order.
    pub receipts: Vec<Receipt>,
    /// Receipts trie rebuilt from `receipts`.
    pub trie: Trie,
}

/// Bounded cache of fetched blocks keyed by block hash.
///
/// Entries are built lazily: a miss fetches the block and its receipts from
/// the [`BlockSource`], rebuilds the receipts trie, and cross-checks its
/// root against the block's declared receipts root. A mismatch is a hard
/// verification failure, not a cache miss.
pub struct BlockReceiptCache {
    source: Arc<dyn BlockSource>,
    entries: Mutex<LruCache<Hash256, Arc<VerifiedBlock>>>,
}

impl BlockReceiptCache {
    /// A cache over `source` holding at most `capacity` blocks.
    pub fn new(source: Arc<dyn BlockSource>, capacity: NonZeroUsize) -> Self {
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The verified entry for `hash`, fetching and verifying on a miss.
    pub async fn get(&self, hash: &Hash256) -> Result<Arc<VerifiedBlock>, ReceiptCacheError> {
        if let Some(entry) = self.entries.lock().get(hash) {
            return Ok(Arc::clone(entry));
        }

        debug!(block = %hex::encode(hash), "receipt cache miss, fetching block");
        let block = self.source.get_block(hash).await?;
        let got = block.hash();
        if got != *hash {
            return Err(ReceiptCacheError::BlockHashMismatch { requested: *hash, got });
        }

        let receipts = self.source.get_receipts(&block).await?;
        let trie = Trie::from_receipts(&receipts);
        let rebuilt = trie.root_hash();
        if rebuilt != block.header.receipts_root {
            return Err(ReceiptCacheError::ReceiptsRootMismatch {
                block: *hash,
                declared: block.header.receipts_root,
                rebuilt,
            });
        }

        let entry = Arc::new(VerifiedBlock { block, receipts, trie });
        self.entries.lock().put(*hash, Arc::clone(&entry));
        Ok(entry)
    }

    /// Cross-check a stored header's receipts root against a trie rebuilt
    /// from independently fetched receipts.
    pub async fn check_header(&self, header: &BlockHeader) -> Result<(), ReceiptCacheError> {
        let hash = header.hash();
        let entry = self.get(&hash).await?;
        let rebuilt = entry.trie.root_hash();
        if rebuilt != header.receipts_root {
            return Err(ReceiptCacheError::ReceiptsRootMismatch {
                block: hash,
                declared: header.receipts_root,
                rebuilt,
            });
        }
        Ok(())
    }

    /// Number of blocks currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
