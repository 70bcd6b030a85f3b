use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy_primitives::U256;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{canonical_key, head_key, header_key, td_key, KeyValueStore};
use crate::types::{BlockHeader, Hash256};

/// Errors from the canonical chain store.
#[derive(Debug, Error)]
pub enum ChainStoreError {
    #[error("empty header batch")]
    EmptyBatch,

    #[error("batch is not hash-linked at index {index}")]
    NonContiguousChain { index: usize },

    #[error("unknown ancestor {ancestor} at height {number}", ancestor = hex::encode(.hash))]
    UnknownAncestor { hash: Hash256, number: u64 },

    #[error("stale batch: tail height {tail} is below the retained window floor {floor}")]
    StaleBatch { tail: u64, floor: u64 },

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// How an accepted batch relates to the canonical chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertStatus {
    /// Every header was already canonical; nothing moved.
    NoChange,
    /// Stored as a side branch; the head is unchanged.
    SideBranch,
    /// The batch became the new canonical head.
    Canonical,
}

/// Result of a successful insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Relation of the batch to the canonical chain after the insert.
    pub status: InsertStatus,
    /// Headers newly stored, as opposed to already known.
    pub inserted: usize,
}

/// A header together with the total difficulty of its chain.
#[derive(Clone, Debug)]
struct StoredHeader {
    header: BlockHeader,
    total_difficulty: U256,
}

/// Mutable state of the store, guarded by one write lock.
///
/// Invariants: `canonical` maps every retained number at or below
/// `head_number` to exactly one hash, and total difficulty is non-decreasing
/// along any parent-linked path.
struct ChainState {
    head_number: u64,
    head_hash: Hash256,
    /// number -> hash -> stored header, canonical and side branches alike.
    headers: BTreeMap<u64, HashMap<Hash256, StoredHeader>>,
    /// number -> canonical hash.
    canonical: BTreeMap<u64, Hash256>,
}

/// The single source of truth for accepted foreign-chain history.
///
/// Holds every retained header (canonical and side branches), runs the
/// total-difficulty fork-choice rule, and re-points the canonical mapping on
/// reorganization. All mutation happens atomically under an exclusive write
/// lock; reads take a shared lock and may interleave with each other.
pub struct HeaderChainStore {
    retention: u64,
    kv: Arc<dyn KeyValueStore>,
    inner: RwLock<ChainState>,
}

impl HeaderChainStore {
    /// Create a store seeded with a trusted anchor header and the total
    /// difficulty of the chain up to it. Every accepted batch must
    /// hash-link back to this anchor (or a descendant of it).
    pub fn new(
        retention: u64,
        anchor: BlockHeader,
        anchor_td: U256,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, ChainStoreError> {
        assert!(retention > 0, "retention window must be non-zero");
        let number = anchor.number;
        let hash = anchor.hash();

        kv.write_batch(vec![
            (header_key(number, &hash), alloy_rlp::encode(&anchor)),
            (td_key(number, &hash), anchor_td.to_be_bytes_vec()),
            (canonical_key(number), hash.to_vec()),
            (head_key(), head_value(number, &hash)),
        ])?;

        let mut headers = BTreeMap::new();
        headers.insert(
            number,
            HashMap::from([(
                hash,
                StoredHeader { header: anchor, total_difficulty: anchor_td },
            )]),
        );
        let canonical = BTreeMap::from([(number, hash)]);

        Ok(Self {
            retention,
            kv,
            inner: RwLock::new(ChainState { head_number: number, head_hash: hash, headers, canonical }),
        })
    }

    /// Insert a hash-linked batch of validated headers and apply fork choice.
    ///
    /// The whole decision — difficulty accounting, reorganization,
    /// re-pointing, eviction — happens atomically under the write lock; a
    /// failed insert leaves the store untouched.
    pub fn insert_headers(&self, batch: &[BlockHeader]) -> Result<InsertOutcome, ChainStoreError> {
        if batch.is_empty() {
            return Err(ChainStoreError::EmptyBatch);
        }

        // Input-shape check before taking the lock: every header must link
        // to its predecessor by hash and by height.
        let hashes: Vec<Hash256> = batch.iter().map(BlockHeader::hash).collect();
        for index in 1..batch.len() {
            if batch[index].parent_hash != hashes[index - 1]
                || batch[index].number != batch[index - 1].number + 1
            {
                return Err(ChainStoreError::NonContiguousChain { index });
            }
        }

        let tail = &batch[batch.len() - 1];
        let tail_hash = hashes[batch.len() - 1];

        let mut state = self.inner.write();

        let floor = retention_floor(state.head_number, self.retention);
        if tail.number < floor {
            return Err(ChainStoreError::StaleBatch { tail: tail.number, floor });
        }

        // Total difficulty of the ancestor the batch extends.
        let parent_number = batch[0].number.wrapping_sub(1);
        let parent_td = state
            .lookup(parent_number, &batch[0].parent_hash)
            .map(|stored| stored.total_difficulty)
            .ok_or(ChainStoreError::UnknownAncestor {
                hash: batch[0].parent_hash,
                number: parent_number,
            })?;

        // Walk the batch accumulating total difficulty. Already-known
        // headers are skipped but still feed the running sum.
        let mut running_td = parent_td;
        let mut new_headers: Vec<(u64, Hash256, &BlockHeader, U256)> = Vec::new();
        for (header, hash) in batch.iter().zip(&hashes) {
            running_td += header.difficulty;
            if state.lookup(header.number, hash).is_none() {
                new_headers.push((header.number, *hash, header, running_td));
            }
        }

        let head_td = state
            .lookup(state.head_number, &state.head_hash)
            .map(|stored| stored.total_difficulty)
            .expect("head header is always resolvable");

        let reorg = fork_choice(
            running_td,
            tail.number,
            &tail_hash,
            head_td,
            state.head_number,
            &state.head_hash,
        );

        // Compute canonical re-pointing before touching anything so the
        // persistence batch and the in-memory apply see the same changes.
        let mut canonical_updates: Vec<(u64, Hash256)> = Vec::new();
        if reorg {
            // Re-point the segment below the batch if it is not already
            // canonical, walking parents until the mappings agree. Bounded
            // by the retention window.
            let mut number = parent_number;
            let mut hash = batch[0].parent_hash;
            while state.canonical.get(&number) != Some(&hash) {
                canonical_updates.push((number, hash));
                let Some(stored) = state.lookup(number, &hash) else {
                    break;
                };
                hash = stored.header.parent_hash;
                match number.checked_sub(1) {
                    Some(previous) => number = previous,
                    None => break,
                }
            }
            canonical_updates.reverse();
            for (header, hash) in batch.iter().zip(&hashes) {
                canonical_updates.push((header.number, *hash));
            }
        }

        let inserted = new_headers.len();
        let status = if reorg {
            InsertStatus::Canonical
        } else if inserted == 0 && state.canonical.get(&tail.number) == Some(&tail_hash) {
            InsertStatus::NoChange
        } else {
            InsertStatus::SideBranch
        };

        // Persist first; the in-memory state only moves once the batch is
        // durably committed.
        let mut kv_batch: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (number, hash, header, total_difficulty) in &new_headers {
            kv_batch.push((header_key(*number, hash), alloy_rlp::encode(*header)));
            kv_batch.push((td_key(*number, hash), total_difficulty.to_be_bytes_vec()));
        }
        for (number, hash) in &canonical_updates {
            kv_batch.push((canonical_key(*number), hash.to_vec()));
        }
        if reorg {
            kv_batch.push((head_key(), head_value(tail.number, &tail_hash)));
        }
        if !kv_batch.is_empty() {
            self.kv.write_batch(kv_batch)?;
        }

        for (number, hash, header, total_difficulty) in new_headers {
            state.headers.entry(number).or_default().insert(
                hash,
                StoredHeader { header: header.clone(), total_difficulty },
            );
        }

        if reorg {
            let old_head = (state.head_number, state.head_hash);
            for (number, hash) in canonical_updates {
                state.canonical.insert(number, hash);
            }
            // A shorter chain can win on difficulty; canonical mappings
            // above the new head are no longer meaningful.
            if tail.number < old_head.0 {
                state.canonical.split_off(&(tail.number + 1));
            }
            state.head_number = tail.number;
            state.head_hash = tail_hash;
            info!(
                old_number = old_head.0,
                old_hash = %hex::encode(old_head.1),
                new_number = tail.number,
                new_hash = %hex::encode(tail_hash),
                inserted,
                "canonical head moved"
            );
        } else {
            debug!(
                tail_number = tail.number,
                tail_hash = %hex::encode(tail_hash),
                inserted,
                ?status,
                "batch stored off the canonical head"
            );
        }

        self.evict(&mut state);

        Ok(InsertOutcome { status, inserted })
    }

    /// Header stored under `(number, hash)`, canonical or not.
    pub fn get_header(&self, number: u64, hash: &Hash256) -> Option<BlockHeader> {
        self.inner.read().lookup(number, hash).map(|stored| stored.header.clone())
    }

    /// Total difficulty of the chain ending at `(number, hash)`.
    pub fn get_total_difficulty(&self, number: u64, hash: &Hash256) -> Option<U256> {
        self.inner.read().lookup(number, hash).map(|stored| stored.total_difficulty)
    }

    /// Current canonical head as `(number, hash)`.
    pub fn current_head(&self) -> (u64, Hash256) {
        let state = self.inner.read();
        (state.head_number, state.head_hash)
    }

    /// Total difficulty of the current canonical head.
    pub fn head_total_difficulty(&self) -> U256 {
        let state = self.inner.read();
        state
            .lookup(state.head_number, &state.head_hash)
            .map(|stored| stored.total_difficulty)
            .expect("head header is always resolvable")
    }

    /// Canonical hash at `number`, if within the retained window.
    pub fn canonical_hash(&self, number: u64) -> Option<Hash256> {
        self.inner.read().canonical.get(&number).copied()
    }

    /// Canonical header at `number`, if within the retained window.
    pub fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        let state = self.inner.read();
        let hash = state.canonical.get(&number)?;
        state.lookup(number, hash).map(|stored| stored.header.clone())
    }

    /// Lowest block number still retained.
    pub fn retention_floor(&self) -> u64 {
        let state = self.inner.read();
        retention_floor(state.head_number, self.retention)
    }

    /// Drop everything below the retention floor.
    fn evict(&self, state: &mut ChainState) {
        let floor = retention_floor(state.head_number, self.retention);
        let retained = state.headers.split_off(&floor);
        let evicted: usize = state.headers.values().map(HashMap::len).sum();
        state.headers = retained;
        state.canonical = state.canonical.split_off(&floor);
        if evicted > 0 {
            debug!(floor, evicted, "evicted headers below retention floor");
        }
    }
}

impl ChainState {
    fn lookup(&self, number: u64, hash: &Hash256) -> Option<&StoredHeader> {
        self.headers.get(&number)?.get(hash)
    }
}

/// Lowest number retained for a head at `head_number`.
fn retention_floor(head_number: u64, retention: u64) -> u64 {
    head_number.saturating_sub(retention - 1)
}

/// The fork-choice rule. Higher total difficulty wins; on a tie the lower
/// tail number wins; on a full tie the lexicographically smaller hash wins,
/// so the decision is deterministic for any pair of competing chains.
fn fork_choice(
    new_td: U256,
    new_number: u64,
    new_hash: &Hash256,
    head_td: U256,
    head_number: u64,
    head_hash: &Hash256,
) -> bool {
    if new_td != head_td {
        return new_td > head_td;
    }
    if new_number != head_number {
        return new_number < head_number;
    }
    new_hash < head_hash
}

fn head_value(number: u64, hash: &Hash256) -> Vec<u8> {
    let mut value = Vec::with_capacity(8 + 32);
    value.extend_from_slice(&number.to_be_bytes());
    value.extend_from_slice(hash);
    value
}
