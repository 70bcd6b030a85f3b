//! Epoch-indexed proof-of-work cache management.
//!
//! The manager double-buffers verification caches: `current` serves seal
//! checks for the epoch being synced, while `next` is prepared by a
//! background task so crossing an epoch boundary is an O(1) pointer swap
//! instead of a blocking rebuild.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::consensus::seal::EpochCache;

/// Collaborator that loads an epoch's verification cache from disk or
/// builds it from scratch. Potentially expensive; always invoked off the
/// manager's lock except on the synchronous fallback paths.
pub trait DatasetLoader: Send + Sync + 'static {
    /// Produce the verification cache for `epoch`.
    fn load_or_build_cache(&self, epoch: u64) -> anyhow::Result<EpochCache>;
}

/// State of the forward buffer.
enum NextSlot {
    /// No cache and no preparation in flight.
    Absent,
    /// A background task is preparing this epoch.
    Preparing(u64),
    /// Prepared and waiting to be promoted.
    Ready(Arc<EpochCache>),
}

struct Slots {
    current: Arc<EpochCache>,
    next: NextSlot,
}

/// Owns the `current`/`next` epoch cache pair.
///
/// The lock is held only for slot bookkeeping; cache building on the async
/// path happens on the blocking pool and is swapped in afterwards. A failed
/// background preparation is logged and retried lazily the next time the
/// epoch is requested; it never blocks ordinary operation.
pub struct ProofCacheManager {
    loader: Arc<dyn DatasetLoader>,
    epoch_length: u64,
    slots: Arc<Mutex<Slots>>,
}

impl ProofCacheManager {
    /// Prepare the cache for `initial_height`'s epoch synchronously (the
    /// system cannot proceed without it) and schedule preparation of the
    /// following epoch in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        loader: Arc<dyn DatasetLoader>,
        epoch_length: u64,
        initial_height: u64,
    ) -> anyhow::Result<Self> {
        assert!(epoch_length > 0, "epoch length must be non-zero");
        let epoch = initial_height / epoch_length;
        let current = Arc::new(loader.load_or_build_cache(epoch)?);
        let manager = Self {
            loader,
            epoch_length,
            slots: Arc::new(Mutex::new(Slots { current, next: NextSlot::Absent })),
        };
        {
            let mut slots = manager.slots.lock();
            manager.schedule_prefetch(&mut slots, epoch + 1);
        }
        Ok(manager)
    }

    /// Cache for the epoch covering block `number`.
    ///
    /// Requests inside the current epoch are lock-and-clone cheap. Moving to
    /// the next epoch promotes the prefetched cache when it is ready and
    /// rebuilds synchronously when it is not. Stepping one epoch backward
    /// keeps the not-yet-consumed forward cache; any farther jump rebuilds
    /// around the requested epoch.
    pub fn get_cache(&self, number: u64) -> anyhow::Result<Arc<EpochCache>> {
        let epoch = number / self.epoch_length;
        let mut slots = self.slots.lock();
        let current_epoch = slots.current.epoch();

        if epoch == current_epoch {
            return Ok(Arc::clone(&slots.current));
        }

        if epoch == current_epoch + 1 {
            let promoted = match std::mem::replace(&mut slots.next, NextSlot::Absent) {
                NextSlot::Ready(cache) => {
                    debug!(epoch, "promoted prefetched epoch cache");
                    cache
                }
                // Preparation failed or has not finished; build it here.
                _ => Arc::new(self.loader.load_or_build_cache(epoch)?),
            };
            slots.current = Arc::clone(&promoted);
            self.schedule_prefetch(&mut slots, epoch + 1);
            return Ok(promoted);
        }

        if epoch + 1 == current_epoch {
            // A late-arriving header one epoch back. Shift the current cache
            // into the forward slot instead of discarding it.
            let cache = Arc::new(self.loader.load_or_build_cache(epoch)?);
            let forward = std::mem::replace(&mut slots.current, Arc::clone(&cache));
            slots.next = NextSlot::Ready(forward);
            return Ok(cache);
        }

        // Far jump: rebuild around the requested epoch.
        debug!(from = current_epoch, to = epoch, "epoch cache far jump");
        let cache = Arc::new(self.loader.load_or_build_cache(epoch)?);
        slots.current = Arc::clone(&cache);
        slots.next = NextSlot::Absent;
        self.schedule_prefetch(&mut slots, epoch + 1);
        Ok(cache)
    }

    /// Epoch of the cache currently serving seal checks.
    pub fn current_epoch(&self) -> u64 {
        self.slots.lock().current.epoch()
    }

    /// Whether the forward slot holds a cache ready for promotion.
    pub fn next_ready(&self) -> bool {
        matches!(self.slots.lock().next, NextSlot::Ready(_))
    }

    /// Kick off background preparation of `epoch` into the `next` slot.
    /// The slot must be empty; a scheduled preparation on top of a live one
    /// is a logic error, not a recoverable condition.
    fn schedule_prefetch(&self, slots: &mut Slots, epoch: u64) {
        assert!(
            matches!(slots.next, NextSlot::Absent),
            "prefetch scheduled while the next slot is occupied"
        );
        slots.next = NextSlot::Preparing(epoch);

        let loader = Arc::clone(&self.loader);
        let shared = Arc::clone(&self.slots);
        tokio::task::spawn_blocking(move || {
            let result = loader.load_or_build_cache(epoch);
            let mut slots = shared.lock();
            // A promotion, shift or far jump may have superseded this task
            // while it ran; its result is then discarded.
            if !matches!(slots.next, NextSlot::Preparing(pending) if pending == epoch) {
                debug!(epoch, "discarding superseded cache preparation");
                return;
            }
            match result {
                Ok(cache) if slots.current.epoch() + 1 == epoch => {
                    slots.next = NextSlot::Ready(Arc::new(cache));
                    debug!(epoch, "background epoch cache ready");
                }
                Ok(_) => {
                    slots.next = NextSlot::Absent;
                }
                Err(err) => {
                    // Retried lazily the next time the epoch is requested.
                    warn!(epoch, error = %err, "background cache preparation failed");
                    slots.next = NextSlot::Absent;
                }
            }
        });
    }
}
