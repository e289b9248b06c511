//! Per-digest reference counting and garbage collection.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{cache::DedupCache, store::BlobStore, Digest, TarsinkError, TarsinkResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reference counts per content digest across all live image manifests, driving blob deletion
/// and dedup cache invalidation when a count reaches zero.
///
/// Every count lives in its own lock cell, so operations on unrelated digests never serialize
/// against each other; the outer map lock is held only long enough to fetch a cell. Holding a
/// digest's cell across "store and count" or "discount and maybe delete" is what makes each
/// pair indivisible with respect to concurrent operations on the same digest: a layer shared by
/// a newly pushed image and a concurrently deleted one ends up present or absent strictly by
/// which operation won the cell.
#[derive(Debug, Clone)]
pub struct ReferenceTracker<S: BlobStore> {
    counts: Arc<Mutex<HashMap<Digest, Arc<Mutex<u64>>>>>,
    store: S,
    cache: DedupCache,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<S: BlobStore> ReferenceTracker<S> {
    /// Creates a tracker over the given store and cache.
    pub fn new(store: S, cache: DedupCache) -> Self {
        ReferenceTracker {
            counts: Arc::new(Mutex::new(HashMap::new())),
            store,
            cache,
        }
    }

    /// Commits `bytes` under `digest` (idempotently) and records one reference, atomically with
    /// respect to other operations on `digest`. Returns the new count.
    ///
    /// The increment only happens after the put has completed and verified, so a push cancelled
    /// mid-write leaves no reference behind.
    pub async fn store_and_increment(&self, digest: &Digest, bytes: Bytes) -> TarsinkResult<u64> {
        let cell = self.cell(digest).await;
        let mut count = cell.lock().await;

        self.store.put(digest, bytes.as_ref()).await?;
        *count += 1;
        debug!(%digest, count = *count, "layer reference added");
        Ok(*count)
    }

    /// Records one reference to an already-stored blob, or reports `false` when the blob is no
    /// longer live so the caller re-ingests it.
    pub async fn try_increment_existing(&self, digest: &Digest) -> bool {
        let cell = self.cell(digest).await;
        let mut count = cell.lock().await;

        // a positive count implies the blob exists; a zero count means it was
        // collected (or never stored) and must not be resurrected by counting
        if *count > 0 {
            *count += 1;
            debug!(%digest, count = *count, "layer reference added");
            true
        } else {
            false
        }
    }

    /// Removes `occurrences` references from `digest`.
    ///
    /// On the transition to zero the blob is deleted and dedup cache entries pointing at it are
    /// dropped within the same critical section - there is no deferred collection pass, so the
    /// deletion is immediately observable. Returns whether the blob was deleted.
    ///
    /// ## Errors
    ///
    /// Fails with `RefUnderflow` if `occurrences` exceeds the current count. That indicates a
    /// caller bug, never a normal runtime condition.
    pub async fn decrement(&self, digest: &Digest, occurrences: u64) -> TarsinkResult<bool> {
        if occurrences == 0 {
            return Ok(false);
        }

        let cell = self.cell(digest).await;
        let mut count = cell.lock().await;

        if occurrences > *count {
            error!(%digest, count = *count, removing = occurrences, "reference underflow");
            return Err(TarsinkError::RefUnderflow {
                digest: *digest,
                count: *count,
                removing: occurrences,
            });
        }

        *count -= occurrences;
        if *count > 0 {
            debug!(%digest, count = *count, "layer references released");
            return Ok(false);
        }

        self.store.delete(digest).await?;
        self.cache.invalidate_target(digest).await;
        info!(%digest, "deleted unreferenced layer");
        Ok(true)
    }

    /// Returns the current reference count for `digest`.
    pub async fn count(&self, digest: &Digest) -> u64 {
        let cell = self.cell(digest).await;
        let count = cell.lock().await;
        *count
    }

    /// Fetches the count cell for `digest`, creating it on first use.
    ///
    /// Cells persist at zero, so a digest re-ingested after collection reuses its cell and no
    /// stale cell handle can ever point at replaced state.
    async fn cell(&self, digest: &Digest) -> Arc<Mutex<u64>> {
        let mut counts = self.counts.lock().await;
        counts.entry(*digest).or_default().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
