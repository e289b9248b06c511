//! Source-digest to stored-digest deduplication cache.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{store::BlobStore, Digest};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Maps the digest of a source (pre-translation) layer to the digest of its already-translated,
/// already-stored counterpart, so repeat pushes skip recomputation.
///
/// An entry is only valid while its target blob exists. Lookups validate against the store and
/// evict lazily; the garbage collector additionally invalidates eagerly when it deletes a blob.
/// Either way a stale entry is never served as a hit - a push after a delete recomputes and
/// re-stores the layer rather than referencing a dead blob.
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    entries: Arc<RwLock<HashMap<Digest, Digest>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DedupCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the stored digest for `source`, validating the hit against the store.
    ///
    /// A hit whose blob no longer exists is evicted and reported as a miss so the normal
    /// ingestion path recomputes and repopulates it.
    pub async fn lookup(&self, source: &Digest, store: &impl BlobStore) -> Option<Digest> {
        let stored = { self.entries.read().await.get(source).copied() }?;

        if store.exists(&stored).await {
            debug!(%source, %stored, "dedup cache hit");
            return Some(stored);
        }

        warn!(%source, %stored, "evicting stale dedup cache entry");
        let mut entries = self.entries.write().await;
        // only evict if the entry was not concurrently repopulated
        if entries.get(source) == Some(&stored) {
            entries.remove(source);
        }
        None
    }

    /// Records that `source` translates to the stored blob `stored`.
    pub async fn insert(&self, source: Digest, stored: Digest) {
        self.entries.write().await.insert(source, stored);
    }

    /// Drops every entry pointing at the stored blob `stored`.
    pub async fn invalidate_target(&self, stored: &Digest) {
        self.entries.write().await.retain(|_, value| value != stored);
    }

    /// Returns the number of live cache entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Checks if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
