//! Push and delete orchestration.

use bytes::Bytes;
use getset::{CopyGetters, Getters};
use tracing::{debug, error, info};

use crate::{
    archive::LayerSummary,
    cache::DedupCache,
    store::{BlobStore, BlobStoreExt},
    tracker::ReferenceTracker,
    whiteout::LayerTranslator,
    Digest, TarsinkResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One source layer of an image push: the pusher-side digest of the original bytes and the
/// bytes themselves (tar, optionally gzip-compressed).
///
/// The source digest is an opaque cache key - it is never re-verified, and a wrong key merely
/// costs a recomputation on the next push of the same content.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct SourceLayer {
    /// Digest of the pre-translation layer bytes, as supplied by the pusher.
    #[getset(get_copy = "pub with_prefix")]
    source_digest: Digest,

    /// The raw layer archive.
    #[getset(get = "pub with_prefix")]
    bytes: Bytes,
}

/// Receives image layer archives: translates whiteout markers, stores the results
/// content-addressed, deduplicates identical layers across unrelated images and releases
/// storage through reference counting.
///
/// Each push and each delete is an independent operation that may run concurrently with any
/// other; the only state shared between them is the store, the tracker and the
/// (staleness-tolerant) dedup cache.
#[derive(Clone)]
pub struct LayerReceiver<S: BlobStore> {
    store: S,
    cache: DedupCache,
    tracker: ReferenceTracker<S>,
    translator: LayerTranslator,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SourceLayer {
    /// Creates a source layer from its pusher-side digest and bytes.
    pub fn new(source_digest: Digest, bytes: impl Into<Bytes>) -> Self {
        SourceLayer {
            source_digest,
            bytes: bytes.into(),
        }
    }
}

impl<S: BlobStore + 'static> LayerReceiver<S> {
    /// Creates a receiver with the default AUFS to OverlayFS translation.
    pub fn new(store: S) -> Self {
        Self::with_translator(store, LayerTranslator::default())
    }

    /// Creates a receiver translating between the named dialects.
    ///
    /// ## Errors
    ///
    /// Fails with `UnsupportedWhiteoutDialect` for unknown names.
    pub fn with_dialects(store: S, input: &str, output: &str) -> TarsinkResult<Self> {
        Ok(Self::with_translator(
            store,
            LayerTranslator::from_names(input, output)?,
        ))
    }

    /// Creates a receiver over an explicit translator.
    pub fn with_translator(store: S, translator: LayerTranslator) -> Self {
        let cache = DedupCache::new();
        let tracker = ReferenceTracker::new(store.clone(), cache.clone());
        LayerReceiver {
            store,
            cache,
            tracker,
            translator,
        }
    }

    /// Ingests one image: translates and stores each layer in order and returns the ordered
    /// stored digests for the caller to persist as the image's layer manifest.
    ///
    /// A failure part-way rolls back the references this push already took, so an aborted push
    /// leaves no reference change behind.
    pub async fn receive_image(
        &self,
        layers: impl IntoIterator<Item = SourceLayer> + Send,
    ) -> TarsinkResult<Vec<Digest>> {
        let mut stored = Vec::new();
        for layer in layers {
            match self
                .receive_layer(&layer.source_digest, layer.bytes)
                .await
            {
                Ok(digest) => stored.push(digest),
                Err(err) => {
                    self.rollback(&stored).await;
                    return Err(err);
                }
            }
        }

        info!(layers = stored.len(), "image received");
        Ok(stored)
    }

    /// Ingests a single layer and returns its stored content digest.
    ///
    /// Repeat pushes of content already stored hit the dedup cache and only add a reference;
    /// translation runs on a blocking task since tar processing is CPU- and read-bound.
    pub async fn receive_layer(
        &self,
        source_digest: &Digest,
        bytes: Bytes,
    ) -> TarsinkResult<Digest> {
        if let Some(stored) = self.cache.lookup(source_digest, &self.store).await {
            if self.tracker.try_increment_existing(&stored).await {
                debug!(%source_digest, %stored, "layer deduplicated");
                return Ok(stored);
            }
            // the blob was collected between validation and increment
            self.cache.invalidate_target(&stored).await;
        }

        let translator = self.translator.clone();
        let (summary, output) = tokio::task::spawn_blocking(
            move || -> TarsinkResult<(LayerSummary, Vec<u8>)> {
                let mut output = Vec::new();
                let summary = translator.translate(bytes.as_ref(), &mut output)?;
                Ok((summary, output))
            },
        )
        .await??;

        let digest = summary.get_digest();
        self.tracker
            .store_and_increment(&digest, Bytes::from(output))
            .await?;
        self.cache.insert(*source_digest, digest).await;

        info!(%source_digest, %digest, size = summary.get_size(), "layer stored");
        Ok(digest)
    }

    /// Releases the references held by a deleted image manifest, collecting every blob whose
    /// count reaches zero.
    ///
    /// A digest listed twice in the manifest releases two references.
    ///
    /// ## Errors
    ///
    /// Fails with `RefUnderflow` if the manifest releases more references than are held.
    pub async fn delete_image(&self, digests: &[Digest]) -> TarsinkResult<()> {
        for (digest, occurrences) in group_occurrences(digests) {
            self.tracker.decrement(&digest, occurrences).await?;
        }
        Ok(())
    }

    /// Serves the stored layer bytes for `digest`.
    ///
    /// ## Errors
    ///
    /// Fails with `NotFound` if no layer is stored under `digest`; that is an ordinary result
    /// at this boundary, not an ingestion failure.
    pub async fn get_layer(&self, digest: &Digest) -> TarsinkResult<Bytes> {
        self.store.read_all(digest).await
    }

    /// Checks whether a layer is stored under `digest`.
    pub async fn layer_exists(&self, digest: &Digest) -> bool {
        self.store.exists(digest).await
    }

    /// Returns the reference tracker shared by this receiver.
    pub fn tracker(&self) -> &ReferenceTracker<S> {
        &self.tracker
    }

    /// Best-effort release of references taken by a failed push.
    async fn rollback(&self, stored: &[Digest]) {
        for digest in stored {
            if let Err(err) = self.tracker.decrement(digest, 1).await {
                error!(%digest, %err, "failed to roll back layer reference");
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Groups a manifest's digest list into (digest, occurrences) pairs, preserving first-seen
/// order.
fn group_occurrences(digests: &[Digest]) -> Vec<(Digest, u64)> {
    let mut grouped: Vec<(Digest, u64)> = Vec::new();
    for digest in digests {
        match grouped.iter_mut().find(|(seen, _)| seen == digest) {
            Some((_, occurrences)) => *occurrences += 1,
            None => grouped.push((*digest, 1)),
        }
    }
    grouped
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
