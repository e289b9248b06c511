use std::{future::Future, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Digest, TarsinkResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// `BlobStore` is a content-addressed key/value store of immutable byte blobs, keyed by their
/// [`Digest`].
///
/// The store holds bytes and nothing else: reference accounting lives in the
/// [`ReferenceTracker`](crate::ReferenceTracker), which is the only caller allowed to decide
/// when a blob dies.
///
/// ## Implementation Note
///
/// Implementations should have cheap clone semantics (e.g. `Arc` internals) since callers clone
/// the store across concurrent operations.
#[async_trait]
pub trait BlobStore: Clone + Send + Sync {
    /// Commits the bytes read from `reader` under `digest`.
    ///
    /// The incoming stream is hashed while it is read and nothing is committed unless the
    /// stream completes and hashes to `digest`, so a put interrupted mid-stream can simply be
    /// retried. A put for an already-present digest verifies the stream the same way and is
    /// otherwise a no-op; concurrent or repeated puts of one digest result in exactly one
    /// physical blob. Returns the number of bytes read.
    ///
    /// ## Errors
    ///
    /// Fails with `DigestMismatch` when the bytes do not hash to `digest`.
    async fn put(&self, digest: &Digest, reader: impl AsyncRead + Send + Sync)
        -> TarsinkResult<u64>;

    /// Returns a reader over the blob stored under `digest`.
    ///
    /// ## Errors
    ///
    /// Fails with `NotFound` if no blob is stored under `digest`.
    async fn get(&self, digest: &Digest) -> TarsinkResult<Pin<Box<dyn AsyncRead + Send + Sync>>>;

    /// Checks whether a blob is stored under `digest`.
    async fn exists(&self, digest: &Digest) -> bool;

    /// Removes the blob stored under `digest`.
    ///
    /// Must only be invoked once the reference tracker has confirmed a zero count.
    ///
    /// ## Errors
    ///
    /// Fails with `NotFound` if no blob is stored under `digest`.
    async fn delete(&self, digest: &Digest) -> TarsinkResult<()>;
}

/// Helper extension to the `BlobStore` trait.
pub trait BlobStoreExt: BlobStore {
    /// Reads the whole blob stored under `digest` into a single [`Bytes`].
    fn read_all(&self, digest: &Digest) -> impl Future<Output = TarsinkResult<Bytes>> {
        async move {
            let mut reader = self.get(digest).await?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).await?;
            Ok(Bytes::from(bytes))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T> BlobStoreExt for T where T: BlobStore {}
