use std::{collections::HashMap, io::Cursor, pin::Pin, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest as _, Sha256};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::RwLock,
};

use crate::{Digest, TarsinkError, TarsinkResult};

use super::BlobStore;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory blob store adapter.
///
/// Production deployments front a disk- or object-store-backed service through the same
/// [`BlobStore`] contract; this adapter provides it for embedding and tests. The map lock is
/// only taken around map access, after all stream I/O has completed, so operations on distinct
/// digests do not contend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blocks: Arc<RwLock<HashMap<Digest, Bytes>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of blobs currently stored.
    pub async fn block_count(&self) -> u64 {
        self.blocks.read().await.len() as u64
    }

    /// Checks if the store holds no blobs.
    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        digest: &Digest,
        reader: impl AsyncRead + Send + Sync,
    ) -> TarsinkResult<u64> {
        tokio::pin!(reader);

        let mut hasher = Sha256::new();
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            data.extend_from_slice(&buf[..n]);
        }

        let actual = Digest::from_hasher(hasher);
        if actual != *digest {
            return Err(TarsinkError::DigestMismatch {
                expected: *digest,
                actual,
            });
        }

        let size = data.len() as u64;
        let mut blocks = self.blocks.write().await;
        blocks.entry(*digest).or_insert_with(|| Bytes::from(data));
        Ok(size)
    }

    async fn get(&self, digest: &Digest) -> TarsinkResult<Pin<Box<dyn AsyncRead + Send + Sync>>> {
        let blocks = self.blocks.read().await;
        match blocks.get(digest) {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes.clone()))),
            None => Err(TarsinkError::NotFound(*digest)),
        }
    }

    async fn exists(&self, digest: &Digest) -> bool {
        self.blocks.read().await.contains_key(digest)
    }

    async fn delete(&self, digest: &Digest) -> TarsinkResult<()> {
        let mut blocks = self.blocks.write().await;
        match blocks.remove(digest) {
            Some(_) => Ok(()),
            None => Err(TarsinkError::NotFound(*digest)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::store::BlobStoreExt;

    use super::*;

    #[tokio::test]
    async fn test_memory_store_put_get_roundtrip() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();

        let data = b"layer bytes".to_vec();
        let digest = Digest::compute(&data);
        let size = store.put(&digest, &data[..]).await?;
        assert_eq!(size, data.len() as u64);

        assert!(store.exists(&digest).await);
        assert_eq!(store.read_all(&digest).await?.as_ref(), data.as_slice());
        assert_eq!(store.block_count().await, 1);
        anyhow::Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_put_is_idempotent() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();

        let data = b"same bytes".to_vec();
        let digest = Digest::compute(&data);
        store.put(&digest, &data[..]).await?;
        store.put(&digest, &data[..]).await?;

        assert_eq!(store.block_count().await, 1);
        anyhow::Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_rejects_digest_mismatch() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();

        let wrong = Digest::compute(b"something else");
        let result = store.put(&wrong, &b"actual bytes"[..]).await;

        assert!(matches!(result, Err(TarsinkError::DigestMismatch { .. })));
        // nothing was committed
        assert!(store.is_empty().await);
        anyhow::Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_missing_digest() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        let missing = Digest::compute(b"never stored");

        assert!(!store.exists(&missing).await);
        assert!(matches!(
            store.get(&missing).await,
            Err(TarsinkError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&missing).await,
            Err(TarsinkError::NotFound(_))
        ));
        anyhow::Ok(())
    }

    #[tokio::test]
    async fn test_memory_store_delete() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();

        let data = b"short lived".to_vec();
        let digest = Digest::compute(&data);
        store.put(&digest, &data[..]).await?;
        store.delete(&digest).await?;

        assert!(!store.exists(&digest).await);
        assert!(store.is_empty().await);
        anyhow::Ok(())
    }
}
