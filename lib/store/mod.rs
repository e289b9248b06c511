//! Content-addressed blob storage.
//!
//! [`BlobStore`] is the capability interface the rest of the crate programs against; the
//! physical backend behind it (disk, object store, memory) is an implementation detail chosen
//! at construction time. [`MemoryBlobStore`] is the in-memory adapter used for embedding and
//! tests.

mod blobstore;
mod memory;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blobstore::*;
pub use memory::*;
