//! `tarsink` ingests the filesystem layer archives produced when a container image is pushed,
//! rewrites each layer's whiteout (deletion) markers from one union-filesystem dialect to
//! another, and stores the rewritten layers in a content-addressed blob store shared across all
//! images.
//!
//! # Overview
//!
//! tarsink is the storage core behind an image push pipeline. It handles:
//! - Streaming translation of AUFS whiteout markers into OverlayFS whiteouts
//! - Deterministic content addressing of translated layers
//! - Cross-image deduplication of identical layers
//! - Reference-counted garbage collection of unreferenced layers
//!
//! The registry/push protocol, the HTTP routing and authentication around it, the release
//! manager that decides when to push or delete, and the physical byte storage behind the blob
//! store are all external collaborators. tarsink only assumes a key/value byte interface to
//! storage, and it never mounts or interprets filesystem stacks - it translates markers.
//!
//! # Architecture
//!
//! A push flows through a single streaming chain per layer:
//!
//! ```text
//! reader -> whiteout translator -> canonical writer/hasher -> blob store put
//!                                                     -> reference increment -> cache populate
//! ```
//!
//! A delete decrements the reference counts of the digests a manifest listed and collects any
//! blob whose count reaches zero, invalidating dedup cache entries that pointed at it.
//!
//! # Usage Example
//!
//! ```no_run
//! use tarsink::{Digest, LayerReceiver, MemoryBlobStore, SourceLayer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let receiver = LayerReceiver::new(MemoryBlobStore::new());
//!
//!     let bytes = std::fs::read("layer.tar")?;
//!     let layer = SourceLayer::new(Digest::compute(&bytes), bytes);
//!
//!     // The returned digests form the image's layer manifest.
//!     let manifest = receiver.receive_image(vec![layer]).await?;
//!
//!     // Deleting the image later releases the references and collects
//!     // any layer no other image still uses.
//!     receiver.delete_image(&manifest).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`archive`] - Streaming layer reading and canonical, digest-computing emission
//! - [`whiteout`] - Whiteout dialects and the order-preserving translator
//! - [`store`] - Content-addressed blob store contract and in-memory adapter
//! - [`cache`] - Source-digest to stored-digest dedup cache
//! - [`tracker`] - Per-digest reference counting and garbage collection
//! - [`receive`] - Push and delete orchestration over the above

#![warn(missing_docs)]

mod digest;
mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod archive;
pub mod cache;
pub mod receive;
pub mod store;
pub mod tracker;
pub mod whiteout;

pub use cache::DedupCache;
pub use digest::*;
pub use error::*;
pub use receive::{LayerReceiver, SourceLayer};
pub use store::{BlobStore, BlobStoreExt, MemoryBlobStore};
pub use tracker::ReferenceTracker;
pub use whiteout::LayerTranslator;
