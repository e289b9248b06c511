//! Whiteout dialects and the order-preserving layer translator.
//!
//! A whiteout is a marker entry signaling that a path from a lower filesystem layer must be
//! hidden when layers are stacked. Different union filesystems spell the marker differently;
//! this module detects markers in one dialect and re-emits them in another, entry by entry,
//! without ever reordering the archive.

mod aufs;
mod overlayfs;
mod translate;

use std::sync::Arc;

use tar::Header;

use crate::{TarsinkError, TarsinkResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use aufs::*;
pub use overlayfs::*;
pub use translate::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Classification of an entry under a source whiteout dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// A marker hiding the sibling at the given normalized path.
    File(Vec<u8>),

    /// A marker making the directory at the given normalized path opaque, hiding all of its
    /// lower-layer contents.
    Opaque(Vec<u8>),

    /// A dialect-internal bookkeeping entry with no counterpart in the output.
    Internal,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The detection half of a whiteout dialect.
///
/// Implementations classify entries of an incoming layer; the translator decides what to do
/// with the classification. Dialects are selected at construction time, never by runtime type
/// inspection.
pub trait WhiteoutDetector: Send + Sync {
    /// The dialect's registry name.
    fn name(&self) -> &'static str;

    /// Classifies the entry at `path`. `None` means a plain entry that passes through.
    fn detect(&self, header: &Header, path: &[u8]) -> Option<Whiteout>;
}

/// The emission half of a whiteout dialect.
pub trait WhiteoutEmitter: Send + Sync {
    /// The dialect's registry name.
    fn name(&self) -> &'static str;

    /// Builds the header of a whiteout entry hiding `path`.
    fn whiteout_header(&self, path: &[u8]) -> TarsinkResult<Header>;

    /// The extended attributes that mark a directory opaque, as PAX records.
    fn opaque_attributes(&self) -> Vec<(String, Vec<u8>)>;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks up the detection side of a dialect by name.
///
/// ## Errors
///
/// Fails with `UnsupportedWhiteoutDialect` for unknown names.
pub fn detector(name: &str) -> TarsinkResult<Arc<dyn WhiteoutDetector>> {
    match name {
        AUFS_DIALECT => Ok(Arc::new(AufsDialect)),
        OVERLAYFS_DIALECT => Ok(Arc::new(OverlayFsDialect)),
        other => Err(TarsinkError::UnsupportedWhiteoutDialect(other.to_string())),
    }
}

/// Looks up the emission side of a dialect by name.
///
/// ## Errors
///
/// Fails with `UnsupportedWhiteoutDialect` for unknown names, including dialects that can only
/// be detected.
pub fn emitter(name: &str) -> TarsinkResult<Arc<dyn WhiteoutEmitter>> {
    match name {
        OVERLAYFS_DIALECT => Ok(Arc::new(OverlayFsDialect)),
        other => Err(TarsinkError::UnsupportedWhiteoutDialect(other.to_string())),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
