//! Streaming layer archive access.
//!
//! [`LayerArchive`] reads an incoming layer byte stream as a lazy, forward-only sequence of tar
//! entries; [`LayerWriter`] re-emits entries in canonical form while computing the content
//! digest of the output in a single pass.

mod reader;
mod writer;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use reader::*;
pub use writer::*;
