use std::io::{self, Cursor, Read};

use flate2::read::GzDecoder;
use tar::{Archive, Entries};

use crate::{TarsinkError, TarsinkResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A layer archive opened for streaming reads.
///
/// Entries are yielded lazily in archive order and their payloads are read through, never
/// buffered whole, so memory use does not scale with the size of the archive. Sources pushed as
/// gzip-compressed tars are detected by their magic bytes and decompressed transparently.
///
/// Malformed input - a bad header checksum, a truncated header, a payload shorter than its
/// declared size - surfaces as [`TarsinkError::CorruptArchive`].
pub struct LayerArchive<'a> {
    archive: Archive<Box<dyn Read + 'a>>,
}

/// Wraps a payload reader and counts the bytes read through it.
///
/// Used to detect payloads shorter than their declared entry size.
pub(crate) struct CountingReader<R> {
    inner: R,
    read: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> LayerArchive<'a> {
    /// Opens `source` as a layer archive, sniffing for gzip compression.
    ///
    /// ## Errors
    ///
    /// Fails with `CorruptArchive` if the stream ends before the two-byte magic.
    pub fn open(mut source: impl Read + 'a) -> TarsinkResult<Self> {
        let mut magic = [0u8; 2];
        source.read_exact(&mut magic).map_err(|_| {
            TarsinkError::CorruptArchive("stream shorter than two bytes".to_string())
        })?;

        let rejoined = Cursor::new(magic).chain(source);
        let reader: Box<dyn Read + 'a> = if magic == GZIP_MAGIC {
            Box::new(GzDecoder::new(rejoined))
        } else {
            Box::new(rejoined)
        };

        Ok(LayerArchive {
            archive: Archive::new(reader),
        })
    }

    /// Returns the lazy entry sequence in archive order.
    pub fn entries(&mut self) -> TarsinkResult<Entries<'_, Box<dyn Read + 'a>>> {
        self.archive.entries().map_err(into_corrupt)
    }
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        CountingReader { inner, read: 0 }
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.read
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps an archive-level I/O error to `CorruptArchive`.
pub(crate) fn into_corrupt(err: io::Error) -> TarsinkError {
    TarsinkError::CorruptArchive(err.to_string())
}

/// Normalizes a raw tar path: strips leading `./` and `/`, and collapses redundant separators
/// and `.` components.
///
/// Operates on bytes so non-UTF-8 names survive untouched. The canonical form carries no
/// trailing slash; directory entries gain one back when written out.
pub fn normalize_path(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for component in raw.split(|b| *b == b'/') {
        if component.is_empty() || component == b"." {
            continue;
        }
        if !out.is_empty() {
            out.push(b'/');
        }
        out.extend_from_slice(component);
    }
    out
}

/// Splits a normalized path into its parent and final component.
pub fn split_path(path: &[u8]) -> (&[u8], &[u8]) {
    match path.iter().rposition(|b| *b == b'/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (&[], path),
    }
}

/// Joins a parent and a final component, omitting the separator for a root parent.
pub fn join_path(parent: &[u8], name: &[u8]) -> Vec<u8> {
    if parent.is_empty() {
        return name.to_vec();
    }
    let mut out = Vec::with_capacity(parent.len() + 1 + name.len());
    out.extend_from_slice(parent);
    out.push(b'/');
    out.extend_from_slice(name);
    out
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
