use std::{
    ffi::OsStr,
    io::{self, Read, Write},
    os::unix::ffi::OsStrExt,
    path::Path,
};

use getset::CopyGetters;
use sha2::{Digest as _, Sha256};
use tar::{Builder, Header};

use crate::{Digest, TarsinkResult};

use super::into_corrupt;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A `Write` adapter that hashes and counts everything written through it.
pub struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

/// Canonical tar emission with a single-pass content digest.
///
/// Every entry is written as a fresh GNU-format header with metadata copied from its source, so
/// equivalent logical content always serializes to the same bytes regardless of how the input
/// archive encoded its headers. The digest is computed over the bytes as they are produced -
/// there is no second pass over the data.
pub struct LayerWriter<W: Write> {
    builder: Builder<DigestWriter<W>>,
}

/// The result of writing out a translated layer.
#[derive(Debug, Clone, Copy, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct LayerSummary {
    /// Content digest of the canonical layer bytes.
    digest: Digest,

    /// Total canonical layer size in bytes.
    size: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<W: Write> DigestWriter<W> {
    /// Wraps `inner` in a hashing, counting writer.
    pub fn new(inner: W) -> Self {
        DigestWriter {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Finalizes the hash and returns the digest, the byte count and the inner writer.
    pub fn finish(self) -> (Digest, u64, W) {
        (Digest::from_hasher(self.hasher), self.written, self.inner)
    }
}

impl<W: Write> LayerWriter<W> {
    /// Creates a writer emitting canonical layer bytes into `sink`.
    pub fn new(sink: W) -> Self {
        LayerWriter {
            builder: Builder::new(DigestWriter::new(sink)),
        }
    }

    /// Emits PAX extended records ahead of the next entry.
    pub fn append_pax(&mut self, records: &[(String, Vec<u8>)]) -> TarsinkResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.builder
            .append_pax_extensions(records.iter().map(|(key, value)| (key.as_str(), &value[..])))?;
        Ok(())
    }

    /// Writes one entry at `path` with the given header and payload.
    pub fn append_entry(
        &mut self,
        header: &mut Header,
        path: &[u8],
        data: impl Read,
    ) -> TarsinkResult<()> {
        self.builder.append_data(header, bytes_path(path), data)?;
        Ok(())
    }

    /// Writes a link entry (symlink or hard link) at `path` pointing at `target`.
    pub fn append_link(
        &mut self,
        header: &mut Header,
        path: &[u8],
        target: &[u8],
    ) -> TarsinkResult<()> {
        self.builder
            .append_link(header, bytes_path(path), bytes_path(target))?;
        Ok(())
    }

    /// Writes the archive trailer and returns the digest and length of the output.
    pub fn finish(self) -> TarsinkResult<LayerSummary> {
        let digest_writer = self.builder.into_inner()?;
        let (digest, size, _) = digest_writer.finish();
        Ok(LayerSummary { digest, size })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds a fresh canonical header carrying the metadata of a source entry's header.
///
/// Copied fields: entry type, size, mode, uid, gid, mtime, device numbers (for device entries)
/// and user/group names when they are valid UTF-8. Everything else is the zeroed GNU default.
pub fn canonical_header(src: &Header) -> TarsinkResult<Header> {
    let entry_type = src.entry_type();

    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(src.size().map_err(into_corrupt)?);
    header.set_mode(src.mode().map_err(into_corrupt)?);
    header.set_uid(src.uid().map_err(into_corrupt)?);
    header.set_gid(src.gid().map_err(into_corrupt)?);
    header.set_mtime(src.mtime().map_err(into_corrupt)?);

    if entry_type.is_character_special() || entry_type.is_block_special() {
        let major = src.device_major().map_err(into_corrupt)?.unwrap_or(0);
        let minor = src.device_minor().map_err(into_corrupt)?.unwrap_or(0);
        header.set_device_major(major)?;
        header.set_device_minor(minor)?;
    }

    if let Ok(Some(username)) = src.username() {
        header.set_username(username)?;
    }
    if let Ok(Some(groupname)) = src.groupname() {
        header.set_groupname(groupname)?;
    }

    Ok(header)
}

/// Interprets raw path bytes as a `Path` without re-encoding them.
pub(crate) fn bytes_path(path: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(path))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
