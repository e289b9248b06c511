use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use tar::{Entry, EntryType, Header};
use tracing::{debug, warn};

use crate::{
    archive::{canonical_header, into_corrupt, normalize_path, CountingReader},
    archive::{LayerArchive, LayerSummary, LayerWriter},
    TarsinkError, TarsinkResult,
};

use super::{
    detector, emitter, AufsDialect, OverlayFsDialect, Whiteout, WhiteoutDetector, WhiteoutEmitter,
    PAX_XATTR_PREFIX,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Order-preserving whiteout translation between two dialects.
///
/// A translator is a pure function of the input bytes: identical input always produces
/// identical canonical output and therefore the same content digest, independent of which image
/// triggered the ingestion. Entries are never reordered - whiteout semantics depend on the
/// relative order in which a path is created and later hidden.
///
/// The default translator reads AUFS markers and emits OverlayFS markers.
#[derive(Clone)]
pub struct LayerTranslator {
    detector: Arc<dyn WhiteoutDetector>,
    emitter: Arc<dyn WhiteoutEmitter>,
}

/// A directory entry held back one step so an immediately following opaque sentinel can attach
/// its attribute before the entry is written. Directories carry no payload, so the buffer is a
/// single header.
struct PendingDir {
    header: Header,
    path: Vec<u8>,
    xattrs: Vec<(String, Vec<u8>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerTranslator {
    /// Creates a translator over explicit dialect halves.
    pub fn new(detector: Arc<dyn WhiteoutDetector>, emitter: Arc<dyn WhiteoutEmitter>) -> Self {
        LayerTranslator { detector, emitter }
    }

    /// Creates a translator from dialect names.
    ///
    /// ## Errors
    ///
    /// Fails with `UnsupportedWhiteoutDialect` for unknown names.
    pub fn from_names(input: &str, output: &str) -> TarsinkResult<Self> {
        Ok(LayerTranslator {
            detector: detector(input)?,
            emitter: emitter(output)?,
        })
    }

    /// The name of the input dialect.
    pub fn input_dialect(&self) -> &'static str {
        self.detector.name()
    }

    /// The name of the output dialect.
    pub fn output_dialect(&self) -> &'static str {
        self.emitter.name()
    }

    /// Translates one layer stream into canonical output bytes.
    ///
    /// Entries stream through one at a time, so memory use does not scale with the archive.
    /// Returns the content digest and byte length of the output.
    ///
    /// ## Errors
    ///
    /// Fails with `CorruptArchive` on malformed input; nothing useful has been written to the
    /// sink in that case and the caller must discard it.
    pub fn translate(&self, source: impl Read, sink: impl Write) -> TarsinkResult<LayerSummary> {
        let mut archive = LayerArchive::open(source)?;
        let mut writer = LayerWriter::new(sink);
        let mut pending: Option<PendingDir> = None;

        for entry in archive.entries()? {
            let mut entry = entry.map_err(into_corrupt)?;
            let path = normalize_path(entry.path_bytes().as_ref());
            if path.is_empty() {
                // a bare `./` root entry carries nothing worth keeping
                continue;
            }
            let xattrs = read_xattrs(&mut entry)?;

            match self.detector.detect(entry.header(), &path) {
                Some(Whiteout::File(hidden)) => {
                    flush_pending(&mut writer, pending.take())?;
                    let mut header = self.emitter.whiteout_header(&hidden)?;
                    writer.append_entry(&mut header, &hidden, io::empty())?;
                }
                Some(Whiteout::Opaque(dir)) => {
                    match pending.take() {
                        Some(held) if held.path == dir => {
                            write_dir(&mut writer, held, Some(self.emitter.opaque_attributes()))?;
                        }
                        held => {
                            flush_pending(&mut writer, held)?;
                            if dir.is_empty() {
                                warn!("dropping opaque marker at archive root");
                            } else {
                                // the sentinel arrived without its directory's entry;
                                // synthesize one in the sentinel's position
                                let synthesized = PendingDir {
                                    header: synthesized_dir_header(entry.header()),
                                    path: dir,
                                    xattrs: Vec::new(),
                                };
                                write_dir(
                                    &mut writer,
                                    synthesized,
                                    Some(self.emitter.opaque_attributes()),
                                )?;
                            }
                        }
                    }
                }
                Some(Whiteout::Internal) => {
                    debug!(
                        path = %String::from_utf8_lossy(&path),
                        "dropping dialect-internal entry"
                    );
                }
                None => {
                    flush_pending(&mut writer, pending.take())?;
                    if entry.header().entry_type().is_dir() {
                        pending = Some(PendingDir {
                            header: canonical_header(entry.header())?,
                            path,
                            xattrs,
                        });
                    } else {
                        write_entry(&mut writer, entry, path, xattrs)?;
                    }
                }
            }
        }

        flush_pending(&mut writer, pending.take())?;
        writer.finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Collects the `SCHILY.xattr.*` PAX records attached to an entry.
fn read_xattrs<R: Read>(entry: &mut Entry<'_, R>) -> TarsinkResult<Vec<(String, Vec<u8>)>> {
    let mut xattrs = Vec::new();
    if let Some(extensions) = entry.pax_extensions().map_err(into_corrupt)? {
        for extension in extensions {
            let extension = extension.map_err(into_corrupt)?;
            if let Ok(key) = extension.key() {
                if key.starts_with(PAX_XATTR_PREFIX) {
                    xattrs.push((key.to_string(), extension.value_bytes().to_vec()));
                }
            }
        }
    }
    Ok(xattrs)
}

/// Writes out a held-back directory entry, attaching opaque attributes if given.
fn write_dir<W: Write>(
    writer: &mut LayerWriter<W>,
    mut dir: PendingDir,
    opaque: Option<Vec<(String, Vec<u8>)>>,
) -> TarsinkResult<()> {
    if let Some(extra) = opaque {
        dir.xattrs.extend(extra);
    }
    writer.append_pax(&dir.xattrs)?;

    dir.header.set_size(0);
    // directories carry a single trailing slash in canonical form
    let mut path = dir.path;
    path.push(b'/');
    writer.append_entry(&mut dir.header, &path, io::empty())
}

fn flush_pending<W: Write>(
    writer: &mut LayerWriter<W>,
    pending: Option<PendingDir>,
) -> TarsinkResult<()> {
    match pending {
        Some(dir) => write_dir(writer, dir, None),
        None => Ok(()),
    }
}

/// Writes a pass-through entry: canonical header, preserved xattrs, streamed payload.
fn write_entry<R: Read, W: Write>(
    writer: &mut LayerWriter<W>,
    mut entry: Entry<'_, R>,
    path: Vec<u8>,
    xattrs: Vec<(String, Vec<u8>)>,
) -> TarsinkResult<()> {
    let mut header = canonical_header(entry.header())?;
    writer.append_pax(&xattrs)?;

    let entry_type = entry.header().entry_type();
    if entry_type.is_symlink() || entry_type.is_hard_link() {
        let target = entry.link_name_bytes().ok_or_else(|| {
            TarsinkError::CorruptArchive(format!(
                "link entry without target: {}",
                String::from_utf8_lossy(&path)
            ))
        })?;
        // hard link targets name a path in this archive and normalize with it;
        // symlink targets are opaque bytes and pass through untouched
        let target = if entry_type.is_hard_link() {
            normalize_path(target.as_ref())
        } else {
            target.into_owned()
        };
        return writer.append_link(&mut header, &path, &target);
    }

    let declared = entry.header().size().map_err(into_corrupt)?;
    let mut payload = CountingReader::new(&mut entry);
    writer.append_entry(&mut header, &path, &mut payload)?;
    if payload.bytes_read() != declared {
        return Err(TarsinkError::CorruptArchive(format!(
            "payload for {} shorter than declared size ({} < {})",
            String::from_utf8_lossy(&path),
            payload.bytes_read(),
            declared
        )));
    }
    Ok(())
}

/// Builds a directory header for an opaque sentinel that arrived without its directory's own
/// entry. The sentinel's ownership and timestamp carry over.
fn synthesized_dir_header(sentinel: &Header) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_uid(sentinel.uid().unwrap_or(0));
    header.set_gid(sentinel.gid().unwrap_or(0));
    header.set_mtime(sentinel.mtime().unwrap_or(0));
    header
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LayerTranslator {
    fn default() -> Self {
        LayerTranslator {
            detector: Arc::new(AufsDialect),
            emitter: Arc::new(OverlayFsDialect),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
