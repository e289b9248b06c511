use tar::{EntryType, Header};

use crate::TarsinkResult;

use super::{Whiteout, WhiteoutDetector, WhiteoutEmitter};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Registry name of the OverlayFS dialect.
pub const OVERLAYFS_DIALECT: &str = "overlayfs";

/// Extended attribute marking a directory opaque under OverlayFS.
pub const OVERLAYFS_OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// PAX record key prefix carrying extended attributes in a tar archive.
pub const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The OverlayFS whiteout convention.
///
/// A deletion is a character device entry with zeroed device numbers at the hidden path;
/// opacity is the `trusted.overlay.opaque=y` attribute on the directory's own entry. This is
/// what the kernel expects to find in an overlay upper layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayFsDialect;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl WhiteoutEmitter for OverlayFsDialect {
    fn name(&self) -> &'static str {
        OVERLAYFS_DIALECT
    }

    fn whiteout_header(&self, _path: &[u8]) -> TarsinkResult<Header> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Char);
        header.set_size(0);
        header.set_mode(0o600);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_device_major(0)?;
        header.set_device_minor(0)?;
        Ok(header)
    }

    fn opaque_attributes(&self) -> Vec<(String, Vec<u8>)> {
        vec![(
            format!("{PAX_XATTR_PREFIX}{OVERLAYFS_OPAQUE_XATTR}"),
            b"y".to_vec(),
        )]
    }
}

impl WhiteoutDetector for OverlayFsDialect {
    fn name(&self) -> &'static str {
        OVERLAYFS_DIALECT
    }

    fn detect(&self, header: &Header, path: &[u8]) -> Option<Whiteout> {
        // Opacity lives in the directory's extended attributes, not its header,
        // so only file whiteouts are detectable here.
        if header.entry_type().is_character_special()
            && header.device_major().ok().flatten() == Some(0)
            && header.device_minor().ok().flatten() == Some(0)
        {
            return Some(Whiteout::File(path.to_vec()));
        }
        None
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
