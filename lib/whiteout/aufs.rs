use tar::Header;

use crate::archive::{join_path, split_path};

use super::{Whiteout, WhiteoutDetector};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Registry name of the AUFS dialect.
pub const AUFS_DIALECT: &str = "aufs";

/// Prefix marking an AUFS whiteout entry; the unprefixed sibling is hidden.
pub const AUFS_WHITEOUT_PREFIX: &[u8] = b".wh.";

/// Sentinel entry marking its parent directory opaque.
pub const AUFS_OPAQUE_SENTINEL: &[u8] = b".wh..wh..opq";

/// Prefix of AUFS bookkeeping entries (e.g. `.wh..wh..plnk`) that have no counterpart in other
/// dialects and are dropped from the output.
const AUFS_INTERNAL_PREFIX: &[u8] = b".wh..wh.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The AUFS whiteout convention.
///
/// Deletions are `.wh.`-prefixed sibling entries; opacity is the `.wh..wh..opq` sentinel placed
/// directly under the directory it applies to. This is the dialect Docker's classic storage
/// driver emits in exported layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AufsDialect;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl WhiteoutDetector for AufsDialect {
    fn name(&self) -> &'static str {
        AUFS_DIALECT
    }

    fn detect(&self, _header: &Header, path: &[u8]) -> Option<Whiteout> {
        let (parent, name) = split_path(path);

        if name == AUFS_OPAQUE_SENTINEL {
            return Some(Whiteout::Opaque(parent.to_vec()));
        }
        if name.starts_with(AUFS_INTERNAL_PREFIX) {
            return Some(Whiteout::Internal);
        }
        if let Some(hidden) = name.strip_prefix(AUFS_WHITEOUT_PREFIX) {
            if hidden.is_empty() {
                // a bare `.wh.` entry hides nothing; drop it like other bookkeeping
                return Some(Whiteout::Internal);
            }
            return Some(Whiteout::File(join_path(parent, hidden)));
        }
        None
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new_gnu()
    }

    #[test]
    fn test_detects_file_whiteout() {
        let detected = AufsDialect.detect(&header(), b"opt/.wh.removed.txt");
        assert_eq!(detected, Some(Whiteout::File(b"opt/removed.txt".to_vec())));

        let detected = AufsDialect.detect(&header(), b".wh.foo.txt");
        assert_eq!(detected, Some(Whiteout::File(b"foo.txt".to_vec())));
    }

    #[test]
    fn test_detects_opaque_sentinel() {
        let detected = AufsDialect.detect(&header(), b"opaque/.wh..wh..opq");
        assert_eq!(detected, Some(Whiteout::Opaque(b"opaque".to_vec())));

        let detected = AufsDialect.detect(&header(), b".wh..wh..opq");
        assert_eq!(detected, Some(Whiteout::Opaque(Vec::new())));
    }

    #[test]
    fn test_detects_internal_entries() {
        assert_eq!(
            AufsDialect.detect(&header(), b".wh..wh..plnk"),
            Some(Whiteout::Internal)
        );
        assert_eq!(
            AufsDialect.detect(&header(), b"var/.wh..wh.aufs"),
            Some(Whiteout::Internal)
        );
    }

    #[test]
    fn test_plain_entries_pass() {
        assert_eq!(AufsDialect.detect(&header(), b"etc/app.conf"), None);
        // the prefix only counts in the final component
        assert_eq!(AufsDialect.detect(&header(), b".wh.dir/kept.txt"), None);
    }
}
