//! Windows file `ACCESS_MASK` bits.
//!
//! These are the standard NT file-object access rights used throughout the
//! security pipeline's `AccessCheck` calls and the CREATE-class disposition
//! handlers. Values match `winnt.h`; kept as a `bitflags` set, the same way
//! a FUSE binding represents its own flags words (open flags, rename
//! flags) rather than as raw `u32` literals scattered through
//! `security.rs`.

use bitflags::bitflags;

bitflags! {
    /// A (possibly partial) NT `ACCESS_MASK`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct AccessMask: u32 {
        const FILE_READ_DATA = 0x0000_0001;
        const FILE_WRITE_DATA = 0x0000_0002;
        const FILE_APPEND_DATA = 0x0000_0004;
        const FILE_READ_EA = 0x0000_0008;
        const FILE_WRITE_EA = 0x0000_0010;
        const FILE_EXECUTE = 0x0000_0020;
        const FILE_DELETE_CHILD = 0x0000_0040;
        const FILE_READ_ATTRIBUTES = 0x0000_0080;
        const FILE_WRITE_ATTRIBUTES = 0x0000_0100;

        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;

        const MAXIMUM_ALLOWED = 0x0200_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;

        /// Directory-specific aliases of the generic file bits above —
        /// same numeric value, different name depending on whether the
        /// object being checked is a file or a directory.
        const FILE_LIST_DIRECTORY = Self::FILE_READ_DATA.bits();
        const FILE_ADD_FILE = Self::FILE_WRITE_DATA.bits();
        const FILE_ADD_SUBDIRECTORY = Self::FILE_APPEND_DATA.bits();
        const FILE_TRAVERSE = Self::FILE_EXECUTE.bits();
    }
}

/// Bits that, when present in `DesiredAccess` and denied at the leaf, may
/// still be granted from a parent-directory check.
pub const PARENT_RESCUABLE: AccessMask = AccessMask::MAXIMUM_ALLOWED
    .union(AccessMask::DELETE)
    .union(AccessMask::FILE_READ_ATTRIBUTES);

/// Bits stripped from a `MAXIMUM_ALLOWED` grant when the leaf is read-only.
pub const READONLY_STRIPPED: AccessMask = AccessMask::FILE_WRITE_DATA
    .union(AccessMask::FILE_APPEND_DATA)
    .union(AccessMask::FILE_ADD_SUBDIRECTORY)
    .union(AccessMask::FILE_DELETE_CHILD);

/// Bits that are denied outright on a read-only leaf when requested
/// directly.
pub const READONLY_DENIED: AccessMask = READONLY_STRIPPED;
