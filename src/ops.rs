//! Per-operation request/response shapes and the `Filesystem` trait — the
//! callback surface a concrete file system implements, and the typed
//! payloads [`crate::host::FileSystemHost`] decodes off the transact wire
//! before calling into it.
//!
//! `Filesystem` follows the same pattern a FUSE binding's own trait uses
//! (one method per operation, a default body that `warn!`s
//! `"[Not Implemented] ..."` and returns the not-implemented status),
//! generalized from POSIX verbs to the WinFSP verb set, and on
//! `src/dll/create.c`'s disposition dispatch for the shape of
//! [`CreateRequest`]/[`Disposition`] (re-exported from [`crate::security`]).

use log::warn;

use crate::access_mask::AccessMask;
use crate::error::{NtStatus, Result};
use crate::security::{CreateOptions, SecurityInformation};

/// Every request kind this runtime's transact wire carries. Numeric values
/// are this crate's own wire convention (the codec does not inherit a
/// fixed numbering from any single reference file); stable once assigned,
/// since the codec round-trips the same integer a client and a kernel-mode
/// peer both compiled against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Kind {
    Create = 0,
    Overwrite = 1,
    Cleanup = 2,
    Close = 3,
    Read = 4,
    Write = 5,
    Flush = 6,
    QueryInformation = 7,
    SetInformation = 8,
    QueryEa = 9,
    SetEa = 10,
    QueryVolumeInformation = 11,
    SetVolumeInformation = 12,
    QueryDirectory = 13,
    QuerySecurity = 14,
    SetSecurity = 15,
    QuerySecurityByName = 16,
    GetReparsePoint = 17,
    SetReparsePoint = 18,
    DeleteReparsePoint = 19,
    GetDirInfoByName = 20,
}

impl TryFrom<u32> for Kind {
    type Error = NtStatus;

    fn try_from(v: u32) -> Result<Kind> {
        use Kind::*;
        Ok(match v {
            0 => Create,
            1 => Overwrite,
            2 => Cleanup,
            3 => Close,
            4 => Read,
            5 => Write,
            6 => Flush,
            7 => QueryInformation,
            8 => SetInformation,
            9 => QueryEa,
            10 => SetEa,
            11 => QueryVolumeInformation,
            12 => SetVolumeInformation,
            13 => QueryDirectory,
            14 => QuerySecurity,
            15 => SetSecurity,
            16 => QuerySecurityByName,
            17 => GetReparsePoint,
            18 => SetReparsePoint,
            19 => DeleteReparsePoint,
            20 => GetDirInfoByName,
            _ => return Err(NtStatus::INVALID_DEVICE_REQUEST),
        })
    }
}

/// `FSP_FSCTL_FILE_INFO` — the fixed-shape attributes WinFSP reports for a
/// file object on every operation that touches or returns one.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub index_number: u64,
    pub hard_links: u32,
    pub ea_size: u32,
}

/// `FSP_FSCTL_VOLUME_INFO` — the fixed-shape volume-wide attributes
/// `QueryVolumeInformation` reports.
#[derive(Clone, Debug, Default)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: String,
}

/// Input to [`Filesystem::create`]; the disposition has already been
/// decoded from the top byte of `create_options` by [`crate::security`].
pub struct CreateRequest<'a> {
    pub file_name: &'a str,
    pub create_options: CreateOptions,
    pub granted_access: AccessMask,
    pub file_attributes: u32,
    pub security_descriptor: Option<&'a [u8]>,
    pub allocation_size: u64,
}

pub struct RenameInfo<'a> {
    pub new_file_name: &'a str,
    pub replace_if_exists: bool,
}

pub struct SetBasicInfo {
    pub file_attributes: Option<u32>,
    pub creation_time: Option<u64>,
    pub last_access_time: Option<u64>,
    pub last_write_time: Option<u64>,
    pub change_time: Option<u64>,
}

/// The per-entry record a [`Filesystem::read_directory`] implementation
/// hands to the runtime via [`crate::dirbuf::DirectoryBuffer`].
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    pub file_name: String,
    pub file_info: FileInfo,
}

/// The callback surface a concrete file system implements. One method per
/// WinFSP operation; every default logs and reports "not implemented", the
/// same shape a FUSE binding's own `Filesystem` trait uses for every
/// callback it doesn't require a file system to override.
///
/// `Self::FileContext` is whatever a file system wants to identify an open
/// instance by (an inode number, an index into a table, a `Arc<Mutex<..>>`
/// to shared state); the runtime only ever moves it around opaquely.
pub trait Filesystem: Send + Sync + 'static {
    type FileContext: Send + Sync;

    fn get_security_by_name(&self, file_name: &str) -> Result<(u32, Vec<u8>)> {
        warn!("[Not Implemented] get_security_by_name(file_name={file_name:?})");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn create(&self, request: &CreateRequest<'_>) -> Result<(Self::FileContext, FileInfo)> {
        warn!("[Not Implemented] create(file_name={:?})", request.file_name);
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn open(&self, file_name: &str, create_options: CreateOptions, granted_access: AccessMask) -> Result<(Self::FileContext, FileInfo)> {
        let _ = (create_options, granted_access);
        warn!("[Not Implemented] open(file_name={file_name:?})");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn overwrite(&self, context: &Self::FileContext, file_attributes: u32, replace_attributes: bool, allocation_size: u64) -> Result<FileInfo> {
        let _ = (context, file_attributes, replace_attributes, allocation_size);
        warn!("[Not Implemented] overwrite");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn cleanup(&self, context: &Self::FileContext, file_name: &str, delete: bool) {
        let _ = (context, delete);
        warn!("[Not Implemented] cleanup(file_name={file_name:?})");
    }

    fn close(&self, context: Self::FileContext) {
        let _ = context;
    }

    fn read(&self, context: &Self::FileContext, buffer: &mut [u8], offset: u64) -> Result<u32> {
        let _ = (context, buffer, offset);
        warn!("[Not Implemented] read");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn write(&self, context: &Self::FileContext, buffer: &[u8], offset: u64, write_to_end_of_file: bool, constrained_io: bool) -> Result<(u32, FileInfo)> {
        let _ = (context, buffer, offset, write_to_end_of_file, constrained_io);
        warn!("[Not Implemented] write");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn flush(&self, context: Option<&Self::FileContext>) -> Result<FileInfo> {
        let _ = context;
        warn!("[Not Implemented] flush");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_file_info(&self, context: &Self::FileContext) -> Result<FileInfo> {
        let _ = context;
        warn!("[Not Implemented] get_file_info");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_basic_info(&self, context: &Self::FileContext, info: &SetBasicInfo) -> Result<FileInfo> {
        let _ = (context, info);
        warn!("[Not Implemented] set_basic_info");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_file_size(&self, context: &Self::FileContext, new_size: u64, set_allocation_size: bool) -> Result<FileInfo> {
        let _ = (context, new_size, set_allocation_size);
        warn!("[Not Implemented] set_file_size");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn rename(&self, context: &Self::FileContext, file_name: &str, info: &RenameInfo<'_>) -> Result<()> {
        let _ = (context, file_name, info);
        warn!("[Not Implemented] rename");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_volume_info(&self) -> Result<VolumeInfo> {
        warn!("[Not Implemented] get_volume_info");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_volume_label(&self, label: &str) -> Result<VolumeInfo> {
        let _ = label;
        warn!("[Not Implemented] set_volume_label");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Fills one batch of entries into `buffer` (via
    /// [`crate::dirbuf::DirectoryBuffer::acquire`]) the first time a given
    /// `context` is enumerated; subsequent calls for the same context are
    /// served entirely out of the already-filled buffer by the runtime and
    /// never reach this method again until `reset` is requested.
    fn read_directory(&self, context: &Self::FileContext, pattern: Option<&str>) -> Result<Vec<DirectoryEntry>> {
        let _ = (context, pattern);
        warn!("[Not Implemented] read_directory");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_dir_info_by_name(&self, context: &Self::FileContext, file_name: &str) -> Result<(String, FileInfo)> {
        let _ = (context, file_name);
        warn!("[Not Implemented] get_dir_info_by_name");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_security(&self, context: &Self::FileContext) -> Result<Vec<u8>> {
        let _ = context;
        warn!("[Not Implemented] get_security");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_security(&self, context: &Self::FileContext, info: SecurityInformation, descriptor: &[u8]) -> Result<()> {
        let _ = (context, info, descriptor);
        warn!("[Not Implemented] set_security");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_reparse_point(&self, context: &Self::FileContext, file_name: &str) -> Result<Vec<u8>> {
        let _ = (context, file_name);
        warn!("[Not Implemented] get_reparse_point");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_reparse_point(&self, context: &Self::FileContext, file_name: &str, buffer: &[u8]) -> Result<()> {
        let _ = (context, file_name, buffer);
        warn!("[Not Implemented] set_reparse_point");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn delete_reparse_point(&self, context: &Self::FileContext, file_name: &str, buffer: &[u8]) -> Result<()> {
        let _ = (context, file_name, buffer);
        warn!("[Not Implemented] delete_reparse_point");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn get_ea(&self, context: &Self::FileContext) -> Result<Vec<u8>> {
        let _ = context;
        warn!("[Not Implemented] get_ea");
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    fn set_ea(&self, context: &Self::FileContext, buffer: &[u8]) -> Result<FileInfo> {
        let _ = (context, buffer);
        warn!("[Not Implemented] set_ea");
        Err(NtStatus::NOT_IMPLEMENTED)
    }
}
