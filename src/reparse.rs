//! Reparse/symlink builder: constructs a valid NTFS mount-point reparse
//! record and issues `FSCTL_SET_REPARSE_POINT`.
//!
//! Grounded on `inc/winfsp/winfsp.h`'s `REPARSE_DATA_BUFFER` layout
//! comments and the junction-creation building blocks described by
//! `fsbench`/`fsptool`; building the record end to end is normally the
//! caller's job in the reference tree (WinFSP itself only plumbs the
//! IOCTL), so this module assembles what is usually scattered across a
//! caller into one reusable builder.

use crate::error::{NtStatus, Result};

/// `IO_REPARSE_TAG_MOUNT_POINT`.
pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;

const WCHAR_SIZE: usize = 2;

/// A built `REPARSE_DATA_BUFFER` for a mount-point reparse point, ready to
/// hand to `FSCTL_SET_REPARSE_POINT`. Wire layout (little-endian):
///
/// ```text
/// u32 ReparseTag
/// u16 ReparseDataLength
/// u16 Reserved
/// u16 SubstituteNameOffset
/// u16 SubstituteNameLength
/// u16 PrintNameOffset
/// u16 PrintNameLength
/// WCHAR PathBuffer[]   // \??\<TARGET>\0<TARGET>\0
/// ```
#[derive(Debug)]
pub struct MountPointReparseRecord {
    bytes: Vec<u8>,
}

impl MountPointReparseRecord {
    /// Builds the record for `target` (a drive-letter-rooted path, e.g.
    /// `D:\data`). The substitute name is `\??\` + `target`; the print name
    /// is `target` unmodified. Both are null-terminated on the wire; the
    /// lengths recorded in the header exclude the terminator, matching
    /// S6's worked example (`ReparseDataLength = 8 + 14 + 14 + 4 = 40`).
    pub fn build(target: &str) -> Result<Self> {
        if target.len() < 2 || target.as_bytes()[1] != b':' {
            return Err(NtStatus::INVALID_PARAMETER);
        }

        let substitute: Vec<u16> = format!("\\??\\{target}").encode_utf16().collect();
        let print: Vec<u16> = target.encode_utf16().collect();

        let sub_len_bytes = (substitute.len() * WCHAR_SIZE) as u16;
        let print_len_bytes = (print.len() * WCHAR_SIZE) as u16;
        let sub_offset: u16 = 0;
        let print_offset = sub_len_bytes + WCHAR_SIZE as u16;

        let reparse_data_length = 8u16 + sub_len_bytes + print_len_bytes + 2 * WCHAR_SIZE as u16;

        let mut bytes = Vec::with_capacity(8 + reparse_data_length as usize);
        bytes.extend_from_slice(&IO_REPARSE_TAG_MOUNT_POINT.to_le_bytes());
        bytes.extend_from_slice(&reparse_data_length.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // Reserved
        bytes.extend_from_slice(&sub_offset.to_le_bytes());
        bytes.extend_from_slice(&sub_len_bytes.to_le_bytes());
        bytes.extend_from_slice(&print_offset.to_le_bytes());
        bytes.extend_from_slice(&print_len_bytes.to_le_bytes());
        for u in &substitute {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes()); // substitute name terminator
        for u in &print {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes()); // print name terminator

        Ok(MountPointReparseRecord { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reparse_data_length(&self) -> u16 {
        u16::from_le_bytes([self.bytes[4], self.bytes[5]])
    }
}

/// Abstraction over the directory-create-then-`FSCTL_SET_REPARSE_POINT`
/// sequence, so the ordering and cleanup-on-failure contract can be tested
/// without a real NTFS volume.
pub trait JunctionBackend {
    /// Creates `junction` with `CREATE_NEW | FILE_FLAG_BACKUP_SEMANTICS |
    /// FILE_FLAG_POSIX_SEMANTICS`; must fail if `junction` already exists.
    fn create_directory(&self, junction: &str) -> Result<()>;
    fn set_reparse_point(&self, junction: &str, record: &MountPointReparseRecord) -> Result<()>;
    /// Best-effort cleanup; errors are not surfaced (the original failure
    /// is what the caller reports).
    fn remove_directory(&self, junction: &str);
}

/// Creates a mount-point junction at `junction` pointing at `target`.
/// Deletes the newly created directory if setting the reparse point fails,
/// so a partial junction never survives a failed call.
pub fn create_junction<B: JunctionBackend>(backend: &B, junction: &str, target: &str) -> Result<()> {
    let record = MountPointReparseRecord::build(target)?;
    backend.create_directory(junction)?;
    if let Err(e) = backend.set_reparse_point(junction, &record) {
        backend.remove_directory(junction);
        return Err(e);
    }
    Ok(())
}

#[cfg(windows)]
pub mod win32 {
    use super::{JunctionBackend, MountPointReparseRecord, Result};
    use crate::error::NtStatus;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, RemoveDirectoryW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::IO::DeviceIoControl;

    const FSCTL_SET_REPARSE_POINT: u32 = 0x000900A4;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub struct Win32JunctionBackend;

    impl JunctionBackend for Win32JunctionBackend {
        fn create_directory(&self, junction: &str) -> Result<()> {
            let path = wide(junction);
            unsafe {
                windows::Win32::Storage::FileSystem::CreateDirectoryW(PCWSTR(path.as_ptr()), None)
                    .map_err(|_| NtStatus::from(std::io::Error::last_os_error()))
            }
        }

        fn set_reparse_point(&self, junction: &str, record: &MountPointReparseRecord) -> Result<()> {
            let path = wide(junction);
            let handle = unsafe {
                CreateFileW(
                    PCWSTR(path.as_ptr()),
                    windows::Win32::Storage::FileSystem::FILE_GENERIC_WRITE.0,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
                    None,
                )
                .map_err(|_| NtStatus::from(std::io::Error::last_os_error()))?
            };
            let mut bytes_returned: u32 = 0;
            let ok = unsafe {
                DeviceIoControl(
                    handle,
                    FSCTL_SET_REPARSE_POINT,
                    Some(record.as_bytes().as_ptr() as *const core::ffi::c_void),
                    record.as_bytes().len() as u32,
                    None,
                    0,
                    Some(&mut bytes_returned),
                    None,
                )
            };
            unsafe {
                let _ = CloseHandle(handle);
            }
            if ok.is_err() {
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            Ok(())
        }

        fn remove_directory(&self, junction: &str) {
            let path = wide(junction);
            unsafe {
                let _ = RemoveDirectoryW(PCWSTR(path.as_ptr()));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn builds_the_exact_layout_from_the_worked_example() {
        // Target="D:\data" -> SubNameLen=14, PrintNameLen=14,
        // ReparseDataLength = 8 + 14 + 14 + 4 = 40.
        let record = MountPointReparseRecord::build("D:\\data").unwrap();
        assert_eq!(record.reparse_data_length(), 40);
        assert_eq!(u32::from_le_bytes(record.as_bytes()[0..4].try_into().unwrap()), IO_REPARSE_TAG_MOUNT_POINT);

        let sub_offset = u16::from_le_bytes(record.as_bytes()[8..10].try_into().unwrap());
        let sub_len = u16::from_le_bytes(record.as_bytes()[10..12].try_into().unwrap());
        let print_offset = u16::from_le_bytes(record.as_bytes()[12..14].try_into().unwrap());
        let print_len = u16::from_le_bytes(record.as_bytes()[14..16].try_into().unwrap());
        assert_eq!(sub_offset, 0);
        assert_eq!(sub_len, 14 * 2);
        assert_eq!(print_offset, sub_len + 2);
        assert_eq!(print_len, 14 * 2);

        let path_buffer = &record.as_bytes()[16..];
        let substitute: Vec<u16> = path_buffer[..sub_len as usize]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let substitute_str = String::from_utf16(&substitute).unwrap();
        assert_eq!(substitute_str, "\\??\\D:\\data");
    }

    #[test]
    fn rejects_a_target_with_no_drive_letter() {
        assert_eq!(MountPointReparseRecord::build("relative\\path").unwrap_err(), NtStatus::INVALID_PARAMETER);
    }

    struct FakeBackend {
        directories: RefCell<Vec<String>>,
        fail_set: bool,
    }

    impl JunctionBackend for FakeBackend {
        fn create_directory(&self, junction: &str) -> Result<()> {
            self.directories.borrow_mut().push(junction.to_string());
            Ok(())
        }
        fn set_reparse_point(&self, _junction: &str, _record: &MountPointReparseRecord) -> Result<()> {
            if self.fail_set {
                Err(NtStatus::ACCESS_DENIED)
            } else {
                Ok(())
            }
        }
        fn remove_directory(&self, junction: &str) {
            self.directories.borrow_mut().retain(|d| d != junction);
        }
    }

    #[test]
    fn failed_set_reparse_point_removes_the_newly_created_directory() {
        let backend = FakeBackend {
            directories: RefCell::new(Vec::new()),
            fail_set: true,
        };
        let err = create_junction(&backend, "C:\\mnt\\x", "D:\\data").unwrap_err();
        assert_eq!(err, NtStatus::ACCESS_DENIED);
        assert!(backend.directories.borrow().is_empty());
    }

    #[test]
    fn successful_junction_leaves_the_directory_in_place() {
        let backend = FakeBackend {
            directories: RefCell::new(Vec::new()),
            fail_set: false,
        };
        create_junction(&backend, "C:\\mnt\\x", "D:\\data").unwrap();
        assert_eq!(backend.directories.borrow().as_slice(), ["C:\\mnt\\x".to_string()]);
    }
}
