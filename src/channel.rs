//! Transact channel client: the blocking round-trip primitive that hands a
//! response buffer to the kernel and receives back the next batch of
//! requests, one `DeviceIoControl` call at a time.
//!
//! Grounded on `src/dll/dispatch.c`'s `FspFileSystemDispatcherThread` loop
//! (one `FspFsctlTransact` call per iteration, response-then-request in a
//! single buffered IOCTL) and the device codes in `inc/fsctl.h`. No
//! coroutines: each worker thread blocks inside its own `transact` call —
//! there is no userland scheduler multiplexing requests onto fewer OS
//! threads than the dispatcher pool size.

use crate::codec::MAX_RESPONSE_BATCH_SIZE;
use crate::error::Result;

/// `CTL_CODE(FILE_DEVICE_FILE_SYSTEM, 0x800 + ch, METHOD_BUFFERED, FILE_READ_DATA | FILE_WRITE_DATA)`
const fn ctl_code(function: u32) -> u32 {
    const FILE_DEVICE_FILE_SYSTEM: u32 = 0x0009;
    const METHOD_BUFFERED: u32 = 0;
    const FILE_READ_DATA: u32 = 0x0001;
    const FILE_WRITE_DATA: u32 = 0x0002;
    (FILE_DEVICE_FILE_SYSTEM << 16)
        | ((FILE_READ_DATA | FILE_WRITE_DATA) << 14)
        | (function << 2)
        | METHOD_BUFFERED
}

pub const FSP_FSCTL_CREATE: u32 = ctl_code(0x800 + b'C' as u32);
pub const FSP_FSCTL_DELETE: u32 = ctl_code(0x800 + b'D' as u32);
pub const FSP_FSCTL_TRANSACT: u32 = ctl_code(0x800 + b'T' as u32);

pub const DISK_DEVICE_NAME: &str = "WinFsp.Disk";
pub const NET_DEVICE_NAME: &str = "WinFsp.Net";

/// One round trip with the kernel: deliver `response` (the batch of
/// completed operation results since the last call, or nothing on the
/// first call) and block until the kernel hands back the next batch of
/// pending requests into `request_buf`. Returns the number of bytes
/// written into `request_buf`; zero means the channel was stopped while
/// waiting.
///
/// A trait so the dispatcher can be exercised against a fake channel in
/// tests, without an actual volume device.
pub trait TransactChannel: Send + Sync {
    fn transact(&self, response: Option<&[u8]>, request_buf: &mut [u8]) -> Result<usize>;

    /// Unblocks every thread currently inside `transact`, causing them to
    /// return `Ok(0)`. Matches `FspFsctlStop` tearing down the volume's
    /// fsvrt device from under the dispatcher threads.
    fn stop(&self);
}

#[cfg(windows)]
pub mod win32 {
    use super::{Result, TransactChannel, FSP_FSCTL_DELETE, FSP_FSCTL_TRANSACT};
    use crate::error::NtStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::IO::{CancelIoEx, DeviceIoControl};

    /// Owns the kernel-mode handle to a mounted volume's fsvrt device and
    /// issues `FSP_FSCTL_TRANSACT` against it.
    pub struct DeviceChannel {
        handle: HANDLE,
        stopped: AtomicBool,
    }

    // SAFETY: HANDLE is a plain kernel handle value; Win32 device IO on it
    // from multiple threads is the normal multi-threaded dispatcher model.
    unsafe impl Send for DeviceChannel {}
    unsafe impl Sync for DeviceChannel {}

    impl DeviceChannel {
        pub fn open(device_path: &str) -> windows::core::Result<Self> {
            let path_w: Vec<u16> = device_path.encode_utf16().chain(std::iter::once(0)).collect();
            let handle = unsafe {
                CreateFileW(
                    PCWSTR(path_w.as_ptr()),
                    (windows::Win32::Storage::FileSystem::FILE_GENERIC_READ
                        | windows::Win32::Storage::FileSystem::FILE_GENERIC_WRITE)
                        .0,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    None,
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    None,
                )?
            };
            Ok(DeviceChannel {
                handle,
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl Drop for DeviceChannel {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }

    impl TransactChannel for DeviceChannel {
        fn transact(&self, response: Option<&[u8]>, request_buf: &mut [u8]) -> Result<usize> {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(0);
            }
            let mut bytes_returned: u32 = 0;
            let (in_ptr, in_len) = match response {
                Some(r) => (r.as_ptr() as *const core::ffi::c_void, r.len() as u32),
                None => (std::ptr::null(), 0),
            };
            let ok = unsafe {
                DeviceIoControl(
                    self.handle,
                    FSP_FSCTL_TRANSACT,
                    Some(in_ptr),
                    in_len,
                    Some(request_buf.as_mut_ptr() as *mut core::ffi::c_void),
                    request_buf.len() as u32,
                    Some(&mut bytes_returned),
                    None,
                )
            };
            if ok.is_err() {
                if self.stopped.load(Ordering::Acquire) {
                    return Ok(0);
                }
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            Ok(bytes_returned as usize)
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::Release);
            unsafe {
                let _ = CancelIoEx(self.handle, None);
                let mut bytes_returned: u32 = 0;
                let _ = DeviceIoControl(
                    self.handle,
                    FSP_FSCTL_DELETE,
                    None,
                    0,
                    None,
                    0,
                    Some(&mut bytes_returned),
                    None,
                );
            }
        }
    }
}

/// A response-then-request buffer pair a worker thread reuses across
/// `transact` calls, sized per `MAX_RESPONSE_BATCH_SIZE`/`MAX_REQUEST_SIZE`.
pub struct ChannelBuffers {
    pub request: Vec<u8>,
}

impl Default for ChannelBuffers {
    fn default() -> Self {
        ChannelBuffers {
            request: vec![0u8; MAX_RESPONSE_BATCH_SIZE],
        }
    }
}
