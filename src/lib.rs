//! winfsp-core: the IRP-dispatcher/access-check runtime a user-mode
//! Windows file system is built on top of.
//!
//! This crate is the bridge between a WinFSP-style kernel transact channel
//! and a user-supplied [`Filesystem`] implementation. It owns the pieces
//! that are hard to get right and easy to get subtly wrong: correlating
//! requests and responses across a multi-threaded dispatch pool, the
//! create/access-check pipeline, the resumable directory-enumeration
//! buffer, reparse-point construction, and a fault-injection harness for
//! exercising recovery paths under test.
//!
//! It is not a file system. A concrete file system implements
//! [`Filesystem`] and hands it to [`FileSystemHost`] along with a
//! [`VolumeParams`] describing the volume's identity and feature flags;
//! the host drives the kernel channel and calls back into the
//! implementation, the same division of labor a FUSE binding draws
//! between its kernel channel and a POSIX-shaped `Filesystem`
//! implementation — same shape, Windows-shaped verbs.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::module_inception)]

mod access_mask;
mod channel;
mod codec;
mod dirbuf;
mod dispatch;
mod error;
mod host;
mod inject;
mod launcher;
mod ops;
mod path;
mod reparse;
mod security;
mod service_record;
mod uuid5;
mod validate;
mod volume;

pub use crate::access_mask::AccessMask;
#[cfg(windows)]
pub use crate::channel::win32::DeviceChannel;
pub use crate::channel::{ChannelBuffers, TransactChannel, DISK_DEVICE_NAME, FSP_FSCTL_CREATE, FSP_FSCTL_DELETE, FSP_FSCTL_TRANSACT, NET_DEVICE_NAME};
pub use crate::codec::{HEADER_LEN, MAX_REQUEST_SIZE, MAX_RESPONSE_BATCH_SIZE, MAX_RESPONSE_RECORD_SIZE};
pub use crate::dirbuf::{DirEntry, DirectoryBuffer};
pub use crate::dispatch::{default_thread_count, Dispatcher, OperationTable, RawRequest};
pub use crate::error::{NtStatus, Result};
pub use crate::host::FileSystemHost;
pub use crate::inject::{inject, InjectionPoint, InjectionTable, TRIGGER_ALWAYS};
pub use crate::launcher::{Command as LauncherCommand, LauncherTransport, Reply as LauncherReply, PIPE_BUFFER_SIZE, PIPE_SDDL};
pub use crate::ops::{CreateRequest, DirectoryEntry, FileInfo, Filesystem, Kind, RenameInfo, SetBasicInfo, VolumeInfo};
pub use crate::path::{ancestor_prefixes, combine as combine_path, split_prefix, split_suffix};
pub use crate::reparse::{create_junction, JunctionBackend, MountPointReparseRecord, IO_REPARSE_TAG_MOUNT_POINT};
pub use crate::security::{
    access_check, create_check, create_child_security_descriptor, set_security_descriptor, AccessCheckRequest,
    AccessCheckResult, AccessChecker, CallerMode, CallerToken, CreateOptions, Disposition, PrivateObjectSecurity,
    SecurityInfo, SecurityInformation, SecurityProvider, FILE_CREATED, FILE_OPENED, FILE_OVERWRITTEN, FILE_SUPERSEDED,
};
pub use crate::service_record::{RegistryKey, ServiceRecord, JOB_CONTROL_DONT_WRITE};
pub use crate::uuid5::{uuid5, Uuid};
pub use crate::validate::{split_and_validate_stream, validate_file_name};
pub use crate::volume::{unix_time_to_filetime, DeviceKind, FileContextMode, OperationGuardStrategy, VolumeParams};
