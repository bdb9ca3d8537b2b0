//! Host runtime: wires a concrete [`Filesystem`] implementation, a
//! security backend, and [`crate::dispatch::Dispatcher`] together into a
//! mountable file system.
//!
//! Grounded on `src/dll/fsop.c`'s per-operation dispatch functions (the
//! decode-request / call-user-callback / encode-response shape every one of
//! them follows) for [`FileSystemHost::dispatch`], and on the `winfsp_wrs`
//! reference's `FileSystem::new`/`start`/`stop` lifecycle — `FspFileSystemCreate`,
//! `FspFileSystemSetMountPoint`, `FspFileSystemStartDispatcher` — for
//! [`FileSystemHost::mount`]/[`FileSystemHost::stop`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::channel::TransactChannel;
use crate::codec::{self, NameRef, RequestHeader, ResponseHeader};
use crate::dirbuf::DirectoryBuffer;
use crate::dispatch::{Dispatcher, OperationTable, RawRequest};
use crate::error::{NtStatus, Result};
use crate::ops::{CreateRequest, DirectoryEntry, FileInfo, Filesystem, Kind, RenameInfo, SetBasicInfo};
use crate::security::{self, AccessChecker, CallerMode, CreateOptions, Disposition, PrivateObjectSecurity, SecurityInformation, SecurityProvider};
use crate::volume::VolumeParams;

/// Decodes the fixed header and the UTF-16LE `FileName` region it points
/// at, returning the exact byte offset (`HEADER_LEN + name region size`,
/// no further padding) where the per-kind body begins.
fn decode_header(bytes: &[u8]) -> Option<(RequestHeader, String, usize)> {
    use zerocopy::FromBytes;
    let header = RequestHeader::read_from_prefix(bytes).ok()?.0;
    let NameRef { offset, size } = header.file_name;
    let start = offset as usize;
    let end = start + size as usize;
    let raw = bytes.get(start..end)?;
    let wide: Vec<u16> = raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    let name = String::from_utf16(&wide).ok()?;
    Some((header, name, end))
}

/// Appends one response record to `out`. A record whose total size would
/// overflow the wire's 16-bit `Size` field is never built as-is: this
/// substitutes a minimal `INVALID_DEVICE_REQUEST` response carrying the
/// original `hint` instead, so the batch's framing can never be corrupted
/// by a handler that produced too large a body.
fn push_response(out: &mut Vec<u8>, hint: u64, kind: u32, status: NtStatus, information: u64, body: &[u8]) {
    use zerocopy::IntoBytes;
    let total = codec::HEADER_LEN + body.len();
    let (status, information, body) = if total > codec::MAX_RESPONSE_RECORD_SIZE {
        (NtStatus::INVALID_DEVICE_REQUEST, 0u64, &[][..])
    } else {
        (status, information, body)
    };
    let header = ResponseHeader {
        size: (codec::HEADER_LEN + body.len()) as u16,
        kind,
        hint,
        io_status: codec::IoStatus {
            status: status.wire_value(),
            information,
        },
    };
    let start = out.len();
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    let padded = codec::align_up(out.len() - start);
    out.resize(start + padded, 0);
}

struct OpenFile<F> {
    context: F,
    file_name: String,
    is_directory: bool,
    dirbuf: DirectoryBuffer<FileInfo>,
}

/// Ties a [`Filesystem`] implementation to the security backend it needs
/// for CREATE-class operations and to the dispatcher that drives it.
///
/// `A` is the OS-supplied `AccessCheck` collaborator and `S` the OS-supplied
/// private-object-security collaborator; `F` supplies `GetSecurityByName`
/// itself by also implementing [`SecurityProvider`], matching the split the
/// reference implementation draws between what the file system answers and
/// what the OS answers.
pub struct FileSystemHost<F, A, S>
where
    F: Filesystem + SecurityProvider,
    A: AccessChecker + Send + Sync + 'static,
    S: PrivateObjectSecurity + Send + Sync + 'static,
{
    fs: Arc<F>,
    checker: A,
    private_security: S,
    params: VolumeParams,
    handles: RwLock<HashMap<u64, OpenFile<F::FileContext>>>,
    next_handle: AtomicU64,
    caller_mode: CallerMode,
}

impl<F, A, S> FileSystemHost<F, A, S>
where
    F: Filesystem + SecurityProvider,
    A: AccessChecker + Send + Sync + 'static,
    S: PrivateObjectSecurity + Send + Sync + 'static,
{
    pub fn new(fs: F, checker: A, private_security: S, params: VolumeParams) -> Arc<Self> {
        Arc::new(FileSystemHost {
            fs: Arc::new(fs),
            checker,
            private_security,
            params,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            caller_mode: CallerMode::User,
        })
    }

    /// Starts the dispatcher against `channel`. Matches
    /// `FspFileSystemStartDispatcher`; the caller is responsible for having
    /// already set the kernel-side mount point (`FspFileSystemSetMountPoint`
    /// on the real backend, done by [`crate::channel::win32::DeviceChannel`]
    /// construction).
    pub fn mount<C>(self: &Arc<Self>, channel: Arc<C>, thread_count: usize) -> Dispatcher
    where
        C: TransactChannel + 'static,
    {
        Dispatcher::start(channel, self.clone(), thread_count)
    }

    fn alloc_handle(&self, context: F::FileContext, file_name: String, is_directory: bool) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(
            handle,
            OpenFile {
                context,
                file_name,
                is_directory,
                dirbuf: DirectoryBuffer::new(),
            },
        );
        handle
    }

    fn file_info_body(info: &FileInfo) -> Vec<u8> {
        let mut body = Vec::with_capacity(56);
        body.extend_from_slice(&info.file_attributes.to_le_bytes());
        body.extend_from_slice(&info.reparse_tag.to_le_bytes());
        body.extend_from_slice(&info.allocation_size.to_le_bytes());
        body.extend_from_slice(&info.file_size.to_le_bytes());
        body.extend_from_slice(&info.creation_time.to_le_bytes());
        body.extend_from_slice(&info.last_access_time.to_le_bytes());
        body.extend_from_slice(&info.last_write_time.to_le_bytes());
        body.extend_from_slice(&info.change_time.to_le_bytes());
        body.extend_from_slice(&info.index_number.to_le_bytes());
        body.extend_from_slice(&info.hard_links.to_le_bytes());
        body.extend_from_slice(&info.ea_size.to_le_bytes());
        body
    }

    /// Runs the CREATE-class disposition state machine: probes the leaf,
    /// then for every disposition but the leaf-agnostic `Create` branches on
    /// whether it exists. `Create`-with-missing-leaf and `OpenIf`/
    /// `OverwriteIf`-with-missing-leaf all fall through to
    /// [`Self::create_new_file`]; the rest either open or overwrite the
    /// existing object (or report the disposition's not-found/collision
    /// status).
    fn handle_create(&self, hint: u64, header: &RequestHeader, file_name: &str, rest: &[u8], out: &mut Vec<u8>) -> NtStatus {
        if rest.len() < 20 {
            push_response(out, hint, header.kind, NtStatus::INVALID_PARAMETER, 0, &[]);
            return NtStatus::INVALID_PARAMETER;
        }
        let raw_create_options = u32::from_le_bytes(rest[0..4].try_into().unwrap());
        // `Disposition` lives in the top byte of the wire value; `CreateOptions`
        // covers only the low flag bits, so it must be decoded from the same
        // raw value before truncation discards the disposition byte.
        let create_options = CreateOptions::from_bits_truncate(raw_create_options);
        let desired_access = crate::access_mask::AccessMask::from_bits_truncate(u32::from_le_bytes(rest[4..8].try_into().unwrap()));
        let file_attributes = u32::from_le_bytes(rest[8..12].try_into().unwrap());
        let allocation_size = u64::from_le_bytes(rest[12..20].try_into().unwrap());
        let sd = if rest.len() > 20 { Some(&rest[20..]) } else { None };

        let Some(disposition) = Disposition::from_create_options(raw_create_options) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_PARAMETER, 0, &[]);
            return NtStatus::INVALID_PARAMETER;
        };

        let is_overwrite_class = matches!(disposition, Disposition::Overwrite | Disposition::Supersede | Disposition::OverwriteIf);
        let is_create = matches!(disposition, Disposition::Create);
        // Plain CREATE only probes for existence: neither the leaf's DACL
        // nor its directory/non-directory classification bears on whether
        // it reports a collision, so the probe asks for nothing and passes
        // an empty create-options bitmap to keep the classification and
        // read-only steps from firing.
        let leaf_desired = if is_create {
            crate::access_mask::AccessMask::empty()
        } else if is_overwrite_class {
            desired_access | crate::access_mask::AccessMask::DELETE
        } else {
            desired_access
        };
        let probe_create_options = if is_create { CreateOptions::empty() } else { create_options };
        let leaf_check = security::access_check(
            self.fs.as_ref(),
            &self.checker,
            &security::AccessCheckRequest {
                file_name,
                check_parent_directory: false,
                allow_traverse_check: true,
                has_traverse_privilege: false,
                caller_mode: self.caller_mode,
                desired_access: leaf_desired,
                create_options: probe_create_options,
                token: 0,
                suppress_classification_on_reparse: false,
            },
        );

        let leaf_missing = matches!(leaf_check, Err(NtStatus::OBJECT_NAME_NOT_FOUND));
        let takes_create_branch = matches!(disposition, Disposition::Create | Disposition::OpenIf | Disposition::OverwriteIf) && leaf_missing;

        if takes_create_branch {
            return self.create_new_file(hint, header, file_name, create_options, desired_access, file_attributes, allocation_size, sd, out);
        }
        if leaf_missing {
            // OPEN/OVERWRITE/SUPERSEDE all require an existing leaf.
            push_response(out, hint, header.kind, NtStatus::OBJECT_NAME_NOT_FOUND, 0, &[]);
            return NtStatus::OBJECT_NAME_NOT_FOUND;
        }
        if is_create {
            // The probe above succeeded (or failed for a reason unrelated
            // to existence, handled below), and the leaf is not missing:
            // it already exists.
            if leaf_check.is_ok() {
                push_response(out, hint, header.kind, NtStatus::OBJECT_NAME_COLLISION, 0, &[]);
                return NtStatus::OBJECT_NAME_COLLISION;
            }
        }
        let access = match leaf_check {
            Ok(access) => access,
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                return status;
            }
        };

        if is_overwrite_class {
            self.overwrite_existing_file(hint, header, file_name, file_attributes, allocation_size, disposition, desired_access, access, out)
        } else {
            self.open_existing_file(hint, header, file_name, create_options, access, out)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_new_file(
        &self,
        hint: u64,
        header: &RequestHeader,
        file_name: &str,
        create_options: CreateOptions,
        desired_access: crate::access_mask::AccessMask,
        file_attributes: u32,
        allocation_size: u64,
        sd: Option<&[u8]>,
        out: &mut Vec<u8>,
    ) -> NtStatus {
        let parent_check = match security::create_check(self.fs.as_ref(), &self.checker, file_name, true, self.caller_mode, false, create_options, 0) {
            Ok(c) => c,
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                return status;
            }
        };

        let is_directory = create_options.contains(CreateOptions::DIRECTORY_FILE);
        let security_descriptor = match security::create_child_security_descriptor(
            &self.private_security,
            parent_check.security_descriptor.as_deref(),
            sd,
            is_directory,
            false,
            0,
        ) {
            Ok(d) => d,
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                return status;
            }
        };

        let request = CreateRequest {
            file_name,
            create_options,
            granted_access: desired_access,
            file_attributes,
            security_descriptor: security_descriptor.as_deref(),
            allocation_size,
        };

        match self.fs.create(&request) {
            Ok((context, info)) => {
                let handle = self.alloc_handle(context, file_name.to_string(), is_directory);
                let mut body = handle.to_le_bytes().to_vec();
                body.extend(Self::file_info_body(&info));
                push_response(out, hint, header.kind, NtStatus::SUCCESS, security::FILE_CREATED, &body);
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn open_existing_file(
        &self,
        hint: u64,
        header: &RequestHeader,
        file_name: &str,
        create_options: CreateOptions,
        access: security::AccessCheckResult,
        out: &mut Vec<u8>,
    ) -> NtStatus {
        let is_directory = access.file_attributes & security::FILE_ATTRIBUTE_DIRECTORY != 0;
        match self.fs.open(file_name, create_options, access.granted_access) {
            Ok((context, info)) => {
                let handle = self.alloc_handle(context, file_name.to_string(), is_directory);
                let mut body = handle.to_le_bytes().to_vec();
                body.extend(Self::file_info_body(&info));
                push_response(out, hint, header.kind, NtStatus::SUCCESS, security::FILE_OPENED, &body);
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn overwrite_existing_file(
        &self,
        hint: u64,
        header: &RequestHeader,
        file_name: &str,
        file_attributes: u32,
        allocation_size: u64,
        disposition: Disposition,
        desired_access: crate::access_mask::AccessMask,
        access: security::AccessCheckResult,
        out: &mut Vec<u8>,
    ) -> NtStatus {
        let is_directory = access.file_attributes & security::FILE_ATTRIBUTE_DIRECTORY != 0;
        // DELETE was folded into the probe above to authorize the
        // overwrite; strip it back off the grant unless the caller asked
        // for it directly.
        let mut granted = access.granted_access;
        if !desired_access.contains(crate::access_mask::AccessMask::DELETE) {
            granted.remove(crate::access_mask::AccessMask::DELETE);
        }
        let context = match self.fs.open(file_name, CreateOptions::empty(), granted) {
            Ok((context, _)) => context,
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                return status;
            }
        };
        let replace_attributes = matches!(disposition, Disposition::Supersede);
        let information = if replace_attributes { security::FILE_SUPERSEDED } else { security::FILE_OVERWRITTEN };
        match self.fs.overwrite(&context, file_attributes, replace_attributes, allocation_size) {
            Ok(info) => {
                let handle = self.alloc_handle(context, file_name.to_string(), is_directory);
                let mut body = handle.to_le_bytes().to_vec();
                body.extend(Self::file_info_body(&info));
                push_response(out, hint, header.kind, NtStatus::SUCCESS, information, &body);
                NtStatus::SUCCESS
            }
            Err(status) => {
                self.fs.close(context);
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn with_handle<R>(&self, handle: u64, f: impl FnOnce(&OpenFile<F::FileContext>) -> R) -> Option<R> {
        self.handles.read().get(&handle).map(f)
    }

    fn handle_cleanup(&self, hint: u64, header: &RequestHeader, handle: u64, file_name: &str, delete: bool, out: &mut Vec<u8>) -> NtStatus {
        let found = self.with_handle(handle, |open| {
            self.fs.cleanup(&open.context, file_name, delete);
        });
        let status = if found.is_some() { NtStatus::SUCCESS } else { NtStatus::INVALID_DEVICE_REQUEST };
        push_response(out, hint, header.kind, status, 0, &[]);
        status
    }

    fn handle_close(&self, hint: u64, header: &RequestHeader, handle: u64, out: &mut Vec<u8>) -> NtStatus {
        if let Some(open) = self.handles.write().remove(&handle) {
            self.fs.close(open.context);
        }
        push_response(out, hint, header.kind, NtStatus::SUCCESS, 0, &[]);
        NtStatus::SUCCESS
    }

    fn handle_read(&self, hint: u64, header: &RequestHeader, handle: u64, offset: u64, length: u32, out: &mut Vec<u8>) -> NtStatus {
        const MAX_READ_LEN: usize = codec::MAX_RESPONSE_RECORD_SIZE - codec::HEADER_LEN;
        if length as usize > MAX_READ_LEN {
            push_response(out, hint, header.kind, NtStatus::INVALID_PARAMETER, 0, &[]);
            return NtStatus::INVALID_PARAMETER;
        }
        let handles = self.handles.read();
        let Some(open) = handles.get(&handle) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };
        let mut buffer = vec![0u8; length as usize];
        match self.fs.read(&open.context, &mut buffer, offset) {
            Ok(n) => {
                buffer.truncate(n as usize);
                push_response(out, hint, header.kind, NtStatus::SUCCESS, n as u64, &buffer);
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn handle_write(&self, hint: u64, header: &RequestHeader, handle: u64, offset: u64, write_to_end: bool, constrained: bool, data: &[u8], out: &mut Vec<u8>) -> NtStatus {
        let handles = self.handles.read();
        let Some(open) = handles.get(&handle) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };
        match self.fs.write(&open.context, data, offset, write_to_end, constrained) {
            Ok((n, info)) => {
                let body = Self::file_info_body(&info);
                push_response(out, hint, header.kind, NtStatus::SUCCESS, n as u64, &body);
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn handle_flush(&self, hint: u64, header: &RequestHeader, handle: Option<u64>, out: &mut Vec<u8>) -> NtStatus {
        let handles = self.handles.read();
        let ctx = handle.and_then(|h| handles.get(&h)).map(|o| &o.context);
        match self.fs.flush(ctx) {
            Ok(info) => {
                push_response(out, hint, header.kind, NtStatus::SUCCESS, 0, &Self::file_info_body(&info));
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn handle_query_information(&self, hint: u64, header: &RequestHeader, handle: u64, out: &mut Vec<u8>) -> NtStatus {
        let handles = self.handles.read();
        let Some(open) = handles.get(&handle) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };
        match self.fs.get_file_info(&open.context) {
            Ok(info) => {
                push_response(out, hint, header.kind, NtStatus::SUCCESS, 0, &Self::file_info_body(&info));
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }

    fn handle_query_directory(&self, hint: u64, header: &RequestHeader, handle: u64, pattern: Option<&str>, marker: Option<&str>, reset: bool, max_bytes: usize, out: &mut Vec<u8>) -> NtStatus {
        let handles = self.handles.read();
        let Some(open) = handles.get(&handle) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };

        if reset || marker.is_none() {
            let entries = match self.fs.read_directory(&open.context, pattern) {
                Ok(e) => e,
                Err(status) => {
                    push_response(out, hint, header.kind, status, 0, &[]);
                    return status;
                }
            };
            let mut writer = open.dirbuf.acquire(reset);
            for DirectoryEntry { file_name, file_info } in entries {
                writer.fill(crate::dirbuf::DirEntry { file_name, file_info });
            }
            writer.release();
        }

        let mut body = Vec::new();
        let mut remaining = max_bytes;
        open.dirbuf.read(marker, |entry| {
            let name_bytes = entry.file_name.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<u8>>();
            let record_len = 12 + name_bytes.len();
            if record_len > remaining {
                return false;
            }
            remaining -= record_len;
            body.extend_from_slice(&Self::file_info_body(&entry.file_info)[..12]);
            body.extend_from_slice(&name_bytes);
            true
        });

        let status = if body.is_empty() && marker.is_some() {
            NtStatus::NO_MORE_FILES
        } else {
            NtStatus::SUCCESS
        };
        push_response(out, hint, header.kind, status, 0, &body);
        status
    }

    fn handle_set_security(&self, hint: u64, header: &RequestHeader, handle: u64, info: SecurityInformation, descriptor: &[u8], out: &mut Vec<u8>) -> NtStatus {
        let handles = self.handles.read();
        let Some(open) = handles.get(&handle) else {
            push_response(out, hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };
        match self.fs.set_security(&open.context, info, descriptor) {
            Ok(()) => {
                push_response(out, hint, header.kind, NtStatus::SUCCESS, 0, &[]);
                NtStatus::SUCCESS
            }
            Err(status) => {
                push_response(out, hint, header.kind, status, 0, &[]);
                status
            }
        }
    }
}

impl<F, A, S> OperationTable for FileSystemHost<F, A, S>
where
    F: Filesystem + SecurityProvider,
    A: AccessChecker + Send + Sync + 'static,
    S: PrivateObjectSecurity + Send + Sync + 'static,
{
    fn dispatch(&self, request: &RawRequest<'_>, out: &mut Vec<u8>) -> NtStatus {
        let Some((header, file_name, body_start)) = decode_header(request.bytes) else {
            return NtStatus::INVALID_PARAMETER;
        };
        let file_name: &str = &file_name;
        let rest = request.bytes.get(body_start..).unwrap_or(&[]);

        let Ok(kind) = Kind::try_from(request.kind) else {
            push_response(out, request.hint, request.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
            return NtStatus::INVALID_DEVICE_REQUEST;
        };

        match kind {
            Kind::Create => self.handle_create(request.hint, &header, file_name, rest, out),
            Kind::Cleanup => {
                if rest.len() < 9 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let delete = rest[8] != 0;
                self.handle_cleanup(request.hint, &header, handle, file_name, delete, out)
            }
            Kind::Close => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                self.handle_close(request.hint, &header, handle, out)
            }
            Kind::Read => {
                if rest.len() < 20 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let offset = u64::from_le_bytes(rest[8..16].try_into().unwrap());
                let length = u32::from_le_bytes(rest[16..20].try_into().unwrap());
                self.handle_read(request.hint, &header, handle, offset, length, out)
            }
            Kind::Write => {
                if rest.len() < 18 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let offset = u64::from_le_bytes(rest[8..16].try_into().unwrap());
                let write_to_end = rest[16] != 0;
                let constrained = rest[17] != 0;
                let data = &rest[18..];
                self.handle_write(request.hint, &header, handle, offset, write_to_end, constrained, data, out)
            }
            Kind::Flush => {
                let handle = if rest.len() >= 8 {
                    Some(u64::from_le_bytes(rest[0..8].try_into().unwrap()))
                } else {
                    None
                };
                self.handle_flush(request.hint, &header, handle, out)
            }
            Kind::QueryInformation => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                self.handle_query_information(request.hint, &header, handle, out)
            }
            Kind::SetInformation => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                let result = if rest.len() >= 9 && rest[8] == 1 {
                    // Rename sub-operation: payload is the new name as UTF-16.
                    let new_name_bytes = &rest[9..];
                    let wide: Vec<u16> = new_name_bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
                    let new_file_name = String::from_utf16_lossy(&wide);
                    self.fs
                        .rename(&open.context, &open.file_name, &RenameInfo { new_file_name: &new_file_name, replace_if_exists: false })
                        .map(|_| FileInfo::default())
                } else {
                    self.fs.set_basic_info(
                        &open.context,
                        &SetBasicInfo {
                            file_attributes: None,
                            creation_time: None,
                            last_access_time: None,
                            last_write_time: None,
                            change_time: None,
                        },
                    )
                };
                match result {
                    Ok(info) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &Self::file_info_body(&info));
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
            Kind::QueryDirectory => {
                if rest.len() < 10 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let reset = rest[8] != 0;
                let max_bytes = u8::MAX as usize * (rest[9] as usize + 1);
                let pattern = if file_name.is_empty() { None } else { Some(file_name) };
                self.handle_query_directory(request.hint, &header, handle, pattern, None, reset, max_bytes.max(4096), out)
            }
            Kind::QueryVolumeInformation => match self.fs.get_volume_info() {
                Ok(info) => {
                    let mut body = Vec::new();
                    body.extend_from_slice(&info.total_size.to_le_bytes());
                    body.extend_from_slice(&info.free_size.to_le_bytes());
                    let label: Vec<u8> = info.volume_label.encode_utf16().flat_map(u16::to_le_bytes).collect();
                    body.extend_from_slice(&label);
                    push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &body);
                    NtStatus::SUCCESS
                }
                Err(status) => {
                    push_response(out, request.hint, header.kind, status, 0, &[]);
                    status
                }
            },
            Kind::SetVolumeInformation => match self.fs.set_volume_label(file_name) {
                Ok(_) => {
                    push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &[]);
                    NtStatus::SUCCESS
                }
                Err(status) => {
                    push_response(out, request.hint, header.kind, status, 0, &[]);
                    status
                }
            },
            Kind::QuerySecurity | Kind::QuerySecurityByName => {
                let handle = if rest.len() >= 8 {
                    u64::from_le_bytes(rest[0..8].try_into().unwrap())
                } else {
                    0
                };
                let handles = self.handles.read();
                match handles.get(&handle).map(|o| self.fs.get_security(&o.context)) {
                    Some(Ok(sd)) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &sd);
                        NtStatus::SUCCESS
                    }
                    Some(Err(status)) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                    None => {
                        push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                        NtStatus::INVALID_DEVICE_REQUEST
                    }
                }
            }
            Kind::SetSecurity => {
                if rest.len() < 12 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let info = SecurityInformation::from_bits_truncate(u32::from_le_bytes(rest[8..12].try_into().unwrap()));
                self.handle_set_security(request.hint, &header, handle, info, &rest[12..], out)
            }
            Kind::GetReparsePoint => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                match handles.get(&handle).map(|o| self.fs.get_reparse_point(&o.context, file_name)) {
                    Some(Ok(buf)) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &buf);
                        NtStatus::SUCCESS
                    }
                    Some(Err(status)) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                    None => {
                        push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                        NtStatus::INVALID_DEVICE_REQUEST
                    }
                }
            }
            Kind::SetReparsePoint => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                match self.fs.set_reparse_point(&open.context, file_name, &rest[8..]) {
                    Ok(()) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &[]);
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
            Kind::DeleteReparsePoint => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                match self.fs.delete_reparse_point(&open.context, file_name, &rest[8..]) {
                    Ok(()) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &[]);
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
            Kind::GetDirInfoByName => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                match self.fs.get_dir_info_by_name(&open.context, file_name) {
                    Ok((name, info)) => {
                        let mut body = Self::file_info_body(&info);
                        body.extend(name.encode_utf16().flat_map(u16::to_le_bytes));
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &body);
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
            Kind::Overwrite => {
                if rest.len() < 17 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let attrs = u32::from_le_bytes(rest[8..12].try_into().unwrap());
                let replace = rest[12] != 0;
                let alloc = u64::from_le_bytes(rest[9..17].try_into().unwrap_or_default());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                match self.fs.overwrite(&open.context, attrs, replace, alloc) {
                    Ok(info) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &Self::file_info_body(&info));
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
            Kind::QueryEa => {
                let handle = if rest.len() >= 8 {
                    u64::from_le_bytes(rest[0..8].try_into().unwrap())
                } else {
                    0
                };
                let handles = self.handles.read();
                match handles.get(&handle).map(|o| self.fs.get_ea(&o.context)) {
                    Some(Ok(ea)) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &ea);
                        NtStatus::SUCCESS
                    }
                    Some(Err(status)) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                    None => {
                        push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                        NtStatus::INVALID_DEVICE_REQUEST
                    }
                }
            }
            Kind::SetEa => {
                if rest.len() < 8 {
                    return NtStatus::INVALID_PARAMETER;
                }
                let handle = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let handles = self.handles.read();
                let Some(open) = handles.get(&handle) else {
                    push_response(out, request.hint, header.kind, NtStatus::INVALID_DEVICE_REQUEST, 0, &[]);
                    return NtStatus::INVALID_DEVICE_REQUEST;
                };
                match self.fs.set_ea(&open.context, &rest[8..]) {
                    Ok(info) => {
                        push_response(out, request.hint, header.kind, NtStatus::SUCCESS, 0, &Self::file_info_body(&info));
                        NtStatus::SUCCESS
                    }
                    Err(status) => {
                        push_response(out, request.hint, header.kind, status, 0, &[]);
                        status
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access_mask::AccessMask;
    use crate::ops::{CreateRequest, FileInfo};
    use crate::security::SecurityInfo;
    use std::sync::Mutex;

    struct MemFs {
        files: Mutex<HashMap<String, FileInfo>>,
    }

    impl SecurityProvider for MemFs {
        fn get_security_by_name(&self, path: &str) -> Result<SecurityInfo> {
            if path == "\\" {
                return Ok(SecurityInfo {
                    file_attributes: security::FILE_ATTRIBUTE_DIRECTORY,
                    security_descriptor: Vec::new(),
                });
            }
            self.files.lock().unwrap().get(path).map(|_| SecurityInfo::default()).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)
        }
    }

    impl Filesystem for MemFs {
        type FileContext = String;

        fn create(&self, request: &CreateRequest<'_>) -> Result<(String, FileInfo)> {
            let info = FileInfo {
                file_attributes: request.file_attributes,
                ..Default::default()
            };
            self.files.lock().unwrap().insert(request.file_name.to_string(), info);
            Ok((request.file_name.to_string(), info))
        }

        fn open(&self, file_name: &str, _create_options: CreateOptions, _granted_access: AccessMask) -> Result<(String, FileInfo)> {
            let info = self.files.lock().unwrap().get(file_name).copied().ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
            Ok((file_name.to_string(), info))
        }

        fn overwrite(&self, context: &String, file_attributes: u32, _replace_attributes: bool, _allocation_size: u64) -> Result<FileInfo> {
            let mut files = self.files.lock().unwrap();
            let info = files.get_mut(context).ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
            info.file_attributes = file_attributes;
            Ok(*info)
        }

        fn get_file_info(&self, context: &String) -> Result<FileInfo> {
            self.files.lock().unwrap().get(context).copied().ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)
        }
    }

    struct AllowAll;
    impl AccessChecker for AllowAll {
        fn check(&self, _sd: &[u8], _token: u64, desired: AccessMask) -> Result<AccessMask> {
            Ok(desired)
        }
    }

    struct NoSecurity;
    impl PrivateObjectSecurity for NoSecurity {
        fn create(&self, _parent: Option<&[u8]>, _input: Option<&[u8]>, _is_dir: bool, _token: u64) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn set(&self, _info: SecurityInformation, _object: &[u8], input: Vec<u8>, _token: u64) -> Result<Vec<u8>> {
            Ok(input)
        }
    }

    const DISPOSITION_SUPERSEDE: u32 = 0;
    const DISPOSITION_OPEN: u32 = 1;
    const DISPOSITION_CREATE: u32 = 2;
    const DISPOSITION_OPEN_IF: u32 = 3;
    const DISPOSITION_OVERWRITE: u32 = 4;
    const DISPOSITION_OVERWRITE_IF: u32 = 5;

    fn create_request_bytes(file_name: &str, disposition: u32) -> Vec<u8> {
        let name_wide: Vec<u8> = file_name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let header_len = codec::HEADER_LEN;
        let mut body = Vec::new();
        body.extend_from_slice(&(disposition << 24).to_le_bytes()); // create_options (disposition in top byte)
        body.extend_from_slice(&0u32.to_le_bytes()); // desired access
        body.extend_from_slice(&0u32.to_le_bytes()); // file_attributes
        body.extend_from_slice(&0u64.to_le_bytes()); // allocation_size
        let total = header_len + name_wide.len() + body.len();
        let mut bytes = vec![0u8; codec::align_up(total)];
        bytes[0..2].copy_from_slice(&(total as u16).to_le_bytes());
        bytes[4..8].copy_from_slice(&(Kind::Create as u32).to_le_bytes());
        bytes[8..16].copy_from_slice(&1u64.to_le_bytes());
        bytes[16..18].copy_from_slice(&(header_len as u16).to_le_bytes());
        bytes[18..20].copy_from_slice(&(name_wide.len() as u16).to_le_bytes());
        bytes[header_len..header_len + name_wide.len()].copy_from_slice(&name_wide);
        bytes[header_len + name_wide.len()..total].copy_from_slice(&body);
        bytes
    }

    fn dispatch_create(host: &FileSystemHost<MemFs, AllowAll, NoSecurity>, file_name: &str, disposition: u32) -> (NtStatus, Vec<u8>) {
        let bytes = create_request_bytes(file_name, disposition);
        let request = RawRequest {
            kind: Kind::Create as u32,
            hint: 1,
            bytes: &bytes,
        };
        let mut out = Vec::new();
        let status = host.dispatch(&request, &mut out);
        (status, out)
    }

    fn response_information(out: &[u8]) -> u64 {
        use zerocopy::FromBytes;
        ResponseHeader::read_from_prefix(out).unwrap().0.io_status.information
    }

    #[test]
    fn create_then_query_information_round_trips_through_the_wire() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (status, out) = dispatch_create(&host, "\\hello.txt", DISPOSITION_CREATE);
        assert_eq!(status, NtStatus::SUCCESS);
        assert_eq!(response_information(&out), security::FILE_CREATED);
        assert_eq!(host.handles.read().len(), 1);
    }

    #[test]
    fn create_on_an_existing_leaf_reports_a_name_collision() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (first, _) = dispatch_create(&host, "\\hello.txt", DISPOSITION_CREATE);
        assert_eq!(first, NtStatus::SUCCESS);

        let (second, _) = dispatch_create(&host, "\\hello.txt", DISPOSITION_CREATE);
        assert_eq!(second, NtStatus::OBJECT_NAME_COLLISION);
        assert_eq!(host.handles.read().len(), 1);
    }

    #[test]
    fn open_on_a_missing_leaf_reports_name_not_found() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (status, _) = dispatch_create(&host, "\\missing.txt", DISPOSITION_OPEN);
        assert_eq!(status, NtStatus::OBJECT_NAME_NOT_FOUND);
        assert_eq!(host.handles.read().len(), 0);
    }

    #[test]
    fn open_if_opens_an_existing_leaf_and_creates_a_missing_one() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (created, created_out) = dispatch_create(&host, "\\a.txt", DISPOSITION_OPEN_IF);
        assert_eq!(created, NtStatus::SUCCESS);
        assert_eq!(response_information(&created_out), security::FILE_CREATED);

        let (opened, opened_out) = dispatch_create(&host, "\\a.txt", DISPOSITION_OPEN_IF);
        assert_eq!(opened, NtStatus::SUCCESS);
        assert_eq!(response_information(&opened_out), security::FILE_OPENED);
        assert_eq!(host.handles.read().len(), 2);
    }

    #[test]
    fn overwrite_if_overwrites_an_existing_leaf_and_creates_a_missing_one() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (created, created_out) = dispatch_create(&host, "\\b.txt", DISPOSITION_OVERWRITE_IF);
        assert_eq!(created, NtStatus::SUCCESS);
        assert_eq!(response_information(&created_out), security::FILE_CREATED);

        let (overwritten, overwritten_out) = dispatch_create(&host, "\\b.txt", DISPOSITION_OVERWRITE_IF);
        assert_eq!(overwritten, NtStatus::SUCCESS);
        assert_eq!(response_information(&overwritten_out), security::FILE_OVERWRITTEN);
        assert_eq!(host.handles.read().len(), 2);
    }

    #[test]
    fn overwrite_on_a_missing_leaf_reports_name_not_found() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (status, _) = dispatch_create(&host, "\\missing.txt", DISPOSITION_OVERWRITE);
        assert_eq!(status, NtStatus::OBJECT_NAME_NOT_FOUND);
    }

    #[test]
    fn supersede_on_an_existing_leaf_reports_file_superseded() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (created, _) = dispatch_create(&host, "\\c.txt", DISPOSITION_CREATE);
        assert_eq!(created, NtStatus::SUCCESS);

        let (superseded, out) = dispatch_create(&host, "\\c.txt", DISPOSITION_SUPERSEDE);
        assert_eq!(superseded, NtStatus::SUCCESS);
        assert_eq!(response_information(&out), security::FILE_SUPERSEDED);
    }

    #[test]
    fn a_response_too_large_for_the_wire_is_replaced_with_invalid_device_request() {
        let mut out = Vec::new();
        let body = vec![0u8; codec::MAX_RESPONSE_RECORD_SIZE];
        push_response(&mut out, 42, Kind::Read as u32, NtStatus::SUCCESS, 7, &body);

        use zerocopy::FromBytes;
        let header = ResponseHeader::read_from_prefix(&out).unwrap().0;
        assert_eq!(header.io_status.status, NtStatus::INVALID_DEVICE_REQUEST.wire_value());
        assert_eq!(header.io_status.information, 0);
        assert_eq!(header.hint, 42);
        assert_eq!(header.size as usize, codec::HEADER_LEN);
    }

    #[test]
    fn read_rejects_a_length_that_would_overflow_the_response_record() {
        let fs = MemFs { files: Mutex::new(HashMap::new()) };
        let host = FileSystemHost::new(fs, AllowAll, NoSecurity, VolumeParams::new());

        let (status, _) = dispatch_create(&host, "\\big.txt", DISPOSITION_CREATE);
        assert_eq!(status, NtStatus::SUCCESS);

        let mut body = Vec::new();
        body.extend_from_slice(&1u64.to_le_bytes()); // handle
        body.extend_from_slice(&0u64.to_le_bytes()); // offset
        body.extend_from_slice(&(u32::MAX).to_le_bytes()); // length
        let header_len = codec::HEADER_LEN;
        let total = header_len + body.len();
        let mut bytes = vec![0u8; codec::align_up(total)];
        bytes[0..2].copy_from_slice(&(total as u16).to_le_bytes());
        bytes[4..8].copy_from_slice(&(Kind::Read as u32).to_le_bytes());
        bytes[8..16].copy_from_slice(&2u64.to_le_bytes());
        bytes[header_len..total].copy_from_slice(&body);

        let request = RawRequest {
            kind: Kind::Read as u32,
            hint: 2,
            bytes: &bytes,
        };
        let mut out = Vec::new();
        let status = host.dispatch(&request, &mut out);
        assert_eq!(status, NtStatus::INVALID_PARAMETER);
    }
}
