//! Volume parameters and mount configuration.
//!
//! `VolumeParams` is the immutable, creation-time configuration a file
//! system hands to [`crate::host::FileSystemHost::new`] — sector
//! geometry, the volume's identity, and the feature-flag bits WinFSP reports
//! to the kernel driver before the first request ever arrives. Grounded on
//! the `FSP_FSCTL_VOLUME_PARAMS` fluent builder in the `winfsp_wrs`
//! `file_system.rs` reference (the `VolumeParams::set_*` chain) and on
//! `src/dll/fsop.c`'s interpretation of those same bits.

use std::time::{SystemTime, UNIX_EPOCH};

/// Whether the kernel hands a file system's context back as an opaque
/// 64-bit value (`Node`) or expects it to additionally carry a
/// per-open-instance descriptor (`Descriptor`). Mirrors `winfsp_wrs`'s
/// `FileContextMode`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum FileContextMode {
    #[default]
    Node,
    Descriptor,
}

/// Whether WinFSP serializes operations per-file (`Fine`, the default — the
/// file system itself must be internally thread-safe) or takes a single
/// coarse lock around the whole dispatch (`Coarse` — appropriate for a file
/// system that keeps no locks of its own).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum OperationGuardStrategy {
    #[default]
    Fine,
    Coarse,
}

/// Disk-backed (`\Device\WinFsp.Disk`) or network-backed
/// (`\Device\WinFsp.Net`) volume. Determines which kernel device the
/// transact channel opens.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    Disk,
    Net,
}

/// Builder for the parameters reported to the kernel driver at mount time.
///
/// Every `set_*` method returns `&mut Self` so a file system assembles its
/// parameters in one fluent chain, the way the `winfsp_wrs` wrapper's
/// `VolumeParams` does, rather than a struct-literal-with-`..Default::default()`
/// idiom (the number of fields here — geometry, timeouts, and a dozen
/// feature bits — reads better as a chain than as a literal).
#[derive(Clone, Debug)]
pub struct VolumeParams {
    pub(crate) device_kind: DeviceKind,
    pub(crate) sector_size: u16,
    pub(crate) sectors_per_allocation_unit: u16,
    pub(crate) max_component_length: u16,
    pub(crate) volume_creation_time: u64,
    pub(crate) volume_serial_number: u32,
    pub(crate) transact_timeout_ms: u32,
    pub(crate) irp_timeout_ms: u32,
    pub(crate) irp_capacity: u32,
    pub(crate) file_info_timeout_ms: u32,
    pub(crate) prefix: String,
    pub(crate) file_system_name: String,

    pub(crate) case_sensitive_search: bool,
    pub(crate) case_preserved_names: bool,
    pub(crate) unicode_on_disk: bool,
    pub(crate) persistent_acls: bool,
    pub(crate) reparse_points: bool,
    pub(crate) reparse_point_access_check: bool,
    pub(crate) named_streams: bool,
    pub(crate) hard_links: bool,
    pub(crate) extended_attributes: bool,
    pub(crate) read_only_volume: bool,
    pub(crate) post_cleanup_when_modified_only: bool,
    pub(crate) flush_and_purge_on_cleanup: bool,
    pub(crate) pass_query_directory_pattern: bool,
    pub(crate) pass_query_directory_file_name: bool,
    pub(crate) allow_open_in_kernel_mode: bool,
    pub(crate) supports_posix_unlink_rename: bool,
    pub(crate) directory_marker_as_next_offset: bool,
    pub(crate) file_context_mode: FileContextMode,
}

/// `100ns`-ticks-since-1601 conversion used by `volume_creation_time`'s
/// default and by every `FILETIME`-shaped timestamp the runtime reports.
pub fn unix_time_to_filetime(t: SystemTime) -> u64 {
    const EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;
    let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    EPOCH_DIFF_100NS + since_unix.as_secs() * 10_000_000 + u64::from(since_unix.subsec_nanos() / 100)
}

impl Default for VolumeParams {
    fn default() -> Self {
        VolumeParams {
            device_kind: DeviceKind::Disk,
            sector_size: 4096,
            sectors_per_allocation_unit: 1,
            max_component_length: 255,
            volume_creation_time: unix_time_to_filetime(SystemTime::now()),
            volume_serial_number: 0,
            transact_timeout_ms: 1000,
            irp_timeout_ms: 60_000,
            irp_capacity: 1000,
            file_info_timeout_ms: 1000,
            prefix: String::new(),
            file_system_name: String::new(),
            case_sensitive_search: false,
            case_preserved_names: true,
            unicode_on_disk: true,
            persistent_acls: false,
            reparse_points: false,
            reparse_point_access_check: true,
            named_streams: false,
            hard_links: false,
            extended_attributes: false,
            read_only_volume: false,
            post_cleanup_when_modified_only: false,
            flush_and_purge_on_cleanup: false,
            pass_query_directory_pattern: false,
            pass_query_directory_file_name: false,
            allow_open_in_kernel_mode: false,
            supports_posix_unlink_rename: false,
            directory_marker_as_next_offset: false,
            file_context_mode: FileContextMode::Node,
        }
    }
}

impl VolumeParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_kind(&mut self, v: DeviceKind) -> &mut Self {
        self.device_kind = v;
        self
    }
    pub fn set_sector_size(&mut self, v: u16) -> &mut Self {
        self.sector_size = v;
        self
    }
    pub fn set_sectors_per_allocation_unit(&mut self, v: u16) -> &mut Self {
        self.sectors_per_allocation_unit = v;
        self
    }
    pub fn set_max_component_length(&mut self, v: u16) -> &mut Self {
        self.max_component_length = v;
        self
    }
    pub fn set_volume_creation_time(&mut self, v: u64) -> &mut Self {
        self.volume_creation_time = v;
        self
    }
    pub fn set_volume_serial_number(&mut self, v: u32) -> &mut Self {
        self.volume_serial_number = v;
        self
    }
    pub fn set_transact_timeout(&mut self, ms: u32) -> &mut Self {
        self.transact_timeout_ms = ms;
        self
    }
    pub fn set_irp_timeout(&mut self, ms: u32) -> &mut Self {
        self.irp_timeout_ms = ms;
        self
    }
    pub fn set_irp_capacity(&mut self, v: u32) -> &mut Self {
        self.irp_capacity = v;
        self
    }
    pub fn set_file_info_timeout(&mut self, ms: u32) -> &mut Self {
        self.file_info_timeout_ms = ms;
        self
    }
    pub fn set_prefix(&mut self, v: impl Into<String>) -> &mut Self {
        self.prefix = v.into();
        self
    }
    pub fn set_file_system_name(&mut self, v: impl Into<String>) -> &mut Self {
        self.file_system_name = v.into();
        self
    }
    pub fn set_case_sensitive_search(&mut self, v: bool) -> &mut Self {
        self.case_sensitive_search = v;
        self
    }
    pub fn set_case_preserved_names(&mut self, v: bool) -> &mut Self {
        self.case_preserved_names = v;
        self
    }
    pub fn set_unicode_on_disk(&mut self, v: bool) -> &mut Self {
        self.unicode_on_disk = v;
        self
    }
    pub fn set_persistent_acls(&mut self, v: bool) -> &mut Self {
        self.persistent_acls = v;
        self
    }
    pub fn set_reparse_points(&mut self, v: bool) -> &mut Self {
        self.reparse_points = v;
        self
    }
    pub fn set_reparse_point_access_check(&mut self, v: bool) -> &mut Self {
        self.reparse_point_access_check = v;
        self
    }
    pub fn set_named_streams(&mut self, v: bool) -> &mut Self {
        self.named_streams = v;
        self
    }
    pub fn set_hard_links(&mut self, v: bool) -> &mut Self {
        self.hard_links = v;
        self
    }
    pub fn set_extended_attributes(&mut self, v: bool) -> &mut Self {
        self.extended_attributes = v;
        self
    }
    pub fn set_read_only_volume(&mut self, v: bool) -> &mut Self {
        self.read_only_volume = v;
        self
    }
    pub fn set_post_cleanup_when_modified_only(&mut self, v: bool) -> &mut Self {
        self.post_cleanup_when_modified_only = v;
        self
    }
    pub fn set_flush_and_purge_on_cleanup(&mut self, v: bool) -> &mut Self {
        self.flush_and_purge_on_cleanup = v;
        self
    }
    pub fn set_pass_query_directory_pattern(&mut self, v: bool) -> &mut Self {
        self.pass_query_directory_pattern = v;
        self
    }
    pub fn set_pass_query_directory_file_name(&mut self, v: bool) -> &mut Self {
        self.pass_query_directory_file_name = v;
        self
    }
    pub fn set_allow_open_in_kernel_mode(&mut self, v: bool) -> &mut Self {
        self.allow_open_in_kernel_mode = v;
        self
    }
    pub fn set_supports_posix_unlink_rename(&mut self, v: bool) -> &mut Self {
        self.supports_posix_unlink_rename = v;
        self
    }
    pub fn set_directory_marker_as_next_offset(&mut self, v: bool) -> &mut Self {
        self.directory_marker_as_next_offset = v;
        self
    }
    pub fn set_file_context_mode(&mut self, v: FileContextMode) -> &mut Self {
        self.file_context_mode = v;
        self
    }

    pub fn max_component_length(&self) -> u16 {
        self.max_component_length
    }

    pub fn read_only_volume(&self) -> bool {
        self.read_only_volume
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_a_sane_read_write_disk_volume() {
        let p = VolumeParams::new();
        assert_eq!(p.device_kind, DeviceKind::Disk);
        assert!(!p.read_only_volume());
        assert_eq!(p.max_component_length(), 255);
    }

    #[test]
    fn fluent_chain_mutates_in_place_and_returns_self() {
        let mut p = VolumeParams::new();
        p.set_sector_size(512)
            .set_reparse_points(true)
            .set_named_streams(true)
            .set_file_system_name("WINFSPCORE");
        assert_eq!(p.sector_size, 512);
        assert!(p.reparse_points);
        assert!(p.named_streams);
        assert_eq!(p.file_system_name, "WINFSPCORE");
    }

    #[test]
    fn filetime_conversion_matches_the_known_epoch_offset() {
        let ft = unix_time_to_filetime(UNIX_EPOCH);
        assert_eq!(ft, 116_444_736_000_000_000);
    }
}
