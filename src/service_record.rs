//! Registry-backed service record codec.
//!
//! A flat on-disk schema: one registry key per service class, one value
//! per field. Grounded on `src/dll/launch.c`'s `FspLaunchRegSetRecord`/
//! `FspLaunchRegGetRecord` (the `SETFIELD`/`SETFIELDI`/`GETFIELD`/
//! `GETFIELDI` macros) and the registry layout documented in
//! `inc/winfsp/launch.h`.

use crate::error::{NtStatus, Result};

/// `~0u32`: on write, means "do not write this DWORD value at all" — this
/// is deliberately distinct from the read-time default of `1` for an
/// absent `JobControl` value (see DESIGN.md, Open Question #2). Preserved
/// verbatim rather than "fixed" into a symmetric default.
pub const JOB_CONTROL_DONT_WRITE: u32 = u32::MAX;

/// Fixed schema of a launcher service record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub agent: Option<String>,
    pub executable: Option<String>,
    pub command_line: Option<String>,
    pub work_directory: Option<String>,
    pub run_as: Option<String>,
    pub security: Option<String>,
    pub auth_package: Option<String>,
    pub stderr: Option<String>,
    pub job_control: u32,
    pub credentials: u32,
    pub auth_package_id: u32,
    pub recovery: u32,
}

impl ServiceRecord {
    /// A record with `JobControl` set to the write-time "don't write"
    /// sentinel and every other field at its on-disk default, ready to have
    /// individual fields overridden before being persisted.
    pub fn new_unset() -> Self {
        ServiceRecord {
            job_control: JOB_CONTROL_DONT_WRITE,
            ..Default::default()
        }
    }

    /// `Agent` is a comma-separated filter: a reader matches a record only
    /// if one of its own (comma-separated) agent names case-insensitively
    /// equals one of the entries here, or the record carries no `Agent` at
    /// all (an unconditional record).
    pub fn matches_agent(&self, reader_agents: &str) -> bool {
        let Some(record_agents) = &self.agent else {
            return true;
        };
        record_agents.split(',').any(|record_entry| {
            reader_agents
                .split(',')
                .any(|reader_entry| reader_entry.eq_ignore_ascii_case(record_entry.trim()))
        })
    }
}

/// Backing store abstraction over a registry key, so the codec logic can be
/// unit tested without touching the real registry.
pub trait RegistryKey {
    fn get_string(&self, name: &str) -> Option<String>;
    fn get_dword(&self, name: &str) -> Option<u32>;
    fn set_string(&mut self, name: &str, value: Option<&str>);
    fn set_dword(&mut self, name: &str, value: u32, dont_write_sentinel: Option<u32>);
}

/// Reads a [`ServiceRecord`] from `key`. Missing `Executable` is a
/// protocol error (`OBJECT_NAME_NOT_FOUND`), matching the reference
/// implementation; every other field has a default.
pub fn read_record(key: &dyn RegistryKey) -> Result<ServiceRecord> {
    let executable = key
        .get_string("Executable")
        .ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;

    Ok(ServiceRecord {
        agent: key.get_string("Agent"),
        executable: Some(executable),
        command_line: key.get_string("CommandLine"),
        work_directory: key.get_string("WorkDirectory"),
        run_as: key.get_string("RunAs"),
        security: key.get_string("Security"),
        auth_package: key.get_string("AuthPackage"),
        stderr: key.get_string("Stderr"),
        job_control: key.get_dword("JobControl").unwrap_or(1),
        credentials: key.get_dword("Credentials").unwrap_or(0),
        auth_package_id: key.get_dword("AuthPackageId").unwrap_or(0),
        recovery: key.get_dword("Recovery").unwrap_or(0),
    })
}

/// Writes `record` to `key`. A `None` string field deletes the
/// corresponding value rather than writing an empty string. A DWORD field
/// equal to its "don't write" sentinel is skipped rather than written;
/// `JobControl`'s sentinel is [`JOB_CONTROL_DONT_WRITE`], the others have
/// none (always written).
pub fn write_record(key: &mut dyn RegistryKey, record: &ServiceRecord) {
    key.set_string("Agent", record.agent.as_deref());
    key.set_string("Executable", record.executable.as_deref());
    key.set_string("CommandLine", record.command_line.as_deref());
    key.set_string("WorkDirectory", record.work_directory.as_deref());
    key.set_string("RunAs", record.run_as.as_deref());
    key.set_string("Security", record.security.as_deref());
    key.set_string("AuthPackage", record.auth_package.as_deref());
    key.set_string("Stderr", record.stderr.as_deref());
    key.set_dword("JobControl", record.job_control, Some(JOB_CONTROL_DONT_WRITE));
    key.set_dword("Credentials", record.credentials, None);
    key.set_dword("AuthPackageId", record.auth_package_id, None);
    key.set_dword("Recovery", record.recovery, None);
}

#[cfg(windows)]
pub mod win32 {
    //! Real registry backend, under `HKEY_LOCAL_MACHINE\<product>\Services\<class>`.
    use super::RegistryKey;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::ERROR_SUCCESS;
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegQueryValueExW, RegSetValueExW, HKEY,
        HKEY_LOCAL_MACHINE, KEY_READ, KEY_WRITE, REG_DWORD, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    pub const PRODUCT_REGKEY: &str = "Software\\WinFsp-Core\\Services";

    pub struct Win32RegistryKey {
        hkey: HKEY,
    }

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    impl Win32RegistryKey {
        pub fn open_or_create(class_name: &str) -> windows::core::Result<Self> {
            let subkey = format!("{PRODUCT_REGKEY}\\{class_name}");
            let subkey_w = wide(&subkey);
            let mut hkey = HKEY::default();
            unsafe {
                RegCreateKeyExW(
                    HKEY_LOCAL_MACHINE,
                    PCWSTR(subkey_w.as_ptr()),
                    0,
                    PCWSTR::null(),
                    REG_OPTION_NON_VOLATILE,
                    KEY_READ | KEY_WRITE,
                    None,
                    &mut hkey,
                    None,
                )
                .ok()?;
            }
            Ok(Win32RegistryKey { hkey })
        }
    }

    impl Drop for Win32RegistryKey {
        fn drop(&mut self) {
            unsafe {
                let _ = RegCloseKey(self.hkey);
            }
        }
    }

    impl RegistryKey for Win32RegistryKey {
        fn get_string(&self, name: &str) -> Option<String> {
            let name_w = wide(name);
            let mut buf = vec![0u16; 1024];
            let mut size = (buf.len() * 2) as u32;
            let mut value_type = REG_SZ.0;
            unsafe {
                let status = RegQueryValueExW(
                    self.hkey,
                    PCWSTR(name_w.as_ptr()),
                    None,
                    Some(&mut value_type),
                    Some(buf.as_mut_ptr() as *mut u8),
                    Some(&mut size),
                );
                if status != ERROR_SUCCESS {
                    return None;
                }
            }
            let words = (size as usize) / 2;
            let s = String::from_utf16_lossy(&buf[..words]);
            Some(s.trim_end_matches('\0').to_string())
        }

        fn get_dword(&self, name: &str) -> Option<u32> {
            let name_w = wide(name);
            let mut value: u32 = 0;
            let mut size = std::mem::size_of::<u32>() as u32;
            let mut value_type = REG_DWORD.0;
            unsafe {
                let status = RegQueryValueExW(
                    self.hkey,
                    PCWSTR(name_w.as_ptr()),
                    None,
                    Some(&mut value_type),
                    Some(&mut value as *mut u32 as *mut u8),
                    Some(&mut size),
                );
                if status != ERROR_SUCCESS {
                    return None;
                }
            }
            Some(value)
        }

        fn set_string(&mut self, name: &str, value: Option<&str>) {
            let name_w = wide(name);
            unsafe {
                match value {
                    None => {
                        let _ = RegDeleteValueW(self.hkey, PCWSTR(name_w.as_ptr()));
                    }
                    Some(v) => {
                        let value_w = wide(v);
                        let bytes = std::slice::from_raw_parts(
                            value_w.as_ptr() as *const u8,
                            value_w.len() * 2,
                        );
                        let _ = RegSetValueExW(self.hkey, PCWSTR(name_w.as_ptr()), 0, REG_SZ, Some(bytes));
                    }
                }
            }
        }

        fn set_dword(&mut self, name: &str, value: u32, dont_write_sentinel: Option<u32>) {
            let name_w = wide(name);
            if dont_write_sentinel == Some(value) {
                unsafe {
                    let _ = RegDeleteValueW(self.hkey, PCWSTR(name_w.as_ptr()));
                }
                return;
            }
            let bytes = value.to_le_bytes();
            unsafe {
                let _ = RegSetValueExW(self.hkey, PCWSTR(name_w.as_ptr()), 0, REG_DWORD, Some(&bytes));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeKey {
        strings: HashMap<String, String>,
        dwords: HashMap<String, u32>,
    }

    impl RegistryKey for FakeKey {
        fn get_string(&self, name: &str) -> Option<String> {
            self.strings.get(name).cloned()
        }
        fn get_dword(&self, name: &str) -> Option<u32> {
            self.dwords.get(name).copied()
        }
        fn set_string(&mut self, name: &str, value: Option<&str>) {
            match value {
                Some(v) => {
                    self.strings.insert(name.to_string(), v.to_string());
                }
                None => {
                    self.strings.remove(name);
                }
            }
        }
        fn set_dword(&mut self, name: &str, value: u32, dont_write_sentinel: Option<u32>) {
            if dont_write_sentinel == Some(value) {
                self.dwords.remove(name);
            } else {
                self.dwords.insert(name.to_string(), value);
            }
        }
    }

    #[test]
    fn missing_executable_is_an_error() {
        let key = FakeKey::default();
        assert_eq!(read_record(&key), Err(NtStatus::OBJECT_NAME_NOT_FOUND));
    }

    #[test]
    fn job_control_defaults_to_one_when_absent() {
        let mut key = FakeKey::default();
        key.set_string("Executable", Some("svc.exe"));
        let rec = read_record(&key).unwrap();
        assert_eq!(rec.job_control, 1);
    }

    #[test]
    fn job_control_sentinel_suppresses_the_write_but_read_still_defaults() {
        let mut key = FakeKey::default();
        let mut record = ServiceRecord::new_unset();
        record.executable = Some("svc.exe".to_string());
        write_record(&mut key, &record);
        assert!(!key.dwords.contains_key("JobControl"));
        let read_back = read_record(&key).unwrap();
        assert_eq!(read_back.job_control, 1);
    }

    #[test]
    fn agent_filter_is_case_insensitive_comma_separated() {
        let mut record = ServiceRecord::default();
        record.agent = Some("Foo, Bar".to_string());
        assert!(record.matches_agent("bar"));
        assert!(!record.matches_agent("baz"));
        let unconditional = ServiceRecord::default();
        assert!(unconditional.matches_agent("anything"));
    }
}
