//! File-name and stream-name validation.
//!
//! NTFS's legal character set excludes the path separator and the handful
//! of characters reserved for wildcard matching and the DOS device
//! namespace; this module enforces that, plus the component-length bound
//! the security pipeline relies on before it ever calls into the user
//! interface (catching a too-long component locally is cheaper than
//! round-tripping it through `GetSecurityByName`).

use crate::error::{NtStatus, Result};

/// Characters illegal anywhere in a single path component.
const ILLEGAL_NAME_CHARS: &[char] = &['<', '>', '"', '|', '?', '*', '\0'];

/// Additional characters illegal at the very start of a stream name
/// (everything after the first `:`); NTFS allows the stream-type suffix
/// (`:$DATA`) to contain `$`, so only the separator set above is checked
/// there too — streams share the file-name legality rules, they just live
/// past a `:`.
pub fn validate_file_name(name: &str, max_component_length: u16) -> Result<()> {
    if name.is_empty() {
        return Err(NtStatus::OBJECT_NAME_INVALID);
    }
    if name.encode_utf16().count() > max_component_length as usize {
        return Err(NtStatus::NAME_TOO_LONG);
    }
    if name.contains('\\') || name.contains('/') {
        return Err(NtStatus::OBJECT_NAME_INVALID);
    }
    if name.chars().any(|c| ILLEGAL_NAME_CHARS.contains(&c)) {
        return Err(NtStatus::OBJECT_NAME_INVALID);
    }
    if name == "." || name == ".." {
        return Err(NtStatus::OBJECT_NAME_INVALID);
    }
    // Trailing dot/space is legal in the wire protocol but is stripped by
    // Win32 long before it reaches here in the reference implementation;
    // the core itself does not special-case it.
    Ok(())
}

/// Splits `full_name` at its first `:` (if any) into the file-name part and
/// the stream-name part (without the colon), and validates the stream name
/// against the same legality rules minus the length bound (stream names
/// have their own, separate length limit the caller is expected to apply
/// if it cares).
pub fn split_and_validate_stream(full_name: &str, max_component_length: u16) -> Result<(&str, Option<&str>)> {
    match full_name.find(':') {
        None => {
            validate_file_name(full_name, max_component_length)?;
            Ok((full_name, None))
        }
        Some(idx) => {
            let (file_part, rest) = full_name.split_at(idx);
            let stream = &rest[1..];
            if !file_part.is_empty() {
                validate_file_name(file_part, max_component_length)?;
            }
            if stream.is_empty() {
                return Err(NtStatus::OBJECT_NAME_INVALID);
            }
            if stream.chars().any(|c| ILLEGAL_NAME_CHARS.contains(&c) && c != '$') {
                return Err(NtStatus::OBJECT_NAME_INVALID);
            }
            Ok((file_part, Some(stream)))
        }
    }
}
