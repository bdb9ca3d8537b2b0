//! Wire framing for the transact channel.
//!
//! Each record on the wire begins with its own 16-bit `Size` and is padded
//! up to 8-byte alignment when multiple records are concatenated in one
//! kernel call. `Hint` is an opaque 64-bit correlation token echoed from
//! request to response. Grounded on `src/dll/dispatch.c`'s
//! `FSP_FSCTL_DEFAULT_ALIGN_UP` padding and the request/response header
//! layout used by the kernel transact channel.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const ALIGNMENT: usize = 8;
pub const HEADER_LEN: usize = 16;
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;
pub const MAX_RESPONSE_BATCH_SIZE: usize = 1024 * 1024;

/// The largest single response record representable on the wire: `Size` is
/// a 16-bit field, so a record at or below this bound round-trips exactly,
/// and one above it would silently wrap when narrowed to `u16`. A handler
/// that would otherwise produce a larger record must substitute a minimal
/// rejection instead of building it.
pub const MAX_RESPONSE_RECORD_SIZE: usize = u16::MAX as usize;

pub const fn align_up(size: usize) -> usize {
    (size + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// Offset/size pair describing the `FileName` slice embedded in a request.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct NameRef {
    pub offset: u16,
    pub size: u16,
}

/// Fixed part of a transact request record (the request header).
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RequestHeader {
    pub size: u16,
    pub kind: u32,
    pub hint: u64,
    pub file_name: NameRef,
}

/// `IoStatus` pair carried by every response record.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct IoStatus {
    pub status: u32,
    pub information: u64,
}

/// Fixed part of a transact response record.
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ResponseHeader {
    pub size: u16,
    pub kind: u32,
    pub hint: u64,
    pub io_status: IoStatus,
}

/// Iterates the concatenated, 8-byte-aligned records the kernel hands back
/// from a single `transact` call.
///
/// Iteration stops when the remaining buffer is smaller than a header, or
/// when a record's `Size` field reads as zero — both signal "no more
/// records" rather than an error (the kernel may also return a completely
/// empty buffer on a spurious wake).
pub struct RecordIter<'a> {
    buf: &'a [u8],
}

impl<'a> RecordIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        RecordIter { buf }
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let size = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if size == 0 || size > self.buf.len() {
            return None;
        }
        let (record, rest) = self.buf.split_at(align_up(size).min(self.buf.len()));
        self.buf = rest;
        Some(&record[..size])
    }
}

pub fn read_hint(record: &[u8]) -> Option<u64> {
    record
        .get(8..16)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
}

pub fn read_kind(record: &[u8]) -> Option<u32> {
    record
        .get(4..8)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_record(size: u16, kind: u32, hint: u64) -> Vec<u8> {
        let mut v = vec![0u8; align_up(size as usize)];
        v[0..2].copy_from_slice(&size.to_le_bytes());
        v[4..8].copy_from_slice(&kind.to_le_bytes());
        v[8..16].copy_from_slice(&hint.to_le_bytes());
        v
    }

    #[test]
    fn iterates_concatenated_aligned_records() {
        let mut buf = make_record(20, 1, 111);
        buf.extend(make_record(17, 2, 222));
        let records: Vec<_> = RecordIter::new(&buf).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(read_hint(records[0]), Some(111));
        assert_eq!(read_kind(records[0]), Some(1));
        assert_eq!(read_hint(records[1]), Some(222));
        assert_eq!(records[1].len(), 17);
    }

    #[test]
    fn stops_on_zero_size_or_short_buffer() {
        assert_eq!(RecordIter::new(&[]).count(), 0);
        assert_eq!(RecordIter::new(&[0u8; 8]).count(), 0);
        let zero = make_record(0, 0, 0);
        assert_eq!(RecordIter::new(&zero).count(), 0);
    }

    #[test]
    fn align_up_rounds_to_next_multiple_of_eight() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 24);
    }
}
