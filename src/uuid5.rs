//! UUID v5 generation.
//!
//! Grounded byte-for-byte on `src/shared/ku/uuid5.c`'s `FspUuid5Make`: the
//! namespace UUID is byte-swapped into network order, hashed with the name
//! bytes appended, the first 16 digest bytes are byte-swapped back to host
//! order, and the version/variant bits are patched in place. The reference
//! implementation uses `BCryptHashData`/`BCryptFinishHash` (SHA-1); this
//! port uses the portable `sha1` crate so the algorithm doesn't require
//! CNG, while keeping the exact swap order and bit patching.

use sha1::{Digest, Sha1};

pub type Uuid = [u8; 16];

/// Byte-swaps a UUID's first three fields into RFC 4122 network order,
/// leaving the last field (an 8-byte opaque array) untouched.
fn swap_to_network_order(uuid: &Uuid) -> Uuid {
    let mut out = *uuid;
    out.swap(0, 3);
    out.swap(1, 2);
    out.swap(4, 5);
    out.swap(6, 7);
    out
}

/// Computes a UUID v5 (name-based, SHA-1) identifier.
///
/// `namespace` and the returned UUID are in host (little-endian) byte
/// order, matching Windows' native `UUID`/`GUID` representation.
pub fn uuid5(namespace: &Uuid, name: &[u8]) -> Uuid {
    let network_namespace = swap_to_network_order(namespace);

    let mut hasher = Sha1::new();
    hasher.update(network_namespace);
    hasher.update(name);
    let digest = hasher.finalize();

    let mut network_result = [0u8; 16];
    network_result.copy_from_slice(&digest[..16]);

    let mut uuid = swap_to_network_order(&network_result);

    // Version 5: top 4 bits of Data3 (bytes 6-7, little-endian u16) = 0101b.
    let data3 = u16::from_le_bytes([uuid[6], uuid[7]]);
    let data3 = (0x5000) | (data3 & 0x0fff);
    uuid[6..8].copy_from_slice(&data3.to_le_bytes());

    // Variant RFC 4122: top 2 bits of Data4[0] (byte 8) = 10b.
    uuid[8] = (uuid[8] & 0x3f) | 0x80;

    uuid
}

#[cfg(test)]
mod test {
    use super::*;

    const NAMESPACE_DNS: Uuid = [
        0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30,
        0xc8,
    ];

    #[test]
    fn deterministic_for_same_inputs() {
        let a = uuid5(&NAMESPACE_DNS, b"example.com");
        let b = uuid5(&NAMESPACE_DNS, b"example.com");
        assert_eq!(a, b);
    }

    #[test]
    fn sets_version_5_and_variant_2() {
        let u = uuid5(&NAMESPACE_DNS, b"example.com");
        assert_eq!((u[6] & 0xf0), 0x50);
        assert_eq!((u[8] & 0xc0), 0x80);
    }

    #[test]
    fn different_names_produce_different_uuids() {
        let a = uuid5(&NAMESPACE_DNS, b"a");
        let b = uuid5(&NAMESPACE_DNS, b"b");
        assert_ne!(a, b);
    }
}
