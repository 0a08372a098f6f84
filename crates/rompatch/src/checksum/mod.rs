//! Checksum primitives shared by the format codecs
//!
//! Each function computes its checksum over an arbitrary `[start, end)` byte
//! range without mutating the caller's data, exposing hashing as a pure
//! function over a byte slice rather than a method on a stateful reader.

mod adler32;
mod crc16;
mod crc32;

pub use adler32::adler32;
pub use crc16::crc16;
pub use crc32::crc32;

/// MD5 digest of a byte slice.
///
/// Delegates to the `md5` crate rather than hand-rolling RFC 1321 — RUP is
/// the only format that needs a cryptographic-strength hash.
pub fn md5(data: &[u8]) -> [u8; 16] {
    *md5::compute(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_string() {
        let digest = md5(b"");
        assert_eq!(hex::encode(digest), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
