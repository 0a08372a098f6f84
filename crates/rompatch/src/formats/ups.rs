//! UPS — Universal Patching System
//!
//! A magic, two VLV size fields, a run of XOR records, and three trailing
//! little-endian CRC32s covering the source, the target, and the patch file
//! itself (minus its own last four bytes).

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::checksum::crc32;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 4] = b"UPS1";
const TRAILER_LEN: usize = 12;
const FORMAT: &str = "UPS";

/// One XOR record: `xor_bytes[i]` is XOR'd into the byte at
/// `running_offset + i`, where `running_offset` accumulates each record's
/// `relative_offset` starting from the end of the previous record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsRecord {
    /// Delta from the end of the previous record
    pub relative_offset: u64,
    /// Bytes to XOR in, terminated in the container by a `0x00` byte
    pub xor_bytes: Vec<u8>,
}

/// A parsed UPS patch.
#[derive(Debug, Clone)]
pub struct UpsPatch {
    /// Declared source size
    pub source_size: u64,
    /// Declared target size
    pub target_size: u64,
    /// Ordered XOR records
    pub records: Vec<UpsRecord>,
    /// CRC32 of the source, over `[0, source_size)`
    pub source_crc32: u32,
    /// CRC32 of the target, over `[0, target_size)`
    pub target_crc32: u32,
    /// CRC32 of the patch file minus its own last 4 bytes
    pub patch_crc32: u32,
}

impl UpsPatch {
    fn export_body(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_vlv_ups(self.source_size);
        buf.write_vlv_ups(self.target_size);
        for record in &self.records {
            buf.write_vlv_ups(record.relative_offset);
            buf.write_bytes(&record.xor_bytes);
            buf.write_u8(0);
        }
        buf.write_u32(self.source_crc32);
        buf.write_u32(self.target_crc32);
        buf.into_vec()
    }
}

impl PatchCodec for UpsPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Ups;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing UPS1 magic"));
        }
        let source_size = buf.read_vlv_ups();
        let target_size = buf.read_vlv_ups();

        if buf.size() < TRAILER_LEN {
            return Err(PatchError::invalid(FORMAT, "file shorter than trailer"));
        }
        let body_end = buf.size() - TRAILER_LEN;

        let mut records = Vec::new();
        while buf.tell() < body_end {
            let relative_offset = buf.read_vlv_ups();
            let mut xor_bytes = Vec::new();
            loop {
                if buf.tell() >= body_end {
                    return Err(PatchError::invalid(FORMAT, "unterminated XOR record"));
                }
                let byte = buf.read_u8();
                if byte == 0 {
                    break;
                }
                xor_bytes.push(byte);
            }
            records.push(UpsRecord {
                relative_offset,
                xor_bytes,
            });
        }

        buf.seek(body_end);
        let source_crc32 = buf.read_u32();
        let target_crc32 = buf.read_u32();
        let patch_crc32 = buf.read_u32();

        Ok(Self {
            source_size,
            target_size,
            records,
            source_crc32,
            target_crc32,
            patch_crc32,
        })
    }

    fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        let mut probe = source.clone();
        probe.seek(0);
        let declared_range = probe.read_bytes(self.source_size as usize);
        let computed = crc32(&declared_range);
        if computed != self.source_crc32 {
            return Err(PatchError::validation(
                FORMAT,
                format!(
                    "source CRC32 mismatch: expected {:08X}, got {computed:08X}",
                    self.source_crc32
                ),
            ));
        }
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        let initial_len = (self.source_size as usize).max(target.size());
        target.expand(initial_len);

        let mut cursor: u64 = 0;
        for record in &self.records {
            cursor += record.relative_offset;
            for &xor in &record.xor_bytes {
                let idx = cursor as usize;
                if idx >= target.size() {
                    target.expand(idx + 1);
                }
                let existing = target.as_slice()[idx];
                target.seek(idx);
                target.write_u8(existing ^ xor);
                cursor += 1;
            }
        }

        target.truncate(self.target_size as usize);
        target.expand(self.target_size as usize);

        let computed_target_crc = crc32(target.as_slice());
        if computed_target_crc != self.target_crc32 {
            return Err(PatchError::TargetChecksumMismatch {
                format: FORMAT,
                expected: format!("{:08X}", self.target_crc32),
                actual: format!("{computed_target_crc:08X}"),
            });
        }

        Ok(target)
    }

    fn build(source: &ByteBuffer, target: &ByteBuffer, _metadata: Option<&Metadata>) -> Result<Self> {
        let src = source.as_slice();
        let tgt = target.as_slice();
        let max_len = src.len().max(tgt.len());
        let effective_src = |i: usize| src.get(i).copied().unwrap_or(0);
        let effective_tgt = |i: usize| tgt.get(i).copied().unwrap_or(0);

        let mut records = Vec::new();
        let mut cursor_end = 0usize;
        let mut i = 0usize;
        while i < max_len {
            if effective_tgt(i) == effective_src(i) {
                i += 1;
                continue;
            }
            let start = i;
            let mut xor_bytes = Vec::new();
            while i < max_len && effective_tgt(i) != effective_src(i) {
                xor_bytes.push(effective_tgt(i) ^ effective_src(i));
                i += 1;
            }
            records.push(UpsRecord {
                relative_offset: (start - cursor_end) as u64,
                xor_bytes,
            });
            cursor_end = i;
        }

        let mut patch = Self {
            source_size: src.len() as u64,
            target_size: tgt.len() as u64,
            records,
            source_crc32: crc32(src),
            target_crc32: crc32(tgt),
            patch_crc32: 0,
        };
        patch.patch_crc32 = crc32(&patch.export_body());
        Ok(patch)
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut body = self.export_body();
        let patch_crc32 = crc32(&body);
        body.extend_from_slice(&patch_crc32.to_le_bytes());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_patch_has_no_records() {
        let source = ByteBuffer::from_slice(&[1, 2, 3]);
        let patch = UpsPatch::build(&source, &source, None).unwrap();
        assert!(patch.records.is_empty());
        assert_eq!(patch.source_crc32, crc32(&[1, 2, 3]));
        assert_eq!(patch.target_crc32, crc32(&[1, 2, 3]));

        let result = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(result.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn build_then_apply_round_trips() {
        let source = ByteBuffer::from_slice(&[0xAA; 16]);
        let modified = ByteBuffer::from_slice(&[
            0xAA, 0xAA, 0x01, 0x02, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
            0xAA, 0xFF,
        ]);
        let patch = UpsPatch::build(&source, &modified, None).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_slice(&[1, 9, 3, 4, 9]);
        let patch = UpsPatch::build(&source, &modified, None).unwrap();
        let exported = patch.export().unwrap();
        let reparsed = UpsPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }
}
