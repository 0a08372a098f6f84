//! PMSR — Star Rod's Paper Mario mod patch container
//!
//! The simplest format in the crate: a magic, a record count, and a flat
//! array of `{offset, length, data}` overwrites. Star Rod only ever targets
//! one ROM, so the format carries no declared size/checksum fields of its
//! own — the source precondition is hardcoded to that ROM's known size and
//! CRC32.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::checksum::crc32;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 4] = b"PMSR";
const FORMAT: &str = "PMSR";

/// Expected size of a Paper Mario (USA) 1.0 ROM image.
pub const TARGET_ROM_SIZE: u64 = 41_943_040;
/// Expected CRC32 of a Paper Mario (USA) 1.0 ROM image.
pub const TARGET_ROM_CRC32: u32 = 0xA7F5_CD7E;

/// One overwrite instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmsrRecord {
    /// Target offset
    pub offset: u32,
    /// Literal bytes to write
    pub data: Vec<u8>,
}

/// A parsed PMSR patch.
#[derive(Debug, Clone)]
pub struct PmsrPatch {
    /// Ordered overwrite instructions
    pub records: Vec<PmsrRecord>,
}

impl PatchCodec for PmsrPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Pmsr;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing PMSR magic"));
        }
        let count = buf.read_u32();

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if buf.size().saturating_sub(buf.tell()) < 8 {
                return Err(PatchError::invalid(FORMAT, "truncated record header"));
            }
            let offset = buf.read_u32();
            let length = buf.read_u32();
            if buf.size().saturating_sub(buf.tell()) < length as usize {
                return Err(PatchError::invalid(FORMAT, "record payload runs past end"));
            }
            let data = buf.read_bytes(length as usize);
            records.push(PmsrRecord { offset, data });
        }

        Ok(Self { records })
    }

    fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        if source.size() as u64 != TARGET_ROM_SIZE {
            return Err(PatchError::invalid_source(
                FORMAT,
                format!(
                    "expected a {TARGET_ROM_SIZE}-byte Paper Mario (USA) ROM, got {} bytes",
                    source.size()
                ),
            ));
        }
        let computed = crc32(source.as_slice());
        if computed != TARGET_ROM_CRC32 {
            return Err(PatchError::validation(
                FORMAT,
                format!("source CRC32 mismatch: expected {TARGET_ROM_CRC32:08X}, got {computed:08X}"),
            ));
        }
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        for record in &self.records {
            let end = record.offset as usize + record.data.len();
            target.expand(end);
            target.seek(record.offset as usize);
            target.write_bytes(&record.data);
        }
        Ok(target)
    }

    fn build(source: &ByteBuffer, target: &ByteBuffer, _metadata: Option<&Metadata>) -> Result<Self> {
        let src = source.as_slice();
        let tgt = target.as_slice();
        let effective = |idx: usize| -> u8 { src.get(idx).copied().unwrap_or(0) };

        let mut records = Vec::new();
        let mut i = 0usize;
        while i < tgt.len() {
            if tgt[i] == effective(i) {
                i += 1;
                continue;
            }
            let start = i;
            while i < tgt.len() && tgt[i] != effective(i) {
                i += 1;
            }
            records.push(PmsrRecord {
                offset: start as u32,
                data: tgt[start..i].to_vec(),
            });
        }

        Ok(Self { records })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_u32(self.records.len() as u32);
        for record in &self.records {
            buf.write_u32(record.offset);
            buf.write_u32(record.data.len() as u32);
            buf.write_bytes(&record.data);
        }
        Ok(buf.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_apply_round_trips() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_slice(&[1, 9, 3, 8, 5]);
        let patch = PmsrPatch::build(&source, &modified, None).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let source = ByteBuffer::from_slice(&[0u8; 8]);
        let modified = ByteBuffer::from_slice(&[0, 1, 0, 0, 2, 2, 0, 0]);
        let patch = PmsrPatch::build(&source, &modified, None).unwrap();
        let exported = patch.export().unwrap();
        let reparsed = PmsrPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn wrong_size_source_fails_validation() {
        let patch = PmsrPatch { records: vec![] };
        let source = ByteBuffer::from_slice(&[0u8; 16]);
        assert!(patch.validate_source(&source).is_err());
    }
}
