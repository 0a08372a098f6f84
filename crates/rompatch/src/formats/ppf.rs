//! PPF — Playstation Patch Format (v1/v2/v3)
//!
//! A versioned header (offset width and optional block-check grow with the
//! version), a flat record stream, and an optional free-text
//! `@BEGIN_FILE_ID.DIZ` / `@END_FILE_ID.DIZ` trailer. Unlike IPS/BPS there is
//! no declared target checksum — integrity is only checked on the source
//! side, via the optional block check.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::{ByteBuffer, StringEncoding};
use crate::error::{PatchError, Result};

const DESCRIPTION_LEN: usize = 50;
const BLOCK_CHECK_LEN: usize = 1024;
const BEGIN_DIZ: &[u8] = b"@BEGIN_FILE_ID.DIZ";
const END_DIZ: &[u8] = b"@END_FILE_ID.DIZ";
const FORMAT: &str = "PPF";

/// PPF container version; determines offset width and which header fields
/// are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpfVersion {
    /// 32-bit offsets, no file size, no block check
    V1,
    /// 32-bit offsets, declared input file size, mandatory block check
    V2,
    /// 64-bit offsets, optional block check, optional undo data
    V3,
}

/// One write instruction in a PPF patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpfRecord {
    /// Target offset (32-bit in v1/v2, 64-bit in v3)
    pub offset: u64,
    /// Literal bytes to write
    pub data: Vec<u8>,
    /// Bytes to restore `data`'s region to when reversing the patch
    /// (v3 only, present only when `has_undo_data` is set)
    pub undo: Option<Vec<u8>>,
}

/// A parsed PPF patch.
#[derive(Debug, Clone)]
pub struct PpfPatch {
    /// Container version
    pub version: PpfVersion,
    /// Free-text description, 50-byte field
    pub description: String,
    /// Declared input file size (v2 only)
    pub input_file_size: Option<u32>,
    /// 1024-byte block compared against the first 1024 bytes of source
    pub block_check: Option<Vec<u8>>,
    /// Whether each record carries undo data (v3 only)
    pub has_undo_data: bool,
    /// Ordered write instructions
    pub records: Vec<PpfRecord>,
    /// Optional free-text trailer
    pub file_id_diz: Option<String>,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl PatchCodec for PpfPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Ppf;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= 3 && &bytes[..3] == b"PPF"
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        let magic = buf.read_bytes(5);
        if magic.len() < 5 || &magic[..3] != b"PPF" {
            return Err(PatchError::invalid(FORMAT, "missing PPF magic"));
        }
        let version = match (magic[3], magic[4]) {
            (b'1', b'0') => PpfVersion::V1,
            (b'2', b'0') => PpfVersion::V2,
            (b'3', b'0') => PpfVersion::V3,
            _ => return Err(PatchError::invalid(FORMAT, "unrecognized PPF version digit")),
        };
        let description = buf.read_string(DESCRIPTION_LEN, StringEncoding::Ascii);

        let mut input_file_size = None;
        let mut block_check = None;
        let mut has_undo_data = false;

        match version {
            PpfVersion::V1 => {}
            PpfVersion::V2 => {
                input_file_size = Some(buf.read_u32());
                block_check = Some(buf.read_bytes(BLOCK_CHECK_LEN));
            }
            PpfVersion::V3 => {
                let _image_type = buf.read_u8();
                let has_block_check = buf.read_u8() != 0;
                has_undo_data = buf.read_u8() != 0;
                buf.read_u8(); // unused
                if has_block_check {
                    block_check = Some(buf.read_bytes(BLOCK_CHECK_LEN));
                }
            }
        }

        let offset_size: usize = if matches!(version, PpfVersion::V3) { 8 } else { 4 };
        let mut records = Vec::new();
        let mut file_id_diz = None;

        loop {
            if buf.tell() >= buf.size() {
                break;
            }

            if !matches!(version, PpfVersion::V1) {
                let remaining = buf.slice(buf.tell(), buf.size());
                if remaining.starts_with(BEGIN_DIZ) {
                    let body_start = buf.tell() + BEGIN_DIZ.len();
                    let rest = buf.slice(body_start, buf.size());
                    if let Some(end_pos) = find_subslice(rest, END_DIZ) {
                        file_id_diz = Some(String::from_utf8_lossy(&rest[..end_pos]).into_owned());
                    } else {
                        file_id_diz = Some(String::from_utf8_lossy(rest).into_owned());
                    }
                    break;
                }
            }

            if buf.size().saturating_sub(buf.tell()) < offset_size + 1 {
                break;
            }
            let offset = if offset_size == 8 {
                buf.read_u64()
            } else {
                u64::from(buf.read_u32())
            };
            let length = buf.read_u8();
            if buf.size().saturating_sub(buf.tell()) < length as usize {
                return Err(PatchError::invalid(FORMAT, "record payload runs past end"));
            }
            let data = buf.read_bytes(length as usize);
            let undo = if has_undo_data {
                if buf.size().saturating_sub(buf.tell()) < length as usize {
                    return Err(PatchError::invalid(FORMAT, "record undo data runs past end"));
                }
                Some(buf.read_bytes(length as usize))
            } else {
                None
            };
            records.push(PpfRecord { offset, data, undo });
        }

        Ok(Self {
            version,
            description,
            input_file_size,
            block_check,
            has_undo_data,
            records,
            file_id_diz,
        })
    }

    fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        if let Some(size) = self.input_file_size {
            if source.size() != size as usize {
                return Err(PatchError::validation(
                    FORMAT,
                    format!(
                        "declared input file size {size} does not match source length {}",
                        source.size()
                    ),
                ));
            }
        }
        if let Some(check) = &self.block_check {
            let mut probe = source.clone();
            probe.seek(0);
            let first = probe.read_bytes(BLOCK_CHECK_LEN);
            if &first != check {
                return Err(PatchError::validation(
                    FORMAT,
                    "1024-byte block check does not match the first 1024 bytes of source",
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        for record in &self.records {
            target.seek(record.offset as usize);
            target.write_bytes(&record.data);
        }
        Ok(target)
    }

    fn build(source: &ByteBuffer, target: &ByteBuffer, metadata: Option<&Metadata>) -> Result<Self> {
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
            let mut end = start;
            while end < tgt.len() && tgt[end] != effective(end) && end - start < 255 {
                end += 1;
            }
            records.push(PpfRecord {
                offset: start as u64,
                data: tgt[start..end].to_vec(),
                undo: None,
            });
            i = end;
        }

        Ok(Self {
            version: PpfVersion::V3,
            description: metadata.and_then(|m| m.description.clone()).unwrap_or_default(),
            input_file_size: None,
            block_check: None,
            has_undo_data: false,
            records,
            file_id_diz: None,
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        let (version_digit, offset_is_64) = match self.version {
            PpfVersion::V1 => (b'1', false),
            PpfVersion::V2 => (b'2', false),
            PpfVersion::V3 => (b'3', true),
        };
        buf.write_bytes(b"PPF");
        buf.write_u8(version_digit);
        buf.write_u8(b'0');

        let mut description = self.description.clone().into_bytes();
        description.resize(DESCRIPTION_LEN, 0x20);
        buf.write_bytes(&description);

        match self.version {
            PpfVersion::V1 => {}
            PpfVersion::V2 => {
                buf.write_u32(self.input_file_size.unwrap_or(0));
                let check = self
                    .block_check
                    .clone()
                    .unwrap_or_else(|| vec![0u8; BLOCK_CHECK_LEN]);
                buf.write_bytes(&check);
            }
            PpfVersion::V3 => {
                buf.write_u8(0); // image type: BIN
                buf.write_u8(u8::from(self.block_check.is_some()));
                buf.write_u8(u8::from(self.has_undo_data));
                buf.write_u8(0);
                if let Some(check) = &self.block_check {
                    buf.write_bytes(check);
                }
            }
        }

        for record in &self.records {
            if offset_is_64 {
                buf.write_u64(record.offset);
            } else {
                buf.write_u32(record.offset as u32);
            }
            buf.write_u8(record.data.len() as u8);
            buf.write_bytes(&record.data);
            if self.has_undo_data {
                match &record.undo {
                    Some(undo) => buf.write_bytes(undo),
                    None => buf.write_bytes(&vec![0u8; record.data.len()]),
                }
            }
        }

        if let Some(diz) = &self.file_id_diz {
            buf.write_bytes(BEGIN_DIZ);
            buf.write_bytes(diz.as_bytes());
            buf.write_bytes(END_DIZ);
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
        let patch = PpfPatch::build(&source, &modified, None).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn v3_offset_is_true_64_bit_no_truncation() {
        let patch = PpfPatch {
            version: PpfVersion::V3,
            description: String::new(),
            input_file_size: None,
            block_check: None,
            has_undo_data: false,
            records: vec![PpfRecord {
                offset: 0x1_0000_0000,
                data: vec![0xAB],
                undo: None,
            }],
            file_id_diz: None,
        };
        let exported = patch.export().unwrap();
        let reparsed = PpfPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        assert_eq!(reparsed.records[0].offset, 0x1_0000_0000);
    }

    #[test]
    fn v2_block_check_validates_against_source() {
        let mut source_bytes = vec![0u8; 2048];
        source_bytes[10] = 0x42;
        let source = ByteBuffer::from_slice(&source_bytes);
        let mut block_check = source_bytes[..BLOCK_CHECK_LEN].to_vec();
        let patch = PpfPatch {
            version: PpfVersion::V2,
            description: String::new(),
            input_file_size: Some(source_bytes.len() as u32),
            block_check: Some(std::mem::take(&mut block_check)),
            has_undo_data: false,
            records: vec![],
            file_id_diz: None,
        };
        assert!(patch.validate_source(&source).is_ok());
    }

    #[test]
    fn file_id_diz_trailer_round_trips() {
        let patch = PpfPatch {
            version: PpfVersion::V3,
            description: String::new(),
            input_file_size: None,
            block_check: None,
            has_undo_data: false,
            records: vec![PpfRecord {
                offset: 0,
                data: vec![1, 2],
                undo: None,
            }],
            file_id_diz: Some("hello world".to_string()),
        };
        let exported = patch.export().unwrap();
        let reparsed = PpfPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        assert_eq!(reparsed.file_id_diz.as_deref(), Some("hello world"));
    }
}
