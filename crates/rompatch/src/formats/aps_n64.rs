//! APS (N64 variant) — "Advanced Patching System"
//!
//! A 61-byte fixed header (stretched to 78 bytes in N64 mode by an extra
//! cartridge-identification block) followed by a flat record stream with no
//! terminator; parsing simply runs until the buffer is exhausted.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::{ByteBuffer, StringEncoding};
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 5] = b"APS10";
const DESCRIPTION_LEN: usize = 50;
const FORMAT: &str = "APS_N64";

/// One write instruction in an APS-N64 patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApsN64Record {
    /// Write `data` (at most 255 bytes) starting at `offset`.
    Simple {
        /// Target offset
        offset: u32,
        /// Literal bytes
        data: Vec<u8>,
    },
    /// Write `byte` repeated `length` times starting at `offset`.
    Rle {
        /// Target offset
        offset: u32,
        /// Byte value to repeat
        byte: u8,
        /// Repeat count
        length: u8,
    },
}

/// Extra cartridge-identification block present when `header_type == 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsN64Info {
    /// Original cartridge format byte
    pub original_format: u8,
    /// 3-byte cartridge ID
    pub cart_id: [u8; 3],
    /// 8-byte CRC of the original cartridge
    pub crc: [u8; 8],
}

/// A parsed APS-N64 patch.
#[derive(Debug, Clone)]
pub struct ApsN64Patch {
    /// 0 = raw, 1 = N64
    pub header_type: u8,
    /// Encoding method byte, carried through unchanged
    pub encoding_method: u8,
    /// Free-text description, null-truncated within a 50-byte field
    pub description: String,
    /// N64 cartridge metadata, present when `header_type == 1`
    pub n64_info: Option<ApsN64Info>,
    /// Declared output file size
    pub output_size: u32,
    /// Ordered write instructions
    pub records: Vec<ApsN64Record>,
}

impl PatchCodec for ApsN64Patch {
    const FORMAT: super::FormatTag = super::FormatTag::ApsN64;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing APS10 magic"));
        }
        let header_type = buf.read_u8();
        let encoding_method = buf.read_u8();
        let description = buf.read_string(DESCRIPTION_LEN, StringEncoding::Ascii);

        let n64_info = if header_type == 1 {
            let original_format = buf.read_u8();
            let cart_id = [buf.read_u8(), buf.read_u8(), buf.read_u8()];
            let mut crc = [0u8; 8];
            for b in &mut crc {
                *b = buf.read_u8();
            }
            buf.read_bytes(5); // reserved padding
            Some(ApsN64Info {
                original_format,
                cart_id,
                crc,
            })
        } else {
            None
        };

        let output_size = buf.read_u32();

        let mut records = Vec::new();
        while buf.size().saturating_sub(buf.tell()) >= 5 {
            let offset = buf.read_u32();
            let length = buf.read_u8();
            if length == 0 {
                if buf.size().saturating_sub(buf.tell()) < 2 {
                    return Err(PatchError::invalid(FORMAT, "truncated RLE record"));
                }
                let byte = buf.read_u8();
                let run_length = buf.read_u8();
                records.push(ApsN64Record::Rle {
                    offset,
                    byte,
                    length: run_length,
                });
            } else {
                if buf.size().saturating_sub(buf.tell()) < length as usize {
                    return Err(PatchError::invalid(FORMAT, "record payload runs past end"));
                }
                let data = buf.read_bytes(length as usize);
                records.push(ApsN64Record::Simple { offset, data });
            }
        }

        Ok(Self {
            header_type,
            encoding_method,
            description,
            n64_info,
            output_size,
            records,
        })
    }

    fn validate_source(&self, _source: &ByteBuffer) -> Result<()> {
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        target.expand(self.output_size as usize);
        for record in &self.records {
            match record {
                ApsN64Record::Simple { offset, data } => {
                    target.seek(*offset as usize);
                    target.write_bytes(data);
                }
                ApsN64Record::Rle { offset, byte, length } => {
                    target.seek(*offset as usize);
                    for _ in 0..*length {
                        target.write_u8(*byte);
                    }
                }
            }
        }
        target.truncate(self.output_size as usize);
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
            let rle_byte = tgt[start];
            let mut rle_len = 0usize;
            while start + rle_len < tgt.len()
                && tgt[start + rle_len] == rle_byte
                && tgt[start + rle_len] != effective(start + rle_len)
            {
                rle_len += 1;
            }
            if rle_len >= 3 {
                let mut offset = start as u32;
                let mut remaining = rle_len;
                while remaining > 0 {
                    let chunk = remaining.min(255);
                    records.push(ApsN64Record::Rle {
                        offset,
                        byte: rle_byte,
                        length: chunk as u8,
                    });
                    offset += chunk as u32;
                    remaining -= chunk;
                }
                i = start + rle_len;
                continue;
            }
            let mut end = start;
            while end < tgt.len() && tgt[end] != effective(end) && end - start < 255 {
                end += 1;
            }
            records.push(ApsN64Record::Simple {
                offset: start as u32,
                data: tgt[start..end].to_vec(),
            });
            i = end;
        }

        Ok(Self {
            header_type: 0,
            encoding_method: 0,
            description: String::new(),
            n64_info: None,
            output_size: tgt.len() as u32,
            records,
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_u8(self.header_type);
        buf.write_u8(self.encoding_method);
        let mut description = self.description.clone().into_bytes();
        description.resize(DESCRIPTION_LEN, 0);
        buf.write_bytes(&description);
        if let Some(info) = &self.n64_info {
            buf.write_u8(info.original_format);
            buf.write_bytes(&info.cart_id);
            buf.write_bytes(&info.crc);
            buf.write_bytes(&[0u8; 5]);
        }
        buf.write_u32(self.output_size);
        for record in &self.records {
            match record {
                ApsN64Record::Simple { offset, data } => {
                    buf.write_u32(*offset);
                    buf.write_u8(data.len() as u8);
                    buf.write_bytes(data);
                }
                ApsN64Record::Rle { offset, byte, length } => {
                    buf.write_u32(*offset);
                    buf.write_u8(0);
                    buf.write_u8(*byte);
                    buf.write_u8(*length);
                }
            }
        }
        Ok(buf.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_apply_round_trips() {
        let source = ByteBuffer::from_slice(&[0u8; 16]);
        let mut modified_bytes = vec![0u8; 16];
        modified_bytes[2] = 0xAA;
        modified_bytes[3] = 0xBB;
        modified_bytes[8..12].fill(0xFF);
        let modified = ByteBuffer::from_slice(&modified_bytes);

        let patch = ApsN64Patch::build(&source, &modified, None).unwrap();
        let target = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(target.as_slice(), modified.as_slice());
        assert!(patch.records.iter().any(|r| matches!(r, ApsN64Record::Rle { .. })));
    }

    #[test]
    fn export_then_parse_round_trips_with_n64_info() {
        let patch = ApsN64Patch {
            header_type: 1,
            encoding_method: 0,
            description: "test rom".to_string(),
            n64_info: Some(ApsN64Info {
                original_format: 1,
                cart_id: [b'N', b'0', b'0'],
                crc: [0xAA; 8],
            }),
            output_size: 8,
            records: vec![ApsN64Record::Simple {
                offset: 0,
                data: vec![1, 2, 3],
            }],
        };
        let exported = patch.export().unwrap();
        let reparsed = ApsN64Patch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        assert_eq!(reparsed.n64_info, patch.n64_info);
        assert_eq!(reparsed.records, patch.records);
        assert_eq!(reparsed.description, patch.description);
    }
}
