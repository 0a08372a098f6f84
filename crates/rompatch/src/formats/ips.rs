//! IPS — International Patching System
//!
//! The oldest and simplest container: a flat list of `(offset, bytes)`
//! writes terminated by the literal string `EOF`, with one escape hatch (a
//! zero-length record) for run-length fills.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 5] = b"PATCH";
const TERMINATOR: &[u8; 3] = b"EOF";
/// `EOF` read back as a big-endian 24-bit integer; reserved, never a valid
/// record offset.
const EOF_MARK: u32 = 0x0045_4F46;
const FORMAT: &str = "IPS";

/// One write instruction in an IPS patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpsRecord {
    /// Write `data` starting at `offset`.
    Simple {
        /// 24-bit target offset
        offset: u32,
        /// Literal bytes to write
        data: Vec<u8>,
    },
    /// Write `byte` repeated `length` times starting at `offset`.
    Rle {
        /// 24-bit target offset
        offset: u32,
        /// Repeat count
        length: u16,
        /// Byte value to repeat
        byte: u8,
    },
}

/// A parsed IPS patch.
#[derive(Debug, Clone, Default)]
pub struct IpsPatch {
    /// Ordered write instructions
    pub records: Vec<IpsRecord>,
    /// Trailing 3-byte truncation size, if the patch carries one
    pub truncate: Option<u32>,
    /// EBP-style JSON trailer, when present (format tag `EBP` is this same
    /// container with a metadata blob appended after the optional
    /// truncation field)
    pub metadata: Option<Metadata>,
}

impl PatchCodec for IpsPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Ips;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone();
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing PATCH magic"));
        }

        let mut records = Vec::new();
        loop {
            if buf.size().saturating_sub(buf.tell()) < 3 {
                return Err(PatchError::invalid(FORMAT, "truncated body before EOF marker"));
            }
            let offset = buf.read_u24();
            if offset == EOF_MARK {
                break;
            }
            if buf.size().saturating_sub(buf.tell()) < 2 {
                return Err(PatchError::invalid(FORMAT, "truncated record length"));
            }
            let length = buf.read_u16();
            if length == 0 {
                if buf.size().saturating_sub(buf.tell()) < 3 {
                    return Err(PatchError::invalid(FORMAT, "truncated RLE record"));
                }
                let run_length = buf.read_u16();
                let byte = buf.read_u8();
                records.push(IpsRecord::Rle {
                    offset,
                    length: run_length,
                    byte,
                });
            } else {
                if buf.size().saturating_sub(buf.tell()) < length as usize {
                    return Err(PatchError::invalid(FORMAT, "record payload runs past end"));
                }
                let data = buf.read_bytes(length as usize);
                records.push(IpsRecord::Simple { offset, data });
            }
        }

        let remaining = buf.size().saturating_sub(buf.tell());
        let truncate = if remaining == 3 {
            Some(buf.read_u24())
        } else {
            None
        };

        Ok(Self {
            records,
            truncate,
            metadata: None,
        })
    }

    fn validate_source(&self, _source: &ByteBuffer) -> Result<()> {
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        for record in &self.records {
            match record {
                IpsRecord::Simple { offset, data } => {
                    target.seek(*offset as usize);
                    target.write_bytes(data);
                }
                IpsRecord::Rle { offset, length, byte } => {
                    target.seek(*offset as usize);
                    for _ in 0..*length {
                        target.write_u8(*byte);
                    }
                }
            }
        }
        if let Some(size) = self.truncate {
            target.truncate(size as usize);
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
            let rle_byte = tgt[start];
            let mut rle_len = 0usize;
            while start + rle_len < tgt.len()
                && tgt[start + rle_len] == rle_byte
                && tgt[start + rle_len] != effective(start + rle_len)
            {
                rle_len += 1;
            }

            if rle_len >= 4 {
                let mut offset = start as u32;
                let mut remaining = rle_len;
                while remaining > 0 {
                    let chunk = remaining.min(0xFFFF);
                    records.push(IpsRecord::Rle {
                        offset,
                        length: chunk as u16,
                        byte: rle_byte,
                    });
                    offset += chunk as u32;
                    remaining -= chunk;
                }
                i = start + rle_len;
                continue;
            }

            let mut end = start;
            while end < tgt.len() && tgt[end] != effective(end) && end - start < 0xFFFF {
                end += 1;
            }
            records.push(IpsRecord::Simple {
                offset: start as u32,
                data: tgt[start..end].to_vec(),
            });
            i = end;
        }

        let truncate = if tgt.len() < src.len() {
            Some(tgt.len() as u32)
        } else {
            None
        };

        Ok(Self {
            records,
            truncate,
            metadata: None,
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new();
        buf.write_bytes(MAGIC);
        for record in &self.records {
            match record {
                IpsRecord::Simple { offset, data } => {
                    buf.write_u24(*offset);
                    buf.write_u16(data.len() as u16);
                    buf.write_bytes(data);
                }
                IpsRecord::Rle { offset, length, byte } => {
                    buf.write_u24(*offset);
                    buf.write_u16(0);
                    buf.write_u16(*length);
                    buf.write_u8(*byte);
                }
            }
        }
        buf.write_bytes(TERMINATOR);
        if let Some(size) = self.truncate {
            buf.write_u24(size);
        }
        Ok(buf.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_patch_applies() {
        let source = ByteBuffer::from_slice(&[0, 0, 0, 0, 0]);
        let patch_bytes = [
            b'P', b'A', b'T', b'C', b'H', 0x00, 0x00, 0x02, 0x00, 0x02, 0xAA, 0xBB, b'E', b'O',
            b'F',
        ];
        let patch_buf = ByteBuffer::from_slice(&patch_bytes);
        let patch = IpsPatch::parse(&patch_buf).unwrap();
        let target = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(target.as_slice(), &[0x00, 0x00, 0xAA, 0xBB, 0x00]);
    }

    #[test]
    fn rle_record_applies() {
        let source = ByteBuffer::from_slice(&[0; 8]);
        let patch_bytes = [
            b'P', b'A', b'T', b'C', b'H', 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0xFF, b'E',
            b'O', b'F',
        ];
        let patch_buf = ByteBuffer::from_slice(&patch_bytes);
        let patch = IpsPatch::parse(&patch_buf).unwrap();
        let target = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(
            target.as_slice(),
            &[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn build_then_apply_round_trips() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let modified = ByteBuffer::from_slice(&[1, 9, 9, 9, 9, 6, 0xAA, 8]);
        let patch = IpsPatch::build(&source, &modified, None).unwrap();
        let target = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(target.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let patch = IpsPatch {
            records: vec![
                IpsRecord::Simple {
                    offset: 2,
                    data: vec![0xAA, 0xBB],
                },
                IpsRecord::Rle {
                    offset: 10,
                    length: 4,
                    byte: 0xFF,
                },
            ],
            truncate: None,
            metadata: None,
        };
        let exported = patch.export().unwrap();
        let reparsed = IpsPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        assert_eq!(reparsed.records, patch.records);
        assert_eq!(reparsed.truncate, patch.truncate);
    }
}
