//! APS (GBA variant) — fixed 64 KiB XOR blocks with per-block CRC16 guards
//!
//! Unlike APS-N64's variable-length records, APS-GBA patches are a flat
//! sequence of fixed-size blocks: each one XORs a full 64 KiB window and
//! carries the CRC16 of both the source window it expects and the target
//! window it should produce.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::checksum::crc16;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 4] = b"APS1";
/// Size of every APS-GBA block, matching the GBA cartridge's 64 KiB
/// addressing granularity.
pub const BLOCK_SIZE: usize = 65536;
const FORMAT: &str = "APS_GBA";

/// One fixed-size XOR block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApsGbaBlock {
    /// Byte offset of this block
    pub offset: u32,
    /// CRC16 the source block must match before applying
    pub source_crc16: u16,
    /// CRC16 the resulting target block must match after applying
    pub target_crc16: u16,
    /// `BLOCK_SIZE` bytes XOR'd into the source to produce the target
    pub xor_block: Vec<u8>,
}

/// A parsed APS-GBA patch.
#[derive(Debug, Clone)]
pub struct ApsGbaPatch {
    /// Declared source size
    pub source_size: u32,
    /// Declared target size
    pub target_size: u32,
    /// Ordered XOR blocks
    pub blocks: Vec<ApsGbaBlock>,
}

fn read_block(buffer: &[u8], offset: usize) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    for (i, b) in block.iter_mut().enumerate() {
        *b = buffer.get(offset + i).copied().unwrap_or(0);
    }
    block
}

impl PatchCodec for ApsGbaPatch {
    const FORMAT: super::FormatTag = super::FormatTag::ApsGba;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing APS1 magic"));
        }
        let source_size = buf.read_u32();
        let target_size = buf.read_u32();

        const RECORD_LEN: usize = 4 + 2 + 2 + BLOCK_SIZE;
        let mut blocks = Vec::new();
        while buf.size().saturating_sub(buf.tell()) >= RECORD_LEN {
            let offset = buf.read_u32();
            let source_crc16 = buf.read_u16();
            let target_crc16 = buf.read_u16();
            let xor_block = buf.read_bytes(BLOCK_SIZE);
            blocks.push(ApsGbaBlock {
                offset,
                source_crc16,
                target_crc16,
                xor_block,
            });
        }

        Ok(Self {
            source_size,
            target_size,
            blocks,
        })
    }

    fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        if source.size() != self.source_size as usize {
            return Err(PatchError::validation(
                FORMAT,
                format!(
                    "source size mismatch: expected {}, got {}",
                    self.source_size,
                    source.size()
                ),
            ));
        }
        for block in &self.blocks {
            let region = read_block(source.as_slice(), block.offset as usize);
            let computed = crc16(&region);
            if computed != block.source_crc16 {
                return Err(PatchError::validation(
                    FORMAT,
                    format!(
                        "block at {:#x}: source CRC16 mismatch: expected {:04X}, got {computed:04X}",
                        block.offset, block.source_crc16
                    ),
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut target = source.clone();
        target.expand(self.target_size as usize);

        for block in &self.blocks {
            let existing = read_block(target.as_slice(), block.offset as usize);
            let mut produced = vec![0u8; BLOCK_SIZE];
            for i in 0..BLOCK_SIZE {
                produced[i] = existing[i] ^ block.xor_block[i];
            }
            let computed_target_crc = crc16(&produced);
            if computed_target_crc != block.target_crc16 {
                return Err(PatchError::TargetChecksumMismatch {
                    format: FORMAT,
                    expected: format!("{:04X}", block.target_crc16),
                    actual: format!("{computed_target_crc:04X}"),
                });
            }
            target.seek(block.offset as usize);
            target.write_bytes(&produced);
        }

        target.truncate(self.target_size as usize);
        target.expand(self.target_size as usize);
        Ok(target)
    }

    fn build(source: &ByteBuffer, target: &ByteBuffer, _metadata: Option<&Metadata>) -> Result<Self> {
        let src = source.as_slice();
        let tgt = target.as_slice();
        let num_blocks = tgt.len().max(src.len()).div_ceil(BLOCK_SIZE);

        let mut blocks = Vec::new();
        for b in 0..num_blocks {
            let start = b * BLOCK_SIZE;
            let src_block = read_block(src, start);
            let tgt_block = read_block(tgt, start);
            if src_block == tgt_block {
                continue;
            }
            let xor_block: Vec<u8> = src_block
                .iter()
                .zip(tgt_block.iter())
                .map(|(a, b)| a ^ b)
                .collect();
            blocks.push(ApsGbaBlock {
                offset: start as u32,
                source_crc16: crc16(&src_block),
                target_crc16: crc16(&tgt_block),
                xor_block,
            });
        }

        Ok(Self {
            source_size: src.len() as u32,
            target_size: tgt.len() as u32,
            blocks,
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_u32(self.source_size);
        buf.write_u32(self.target_size);
        for block in &self.blocks {
            buf.write_u32(block.offset);
            buf.write_u16(block.source_crc16);
            buf.write_u16(block.target_crc16);
            buf.write_bytes(&block.xor_block);
        }
        Ok(buf.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_difference_in_second_block_round_trips() {
        let mut source_bytes = vec![0u8; BLOCK_SIZE * 2];
        for (i, b) in source_bytes.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let mut modified_bytes = source_bytes.clone();
        modified_bytes[BLOCK_SIZE] ^= 0xFF;

        let source = ByteBuffer::from_slice(&source_bytes);
        let modified = ByteBuffer::from_slice(&modified_bytes);

        let patch = ApsGbaPatch::build(&source, &modified, None).unwrap();
        assert_eq!(patch.blocks.len(), 1);
        assert_eq!(patch.blocks[0].offset, BLOCK_SIZE as u32);

        patch.validate_source(&source).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let mut source_bytes = vec![0u8; BLOCK_SIZE];
        source_bytes[5] = 0xAB;
        let mut modified_bytes = source_bytes.clone();
        modified_bytes[5] = 0xCD;

        let source = ByteBuffer::from_slice(&source_bytes);
        let modified = ByteBuffer::from_slice(&modified_bytes);
        let patch = ApsGbaPatch::build(&source, &modified, None).unwrap();
        let exported = patch.export().unwrap();
        let reparsed = ApsGbaPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }
}
