//! BPS — the byuu/bsnes "Beat" patch format
//!
//! The richest of the linear container formats: four action kinds (two
//! read-from, two copy-with-cursor), an embedded metadata blob, and three
//! trailing CRC32s — source, target, and the patch file's own integrity
//! check.

use std::collections::HashMap;

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::checksum::crc32;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 4] = b"BPS1";
const TRAILER_LEN: usize = 12;
const MIN_MATCH: usize = 4;
/// Floor for a source/target copy too short to earn a place in the 4-byte
/// index below — still worth a copy action over two or three literal bytes.
const SHORT_MIN_MATCH: usize = 2;
const FORMAT: &str = "BPS";

/// One instruction in a BPS action stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BpsAction {
    /// Copy `length` bytes from source at the current output offset.
    SourceRead {
        /// Byte count
        length: u64,
    },
    /// Emit `data` as literal output.
    TargetRead {
        /// Literal bytes
        data: Vec<u8>,
    },
    /// Advance the source cursor by `delta`, then copy `length` bytes from
    /// source at the new cursor position.
    SourceCopy {
        /// Byte count
        length: u64,
        /// Signed delta applied to the persistent source cursor
        delta: i64,
    },
    /// Advance the target cursor by `delta`, then copy `length` bytes from
    /// the already-produced target, byte-at-a-time (permits overlap).
    TargetCopy {
        /// Byte count
        length: u64,
        /// Signed delta applied to the persistent target cursor
        delta: i64,
    },
}

/// A parsed BPS patch.
#[derive(Debug, Clone)]
pub struct BpsPatch {
    /// Declared source size
    pub source_size: u64,
    /// Declared target size
    pub target_size: u64,
    /// Free-text metadata blob (BPS embeds this as raw bytes, conventionally
    /// UTF-8 or an XML/ini blob)
    pub metadata: String,
    /// Ordered action stream
    pub actions: Vec<BpsAction>,
    /// CRC32 of the source, over `[0, source_size)`
    pub source_crc32: u32,
    /// CRC32 of the target, over `[0, target_size)`
    pub target_crc32: u32,
    /// CRC32 of the patch file minus its own last 4 bytes
    pub patch_crc32: u32,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn run_length(data: &[u8], byte: u8) -> usize {
    data.iter().take_while(|&&b| b == byte).count()
}

/// Search the source-position index for the longest match against
/// `needle`, checking at most a handful of candidate positions per key to
/// keep `build` linear-ish rather than worst-case quadratic.
fn find_best_source_match(
    index: &HashMap<[u8; 4], Vec<usize>>,
    src: &[u8],
    needle: &[u8],
) -> Option<(usize, usize)> {
    if needle.len() < MIN_MATCH {
        return None;
    }
    let key = [needle[0], needle[1], needle[2], needle[3]];
    let candidates = index.get(&key)?;
    let mut best: Option<(usize, usize)> = None;
    for &pos in candidates.iter().rev().take(8) {
        let len = common_prefix_len(&src[pos..], needle);
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((pos, len));
        }
    }
    best
}

/// Fallback for sources too small, or matches too short, to show up in the
/// 4-byte index: keyed on a 2-byte prefix instead, so a source this small
/// (e.g. `[AA BB CC DD]`) still offers up its `AA BB` / `CC DD` pairs.
fn find_best_short_source_match(
    index: &HashMap<[u8; 2], Vec<usize>>,
    src: &[u8],
    needle: &[u8],
) -> Option<(usize, usize)> {
    if needle.len() < SHORT_MIN_MATCH {
        return None;
    }
    let key = [needle[0], needle[1]];
    let candidates = index.get(&key)?;
    let mut best: Option<(usize, usize)> = None;
    for &pos in candidates.iter().rev().take(8) {
        let len = common_prefix_len(&src[pos..], needle);
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((pos, len));
        }
    }
    best
}

impl BpsPatch {
    fn export_body(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_vlv_ups(self.source_size);
        buf.write_vlv_ups(self.target_size);
        let metadata_bytes = self.metadata.as_bytes();
        buf.write_vlv_ups(metadata_bytes.len() as u64);
        buf.write_bytes(metadata_bytes);

        for action in &self.actions {
            let (code, length) = match action {
                BpsAction::SourceRead { length } => (0u64, *length),
                BpsAction::TargetRead { data } => (1u64, data.len() as u64),
                BpsAction::SourceCopy { length, .. } => (2u64, *length),
                BpsAction::TargetCopy { length, .. } => (3u64, *length),
            };
            buf.write_vlv_ups(((length - 1) << 2) | code);
            match action {
                BpsAction::TargetRead { data } => buf.write_bytes(data),
                BpsAction::SourceCopy { delta, .. } | BpsAction::TargetCopy { delta, .. } => {
                    let magnitude = delta.unsigned_abs();
                    let sign = u64::from(*delta < 0);
                    buf.write_vlv_ups((magnitude << 1) | sign);
                }
                BpsAction::SourceRead { .. } => {}
            }
        }

        buf.write_u32(self.source_crc32);
        buf.write_u32(self.target_crc32);
        buf.into_vec()
    }
}

impl PatchCodec for BpsPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Bps;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing BPS1 magic"));
        }
        let source_size = buf.read_vlv_ups();
        let target_size = buf.read_vlv_ups();
        let metadata_len = buf.read_vlv_ups();
        let metadata_bytes = buf.read_bytes(metadata_len as usize);
        let metadata = String::from_utf8_lossy(&metadata_bytes).into_owned();

        if buf.size() < TRAILER_LEN {
            return Err(PatchError::invalid(FORMAT, "file shorter than trailer"));
        }
        let body_end = buf.size() - TRAILER_LEN;

        let mut actions = Vec::new();
        while buf.tell() < body_end {
            let word = buf.read_vlv_ups();
            let code = word & 0x3;
            let length = (word >> 2) + 1;
            match code {
                0 => actions.push(BpsAction::SourceRead { length }),
                1 => {
                    let data = buf.read_bytes(length as usize);
                    actions.push(BpsAction::TargetRead { data });
                }
                2 | 3 => {
                    let v = buf.read_vlv_ups();
                    let magnitude = (v >> 1) as i64;
                    let delta = if v & 1 != 0 { -magnitude } else { magnitude };
                    if code == 2 {
                        actions.push(BpsAction::SourceCopy { length, delta });
                    } else {
                        actions.push(BpsAction::TargetCopy { length, delta });
                    }
                }
                _ => unreachable!("word & 0x3 is in 0..=3"),
            }
            if buf.tell() > body_end {
                return Err(PatchError::invalid(FORMAT, "action runs past action stream end"));
            }
        }

        buf.seek(body_end);
        let source_crc32 = buf.read_u32();
        let target_crc32 = buf.read_u32();
        let patch_crc32 = buf.read_u32();

        let declared_body = buffer.slice(0, buf.size() - 4);
        let computed_patch_crc = crc32(declared_body);
        if computed_patch_crc != patch_crc32 {
            return Err(PatchError::invalid(
                FORMAT,
                format!(
                    "patch CRC32 mismatch: expected {patch_crc32:08X}, got {computed_patch_crc:08X}"
                ),
            ));
        }

        Ok(Self {
            source_size,
            target_size,
            metadata,
            actions,
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
        let mut target = ByteBuffer::new();
        target.expand(self.target_size as usize);

        let mut output_offset: usize = 0;
        let mut source_rel: i64 = 0;
        let mut target_rel: i64 = 0;

        for action in &self.actions {
            match action {
                BpsAction::SourceRead { length } => {
                    for i in 0..*length as usize {
                        let byte = source.as_slice().get(output_offset + i).copied().unwrap_or(0);
                        target.seek(output_offset + i);
                        target.write_u8(byte);
                    }
                    output_offset += *length as usize;
                }
                BpsAction::TargetRead { data } => {
                    target.seek(output_offset);
                    target.write_bytes(data);
                    output_offset += data.len();
                }
                BpsAction::SourceCopy { length, delta } => {
                    source_rel += delta;
                    for i in 0..*length as usize {
                        let idx = (source_rel + i as i64).max(0) as usize;
                        let byte = source.as_slice().get(idx).copied().unwrap_or(0);
                        target.seek(output_offset + i);
                        target.write_u8(byte);
                    }
                    source_rel += *length as i64;
                    output_offset += *length as usize;
                }
                BpsAction::TargetCopy { length, delta } => {
                    target_rel += delta;
                    for _ in 0..*length {
                        let idx = target_rel.max(0) as usize;
                        let byte = target.as_slice().get(idx).copied().unwrap_or(0);
                        target.seek(output_offset);
                        target.write_u8(byte);
                        target_rel += 1;
                        output_offset += 1;
                    }
                }
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

    fn build(source: &ByteBuffer, target: &ByteBuffer, metadata: Option<&Metadata>) -> Result<Self> {
        let src = source.as_slice();
        let tgt = target.as_slice();
        let metadata_string = metadata
            .and_then(|m| m.description.clone())
            .unwrap_or_default();

        let mut index: HashMap<[u8; 4], Vec<usize>> = HashMap::new();
        if src.len() >= MIN_MATCH {
            for i in 0..=src.len() - MIN_MATCH {
                index.entry([src[i], src[i + 1], src[i + 2], src[i + 3]]).or_default().push(i);
            }
        }
        let mut short_index: HashMap<[u8; 2], Vec<usize>> = HashMap::new();
        if src.len() >= SHORT_MIN_MATCH {
            for i in 0..=src.len() - SHORT_MIN_MATCH {
                short_index.entry([src[i], src[i + 1]]).or_default().push(i);
            }
        }

        let mut actions: Vec<BpsAction> = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut output_offset = 0usize;
        let mut source_rel: i64 = 0;
        let mut target_rel: i64 = 0;

        while output_offset < tgt.len() {
            let aligned_len = common_prefix_len(&tgt[output_offset..], src.get(output_offset..).unwrap_or(&[]));
            let rle_byte = tgt[output_offset];
            let rle_len = run_length(&tgt[output_offset..], rle_byte);
            let best_match = find_best_source_match(&index, src, &tgt[output_offset..])
                .or_else(|| find_best_short_source_match(&short_index, src, &tgt[output_offset..]));

            if rle_len >= SHORT_MIN_MATCH && rle_len >= aligned_len {
                if !pending.is_empty() {
                    actions.push(BpsAction::TargetRead { data: std::mem::take(&mut pending) });
                }
                actions.push(BpsAction::TargetRead { data: vec![rle_byte] });
                output_offset += 1;
                let written_pos = output_offset as i64 - 1;
                let delta = written_pos - target_rel;
                let copy_len = rle_len - 1;
                actions.push(BpsAction::TargetCopy { length: copy_len as u64, delta });
                target_rel = written_pos + copy_len as i64;
                output_offset += copy_len;
                continue;
            }

            if aligned_len >= MIN_MATCH {
                if !pending.is_empty() {
                    actions.push(BpsAction::TargetRead { data: std::mem::take(&mut pending) });
                }
                actions.push(BpsAction::SourceRead { length: aligned_len as u64 });
                source_rel = (output_offset + aligned_len) as i64;
                output_offset += aligned_len;
                continue;
            }

            if let Some((match_pos, match_len)) = best_match {
                if match_len >= SHORT_MIN_MATCH {
                    if !pending.is_empty() {
                        actions.push(BpsAction::TargetRead { data: std::mem::take(&mut pending) });
                    }
                    let delta = match_pos as i64 - source_rel;
                    actions.push(BpsAction::SourceCopy { length: match_len as u64, delta });
                    source_rel = match_pos as i64 + match_len as i64;
                    output_offset += match_len;
                    continue;
                }
            }

            pending.push(tgt[output_offset]);
            output_offset += 1;
        }
        if !pending.is_empty() {
            actions.push(BpsAction::TargetRead { data: pending });
        }

        let mut patch = Self {
            source_size: src.len() as u64,
            target_size: tgt.len() as u64,
            metadata: metadata_string,
            actions,
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
    fn source_copy_and_target_copy_round_trip() {
        let source = ByteBuffer::from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let modified = ByteBuffer::from_slice(&[0xCC, 0xDD, 0xAA, 0xBB, 0xBB, 0xBB]);
        let patch = BpsPatch::build(&source, &modified, None).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());

        let has_source_copy = patch
            .actions
            .iter()
            .any(|a| matches!(a, BpsAction::SourceCopy { .. }));
        let has_target_copy = patch
            .actions
            .iter()
            .any(|a| matches!(a, BpsAction::TargetCopy { .. }));
        assert!(has_source_copy, "expected at least one SourceCopy action");
        assert!(has_target_copy, "expected at least one TargetCopy action");
    }

    #[test]
    fn target_copy_with_negative_delta_is_rle_fill() {
        let source = ByteBuffer::from_slice(&[0u8; 4]);
        let modified = ByteBuffer::from_slice(&[0x00, 0x2A, 0x2A, 0x2A, 0x2A, 0x2A]);
        let patch = BpsPatch::build(&source, &modified, None).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let source = ByteBuffer::from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let modified = ByteBuffer::from_slice(&[0xCC, 0xDD, 0xAA, 0xBB, 0xBB, 0xBB]);
        let patch = BpsPatch::build(&source, &modified, None).unwrap();
        let exported = patch.export().unwrap();
        let reparsed = BpsPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }
}
