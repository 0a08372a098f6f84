//! RUP — NINJA2 "Retrospective Universal Patch"
//!
//! A fixed 2048-byte header of free-text fields, followed by a small command
//! stream starting at offset `0x800`: `0x01` opens a file section (declaring
//! its source/target size and MD5 pair), `0x02` appends an XOR record to the
//! current section, `0x00` closes it. Unlike IPS/UPS/BPS, integrity is
//! checked with MD5 rather than a CRC.

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::{ByteBuffer, StringEncoding};
use crate::checksum::md5;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 6] = b"NINJA2";
const HEADER_LEN: usize = 2048;
const FORMAT: &str = "RUP";

const AUTHOR_LEN: usize = 84;
const VERSION_LEN: usize = 11;
const TITLE_LEN: usize = 256;
const GENRE_LEN: usize = 48;
const LANGUAGE_LEN: usize = 48;
const DATE_LEN: usize = 8;
const WEB_LEN: usize = 512;
const DESCRIPTION_LEN: usize = 1074;

const CMD_END: u8 = 0x00;
const CMD_OPEN_FILE: u8 = 0x01;
const CMD_RECORD: u8 = 0x02;

/// How overflow bytes relate to the declared target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowMode {
    /// Bytes beyond `target_size` that must be appended to produce the full
    /// output (the ROM grew).
    Append,
    /// Bytes beyond `target_size` present only in the source, dropped when
    /// patching forward (the ROM shrank).
    Minify,
}

/// One XOR record within a file section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RupRecord {
    /// Absolute target offset
    pub offset: u64,
    /// Bytes to XOR in, starting at `offset`
    pub xor_bytes: Vec<u8>,
}

/// One ROM's worth of patch data within a (potentially multi-ROM) RUP file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RupFileEntry {
    /// Declared file name
    pub name: String,
    /// Console/ROM type byte, carried through unchanged
    pub rom_type: u8,
    /// Declared source size
    pub source_size: u64,
    /// Declared target size
    pub target_size: u64,
    /// MD5 of the source ROM
    pub source_md5: [u8; 16],
    /// MD5 of the target ROM
    pub target_md5: [u8; 16],
    /// Overflow bytes beyond `target_size`, if the ROM's size changed
    pub overflow: Option<(OverflowMode, Vec<u8>)>,
    /// Ordered XOR records
    pub records: Vec<RupRecord>,
}

/// Free-text header fields, stored as a fixed 2048-byte block.
#[derive(Debug, Clone, Default)]
pub struct RupHeader {
    /// Field text encoding byte, carried through unchanged
    pub text_encoding: u8,
    /// Author field
    pub author: String,
    /// Version field
    pub version: String,
    /// Title field
    pub title: String,
    /// Genre field
    pub genre: String,
    /// Language field
    pub language: String,
    /// Date field
    pub date: String,
    /// Web/URL field
    pub web: String,
    /// Free-text description field
    pub description: String,
}

/// A parsed RUP patch.
#[derive(Debug, Clone)]
pub struct RupPatch {
    /// Header metadata block
    pub header: RupHeader,
    /// One or more ROM sections
    pub files: Vec<RupFileEntry>,
}

impl RupPatch {
    /// Locate the file section whose source MD5 matches `source`.
    pub fn matching_entry(&self, source: &ByteBuffer) -> Option<&RupFileEntry> {
        let digest = md5(source.as_slice());
        self.files
            .iter()
            .find(|f| f.source_md5 == digest)
            .or_else(|| self.files.first())
    }
}

impl PatchCodec for RupPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Rup;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(true);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing NINJA2 magic"));
        }

        let text_encoding = buf.read_u8();
        let author = buf.read_string(AUTHOR_LEN, StringEncoding::Ascii);
        let version = buf.read_string(VERSION_LEN, StringEncoding::Ascii);
        let title = buf.read_string(TITLE_LEN, StringEncoding::Ascii);
        let genre = buf.read_string(GENRE_LEN, StringEncoding::Ascii);
        let language = buf.read_string(LANGUAGE_LEN, StringEncoding::Ascii);
        let date = buf.read_string(DATE_LEN, StringEncoding::Ascii);
        let web = buf.read_string(WEB_LEN, StringEncoding::Ascii);
        let description = buf.read_string(DESCRIPTION_LEN, StringEncoding::Ascii);

        let header = RupHeader {
            text_encoding,
            author,
            version,
            title,
            genre,
            language,
            date,
            web,
            description,
        };

        buf.seek(HEADER_LEN);

        let mut files = Vec::new();
        let mut current: Option<RupFileEntry> = None;

        while buf.tell() < buf.size() {
            let cmd = buf.read_u8();
            match cmd {
                CMD_END => {
                    if let Some(entry) = current.take() {
                        files.push(entry);
                    }
                }
                CMD_OPEN_FILE => {
                    if let Some(entry) = current.take() {
                        files.push(entry);
                    }
                    let name_len = buf.read_vlv_rup() as usize;
                    let name = String::from_utf8_lossy(&buf.read_bytes(name_len)).into_owned();
                    let rom_type = buf.read_u8();
                    let source_size = buf.read_vlv_rup();
                    let target_size = buf.read_vlv_rup();
                    let mut source_md5 = [0u8; 16];
                    for b in &mut source_md5 {
                        *b = buf.read_u8();
                    }
                    let mut target_md5 = [0u8; 16];
                    for b in &mut target_md5 {
                        *b = buf.read_u8();
                    }

                    buf.save();
                    let marker = buf.read_u8();
                    let overflow = if marker == b'A' || marker == b'M' {
                        let mode = if marker == b'A' {
                            OverflowMode::Append
                        } else {
                            OverflowMode::Minify
                        };
                        let len = buf.read_vlv_rup() as usize;
                        let masked = buf.read_bytes(len);
                        let data: Vec<u8> = masked.iter().map(|b| b ^ 0xFF).collect();
                        Some((mode, data))
                    } else {
                        buf.restore();
                        None
                    };

                    current = Some(RupFileEntry {
                        name,
                        rom_type,
                        source_size,
                        target_size,
                        source_md5,
                        target_md5,
                        overflow,
                        records: Vec::new(),
                    });
                }
                CMD_RECORD => {
                    let offset = buf.read_vlv_rup();
                    let len = buf.read_vlv_rup() as usize;
                    let xor_bytes = buf.read_bytes(len);
                    match current.as_mut() {
                        Some(entry) => entry.records.push(RupRecord { offset, xor_bytes }),
                        None => return Err(PatchError::invalid(FORMAT, "record command before any open-file command")),
                    }
                }
                other => {
                    return Err(PatchError::invalid(FORMAT, format!("unknown command byte {other:#04x}")));
                }
            }
        }

        if let Some(entry) = current.take() {
            files.push(entry);
        }

        Ok(Self { header, files })
    }

    fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        let Some(entry) = self.matching_entry(source) else {
            return Err(PatchError::invalid_source(FORMAT, "patch declares no file sections"));
        };
        let mut probe = source.clone();
        probe.seek(0);
        let declared_range = probe.read_bytes(entry.source_size as usize);
        let computed = md5(&declared_range);
        if computed != entry.source_md5 {
            return Err(PatchError::validation(
                FORMAT,
                format!(
                    "source MD5 mismatch: expected {}, got {}",
                    hex::encode(entry.source_md5),
                    hex::encode(computed)
                ),
            ));
        }
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let entry = self
            .matching_entry(source)
            .ok_or_else(|| PatchError::invalid_source(FORMAT, "patch declares no file sections"))?;

        let mut target = source.clone();
        target.expand(entry.target_size as usize);

        for record in &entry.records {
            let idx = record.offset as usize;
            target.expand(idx + record.xor_bytes.len());
            for (i, &xor) in record.xor_bytes.iter().enumerate() {
                let existing = target.as_slice()[idx + i];
                target.seek(idx + i);
                target.write_u8(existing ^ xor);
            }
        }

        target.truncate(entry.target_size as usize);
        target.expand(entry.target_size as usize);

        if let Some((OverflowMode::Append, overflow_bytes)) = &entry.overflow {
            target.seek(entry.target_size as usize);
            target.write_bytes(overflow_bytes);
        }

        let verified_region = target.slice(0, entry.target_size as usize);
        let computed_target_md5 = md5(verified_region);
        if computed_target_md5 != entry.target_md5 {
            return Err(PatchError::TargetChecksumMismatch {
                format: FORMAT,
                expected: hex::encode(entry.target_md5),
                actual: hex::encode(computed_target_md5),
            });
        }

        Ok(target)
    }

    fn build(source: &ByteBuffer, target: &ByteBuffer, metadata: Option<&Metadata>) -> Result<Self> {
        let src = source.as_slice();
        let tgt = target.as_slice();
        let effective_src = |i: usize| src.get(i).copied().unwrap_or(0);

        let mut records = Vec::new();
        let mut i = 0usize;
        while i < tgt.len() {
            if tgt[i] == effective_src(i) {
                i += 1;
                continue;
            }
            let start = i;
            let mut xor_bytes = Vec::new();
            while i < tgt.len() && tgt[i] != effective_src(i) {
                xor_bytes.push(tgt[i] ^ effective_src(i));
                i += 1;
            }
            records.push(RupRecord {
                offset: start as u64,
                xor_bytes,
            });
        }

        let overflow = if tgt.len() > src.len() {
            Some((OverflowMode::Append, tgt[src.len().min(tgt.len())..].to_vec()))
        } else {
            None
        };

        let entry = RupFileEntry {
            name: metadata
                .and_then(|m| m.fields.get("name").cloned())
                .unwrap_or_else(|| "rom.bin".to_string()),
            rom_type: 0,
            source_size: src.len() as u64,
            target_size: tgt.len() as u64,
            source_md5: md5(src),
            target_md5: md5(tgt),
            overflow,
            records,
        };

        let header = RupHeader {
            text_encoding: 0,
            description: metadata.and_then(|m| m.description.clone()).unwrap_or_default(),
            ..RupHeader::default()
        };

        Ok(Self {
            header,
            files: vec![entry],
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new().with_little_endian(true);
        buf.write_bytes(MAGIC);
        buf.write_u8(self.header.text_encoding);
        write_fixed_field(&mut buf, &self.header.author, AUTHOR_LEN);
        write_fixed_field(&mut buf, &self.header.version, VERSION_LEN);
        write_fixed_field(&mut buf, &self.header.title, TITLE_LEN);
        write_fixed_field(&mut buf, &self.header.genre, GENRE_LEN);
        write_fixed_field(&mut buf, &self.header.language, LANGUAGE_LEN);
        write_fixed_field(&mut buf, &self.header.date, DATE_LEN);
        write_fixed_field(&mut buf, &self.header.web, WEB_LEN);
        write_fixed_field(&mut buf, &self.header.description, DESCRIPTION_LEN);
        buf.seek(HEADER_LEN);

        for entry in &self.files {
            buf.write_u8(CMD_OPEN_FILE);
            buf.write_vlv_rup(entry.name.len() as u64);
            buf.write_bytes(entry.name.as_bytes());
            buf.write_u8(entry.rom_type);
            buf.write_vlv_rup(entry.source_size);
            buf.write_vlv_rup(entry.target_size);
            buf.write_bytes(&entry.source_md5);
            buf.write_bytes(&entry.target_md5);
            if let Some((mode, data)) = &entry.overflow {
                buf.write_u8(match mode {
                    OverflowMode::Append => b'A',
                    OverflowMode::Minify => b'M',
                });
                buf.write_vlv_rup(data.len() as u64);
                let masked: Vec<u8> = data.iter().map(|b| b ^ 0xFF).collect();
                buf.write_bytes(&masked);
            }
            for record in &entry.records {
                buf.write_u8(CMD_RECORD);
                buf.write_vlv_rup(record.offset);
                buf.write_vlv_rup(record.xor_bytes.len() as u64);
                buf.write_bytes(&record.xor_bytes);
            }
            buf.write_u8(CMD_END);
        }

        Ok(buf.into_vec())
    }
}

fn write_fixed_field(buf: &mut ByteBuffer, value: &str, width: usize) {
    let mut bytes = value.as_bytes().to_vec();
    bytes.resize(width, 0);
    buf.write_bytes(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_apply_round_trips() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_slice(&[1, 9, 3, 8, 5]);
        let patch = RupPatch::build(&source, &modified, None).unwrap();
        patch.validate_source(&source).unwrap();
        let applied = patch.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn export_then_parse_round_trips() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_slice(&[1, 9, 3, 4, 9]);
        let patch = RupPatch::build(&source, &modified, None).unwrap();
        let exported = patch.export().unwrap();
        let reparsed = RupPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn grown_target_uses_append_overflow() {
        let source = ByteBuffer::from_slice(&[1, 2, 3]);
        let modified = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let patch = RupPatch::build(&source, &modified, None).unwrap();
        assert!(matches!(
            patch.files[0].overflow,
            Some((OverflowMode::Append, _))
        ));
        let exported = patch.export().unwrap();
        let reparsed = RupPatch::parse(&ByteBuffer::from_slice(&exported)).unwrap();
        let applied = reparsed.apply(&source, &ApplyOptions::default()).unwrap();
        assert_eq!(applied.as_slice(), modified.as_slice());
    }

    #[test]
    fn mismatched_source_md5_fails_validation() {
        let source = ByteBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let modified = ByteBuffer::from_slice(&[1, 9, 3, 4, 9]);
        let patch = RupPatch::build(&source, &modified, None).unwrap();
        let wrong_source = ByteBuffer::from_slice(&[9, 9, 9, 9, 9]);
        assert!(patch.validate_source(&wrong_source).is_err());
    }
}
