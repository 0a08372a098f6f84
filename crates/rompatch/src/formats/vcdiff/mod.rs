//! VCDIFF (RFC 3284) — decode-only delta format
//!
//! VCDIFF is the one format here with no build path: it is the wire format
//! `xdelta`/`open-vcdiff`-style tools produce, and this crate only needs to
//! apply deltas produced elsewhere. `build` always fails with
//! [`PatchError::UnsupportedFeature`]; `export` hands back the exact bytes
//! that were parsed, since there is no independent representation to
//! re-serialize from.

mod address_cache;
mod code_table;

use address_cache::AddressCache;
use code_table::{InstKind, default_code_table};

use super::{ApplyOptions, Metadata, PatchCodec};
use crate::bytebuffer::ByteBuffer;
use crate::checksum::adler32;
use crate::error::{PatchError, Result};

const MAGIC: &[u8; 3] = &[0xD6, 0xC3, 0xC4]; // "VCD" with the high bit set on each byte
const FORMAT: &str = "VCDIFF";

const VCD_DECOMPRESS: u8 = 0x01;
const VCD_CODETABLE: u8 = 0x02;
const VCD_APPHEADER: u8 = 0x04;

const WIN_SOURCE: u8 = 0x01;
const WIN_TARGET: u8 = 0x02;
const WIN_ADLER32: u8 = 0x04;

/// Where a window's COPY source window comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySourceKind {
    /// The external source buffer passed to [`PatchCodec::apply`]
    Source,
    /// Bytes already produced earlier in this same decode
    Target,
}

/// One decoded VCDIFF window.
#[derive(Debug, Clone)]
pub struct VcdiffWindow {
    /// Where the copy window (if any) is read from
    pub copy_source: Option<CopySourceKind>,
    /// Length of the copy window
    pub copy_window_len: u64,
    /// Offset of the copy window within its source
    pub copy_window_offset: u64,
    /// Length of the target data this window produces
    pub target_window_len: u64,
    /// ADD/RUN literal data
    pub data_section: Vec<u8>,
    /// Instruction opcode stream
    pub inst_section: Vec<u8>,
    /// COPY address stream
    pub addr_section: Vec<u8>,
    /// Declared Adler-32 of this window's output, if present
    pub adler32: Option<u32>,
}

/// A parsed VCDIFF delta.
#[derive(Debug, Clone)]
pub struct VcdiffPatch {
    /// Decoded windows, in stream order
    pub windows: Vec<VcdiffWindow>,
    /// The exact bytes this patch was parsed from
    raw: Vec<u8>,
}

fn read_vlv(buf: &mut ByteBuffer) -> Result<u64> {
    let mut value: u64 = 0;
    loop {
        let byte = buf.read_u8();
        value = value
            .checked_mul(128)
            .and_then(|v| v.checked_add(u64::from(byte & 0x7f)))
            .ok_or_else(|| PatchError::invalid(FORMAT, "variable-length integer overflow"))?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn write_vlv(buf: &mut ByteBuffer, value: u64) {
    let mut digits = Vec::new();
    let mut v = value;
    loop {
        digits.push((v & 0x7f) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for (i, &digit) in digits.iter().rev().enumerate() {
        let is_last = i == digits.len() - 1;
        buf.write_u8(if is_last { digit } else { digit | 0x80 });
    }
}

impl PatchCodec for VcdiffPatch {
    const FORMAT: super::FormatTag = super::FormatTag::Vcdiff;

    fn identify(bytes: &[u8]) -> bool {
        bytes.len() >= MAGIC.len() && &bytes[..MAGIC.len()] == MAGIC
    }

    fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let mut buf = buffer.clone().with_little_endian(false);
        buf.seek(0);
        if buf.read_bytes(MAGIC.len()) != MAGIC {
            return Err(PatchError::invalid(FORMAT, "missing VCDIFF magic"));
        }
        let version = buf.read_u8();
        if version != 0 {
            return Err(PatchError::UnsupportedFeature {
                format: FORMAT,
                feature: format!("VCDIFF version {version}"),
            });
        }

        let hdr_indicator = buf.read_u8();
        if hdr_indicator & VCD_DECOMPRESS != 0 {
            return Err(PatchError::UnsupportedFeature {
                format: FORMAT,
                feature: "secondary compressor".to_string(),
            });
        }
        if hdr_indicator & VCD_CODETABLE != 0 {
            return Err(PatchError::UnsupportedFeature {
                format: FORMAT,
                feature: "custom code table".to_string(),
            });
        }
        if hdr_indicator & VCD_APPHEADER != 0 {
            let app_header_len = read_vlv(&mut buf)? as usize;
            buf.skip(app_header_len);
        }

        let mut windows = Vec::new();
        while buf.tell() < buf.size() {
            let win_indicator = buf.read_u8();

            let copy_source = match win_indicator & (WIN_SOURCE | WIN_TARGET) {
                0 => None,
                WIN_SOURCE => Some(CopySourceKind::Source),
                WIN_TARGET => Some(CopySourceKind::Target),
                _ => {
                    return Err(PatchError::invalid(
                        FORMAT,
                        "window declares both VCD_SOURCE and VCD_TARGET",
                    ));
                }
            };

            let (copy_window_len, copy_window_offset) = if copy_source.is_some() {
                let len = read_vlv(&mut buf)?;
                let offset = read_vlv(&mut buf)?;
                (len, offset)
            } else {
                (0, 0)
            };

            let _encoding_len = read_vlv(&mut buf)?;
            let target_window_len = read_vlv(&mut buf)?;

            let delta_indicator = buf.read_u8();
            if delta_indicator != 0 {
                return Err(PatchError::UnsupportedFeature {
                    format: FORMAT,
                    feature: "compressed delta sections".to_string(),
                });
            }

            let data_len = read_vlv(&mut buf)? as usize;
            let inst_len = read_vlv(&mut buf)? as usize;
            let addr_len = read_vlv(&mut buf)? as usize;

            let adler32 = if win_indicator & WIN_ADLER32 != 0 {
                Some(read_vlv(&mut buf)? as u32)
            } else {
                None
            };

            let data_section = buf.read_bytes(data_len);
            let inst_section = buf.read_bytes(inst_len);
            let addr_section = buf.read_bytes(addr_len);

            windows.push(VcdiffWindow {
                copy_source,
                copy_window_len,
                copy_window_offset,
                target_window_len,
                data_section,
                inst_section,
                addr_section,
                adler32,
            });
        }

        Ok(Self {
            windows,
            raw: buffer.as_slice().to_vec(),
        })
    }

    fn validate_source(&self, _source: &ByteBuffer) -> Result<()> {
        Ok(())
    }

    fn apply(&self, source: &ByteBuffer, _options: &ApplyOptions) -> Result<ByteBuffer> {
        let mut output: Vec<u8> = Vec::new();

        for window in &self.windows {
            let base_offset = output.len();
            let mut acache = AddressCache::new();
            let code_table = default_code_table();

            let mut data_pos = 0usize;
            let mut inst_pos = 0usize;
            let mut addr_pos = 0usize;
            let mut target_pos: u64 = 0;

            while inst_pos < window.inst_section.len() {
                let opcode = window.inst_section[inst_pos];
                inst_pos += 1;
                let entry = &code_table[opcode as usize];

                for half in [entry.first, entry.second] {
                    if half.kind == InstKind::Noop {
                        continue;
                    }
                    let size = if half.size == 0 {
                        let mut probe = ByteBuffer::from_slice(&window.inst_section[inst_pos..]);
                        let value = read_vlv(&mut probe)?;
                        inst_pos += probe.tell();
                        value
                    } else {
                        u64::from(half.size)
                    };
                    let size_usize = size as usize;

                    match half.kind {
                        InstKind::Run => {
                            let byte = *window
                                .data_section
                                .get(data_pos)
                                .ok_or_else(|| PatchError::invalid(FORMAT, "data section underflow (RUN)"))?;
                            data_pos += 1;
                            output.resize(output.len() + size_usize, byte);
                            target_pos += size;
                        }
                        InstKind::Add => {
                            let end = data_pos + size_usize;
                            let chunk = window
                                .data_section
                                .get(data_pos..end)
                                .ok_or_else(|| PatchError::invalid(FORMAT, "data section underflow (ADD)"))?;
                            output.extend_from_slice(chunk);
                            data_pos = end;
                            target_pos += size;
                        }
                        InstKind::Copy => {
                            let here = window.copy_window_len + target_pos;
                            let addr = decode_address(
                                half.mode,
                                &window.addr_section,
                                &mut addr_pos,
                                here,
                                &acache,
                            )?;
                            acache.update(addr);

                            if addr < window.copy_window_len {
                                let abs_offset = window.copy_window_offset + addr;
                                let bytes = match window.copy_source {
                                    Some(CopySourceKind::Source) => {
                                        read_external(source.as_slice(), abs_offset, size_usize)?
                                    }
                                    Some(CopySourceKind::Target) => read_external(&output, abs_offset, size_usize)?,
                                    None => {
                                        return Err(PatchError::invalid(FORMAT, "COPY references a source window that is not present"));
                                    }
                                };
                                output.extend_from_slice(&bytes);
                            } else {
                                let tgt_offset = base_offset + (addr - window.copy_window_len) as usize;
                                for i in 0..size_usize {
                                    let byte = *output.get(tgt_offset + i).ok_or_else(|| {
                                        PatchError::invalid(FORMAT, "COPY references unwritten target data")
                                    })?;
                                    output.push(byte);
                                }
                            }
                            target_pos += size;
                        }
                        InstKind::Noop => unreachable!(),
                    }
                }
            }

            let written = output.len() - base_offset;
            if written as u64 != window.target_window_len {
                return Err(PatchError::invalid(
                    FORMAT,
                    format!(
                        "window produced {written} bytes, declared {}",
                        window.target_window_len
                    ),
                ));
            }

            if let Some(expected) = window.adler32 {
                let actual = adler32(&output[base_offset..]);
                if actual != expected {
                    return Err(PatchError::TargetChecksumMismatch {
                        format: FORMAT,
                        expected: format!("{expected:08X}"),
                        actual: format!("{actual:08X}"),
                    });
                }
            }
        }

        Ok(ByteBuffer::from_vec(output))
    }

    fn build(_source: &ByteBuffer, _target: &ByteBuffer, _metadata: Option<&Metadata>) -> Result<Self> {
        Err(PatchError::UnsupportedFeature {
            format: FORMAT,
            feature: "encoding (VCDIFF is decode-only)".to_string(),
        })
    }

    fn export(&self) -> Result<Vec<u8>> {
        Ok(self.raw.clone())
    }
}

fn read_external(buffer: &[u8], offset: u64, len: usize) -> Result<Vec<u8>> {
    let offset = offset as usize;
    buffer
        .get(offset..offset + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PatchError::invalid(FORMAT, "COPY reads past the end of its source"))
}

fn decode_address(
    mode: u8,
    addr_section: &[u8],
    addr_pos: &mut usize,
    here: u64,
    cache: &AddressCache,
) -> Result<u64> {
    const MODE_EXPLICIT: u8 = 0;
    const MODE_HERE: u8 = 1;
    const NEAR_BASE: u8 = 2;
    const NEAR_COUNT: u8 = 4;
    const SAME_BASE: u8 = NEAR_BASE + NEAR_COUNT;

    let mut probe = ByteBuffer::from_slice(&addr_section[*addr_pos..]);
    let addr = match mode {
        MODE_EXPLICIT => {
            let v = read_vlv(&mut probe)?;
            *addr_pos += probe.tell();
            v
        }
        MODE_HERE => {
            let v = read_vlv(&mut probe)?;
            *addr_pos += probe.tell();
            here.checked_sub(v)
                .ok_or_else(|| PatchError::invalid(FORMAT, "HERE-mode address underflows current position"))?
        }
        m if (NEAR_BASE..SAME_BASE).contains(&m) => {
            let v = read_vlv(&mut probe)?;
            *addr_pos += probe.tell();
            cache.near(m - NEAR_BASE) + v
        }
        m => {
            let byte = *addr_section
                .get(*addr_pos)
                .ok_or_else(|| PatchError::invalid(FORMAT, "address section underflow"))?;
            *addr_pos += 1;
            let index = u16::from(m - SAME_BASE) * 256 + u16::from(byte);
            cache.same(index)
        }
    };
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_stream(
        source_window: Option<(u64, u64)>,
        target_window_len: u64,
        data: &[u8],
        inst: &[u8],
        addr: &[u8],
    ) -> Vec<u8> {
        let mut buf = ByteBuffer::new().with_little_endian(false);
        buf.write_bytes(MAGIC);
        buf.write_u8(0); // version
        buf.write_u8(0); // hdr_indicator

        let win_indicator = if source_window.is_some() { WIN_SOURCE } else { 0 };
        buf.write_u8(win_indicator);
        if let Some((len, offset)) = source_window {
            write_vlv(&mut buf, len);
            write_vlv(&mut buf, offset);
        }

        let mut body = ByteBuffer::new().with_little_endian(false);
        write_vlv(&mut body, target_window_len);
        body.write_u8(0); // delta_indicator
        write_vlv(&mut body, data.len() as u64);
        write_vlv(&mut body, inst.len() as u64);
        write_vlv(&mut body, addr.len() as u64);
        body.write_bytes(data);
        body.write_bytes(inst);
        body.write_bytes(addr);
        let body_bytes = body.into_vec();

        write_vlv(&mut buf, body_bytes.len() as u64);
        buf.write_bytes(&body_bytes);
        buf.into_vec()
    }

    #[test]
    fn decode_simple_add_instruction() {
        // opcode 1..18 with fixed size N encodes ADD of N bytes: size=5 -> idx-1==5 -> idx=6
        let data = b"Hello";
        let stream = build_stream(None, 5, data, &[6], &[]);
        let patch = VcdiffPatch::parse(&ByteBuffer::from_slice(&stream)).unwrap();
        let result = patch.apply(&ByteBuffer::from_slice(&[]), &ApplyOptions::default()).unwrap();
        assert_eq!(result.as_slice(), data);
    }

    #[test]
    fn decode_run_instruction() {
        // opcode 0 is RUN with a variable size; the size VLV follows inline in the instruction stream.
        let data = [0xAAu8];
        let inst = [0u8, 10]; // opcode 0, then vlv(10)
        let stream = build_stream(None, 10, &data, &inst, &[]);
        let patch = VcdiffPatch::parse(&ByteBuffer::from_slice(&stream)).unwrap();
        let result = patch.apply(&ByteBuffer::from_slice(&[]), &ApplyOptions::default()).unwrap();
        assert_eq!(result.as_slice(), vec![0xAA; 10]);
    }

    #[test]
    fn decode_source_copy() {
        // size = 3 + (offset % 16), want size 8 => offset % 16 == 5, mode == offset / 16 == 0 => idx = 19 + 5 = 24
        let source = b"ABCDEFGHIJKLMNOP";
        let mut addr_buf = ByteBuffer::new().with_little_endian(false);
        write_vlv(&mut addr_buf, 4); // address 4, mode 0 (explicit)
        let addr = addr_buf.into_vec();

        let stream = build_stream(Some((source.len() as u64, 0)), 8, &[], &[24], &addr);
        let patch = VcdiffPatch::parse(&ByteBuffer::from_slice(&stream)).unwrap();
        let result = patch.apply(&ByteBuffer::from_slice(source), &ApplyOptions::default()).unwrap();
        assert_eq!(result.as_slice(), &source[4..12]);
    }

    #[test]
    fn build_is_unsupported() {
        let source = ByteBuffer::from_slice(b"abc");
        let target = ByteBuffer::from_slice(b"abd");
        assert!(VcdiffPatch::build(&source, &target, None).is_err());
    }
}
