//! End-to-end literal scenarios driven through `dispatcher`, the way a real
//! caller (parse a patch file, apply it to a ROM) would exercise the crate.

use pretty_assertions::assert_eq;

use rompatch::dispatcher::{self, Options};
use rompatch::formats::FormatTag;
use rompatch::{PatchError, PatchCodec};

#[test]
fn ups_identity_round_trip_has_no_xor_records() {
    let source = vec![1u8, 2, 3];
    let patch = dispatcher::create(&source, &source, FormatTag::Ups, None).unwrap();
    let result = dispatcher::apply(&patch, &source, &Options::default()).unwrap();
    assert_eq!(result, source);

    let rompatch::Patch::Ups(ups) = &patch else {
        panic!("expected a UPS patch");
    };
    assert!(ups.records.is_empty());
    assert_eq!(ups.source_crc32, rompatch::checksum::crc32(&source));
    assert_eq!(ups.target_crc32, rompatch::checksum::crc32(&source));
}

#[test]
fn bps_source_copy_and_target_copy() {
    let source = vec![0xAA, 0xBB, 0xCC, 0xDD];
    let modified = vec![0xCC, 0xDD, 0xAA, 0xBB, 0xBB, 0xBB];

    let patch = dispatcher::create(&source, &modified, FormatTag::Bps, None).unwrap();
    let result = dispatcher::apply(&patch, &source, &Options::default()).unwrap();
    assert_eq!(result, modified);

    let rompatch::Patch::Bps(bps) = &patch else {
        panic!("expected a BPS patch");
    };
    use rompatch::formats::bps::BpsAction;
    assert!(bps.actions.iter().any(|a| matches!(a, BpsAction::SourceCopy { .. })));
    assert!(bps.actions.iter().any(|a| matches!(a, BpsAction::TargetCopy { .. })));
}

#[test]
fn aps_gba_two_block_source() {
    let mut source = vec![0u8; 2 * 65536];
    for (i, byte) in source.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    let mut modified = source.clone();
    // Flip exactly one byte at absolute offset 0x10000 (start of the second block).
    modified[0x10000] = source[0x10000].wrapping_add(1);

    let patch = dispatcher::create(&source, &modified, FormatTag::ApsGba, None).unwrap();
    dispatcher::validate_source(&patch, &source).unwrap();
    let result = dispatcher::apply(&patch, &source, &Options::default()).unwrap();
    assert_eq!(result, modified);
}

#[test]
fn vcdiff_decodes_declared_source_and_target_and_rejects_bad_adler32() {
    use rompatch::formats::vcdiff::VcdiffPatch;

    // Window 1 is a plain ADD of the whole target (no source window at all);
    // demonstrates a VCDIFF stream with a declared Adler-32 trailer.
    let target = b"The quick brown fox".to_vec();

    fn write_vlv(out: &mut Vec<u8>, mut value: u64) {
        let mut digits = Vec::new();
        loop {
            digits.push((value & 0x7f) as u8);
            value >>= 7;
            if value == 0 {
                break;
            }
        }
        for (i, &digit) in digits.iter().rev().enumerate() {
            let is_last = i == digits.len() - 1;
            out.push(if is_last { digit } else { digit | 0x80 });
        }
    }

    fn build_add_only_stream(data: &[u8], adler32: u32) -> Vec<u8> {
        // Opcode 1 is ADD with a variable size: the instruction section holds
        // the opcode byte followed inline by a VLV-encoded size.
        let mut inst_section = vec![1u8];
        write_vlv(&mut inst_section, data.len() as u64);

        let mut stream = vec![0xD6, 0xC3, 0xC4, 0x00, 0x00]; // magic, version, hdr_indicator
        stream.push(0x04); // win_indicator: VCD_ADLER32 only
        let mut body = Vec::new();
        write_vlv(&mut body, data.len() as u64); // target_window_len
        body.push(0); // delta_indicator
        write_vlv(&mut body, data.len() as u64); // data_len
        write_vlv(&mut body, inst_section.len() as u64); // inst_len
        write_vlv(&mut body, 0); // addr_len
        write_vlv(&mut body, u64::from(adler32));
        body.extend_from_slice(data);
        body.extend_from_slice(&inst_section);
        write_vlv(&mut stream, body.len() as u64);
        stream.extend_from_slice(&body);
        stream
    }

    let adler = rompatch::checksum::adler32(&target);
    let good_stream = build_add_only_stream(&target, adler);
    let patch = VcdiffPatch::parse(&rompatch::ByteBuffer::from_slice(&good_stream)).unwrap();
    let result = patch
        .apply(&rompatch::ByteBuffer::from_slice(&[]), &rompatch::formats::ApplyOptions::default())
        .unwrap();
    assert_eq!(result.as_slice(), target.as_slice());

    let bad_stream = build_add_only_stream(&target, adler ^ 0xFFFF_FFFF);
    let bad_patch = VcdiffPatch::parse(&rompatch::ByteBuffer::from_slice(&bad_stream)).unwrap();
    let err = bad_patch
        .apply(&rompatch::ByteBuffer::from_slice(&[]), &rompatch::formats::ApplyOptions::default())
        .unwrap_err();
    assert!(matches!(err, PatchError::TargetChecksumMismatch { .. }));
}

#[test]
fn unrecognized_buffer_reports_unsupported_format() {
    let err = dispatcher::parse(b"not a patch at all").unwrap_err();
    assert!(matches!(err, PatchError::UnsupportedFormat));
}
