//! Format identification, console-header handling, and apply/create
//! orchestration.
//!
//! This is the one layer that knows about all nine codecs at once; each
//! format module stays ignorant of its siblings and of console ROM headers
//! entirely.

use tracing::{debug, trace, warn};

use crate::bytebuffer::ByteBuffer;
use crate::error::{PatchError, Result};
use crate::formats::{
    self, ApplyOptions, FormatTag, Metadata, Patch, PatchCodec, aps_gba::ApsGbaPatch,
    aps_n64::ApsN64Patch, bps::BpsPatch, ips::IpsPatch, pmsr::PmsrPatch, ppf::PpfPatch,
    rup::RupPatch, ups::UpsPatch,
};

/// A known console ROM header: fixed size, and the stride the headerless
/// body must be a multiple of for the header to plausibly be present.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleHeader {
    /// Short name for logging
    pub name: &'static str,
    /// Header size in bytes
    pub size: usize,
    /// Body length (source size minus header) must be a multiple of this
    pub stride: usize,
}

/// Console-header table, exactly as the external interface documents it.
pub const CONSOLE_HEADERS: &[ConsoleHeader] = &[
    ConsoleHeader { name: "iNES", size: 16, stride: 1024 },
    ConsoleHeader { name: "fwNES", size: 16, stride: 65_500 },
    ConsoleHeader { name: "LNX", size: 64, stride: 1024 },
    ConsoleHeader { name: "SNES copier", size: 512, stride: 262_144 },
];

/// Options accepted by [`apply`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Fail with `ValidationFailed` if the codec's source precondition
    /// check does not pass.
    pub require_validation: bool,
    /// If the source's size matches a known console header table entry,
    /// split the header off before applying and reattach it afterward.
    pub remove_header: bool,
    /// If the source's size matches a known console header's body stride,
    /// prepend a zero-filled synthetic header before applying, then strip
    /// it back off.
    pub add_header: bool,
    /// Accepted but not acted on: a post-apply hook for console-specific
    /// header checksum fix-ups (e.g. the SNES internal checksum). No
    /// fix-up routine is registered by this implementation.
    pub fix_checksum: bool,
}

fn detect_header_for_removal(source_len: usize) -> Option<&'static ConsoleHeader> {
    CONSOLE_HEADERS.iter().find(|h| {
        source_len > h.size && (source_len - h.size) % h.stride == 0
    })
}

fn detect_header_for_addition(source_len: usize) -> Option<&'static ConsoleHeader> {
    CONSOLE_HEADERS
        .iter()
        .find(|h| source_len > 0 && source_len % h.stride == 0)
}

/// Identify a patch buffer's format without fully parsing it.
pub fn identify(bytes: &[u8]) -> Option<FormatTag> {
    formats::identify(bytes)
}

/// Fully parse a patch buffer, trying each codec's magic in turn.
pub fn parse(bytes: &[u8]) -> Result<Patch> {
    trace!(len = bytes.len(), "dispatcher: parsing patch buffer");
    let buffer = ByteBuffer::from_slice(bytes);
    Patch::parse(&buffer)
}

/// Per-format source precondition check.
pub fn validate_source(patch: &Patch, source: &[u8]) -> Result<()> {
    let buffer = ByteBuffer::from_slice(source);
    patch.validate_source(&buffer)
}

/// Apply `patch` to `source`, honoring `options`.
pub fn apply(patch: &Patch, source: &[u8], options: &Options) -> Result<Vec<u8>> {
    debug!(format = patch.format().as_str(), "dispatcher: applying patch");

    let apply_opts = ApplyOptions {
        require_validation: options.require_validation,
    };

    if options.remove_header && options.add_header {
        return Err(PatchError::invalid(
            "dispatcher",
            "remove_header and add_header are mutually exclusive",
        ));
    }

    let (body, stripped_header): (Vec<u8>, Option<Vec<u8>>) = if options.remove_header {
        match detect_header_for_removal(source.len()) {
            Some(h) => {
                debug!(header = h.name, size = h.size, "stripping console header before apply");
                (source[h.size..].to_vec(), Some(source[..h.size].to_vec()))
            }
            None => (source.to_vec(), None),
        }
    } else {
        (source.to_vec(), None)
    };

    let (body, synthetic_header_size): (Vec<u8>, Option<usize>) = if options.add_header {
        match detect_header_for_addition(body.len()) {
            Some(h) => {
                debug!(header = h.name, size = h.size, "prepending synthetic console header before apply");
                let mut padded = vec![0u8; h.size];
                padded.extend_from_slice(&body);
                (padded, Some(h.size))
            }
            None => (body, None),
        }
    } else {
        (body, None)
    };

    let source_buffer = ByteBuffer::from_vec(body);

    if options.require_validation {
        patch.validate_source(&source_buffer)?;
    }

    let mut output = patch.apply(&source_buffer, &apply_opts)?.into_vec();

    if let Some(size) = synthetic_header_size {
        if output.len() >= size {
            output.drain(..size);
        }
    }

    if let Some(header) = stripped_header {
        let mut full = header;
        full.extend_from_slice(&output);
        output = full;
    }

    if options.fix_checksum {
        warn!("fix_checksum requested but no console checksum fix-up is registered");
    }

    Ok(output)
}

/// Diff `source` against `modified` and build a patch of the requested
/// format.
pub fn create(
    source: &[u8],
    modified: &[u8],
    format: FormatTag,
    metadata: Option<&Metadata>,
) -> Result<Patch> {
    debug!(format = format.as_str(), "dispatcher: creating patch");
    let source_buffer = ByteBuffer::from_slice(source);
    let modified_buffer = ByteBuffer::from_slice(modified);

    match format {
        FormatTag::Ips => IpsPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Ips),
        FormatTag::Ups => UpsPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Ups),
        FormatTag::Bps => BpsPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Bps),
        FormatTag::ApsN64 => {
            ApsN64Patch::build(&source_buffer, &modified_buffer, metadata).map(Patch::ApsN64)
        }
        FormatTag::ApsGba => {
            ApsGbaPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::ApsGba)
        }
        FormatTag::Ppf => PpfPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Ppf),
        FormatTag::Rup => RupPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Rup),
        FormatTag::Pmsr => PmsrPatch::build(&source_buffer, &modified_buffer, metadata).map(Patch::Pmsr),
        FormatTag::Vcdiff => Err(PatchError::UnsupportedFeature {
            format: "VCDIFF",
            feature: "encoding (VCDIFF is decode-only)".to_string(),
        }),
        FormatTag::Ebp => Err(PatchError::UnsupportedFeature {
            format: "EBP",
            feature: "JSON metadata trailer (no codec registered)".to_string(),
        }),
    }
}

/// Serialize a parsed patch back to its on-disk container bytes.
pub fn export(patch: &Patch) -> Result<Vec<u8>> {
    patch.export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ines_header_for_removal() {
        let body_len = 2 * 1024;
        let source = vec![0u8; 16 + body_len];
        let header = detect_header_for_removal(source.len()).expect("should detect iNES header");
        assert_eq!(header.name, "iNES");
    }

    #[test]
    fn no_header_detected_for_arbitrary_size() {
        let source = vec![0u8; 17];
        assert!(detect_header_for_removal(source.len()).is_none());
    }

    #[test]
    fn mutually_exclusive_options_reject() {
        let patch = create(&[1, 2, 3], &[1, 2, 3], FormatTag::Ips, None).unwrap();
        let options = Options {
            remove_header: true,
            add_header: true,
            ..Default::default()
        };
        let err = apply(&patch, &[1, 2, 3], &options).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPatchFile { .. }));
    }

    #[test]
    fn ips_round_trip_through_dispatcher() {
        let source = vec![0u8; 5];
        let modified = vec![0, 0, 0xAA, 0xBB, 0];
        let patch = create(&source, &modified, FormatTag::Ips, None).unwrap();
        let result = apply(&patch, &source, &Options::default()).unwrap();
        assert_eq!(result, modified);
    }

    #[test]
    fn vcdiff_create_is_unsupported() {
        let err = create(&[1], &[1], FormatTag::Vcdiff, None).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedFeature { .. }));
    }

    #[test]
    fn require_validation_rejects_mismatched_source() {
        let source = vec![0xAA, 0xBB, 0xCC, 0xDD];
        let modified = vec![0xCC, 0xDD, 0xAA, 0xBB];
        let patch = create(&source, &modified, FormatTag::Bps, None).unwrap();

        let wrong_source = vec![0x11, 0x22, 0x33, 0x44];
        let options = Options {
            require_validation: true,
            ..Default::default()
        };
        let err = apply(&patch, &wrong_source, &options).unwrap_err();
        assert!(matches!(err, PatchError::ValidationFailed { .. }));

        // Without require_validation, apply still runs and fails on its own
        // target CRC32 check instead of the (skipped) source check.
        let lenient = apply(&patch, &wrong_source, &Options::default()).unwrap_err();
        assert!(matches!(lenient, PatchError::TargetChecksumMismatch { .. }));
    }
}
