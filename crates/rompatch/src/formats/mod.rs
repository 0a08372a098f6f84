//! Format codecs and the tagged-sum [`Patch`] type
//!
//! The source workspace models each CASC file format as a struct
//! implementing `crate::CascFormat` (`parse`/`build`/`verify_round_trip`),
//! one struct per format with no shared base class. This module follows the
//! same shape but collects every format into a single [`Patch`] enum instead
//! of leaving callers to juggle per-format types, since the dispatcher needs
//! to hold "some patch, we don't yet know which format" as a single value.

pub mod aps_gba;
pub mod aps_n64;
pub mod bps;
pub mod ips;
pub mod pmsr;
pub mod ppf;
pub mod rup;
pub mod ups;
pub mod vcdiff;

use crate::bytebuffer::ByteBuffer;
use crate::error::{PatchError, Result};

/// Which console-ROM patch container a [`Patch`] was parsed from or should
/// be built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// International Patching System
    Ips,
    /// Universal Patching System
    Ups,
    /// Beat Patching System (byuu)
    Bps,
    /// Advanced Patching System, N64 variant
    ApsN64,
    /// Advanced Patching System, GBA variant
    ApsGba,
    /// PPF (PPF3 Patcher)
    Ppf,
    /// NINJA2 / RUP
    Rup,
    /// Star Rod PMSR
    Pmsr,
    /// VCDIFF (RFC 3284), decode-only
    Vcdiff,
    /// IPS with a JSON metadata trailer
    Ebp,
}

impl FormatTag {
    /// Short uppercase name used in error messages and logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ips => "IPS",
            Self::Ups => "UPS",
            Self::Bps => "BPS",
            Self::ApsN64 => "APS_N64",
            Self::ApsGba => "APS_GBA",
            Self::Ppf => "PPF",
            Self::Rup => "RUP",
            Self::Pmsr => "PMSR",
            Self::Vcdiff => "VCDIFF",
            Self::Ebp => "EBP",
        }
    }
}

/// Free-text and key/value annotations carried by formats that support them
/// (BPS metadata blob, RUP header fields, EBP's JSON trailer).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Free-text description (BPS metadata blob, RUP `description` field)
    pub description: Option<String>,
    /// Arbitrary key/value annotations (RUP author/title/genre/etc., EBP
    /// JSON object)
    pub fields: std::collections::BTreeMap<String, String>,
}

/// Options accepted by [`Patch::apply`], mirroring the dispatcher-level
/// options in the external interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Fail with `ValidationFailed` if `validate_source` reports a mismatch
    pub require_validation: bool,
}

/// Per-format codec contract.
///
/// `identify`/`parse`/`build` are associated functions rather than methods
/// because a caller doesn't have a `Self` to call them on yet — it has raw
/// bytes, or a source/target pair. `validate_source`, `apply`, and `export`
/// operate on an already-parsed instance.
pub trait PatchCodec: Sized {
    /// Format tag this codec implements.
    const FORMAT: FormatTag;

    /// Magic-byte test on the first few bytes of a patch buffer.
    fn identify(bytes: &[u8]) -> bool;

    /// Parse a complete patch container. Total on the declared magic: either
    /// a valid `Self` or a typed error, never a panic.
    fn parse(buffer: &ByteBuffer) -> Result<Self>;

    /// Per-format source precondition check (size, CRC32, MD5, per-block
    /// CRC16). Formats with no precondition (IPS, VCDIFF) always succeed.
    fn validate_source(&self, source: &ByteBuffer) -> Result<()>;

    /// Apply this patch to `source`, producing the target buffer. Verifies
    /// the target checksum when the format declares one.
    fn apply(&self, source: &ByteBuffer, options: &ApplyOptions) -> Result<ByteBuffer>;

    /// Diff `source` against `target` and build a patch. Formats that are
    /// decode-only (VCDIFF) override this to return
    /// [`PatchError::UnsupportedFeature`].
    fn build(source: &ByteBuffer, target: &ByteBuffer, metadata: Option<&Metadata>) -> Result<Self>;

    /// Serialize back to the on-disk container format. Reciprocal to
    /// `parse` for every format except VCDIFF.
    fn export(&self) -> Result<Vec<u8>>;
}

/// A parsed patch of any supported format.
///
/// Tagged sum rather than one struct per format behind a trait object: the
/// dispatcher's hot loop (`apply`) matches once up front instead of paying
/// for a vtable indirection per record, and there is no shared mutable state
/// between variants to justify dynamic dispatch.
#[derive(Debug, Clone)]
pub enum Patch {
    /// IPS patch
    Ips(ips::IpsPatch),
    /// UPS patch
    Ups(ups::UpsPatch),
    /// BPS patch
    Bps(bps::BpsPatch),
    /// APS (N64) patch
    ApsN64(aps_n64::ApsN64Patch),
    /// APS (GBA) patch
    ApsGba(aps_gba::ApsGbaPatch),
    /// PPF patch
    Ppf(ppf::PpfPatch),
    /// RUP (NINJA2) patch
    Rup(rup::RupPatch),
    /// PMSR (Star Rod) patch
    Pmsr(pmsr::PmsrPatch),
    /// VCDIFF delta (decode-only)
    Vcdiff(vcdiff::VcdiffPatch),
}

macro_rules! for_each_variant {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            Patch::Ips($inner) => $body,
            Patch::Ups($inner) => $body,
            Patch::Bps($inner) => $body,
            Patch::ApsN64($inner) => $body,
            Patch::ApsGba($inner) => $body,
            Patch::Ppf($inner) => $body,
            Patch::Rup($inner) => $body,
            Patch::Pmsr($inner) => $body,
            Patch::Vcdiff($inner) => $body,
        }
    };
}

impl Patch {
    /// Which format this patch was parsed from.
    pub fn format(&self) -> FormatTag {
        match self {
            Patch::Ips(_) => FormatTag::Ips,
            Patch::Ups(_) => FormatTag::Ups,
            Patch::Bps(_) => FormatTag::Bps,
            Patch::ApsN64(_) => FormatTag::ApsN64,
            Patch::ApsGba(_) => FormatTag::ApsGba,
            Patch::Ppf(_) => FormatTag::Ppf,
            Patch::Rup(_) => FormatTag::Rup,
            Patch::Pmsr(_) => FormatTag::Pmsr,
            Patch::Vcdiff(_) => FormatTag::Vcdiff,
        }
    }

    /// Identify and fully parse a patch buffer, trying each codec's
    /// `identify` in turn.
    ///
    /// `APS1` (APS-GBA) is a byte-for-byte prefix of `APS10` (APS-N64), so
    /// APS-N64 is probed first; every other magic is prefix-free.
    pub fn parse(buffer: &ByteBuffer) -> Result<Self> {
        let bytes = buffer.as_slice();
        if aps_n64::ApsN64Patch::identify(bytes) {
            return aps_n64::ApsN64Patch::parse(buffer).map(Patch::ApsN64);
        }
        if aps_gba::ApsGbaPatch::identify(bytes) {
            return aps_gba::ApsGbaPatch::parse(buffer).map(Patch::ApsGba);
        }
        if ips::IpsPatch::identify(bytes) {
            return ips::IpsPatch::parse(buffer).map(Patch::Ips);
        }
        if ups::UpsPatch::identify(bytes) {
            return ups::UpsPatch::parse(buffer).map(Patch::Ups);
        }
        if bps::BpsPatch::identify(bytes) {
            return bps::BpsPatch::parse(buffer).map(Patch::Bps);
        }
        if ppf::PpfPatch::identify(bytes) {
            return ppf::PpfPatch::parse(buffer).map(Patch::Ppf);
        }
        if rup::RupPatch::identify(bytes) {
            return rup::RupPatch::parse(buffer).map(Patch::Rup);
        }
        if pmsr::PmsrPatch::identify(bytes) {
            return pmsr::PmsrPatch::parse(buffer).map(Patch::Pmsr);
        }
        if vcdiff::VcdiffPatch::identify(bytes) {
            return vcdiff::VcdiffPatch::parse(buffer).map(Patch::Vcdiff);
        }
        Err(PatchError::UnsupportedFormat)
    }

    /// Per-format source precondition check.
    pub fn validate_source(&self, source: &ByteBuffer) -> Result<()> {
        for_each_variant!(self, p => p.validate_source(source))
    }

    /// Apply this patch to `source`.
    pub fn apply(&self, source: &ByteBuffer, options: &ApplyOptions) -> Result<ByteBuffer> {
        for_each_variant!(self, p => p.apply(source, options))
    }

    /// Serialize back to the on-disk container format.
    pub fn export(&self) -> Result<Vec<u8>> {
        for_each_variant!(self, p => p.export())
    }
}

/// Peek the first bytes of `bytes` and report which format's magic matches,
/// without parsing the body.
pub fn identify(bytes: &[u8]) -> Option<FormatTag> {
    if aps_n64::ApsN64Patch::identify(bytes) {
        Some(FormatTag::ApsN64)
    } else if aps_gba::ApsGbaPatch::identify(bytes) {
        Some(FormatTag::ApsGba)
    } else if ips::IpsPatch::identify(bytes) {
        Some(FormatTag::Ips)
    } else if ups::UpsPatch::identify(bytes) {
        Some(FormatTag::Ups)
    } else if bps::BpsPatch::identify(bytes) {
        Some(FormatTag::Bps)
    } else if ppf::PpfPatch::identify(bytes) {
        Some(FormatTag::Ppf)
    } else if rup::RupPatch::identify(bytes) {
        Some(FormatTag::Rup)
    } else if pmsr::PmsrPatch::identify(bytes) {
        Some(FormatTag::Pmsr)
    } else if vcdiff::VcdiffPatch::identify(bytes) {
        Some(FormatTag::Vcdiff)
    } else {
        None
    }
}
