//! Crate-wide error taxonomy
//!
//! Every format module defines the same handful of failure kinds; this
//! module collects them into one `thiserror` enum so the dispatcher can
//! forward a format's error unchanged instead of wrapping it in another
//! layer.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, PatchError>;

/// Errors produced while identifying, parsing, validating, applying, or
/// creating a patch.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Magic matched but the body violates the format (truncated stream,
    /// illegal command, internal checksum self-test failure).
    #[error("invalid {format} patch: {reason}")]
    InvalidPatchFile {
        /// Format tag the error occurred in
        format: &'static str,
        /// What specifically was wrong
        reason: String,
    },

    /// No registered codec's `identify` matched the buffer.
    #[error("unrecognized patch format (no magic matched)")]
    UnsupportedFormat,

    /// A feature the format declares but this implementation does not
    /// support (VCDIFF secondary compressor / custom code table, RUP
    /// unknown overflow mode, PMSR YAY0 bodies).
    #[error("unsupported feature in {format}: {feature}")]
    UnsupportedFeature {
        /// Format tag
        format: &'static str,
        /// Name of the unsupported feature
        feature: String,
    },

    /// A source precondition (declared size, CRC, MD5, per-block CRC16)
    /// did not match before applying the patch.
    #[error("source validation failed for {format}: {reason}")]
    ValidationFailed {
        /// Format tag
        format: &'static str,
        /// Which field failed and how
        reason: String,
    },

    /// The checksum computed after `apply` diverged from the patch's
    /// declared target checksum.
    #[error("target checksum mismatch in {format}: expected {expected}, got {actual}")]
    TargetChecksumMismatch {
        /// Format tag
        format: &'static str,
        /// Declared checksum, formatted as hex
        expected: String,
        /// Computed checksum, formatted as hex
        actual: String,
    },

    /// The source buffer does not meet the codec's structural requirements
    /// (e.g. APS-GBA applied to a source of the wrong size).
    #[error("invalid source file for {format}: {reason}")]
    InvalidSourceFile {
        /// Format tag
        format: &'static str,
        /// What was structurally wrong
        reason: String,
    },

    /// I/O error while reading or writing a cursor-backed stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PatchError {
    /// Construct an [`PatchError::InvalidPatchFile`] for `format`.
    pub fn invalid(format: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPatchFile {
            format,
            reason: reason.into(),
        }
    }

    /// Construct an [`PatchError::ValidationFailed`] for `format`.
    pub fn validation(format: &'static str, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            format,
            reason: reason.into(),
        }
    }

    /// Construct an [`PatchError::InvalidSourceFile`] for `format`.
    pub fn invalid_source(format: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSourceFile {
            format,
            reason: reason.into(),
        }
    }
}
