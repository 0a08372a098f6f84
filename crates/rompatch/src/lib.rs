//! Binary patch container codecs for ROM images
//!
//! This crate parses, validates, applies, and (for most formats) creates the
//! historical family of ROM patch containers: IPS, UPS, BPS, APS (N64 and
//! GBA variants), PPF, RUP (NINJA2), PMSR (Star Rod), and VCDIFF (RFC 3284,
//! decode only).
//!
//! # Supported formats
//!
//! - **IPS**: the oldest and simplest container — absolute offset + literal
//!   or run-length records, no checksums.
//! - **UPS**: XOR records against a declared source, CRC32-verified on both
//!   ends plus a whole-file patch CRC32.
//! - **BPS**: source/target copy-or-read actions with a signed delta cursor,
//!   CRC32-verified the same way as UPS.
//! - **APS-N64** / **APS-GBA**: two unrelated formats sharing the `APS`
//!   prefix — N64 is offset/length records with RLE, GBA is fixed
//!   64 KiB XOR blocks with per-block CRC16.
//! - **PPF**: versioned (v1/v2/v3) offset+data records with an optional
//!   1024-byte block check and `FILE_ID.DIZ` trailer.
//! - **RUP (NINJA2)**: MD5-identified XOR records with optional append/minify
//!   overflow data for size-changing patches.
//! - **PMSR**: Star Rod's patch format for a single hardcoded ROM identity
//!   (Paper Mario USA 1.0).
//! - **VCDIFF**: RFC 3284 delta windows with near/same address caches and
//!   the default instruction code table. Decode only — there is no builder.
//!
//! # Layers
//!
//! - [`bytebuffer`] — the cursor-based byte buffer every codec parses from
//!   and writes to.
//! - [`checksum`] — CRC32, CRC16, Adler-32, and MD5, each computed over an
//!   arbitrary byte slice.
//! - [`formats`] — one module per container, all implementing
//!   [`formats::PatchCodec`], collected into the [`formats::Patch`] enum.
//! - [`dispatcher`] — format identification, console-header handling, and
//!   the `apply`/`create` orchestration a caller actually drives.
//!
//! # Example
//!
//! ```
//! use rompatch::dispatcher;
//!
//! let source = vec![0u8; 5];
//! let modified = vec![0, 0, 0xAA, 0xBB, 0];
//! let patch = dispatcher::create(&source, &modified, rompatch::formats::FormatTag::Ips, None).unwrap();
//! let result = dispatcher::apply(&patch, &source, &dispatcher::Options::default()).unwrap();
//! assert_eq!(result, modified);
//! ```

#![warn(missing_docs)]

pub mod bytebuffer;
pub mod checksum;
pub mod dispatcher;
pub mod error;
pub mod formats;

pub use bytebuffer::ByteBuffer;
pub use dispatcher::{Options, apply, create, export, identify, parse, validate_source};
pub use error::{PatchError, Result};
pub use formats::{FormatTag, Metadata, Patch, PatchCodec};
