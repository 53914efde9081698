#![deny(unsafe_code)]
//! HEIF and AVIF still-image coder core.
//!
//! The crate sniffs, parses and decodes the primary image of a HEIF (HEVC)
//! or AVIF (AV1) file into a packed RGBA buffer, and encodes RGBA buffers back
//! into AVIF. Container parsing is zero-copy and written entirely in safe
//! Rust; the heavy intra-frame coding is delegated to external codec
//! libraries behind the [`IntraDecoder`] and [`IntraEncoder`] traits.
//!
//! ```no_run
//! use heif_coder::{CodecConfig, ImageFormat};
//!
//! let bytes = std::fs::read("image.avif")?;
//! if heif_coder::sniff(&bytes) != ImageFormat::Unknown {
//!     let image = heif_coder::decode(&bytes, &CodecConfig::default())?;
//!     println!("{}x{}", image.width, image.height);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use log::debug;

mod assemble;
mod boxes;
mod bridge;
mod config;
mod container;
mod image;
mod obu;
mod sniff;
mod writer;

pub use crate::assemble::{AssembleOptions, assemble, split};
pub use crate::boxes::FourCC;
pub use crate::bridge::{
    Backends, DecodeRequest, DecodedPlaneSet, EncodedItem, IntraDecoder, IntraEncoder, Plane,
    PlaneSet,
};
pub use crate::config::CodecConfig;
pub use crate::container::{
    Av1Config, CodecConfigRecord, ContainerHandle, HevcConfig, ItemDescriptor, ItemRole,
    MirrorAxis, Nclx, Transform,
};
pub use crate::image::{
    ChromaSampling, CodecType, ImageInfo, MatrixCoefficients, PixelBuffer, PixelFormat,
};
pub use crate::sniff::{ImageFormat, sniff};
pub use crate::writer::HeifWriter;

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self as u64
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self as usize
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

/// Structural failures found while parsing the box tree.
///
/// A `ContainerError` usually means "this is not a well-formed HEIF/AVIF
/// file"; callers may treat it as "not this format".
#[derive(Debug)]
pub enum ContainerError {
    /// A box or field runs past the end of its parent box or of the input.
    Truncated,
    /// A declared box size is smaller than its own header, or offset arithmetic overflowed.
    SizeOverflow,
    /// A mandatory box is absent.
    MissingBox(&'static str),
    /// An item's data range points outside the region it is allowed to reference.
    OutOfBounds(&'static str),
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => f.write_str("truncated box"),
            Self::SizeOverflow => f.write_str("box size overflow"),
            Self::MissingBox(name) => write!(f, "missing mandatory '{name}' box"),
            Self::OutOfBounds(s) => write!(f, "out of bounds: {s}"),
            Self::InvalidData(s) | Self::Unsupported(s) => f.write_str(s),
            Self::Io(err) => std::fmt::Display::fmt(err, f),
            Self::OutOfMemory => f.write_str("OOM"),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<bitreader::BitReaderError> for ContainerError {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::Truncated
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Truncated,
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for ContainerError {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::SizeOverflow
    }
}

impl From<TryReserveError> for ContainerError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Bitstream-level failures reported by, or enforced around, a codec backend.
#[derive(Debug)]
pub enum CodecError {
    /// No backend is available for the item's codec, or the target format can't be written.
    UnsupportedCodec(&'static str),
    /// The bitstream uses a profile, depth or layout the backend can't handle.
    UnsupportedProfile(&'static str),
    /// The pixel buffer handed to the encoder is malformed or of an unknown layout.
    UnsupportedPixelFormat(&'static str),
    /// The compressed payload is damaged.
    CorruptBitstream(&'static str),
    /// An allocation failed or a backend ran out of resources.
    ResourceExhausted(&'static str),
    /// The image is larger than [`CodecConfig::max_dimension`] allows.
    DimensionsTooLarge { width: u32, height: u32, max: u32 },
    /// An error code passed through from the external codec library.
    Backend { code: i32, msg: std::string::String },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedCodec(s)
            | Self::UnsupportedProfile(s)
            | Self::UnsupportedPixelFormat(s)
            | Self::CorruptBitstream(s)
            | Self::ResourceExhausted(s) => f.write_str(s),
            Self::DimensionsTooLarge { width, height, max } => {
                write!(f, "image of {width}x{height} exceeds the {max} pixel dimension limit")
            },
            Self::Backend { code, msg } => write!(f, "codec backend error {code}: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::collections::TryReserveError> for CodecError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::ResourceExhausted("pixel allocation failed")
    }
}

/// Internal inconsistency between decoded planes.
///
/// This is unreachable when the codec backends honour their contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    PlaneMismatch(&'static str),
}

impl std::fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlaneMismatch(s) => write!(f, "plane mismatch: {s}"),
        }
    }
}

impl std::error::Error for AssemblyError {}

/// Which stage of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Container,
    Codec,
    Assembly,
}

/// Tagged failure of a decode call.
#[derive(Debug)]
pub enum Error {
    Container(ContainerError),
    Codec(CodecError),
    Assembly(AssemblyError),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Container(_) => ErrorKind::Container,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Assembly(_) => ErrorKind::Assembly,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container(e) => write!(f, "container: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Assembly(e) => write!(f, "assembly: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Container(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Assembly(e) => Some(e),
        }
    }
}

impl From<ContainerError> for Error {
    fn from(err: ContainerError) -> Self {
        Self::Container(err)
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl From<AssemblyError> for Error {
    fn from(err: AssemblyError) -> Self {
        Self::Assembly(err)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Read dimensions and layout of the primary image without decoding it.
pub fn probe(bytes: &[u8], config: &CodecConfig) -> Result<ImageInfo, ContainerError> {
    let handle = ContainerHandle::parse(bytes, config)?;
    Ok(handle.info())
}

/// Decode the primary image with the backends enabled at build time.
pub fn decode(bytes: &[u8], config: &CodecConfig) -> Result<PixelBuffer> {
    decode_with(bytes, config, &Backends::default())
}

/// Decode the primary image using caller-supplied codec backends.
///
/// The alpha auxiliary image, if any, is decoded with the same backend as the
/// colour image and composited into the output.
pub fn decode_with(bytes: &[u8], config: &CodecConfig, backends: &Backends<'_>) -> Result<PixelBuffer> {
    let handle = ContainerHandle::parse(bytes, config)?;
    let primary = handle.primary();
    debug!(
        "decoding {:?} item {} ({}x{}, {} bit, {:?})",
        primary.codec, primary.item_id, primary.width, primary.height, primary.bit_depth, primary.chroma
    );

    let mut planes = bridge::decode_item(&handle, primary, config, backends)?;

    if let Some(alpha) = handle.alpha_of(primary) {
        let alpha_planes = bridge::decode_item(&handle, alpha, config, backends)?;
        planes.attach_alpha(alpha_planes)?;
    }

    let options = AssembleOptions::for_item(primary, config);
    Ok(assemble(planes, &options)?)
}

/// Encode an RGBA buffer into an AVIF file with the encoders enabled at build time.
pub fn encode(image: &PixelBuffer, config: &CodecConfig) -> Result<std::vec::Vec<u8>, CodecError> {
    encode_with(image, config, &Backends::default(), ImageFormat::Avif)
}

/// Encode an RGBA buffer into `format` using caller-supplied codec backends.
pub fn encode_with(
    image: &PixelBuffer,
    config: &CodecConfig,
    backends: &Backends<'_>,
    format: ImageFormat,
) -> Result<std::vec::Vec<u8>, CodecError> {
    let codec = match format {
        ImageFormat::Avif => CodecType::Av1,
        ImageFormat::Heif => CodecType::Hevc,
        ImageFormat::Unknown => return Err(CodecError::UnsupportedCodec("unknown target format")),
    };
    bridge::encode_image(image, config, backends, codec)
}

/// The capabilities a host image-loading framework needs from a coder.
pub trait ImageCoder {
    /// Whether `prefix` looks like something this coder can decode.
    fn can_decode(&self, prefix: &[u8]) -> bool;

    fn decode(&self, bytes: &[u8], config: &CodecConfig) -> Result<PixelBuffer>;

    /// Whether an encoder for `format` is available.
    fn can_encode(&self, format: ImageFormat) -> bool;

    fn encode(&self, image: &PixelBuffer, format: ImageFormat, config: &CodecConfig) -> Result<std::vec::Vec<u8>, CodecError>;
}

/// Stateless [`ImageCoder`] backed by the build-time [`Backends`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeifCoder;

impl ImageCoder for HeifCoder {
    fn can_decode(&self, prefix: &[u8]) -> bool {
        let backends = Backends::default();
        match sniff(prefix) {
            ImageFormat::Avif => backends.decoder(CodecType::Av1).is_some(),
            ImageFormat::Heif => backends.decoder(CodecType::Hevc).is_some(),
            ImageFormat::Unknown => false,
        }
    }

    fn decode(&self, bytes: &[u8], config: &CodecConfig) -> Result<PixelBuffer> {
        decode(bytes, config)
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        let backends = Backends::default();
        match format {
            ImageFormat::Avif => backends.encoder(CodecType::Av1).is_some(),
            ImageFormat::Heif => backends.encoder(CodecType::Hevc).is_some(),
            ImageFormat::Unknown => false,
        }
    }

    fn encode(&self, image: &PixelBuffer, format: ImageFormat, config: &CodecConfig) -> Result<std::vec::Vec<u8>, CodecError> {
        encode_with(image, config, &Backends::default(), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_tags_each_stage() {
        assert_eq!(Error::from(ContainerError::Truncated).kind(), ErrorKind::Container);
        assert_eq!(
            Error::from(CodecError::CorruptBitstream("bad tile")).kind(),
            ErrorKind::Codec
        );
        assert_eq!(
            Error::from(AssemblyError::PlaneMismatch("chroma")).kind(),
            ErrorKind::Assembly
        );
    }

    #[test]
    fn io_eof_maps_to_truncated() {
        let err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(ContainerError::from(err), ContainerError::Truncated));
    }

    #[test]
    fn dimension_error_message() {
        let err = CodecError::DimensionsTooLarge { width: 20000, height: 10, max: 16384 };
        assert_eq!(err.to_string(), "image of 20000x10 exceeds the 16384 pixel dimension limit");
    }

    #[test]
    fn coder_rejects_unknown_input() {
        assert!(!HeifCoder.can_decode(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"));
        assert!(!HeifCoder.can_encode(ImageFormat::Unknown));
    }
}
