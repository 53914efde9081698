// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Adapters between coded image items and external intra-frame codecs.
//!
//! The bridge owns every check that must happen before a codec library sees
//! untrusted data: the dimension limit, the profile, and for AV1 the sequence
//! header's own idea of the frame size. Backends only translate.

use log::{debug, warn};
use std::fmt;

use crate::assemble::split;
use crate::config::CodecConfig;
use crate::container::{CodecConfigRecord, ContainerHandle, ItemDescriptor};
use crate::image::{ChromaSampling, CodecType, MatrixCoefficients, PixelBuffer};
use crate::writer::HeifWriter;
use crate::{AssemblyError, CodecError, Result, obu};

#[cfg(feature = "dav1d")]
mod av1_decode;
#[cfg(feature = "rav1e")]
mod av1_encode;
#[cfg(feature = "libheif")]
mod hevc_decode;

#[cfg(feature = "dav1d")]
pub use av1_decode::Dav1dDecoder;
#[cfg(feature = "rav1e")]
pub use av1_encode::Rav1eEncoder;
#[cfg(feature = "libheif")]
pub use hevc_decode::LibheifDecoder;

/// One plane of samples, each widened to `u16`.
#[derive(Clone, PartialEq, Eq)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    /// Samples between the starts of consecutive rows
    pub stride: usize,
    pub samples: Vec<u16>,
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

impl Plane {
    /// A zeroed, tightly packed plane.
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .ok_or(CodecError::ResourceExhausted("plane size overflow"))?;
        let mut samples = Vec::new();
        samples.try_reserve_exact(len)?;
        samples.resize(len, 0);
        Ok(Self {
            width,
            height,
            stride: width as usize,
            samples,
        })
    }

    /// Copy 8-bit rows of `stride` bytes.
    pub fn from_u8(width: u32, height: u32, data: &[u8], stride: usize) -> Result<Self, CodecError> {
        let mut plane = Self::new(width, height)?;
        for y in 0..height as usize {
            let src = data
                .get(y * stride..y * stride + width as usize)
                .ok_or(CodecError::CorruptBitstream("decoded plane is shorter than its dimensions"))?;
            for (d, &s) in plane.row_mut(y as u32).iter_mut().zip(src) {
                *d = u16::from(s);
            }
        }
        Ok(plane)
    }

    /// Copy rows of native-endian 16-bit samples, `stride` given in bytes.
    pub fn from_ne_u16_bytes(width: u32, height: u32, data: &[u8], stride: usize) -> Result<Self, CodecError> {
        let mut plane = Self::new(width, height)?;
        for y in 0..height as usize {
            let src = data
                .get(y * stride..y * stride + width as usize * 2)
                .ok_or(CodecError::CorruptBitstream("decoded plane is shorter than its dimensions"))?;
            for (d, s) in plane.row_mut(y as u32).iter_mut().zip(src.chunks_exact(2)) {
                *d = u16::from_ne_bytes([s[0], s[1]]);
            }
        }
        Ok(plane)
    }

    #[must_use]
    pub fn row(&self, y: u32) -> &[u16] {
        let start = y as usize * self.stride;
        &self.samples[start..start + self.width as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u16] {
        let start = y as usize * self.stride;
        &mut self.samples[start..start + self.width as usize]
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.samples[y as usize * self.stride + x as usize]
    }

    /// True when the sample storage covers `stride × height`.
    pub(crate) fn is_consistent(&self) -> bool {
        self.stride >= self.width as usize
            && self.width > 0
            && self.height > 0
            && (self.height as usize - 1)
                .checked_mul(self.stride)
                .and_then(|n| n.checked_add(self.width as usize))
                .is_some_and(|n| n <= self.samples.len())
    }
}

/// Decoded planes of one image, plus what is needed to turn them into RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneSet {
    pub y: Plane,
    /// Absent for monochrome images
    pub u: Option<Plane>,
    pub v: Option<Plane>,
    /// Full-range alpha at `alpha_bit_depth`
    pub alpha: Option<Plane>,
    pub bit_depth: u8,
    pub alpha_bit_depth: u8,
    pub chroma: ChromaSampling,
    pub matrix: MatrixCoefficients,
    pub full_range: bool,
}

/// What the decoder hands to the assembler.
pub type DecodedPlaneSet = PlaneSet;

impl PlaneSet {
    /// Adopt the luma plane of a decoded alpha item as this image's alpha.
    ///
    /// Limited-range alpha is expanded to full range.
    pub fn attach_alpha(&mut self, alpha: Self) -> Result<(), AssemblyError> {
        if alpha.y.width != self.y.width || alpha.y.height != self.y.height {
            return Err(AssemblyError::PlaneMismatch("alpha plane size differs from the colour image"));
        }
        let depth = alpha.bit_depth;
        if !(8..=16).contains(&depth) {
            return Err(AssemblyError::PlaneMismatch("alpha depth outside 8 to 16 bits"));
        }
        let mut plane = alpha.y;
        if !alpha.full_range {
            let max = (1u32 << depth) - 1;
            let black = 16u32 << (depth - 8);
            let range = 219u32 << (depth - 8);
            for v in &mut plane.samples {
                let s = u32::from(*v).saturating_sub(black).min(range);
                *v = ((s * max + range / 2) / range) as u16;
            }
        }
        self.alpha = Some(plane);
        self.alpha_bit_depth = depth;
        Ok(())
    }
}

/// Everything a decoder backend needs to decode one item.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    pub codec: CodecType,
    /// Compressed payload, extents already joined
    pub payload: &'a [u8],
    pub config: Option<&'a CodecConfigRecord>,
    /// Declared by `ispe`, 0 when unknown
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    /// Worker threads, 0 for the backend's default
    pub thread_count: u32,
    pub max_dimension: Option<u32>,
}

/// A compressed item ready for the container writer.
#[derive(Debug)]
pub struct EncodedItem {
    pub payload: Vec<u8>,
    pub config_record: CodecConfigRecord,
}

/// A decoder for one codec's intra frames.
pub trait IntraDecoder {
    fn codec(&self) -> CodecType;

    fn decode(&self, request: &DecodeRequest<'_>) -> Result<PlaneSet, CodecError>;
}

/// An encoder producing one intra frame.
pub trait IntraEncoder {
    fn codec(&self) -> CodecType;

    /// Encode `planes`. The planes were produced by [`split`] with the same `config`.
    fn encode(&self, planes: &PlaneSet, config: &CodecConfig) -> Result<EncodedItem, CodecError>;
}

#[cfg(feature = "dav1d")]
static DAV1D: Dav1dDecoder = Dav1dDecoder;
#[cfg(feature = "rav1e")]
static RAV1E: Rav1eEncoder = Rav1eEncoder;
#[cfg(feature = "libheif")]
static LIBHEIF: LibheifDecoder = LibheifDecoder;

/// The codec backends used for a call.
///
/// `Backends::default()` holds those compiled in through cargo features;
/// callers may replace or add their own.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    av1_decoder: Option<&'a dyn IntraDecoder>,
    hevc_decoder: Option<&'a dyn IntraDecoder>,
    av1_encoder: Option<&'a dyn IntraEncoder>,
    hevc_encoder: Option<&'a dyn IntraEncoder>,
}

impl Default for Backends<'_> {
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut backends = Self::none();
        #[cfg(feature = "dav1d")]
        {
            backends.av1_decoder = Some(&DAV1D);
        }
        #[cfg(feature = "rav1e")]
        {
            backends.av1_encoder = Some(&RAV1E);
        }
        #[cfg(feature = "libheif")]
        {
            backends.hevc_decoder = Some(&LIBHEIF);
        }
        backends
    }
}

impl fmt::Debug for Backends<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("av1_decoder", &self.av1_decoder.is_some())
            .field("hevc_decoder", &self.hevc_decoder.is_some())
            .field("av1_encoder", &self.av1_encoder.is_some())
            .field("hevc_encoder", &self.hevc_encoder.is_some())
            .finish()
    }
}

impl<'a> Backends<'a> {
    /// No backends at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            av1_decoder: None,
            hevc_decoder: None,
            av1_encoder: None,
            hevc_encoder: None,
        }
    }

    /// Use `decoder` for its codec.
    #[must_use]
    pub fn with_decoder(mut self, decoder: &'a dyn IntraDecoder) -> Self {
        match decoder.codec() {
            CodecType::Av1 => self.av1_decoder = Some(decoder),
            CodecType::Hevc => self.hevc_decoder = Some(decoder),
        }
        self
    }

    /// Use `encoder` for its codec.
    #[must_use]
    pub fn with_encoder(mut self, encoder: &'a dyn IntraEncoder) -> Self {
        match encoder.codec() {
            CodecType::Av1 => self.av1_encoder = Some(encoder),
            CodecType::Hevc => self.hevc_encoder = Some(encoder),
        }
        self
    }

    #[must_use]
    pub fn decoder(&self, codec: CodecType) -> Option<&'a dyn IntraDecoder> {
        match codec {
            CodecType::Av1 => self.av1_decoder,
            CodecType::Hevc => self.hevc_decoder,
        }
    }

    #[must_use]
    pub fn encoder(&self, codec: CodecType) -> Option<&'a dyn IntraEncoder> {
        match codec {
            CodecType::Av1 => self.av1_encoder,
            CodecType::Hevc => self.hevc_encoder,
        }
    }
}

/// Colour of an HEVC stream from the `(matrix, full range)` its decoder reports.
///
/// Streams that signal nothing are BT.601 limited range. An item's `colr`
/// box still overrides this.
#[cfg_attr(not(feature = "libheif"), allow(dead_code))]
pub(crate) fn hevc_colour(signalled: Option<(u16, bool)>) -> (MatrixCoefficients, bool) {
    match signalled {
        Some((code, full_range)) => (MatrixCoefficients::from_cicp(code), full_range),
        None => (MatrixCoefficients::Bt601, false),
    }
}

fn check_dimensions(width: u32, height: u32, config: &CodecConfig) -> Result<(), CodecError> {
    match config.max_dimension {
        Some(max) if !config.allows(width, height) => Err(CodecError::DimensionsTooLarge { width, height, max }),
        _ => Ok(()),
    }
}

fn check_profile(config: Option<&CodecConfigRecord>, strict: bool) -> Result<(), CodecError> {
    match config {
        Some(CodecConfigRecord::Av1(c)) if c.profile > 2 => Err(CodecError::UnsupportedProfile("AV1 seq_profile above 2")),
        Some(CodecConfigRecord::Av1(c)) if c.bit_depth == 12 && c.profile != 2 => {
            Err(CodecError::UnsupportedProfile("12-bit AV1 requires the professional profile"))
        },
        Some(CodecConfigRecord::Hevc(c)) if c.general_profile_space != 0 => {
            Err(CodecError::UnsupportedProfile("HEVC general_profile_space must be 0"))
        },
        Some(CodecConfigRecord::Hevc(c)) if !(1..=4).contains(&c.general_profile_idc) => {
            if strict {
                return Err(CodecError::UnsupportedProfile("HEVC profile is not Main, Main 10, Main Still Picture or RExt"));
            }
            warn!("HEVC general_profile_idc {}", c.general_profile_idc);
            Ok(())
        },
        Some(CodecConfigRecord::Hevc(c)) if c.bit_depth_luma > 12 => {
            Err(CodecError::UnsupportedProfile("HEVC luma bit depth above 12"))
        },
        _ => Ok(()),
    }
}

/// Read the AV1 sequence header from the payload, or from `av1C` if the
/// payload starts without one, and check it against the limits and the container.
fn check_av1_sequence(item: &ItemDescriptor, payload: &[u8], config: &CodecConfig) -> Result<(), CodecError> {
    let header = match obu::parse_obu(payload) {
        Ok(h) => h,
        Err(e) => match &item.config {
            Some(CodecConfigRecord::Av1(c)) if !c.config_obus.is_empty() => {
                debug!("no sequence header in item {} payload ({e}), using av1C", item.item_id);
                obu::parse_obu(&c.config_obus).map_err(|_| CodecError::CorruptBitstream("invalid AV1 sequence header"))?
            },
            _ => return Err(CodecError::CorruptBitstream("invalid AV1 sequence header")),
        },
    };

    let (width, height) = (header.max_frame_width.get(), header.max_frame_height.get());
    check_dimensions(width, height, config)?;

    if item.width > 0 && (width < item.width || height < item.height) {
        if config.strict {
            return Err(CodecError::CorruptBitstream("AV1 maximum frame size is smaller than ispe"));
        }
        warn!("item {} frame bound {width}x{height} is below ispe {}x{}", item.item_id, item.width, item.height);
    }
    if let Some(CodecConfigRecord::Av1(c)) = &item.config {
        if c.bit_depth != header.color.bit_depth {
            if config.strict {
                return Err(CodecError::CorruptBitstream("av1C bit depth disagrees with the sequence header"));
            }
            warn!("av1C says {} bit, sequence header {}", c.bit_depth, header.color.bit_depth);
        }
    }
    Ok(())
}

/// Decode one coded item of `handle` into planes.
///
/// Nothing is passed to a decoder unless the item passes the dimension limit
/// and profile checks.
pub(crate) fn decode_item(
    handle: &ContainerHandle<'_>,
    item: &ItemDescriptor,
    config: &CodecConfig,
    backends: &Backends<'_>,
) -> Result<PlaneSet> {
    check_dimensions(item.width, item.height, config)?;
    let decoder = backends.decoder(item.codec).ok_or(match item.codec {
        CodecType::Av1 => CodecError::UnsupportedCodec("no AV1 decoder available"),
        CodecType::Hevc => CodecError::UnsupportedCodec("no HEVC decoder available"),
    })?;
    check_profile(item.config.as_ref(), config.strict)?;

    let payload = handle.item_data(item)?;
    if item.codec == CodecType::Av1 {
        check_av1_sequence(item, &payload, config)?;
    }

    let request = DecodeRequest {
        codec: item.codec,
        payload: &payload,
        config: item.config.as_ref(),
        width: item.width,
        height: item.height,
        bit_depth: item.bit_depth,
        thread_count: config.thread_count,
        max_dimension: config.max_dimension,
    };
    debug!("item {}: {} bytes to {:?} decoder", item.item_id, payload.len(), item.codec);
    let mut planes = decoder.decode(&request)?;

    let (width, height) = (planes.y.width, planes.y.height);
    check_dimensions(width, height, config)?;
    if item.width > 0 && (width, height) != (item.width, item.height) {
        if config.strict {
            return Err(CodecError::CorruptBitstream("decoded size differs from ispe").into());
        }
        warn!("item {} decoded to {width}x{height}, ispe says {}x{}", item.item_id, item.width, item.height);
    }

    if let Some(nclx) = item.nclx {
        planes.matrix = nclx.matrix();
        planes.full_range = nclx.full_range;
    }
    Ok(planes)
}

/// Encode `image` as a single-item file, with an alpha item when it has transparency.
pub(crate) fn encode_image(
    image: &PixelBuffer,
    config: &CodecConfig,
    backends: &Backends<'_>,
    codec: CodecType,
) -> Result<Vec<u8>, CodecError> {
    image.validate()?;
    check_dimensions(image.width, image.height, config)?;
    let encoder = backends.encoder(codec).ok_or(match codec {
        CodecType::Av1 => CodecError::UnsupportedCodec("no AV1 encoder available"),
        CodecType::Hevc => CodecError::UnsupportedCodec("no HEVC encoder available"),
    })?;

    let mut planes = split(image, config)?;
    let alpha = planes.alpha.take().map(|plane| PlaneSet {
        y: plane,
        u: None,
        v: None,
        alpha: None,
        bit_depth: planes.alpha_bit_depth,
        alpha_bit_depth: planes.alpha_bit_depth,
        chroma: ChromaSampling::Monochrome,
        matrix: MatrixCoefficients::Unspecified,
        full_range: true,
    });

    debug!(
        "encoding {}x{} {:?} {} bit, alpha {}",
        image.width,
        image.height,
        planes.chroma,
        planes.bit_depth,
        alpha.is_some()
    );
    let color = encoder.encode(&planes, config)?;
    let alpha = alpha.map(|a| encoder.encode(&a, config)).transpose()?;

    HeifWriter::new(image.width, image.height)
        .with_colour(planes.matrix, planes.full_range)
        .with_premultiplied_alpha(config.premultiplied_alpha)
        .write(&color, alpha.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Av1Config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a flat mid-grey image of the requested size and counts calls.
    pub(crate) struct FlatDecoder {
        pub codec: CodecType,
        pub calls: AtomicUsize,
    }

    impl IntraDecoder for FlatDecoder {
        fn codec(&self) -> CodecType {
            self.codec
        }

        fn decode(&self, request: &DecodeRequest<'_>) -> Result<PlaneSet, CodecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut y = Plane::new(request.width, request.height)?;
            y.samples.fill(128);
            Ok(PlaneSet {
                y,
                u: None,
                v: None,
                alpha: None,
                bit_depth: 8,
                alpha_bit_depth: 8,
                chroma: ChromaSampling::Monochrome,
                matrix: MatrixCoefficients::Bt601,
                full_range: true,
            })
        }
    }

    #[test]
    fn plane_from_strided_bytes() {
        let data = [1, 2, 0xff, 3, 4, 0xff];
        let plane = Plane::from_u8(2, 2, &data, 3).unwrap();
        assert_eq!(plane.row(0), &[1, 2]);
        assert_eq!(plane.row(1), &[3, 4]);
        assert!(plane.is_consistent());

        let short = Plane::from_u8(2, 3, &data, 3);
        assert!(matches!(short, Err(CodecError::CorruptBitstream(_))));
    }

    #[test]
    fn high_bit_depth_plane() {
        let mut data = std::vec::Vec::new();
        for v in [1023u16, 512, 0, 1] {
            data.extend_from_slice(&v.to_ne_bytes());
        }
        let plane = Plane::from_ne_u16_bytes(2, 2, &data, 4).unwrap();
        assert_eq!(plane.row(0), &[1023, 512]);
        assert_eq!(plane.get(1, 1), 1);
    }

    #[test]
    fn limited_range_alpha_is_expanded() {
        let mut colour = PlaneSet {
            y: Plane::new(2, 1).unwrap(),
            u: None,
            v: None,
            alpha: None,
            bit_depth: 8,
            alpha_bit_depth: 8,
            chroma: ChromaSampling::Monochrome,
            matrix: MatrixCoefficients::Bt601,
            full_range: true,
        };
        let mut alpha = colour.clone();
        alpha.full_range = false;
        alpha.y.samples = vec![16, 235];
        colour.attach_alpha(alpha).unwrap();
        assert_eq!(colour.alpha.unwrap().samples, vec![0, 255]);
    }

    #[test]
    fn alpha_of_another_size_is_rejected() {
        let plane_set = |w| PlaneSet {
            y: Plane::new(w, 2).unwrap(),
            u: None,
            v: None,
            alpha: None,
            bit_depth: 8,
            alpha_bit_depth: 8,
            chroma: ChromaSampling::Monochrome,
            matrix: MatrixCoefficients::Bt601,
            full_range: true,
        };
        let mut colour = plane_set(2);
        assert!(matches!(
            colour.attach_alpha(plane_set(3)),
            Err(AssemblyError::PlaneMismatch(_))
        ));
    }

    #[test]
    fn hevc_colour_follows_the_stream() {
        assert_eq!(hevc_colour(None), (MatrixCoefficients::Bt601, false));
        assert_eq!(hevc_colour(Some((1, true))), (MatrixCoefficients::Bt709, true));
        assert_eq!(hevc_colour(Some((9, false))), (MatrixCoefficients::Bt2020Ncl, false));
        assert_eq!(hevc_colour(Some((0, true))), (MatrixCoefficients::Identity, true));
    }

    #[test]
    fn alpha_depth_outside_range_is_rejected() {
        let plane_set = |bit_depth, full_range| PlaneSet {
            y: Plane::new(2, 1).unwrap(),
            u: None,
            v: None,
            alpha: None,
            bit_depth,
            alpha_bit_depth: bit_depth,
            chroma: ChromaSampling::Monochrome,
            matrix: MatrixCoefficients::Bt601,
            full_range,
        };
        for (depth, full_range) in [(4, false), (4, true), (0, false), (17, false), (40, true)] {
            let mut colour = plane_set(8, true);
            assert!(matches!(
                colour.attach_alpha(plane_set(depth, full_range)),
                Err(AssemblyError::PlaneMismatch(_))
            ));
            assert!(colour.alpha.is_none());
        }
    }

    #[test]
    fn backends_are_picked_by_codec() {
        let hevc = FlatDecoder {
            codec: CodecType::Hevc,
            calls: AtomicUsize::new(0),
        };
        let backends = Backends::none().with_decoder(&hevc);
        assert!(backends.decoder(CodecType::Hevc).is_some());
        assert!(backends.decoder(CodecType::Av1).is_none());
        assert!(backends.encoder(CodecType::Av1).is_none());
    }

    #[test]
    fn profiles() {
        let av1 = |profile, bit_depth| {
            CodecConfigRecord::Av1(Av1Config {
                profile,
                level: 0,
                tier: 0,
                bit_depth,
                monochrome: false,
                chroma_subsampling_x: true,
                chroma_subsampling_y: true,
                chroma_sample_position: 0,
                initial_presentation_delay: None,
                config_obus: crate::TryVec::new(),
            })
        };
        assert!(check_profile(Some(&av1(0, 8)), true).is_ok());
        assert!(check_profile(Some(&av1(2, 12)), true).is_ok());
        assert!(matches!(
            check_profile(Some(&av1(3, 8)), true),
            Err(CodecError::UnsupportedProfile(_))
        ));
        assert!(check_profile(Some(&av1(0, 12)), true).is_err());
        assert!(check_profile(None, true).is_ok());
    }

    #[test]
    fn dimension_limit() {
        let config = CodecConfig::default().with_max_dimension(64);
        assert!(check_dimensions(64, 64, &config).is_ok());
        assert!(matches!(
            check_dimensions(65, 1, &config),
            Err(CodecError::DimensionsTooLarge { width: 65, height: 1, max: 64 })
        ));
        assert!(check_dimensions(u32::MAX, 1, &CodecConfig::unlimited()).is_ok());
    }
}
