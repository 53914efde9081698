// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use arrayvec::ArrayVec;
use bitreader::BitReader;
use byteorder::ReadBytesExt;
use fallible_collections::{TryClone, TryReserveError};
use log::{debug, trace, warn};
use std::borrow::Cow;
use std::convert::{TryFrom, TryInto as _};
use std::fmt;
use std::io::{Read, Take};
use std::ops::{Range, RangeFrom};

use crate::boxes::{BoxType, FourCC};
use crate::config::CodecConfig;
use crate::image::{ChromaSampling, CodecType, ImageInfo, MatrixCoefficients};
use crate::sniff::ImageFormat;
use crate::{ContainerError, ToU64, ToUsize, TryVec};

type Result<T, E = ContainerError> = std::result::Result<T, E>;
type TryString = TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

const ALPHA_URNS: [&[u8]; 2] = [b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha", b"urn:mpeg:hevc:2015:auxid:1"];
const DEPTH_URNS: [&[u8]; 2] = [b"urn:mpeg:mpegB:cicp:systems:auxiliary:depth", b"urn:mpeg:hevc:2015:auxid:2"];

/// Indicate the current offset (i.e., bytes already read) in a reader
trait Offset {
    fn offset(&self) -> u64;
}

/// Bytes that may still be read before the enclosing container ends
trait Remaining {
    fn remaining(&self) -> u64;
}

/// Wraps a reader to track the current offset
struct OffsetReader<'a, T> {
    reader: &'a mut T,
    offset: u64,
}

impl<'a, T> OffsetReader<'a, T> {
    fn new(reader: &'a mut T) -> Self {
        Self { reader, offset: 0 }
    }
}

impl<T> Offset for OffsetReader<'_, T> {
    fn offset(&self) -> u64 {
        self.offset
    }
}

impl Remaining for OffsetReader<'_, &[u8]> {
    fn remaining(&self) -> u64 {
        self.reader.len().to_u64()
    }
}

impl<T: Read> Read for OffsetReader<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.offset = self
            .offset
            .checked_add(bytes_read.to_u64())
            .ok_or_else(|| std::io::Error::other("total bytes read too large for offset type"))?;
        Ok(bytes_read)
    }
}

/// Basic ISO box structure.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    /// Box type.
    name: BoxType,
    /// Size of the box in bytes, resolved for size=0 boxes.
    size: u64,
    /// Offset to the start of the contained data (or header size).
    offset: u64,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    const MIN_SIZE: u64 = 8;
    /// 4-byte size + 4-byte type + 8-byte size
    const MIN_LARGE_SIZE: u64 = 16;
}

#[derive(Debug, Clone, Copy)]
struct ParseOptions {
    lenient: bool,
}

/// File type box 'ftyp'.
#[derive(Debug)]
struct FileTypeBox {
    major_brand: FourCC,
    compatible_brands: TryVec<FourCC>,
}

// Handler reference box 'hdlr'
#[derive(Debug)]
struct HandlerBox {
    handler_type: FourCC,
}

/// Used for 'infe' boxes within 'iinf' boxes
/// See ISO 14496-12:2015 § 8.11.6
/// Only versions {2, 3} are supported
#[derive(Debug)]
struct ItemInfoEntry {
    item_id: u32,
    item_type: FourCC,
}

/// See ISO 14496-12:2015 § 8.11.12
#[derive(Debug)]
struct SingleItemTypeReferenceBox {
    item_type: FourCC,
    from_item_id: u32,
    to_item_id: u32,
}

/// Potential sizes (in bytes) of variable-sized fields of the 'iloc' box
/// See ISO 14496-12:2015 § 8.11.3
#[derive(Debug)]
enum IlocFieldSize {
    Zero,
    Four,
    Eight,
}

impl IlocFieldSize {
    const fn to_bits(&self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Four => 32,
            Self::Eight => 64,
        }
    }
}

impl TryFrom<u8> for IlocFieldSize {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(ContainerError::InvalidData("value must be in the set {0, 4, 8}")),
        }
    }
}

#[derive(PartialEq)]
enum IlocVersion {
    Zero,
    One,
    Two,
}

impl TryFrom<u8> for IlocVersion {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(ContainerError::Unsupported("unsupported version in 'iloc' box")),
        }
    }
}

/// Used for 'iloc' boxes
/// See ISO 14496-12:2015 § 8.11.3
/// `base_offset` is omitted since it is integrated into the ranges in `extents`
/// `data_reference_index` is omitted, since only 0 (i.e., this file) is supported
#[derive(Debug)]
struct ItemLocationBoxItem {
    item_id: u32,
    construction_method: ConstructionMethod,
    extents: TryVec<ExtentRange>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ConstructionMethod {
    /// Offsets are relative to the start of the file
    File,
    /// Offsets are relative to the start of the 'idat' payload
    Idat,
}

#[derive(Clone, Debug)]
enum ExtentRange {
    WithLength(Range<u64>),
    ToEnd(RangeFrom<u64>),
}

impl ExtentRange {
    const fn start(&self) -> u64 {
        match self {
            Self::WithLength(r) => r.start,
            Self::ToEnd(r) => r.start,
        }
    }
}

struct MetaBox {
    primary_item_id: u32,
    item_infos: TryVec<ItemInfoEntry>,
    iloc_items: TryVec<ItemLocationBoxItem>,
    item_references: TryVec<SingleItemTypeReferenceBox>,
    properties: TryVec<AssociatedProperty>,
    /// Absolute byte range of the 'idat' payload
    idat: Option<Range<u64>>,
}

/// Where boxes sit in the file, for validating item extents.
struct FileLayout {
    len: u64,
    /// 'ftyp' and 'meta'; item data must never point into them
    reserved: TryVec<Range<u64>>,
    /// Payload ranges of every 'mdat'
    mdats: TryVec<Range<u64>>,
    idat: Option<Range<u64>>,
}

impl FileLayout {
    fn resolve(&self, loc: &ItemLocationBoxItem, options: &ParseOptions) -> Result<TryVec<Range<usize>>> {
        let mut ranges = TryVec::with_capacity(loc.extents.len())?;
        for extent in loc.extents.iter() {
            let range = match loc.construction_method {
                ConstructionMethod::File => self.file_extent(extent, options)?,
                ConstructionMethod::Idat => self.idat_extent(extent)?,
            };
            trace!("item {} extent {range:?}", loc.item_id);
            ranges.push(usize::try_from(range.start)?..usize::try_from(range.end)?)?;
        }
        Ok(ranges)
    }

    fn file_extent(&self, extent: &ExtentRange, options: &ParseOptions) -> Result<Range<u64>> {
        let start = extent.start();
        let end = match extent {
            ExtentRange::WithLength(range) => range.end,
            ExtentRange::ToEnd(_) => self
                .mdats
                .iter()
                .find(|mdat| mdat.contains(&start))
                .map_or(self.len, |mdat| mdat.end),
        };
        if start >= end || end > self.len {
            return Err(ContainerError::OutOfBounds("item data extends past the end of the file"));
        }
        if self.reserved.iter().any(|r| start < r.end && r.start < end) {
            return Err(ContainerError::OutOfBounds("item data overlaps the ftyp or meta box"));
        }
        if !options.lenient && !self.mdats.iter().any(|m| m.start <= start && end <= m.end) {
            return Err(ContainerError::OutOfBounds("item data is not inside an mdat box"));
        }
        Ok(start..end)
    }

    fn idat_extent(&self, extent: &ExtentRange) -> Result<Range<u64>> {
        let idat = self.idat.as_ref().ok_or(ContainerError::MissingBox("idat"))?;
        let start = idat.start.checked_add(extent.start()).ok_or(ContainerError::SizeOverflow)?;
        let end = match extent {
            ExtentRange::WithLength(range) => idat.start.checked_add(range.end).ok_or(ContainerError::SizeOverflow)?,
            ExtentRange::ToEnd(_) => idat.end,
        };
        if start >= end || end > idat.end {
            return Err(ContainerError::OutOfBounds("item data extends past the idat box"));
        }
        Ok(start..end)
    }
}

/// Image spatial extents (dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageSpatialExtents {
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColourInformation {
    Nclx(Nclx),
    /// Restricted or unrestricted ICC profile; recorded, not applied
    Icc,
}

#[derive(Debug, PartialEq)]
enum ItemProperty {
    Channels(ArrayVec<u8, 16>),
    AuxiliaryType(AuxiliaryTypeProperty),
    ImageSpatialExtents(ImageSpatialExtents),
    Av1Config(Av1Config),
    HevcConfig(HevcConfig),
    Colour(ColourInformation),
    Rotation(u8),
    Mirror(MirrorAxis),
    Unsupported,
}

impl TryClone for ItemProperty {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(match self {
            Self::Channels(val) => Self::Channels(val.clone()),
            Self::AuxiliaryType(val) => Self::AuxiliaryType(val.try_clone()?),
            Self::ImageSpatialExtents(val) => Self::ImageSpatialExtents(*val),
            Self::Av1Config(val) => Self::Av1Config(val.try_clone()?),
            Self::HevcConfig(val) => Self::HevcConfig(val.try_clone()?),
            Self::Colour(val) => Self::Colour(*val),
            Self::Rotation(val) => Self::Rotation(*val),
            Self::Mirror(val) => Self::Mirror(*val),
            Self::Unsupported => Self::Unsupported,
        })
    }
}

struct Association {
    item_id: u32,
    essential: bool,
    property_index: u16,
}

struct AssociatedProperty {
    item_id: u32,
    property: ItemProperty,
}

#[derive(Debug, PartialEq)]
struct AuxiliaryTypeProperty {
    aux_data: TryString,
}

impl AuxiliaryTypeProperty {
    /// The URN, without the NUL terminator and any subtype bytes.
    fn aux_type(&self) -> &[u8] {
        match self.aux_data.iter().position(|&b| b == b'\0') {
            Some(pos) => &self.aux_data[..pos],
            None => &self.aux_data,
        }
    }
}

impl TryClone for AuxiliaryTypeProperty {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            aux_data: self.aux_data.try_clone()?,
        })
    }
}

/// Parsed `av1C` (AV1 codec configuration) property.
///
/// See AV1-ISOBMFF § 2.3
#[derive(Debug, PartialEq)]
pub struct Av1Config {
    /// `seq_profile`: 0 main, 1 high, 2 professional
    pub profile: u8,
    pub level: u8,
    pub tier: u8,
    /// 8, 10, or 12
    pub bit_depth: u8,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay: Option<u8>,
    /// Sequence header and metadata OBUs, possibly empty
    pub config_obus: TryVec<u8>,
}

impl Av1Config {
    /// Parse the body of an `av1C` box.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(body);
        let marker = r.read_bool()?;
        let version = r.read_u8(7)?;
        if !marker || version != 1 {
            return Err(ContainerError::Unsupported("av1C version"));
        }
        let profile = r.read_u8(3)?;
        let level = r.read_u8(5)?;
        let tier = r.read_u8(1)?;
        let high_bitdepth = r.read_bool()?;
        let twelve_bit = r.read_bool()?;
        let monochrome = r.read_bool()?;
        let chroma_subsampling_x = r.read_bool()?;
        let chroma_subsampling_y = r.read_bool()?;
        let chroma_sample_position = r.read_u8(2)?;
        let _reserved = r.read_u8(3)?;
        let initial_presentation_delay_present = r.read_bool()?;
        let initial_presentation_delay_minus_one = r.read_u8(4)?;

        let bit_depth = match (high_bitdepth, twelve_bit) {
            (false, _) => 8,
            (true, false) => 10,
            (true, true) => 12,
        };

        let mut config_obus = TryVec::new();
        config_obus.extend_from_slice(body.get(4..).ok_or(ContainerError::Truncated)?)?;

        Ok(Self {
            profile,
            level,
            tier,
            bit_depth,
            monochrome,
            chroma_subsampling_x,
            chroma_subsampling_y,
            chroma_sample_position,
            initial_presentation_delay: initial_presentation_delay_present.then_some(initial_presentation_delay_minus_one + 1),
            config_obus,
        })
    }

    #[must_use]
    pub fn chroma(&self) -> ChromaSampling {
        ChromaSampling::from_av1(self.monochrome, self.chroma_subsampling_x, self.chroma_subsampling_y)
    }
}

impl TryClone for Av1Config {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            config_obus: self.config_obus.try_clone()?,
            ..*self
        })
    }
}

/// Parsed `hvcC` (HEVC decoder configuration record) property.
///
/// The record is kept verbatim in `raw` so it can be handed to a decoder or
/// written back out unchanged.
///
/// See ISO 14496-15:2017 § 8.3.3
#[derive(Debug, PartialEq)]
pub struct HevcConfig {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    /// 1 Main, 2 Main 10, 3 Main Still Picture, 4 range extensions
    pub general_profile_idc: u8,
    pub general_level_idc: u8,
    /// 0 monochrome, 1 4:2:0, 2 4:2:2, 3 4:4:4
    pub chroma_format_idc: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    /// Size of the NAL unit length prefix in the item payload
    pub nal_length_size: u8,
    /// VPS, SPS and PPS units across all arrays
    pub parameter_set_count: usize,
    pub raw: TryVec<u8>,
}

impl HevcConfig {
    /// Parse the body of an `hvcC` box.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(body);
        let version = r.read_u8(8)?;
        if version != 1 {
            warn!("hvcC configurationVersion {version}");
        }
        let general_profile_space = r.read_u8(2)?;
        let general_tier_flag = r.read_bool()?;
        let general_profile_idc = r.read_u8(5)?;
        let _compatibility_flags = r.read_u32(32)?;
        let _constraint_indicator_flags = r.read_u64(48)?;
        let general_level_idc = r.read_u8(8)?;
        let _min_spatial_segmentation = r.read_u16(16)?;
        let _parallelism_type = r.read_u8(8)?;
        let chroma_format_idc = r.read_u8(8)? & 0b11;
        let bit_depth_luma = (r.read_u8(8)? & 0b111) + 8;
        let bit_depth_chroma = (r.read_u8(8)? & 0b111) + 8;
        let _avg_frame_rate = r.read_u16(16)?;
        let nal_length_size = (r.read_u8(8)? & 0b11) + 1;
        let num_of_arrays = r.read_u8(8)?;

        let mut parameter_set_count = 0;
        for _ in 0..num_of_arrays {
            let _nal_unit_type = r.read_u8(8)? & 0x3f;
            let num_nalus = r.read_u16(16)?;
            for _ in 0..num_nalus {
                let len = r.read_u16(16)?;
                r.skip(u64::from(len) * 8)?;
                parameter_set_count += 1;
            }
        }

        let mut raw = TryVec::new();
        raw.extend_from_slice(body)?;

        Ok(Self {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_level_idc,
            chroma_format_idc,
            bit_depth_luma,
            bit_depth_chroma,
            nal_length_size,
            parameter_set_count,
            raw,
        })
    }

    #[must_use]
    pub fn chroma(&self) -> ChromaSampling {
        ChromaSampling::from_hevc(self.chroma_format_idc)
    }
}

impl TryClone for HevcConfig {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            raw: self.raw.try_clone()?,
            ..*self
        })
    }
}

/// Codec configuration record attached to a coded item.
#[derive(Debug, PartialEq)]
pub enum CodecConfigRecord {
    Av1(Av1Config),
    Hevc(HevcConfig),
}

impl CodecConfigRecord {
    #[must_use]
    pub fn bit_depth(&self) -> u8 {
        match self {
            Self::Av1(c) => c.bit_depth,
            Self::Hevc(c) => c.bit_depth_luma,
        }
    }

    #[must_use]
    pub fn chroma(&self) -> ChromaSampling {
        match self {
            Self::Av1(c) => c.chroma(),
            Self::Hevc(c) => c.chroma(),
        }
    }
}

impl TryClone for CodecConfigRecord {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(match self {
            Self::Av1(c) => Self::Av1(c.try_clone()?),
            Self::Hevc(c) => Self::Hevc(c.try_clone()?),
        })
    }
}

/// `colr` box of type `nclx`: CICP colour description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nclx {
    pub colour_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

impl Nclx {
    #[must_use]
    pub fn matrix(&self) -> MatrixCoefficients {
        MatrixCoefficients::from_cicp(self.matrix_coefficients)
    }
}

/// Axis of an `imir` mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAxis {
    /// Mirror about a vertical axis: left and right swap
    Vertical,
    /// Mirror about a horizontal axis: top and bottom swap
    Horizontal,
}

/// Display orientation: rotate first, then mirror.
///
/// Items whose `imir` is associated before `irot` are normalised to this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transform {
    /// Anti-clockwise rotation in quarter turns, 0 to 3
    pub rotation: u8,
    pub mirror: Option<MirrorAxis>,
}

impl Transform {
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rotation == 0 && self.mirror.is_none()
    }

    #[must_use]
    pub fn swaps_dimensions(&self) -> bool {
        self.rotation % 2 == 1
    }
}

/// What an item is for, relative to the primary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRole {
    Primary,
    Alpha,
    Depth,
    Thumbnail,
    /// Auxiliary image of another kind, e.g. a gain map
    Auxiliary,
    Other,
}

/// One decodable coded image item.
#[derive(Debug)]
pub struct ItemDescriptor {
    pub item_id: u32,
    pub codec: CodecType,
    pub role: ItemRole,
    /// Validated byte ranges of the compressed payload within the source buffer
    pub extents: TryVec<Range<usize>>,
    /// Coded width from `ispe`, 0 when absent (lenient mode only)
    pub width: u32,
    /// Coded height from `ispe`, 0 when absent (lenient mode only)
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: ChromaSampling,
    pub config: Option<CodecConfigRecord>,
    pub nclx: Option<Nclx>,
    pub has_icc: bool,
    pub alpha_item: Option<u32>,
    pub depth_item: Option<u32>,
    /// Colour samples are premultiplied by the alpha item (`prem` reference)
    pub premultiplied_alpha: bool,
    pub transform: Transform,
}

impl ItemDescriptor {
    /// Width and height after rotation.
    #[must_use]
    pub fn display_size(&self) -> (u32, u32) {
        if self.transform.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Total compressed size in bytes.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.extents.iter().map(|r| r.len()).sum()
    }
}

/// Parsed structure of a HEIF or AVIF file, borrowing the input.
///
/// Only structure is recorded; payloads are sliced from the source on demand.
///
/// ```no_run
/// use heif_coder::{CodecConfig, ContainerHandle};
///
/// let bytes = std::fs::read("image.heic")?;
/// let handle = ContainerHandle::parse(&bytes, &CodecConfig::default())?;
/// let primary = handle.primary();
/// let payload = handle.item_data(primary)?; // Cow::Borrowed for single-extent
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ContainerHandle<'a> {
    source: &'a [u8],
    format: ImageFormat,
    /// Coded items, primary first
    items: TryVec<ItemDescriptor>,
}

impl fmt::Debug for ContainerHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("source_len", &self.source.len())
            .field("format", &self.format)
            .field("items", &self.items)
            .finish()
    }
}

impl<'a> ContainerHandle<'a> {
    /// Parse the box structure of `data` and describe its coded image items.
    pub fn parse(data: &'a [u8], config: &CodecConfig) -> Result<Self> {
        let options = ParseOptions { lenient: !config.strict };
        let mut cursor = data;
        let mut f = OffsetReader::new(&mut cursor);
        let mut iter = BoxIter::new(&mut f);

        let mut reserved = TryVec::new();
        let mut mdats = TryVec::new();

        // 'ftyp' box must occur first; see ISO 14496-12:2015 § 4.3.1
        let brand_format = match iter.next_box()? {
            Some(mut b) if b.head.name == BoxType::FileTypeBox => {
                let start = b.offset() - b.head.offset;
                reserved.push(start..start + b.head.size)?;
                let ftyp = read_ftyp(&mut b, &options)?;
                check_parser_state(&mut b, &options)?;
                let format = ImageFormat::from_brands(
                    &ftyp.major_brand.value,
                    ftyp.compatible_brands.iter().map(|b| &b.value),
                );
                if format == ImageFormat::Unknown {
                    warn!("major_brand: {}", ftyp.major_brand);
                    return Err(ContainerError::InvalidData("ftyp has no HEIF or AVIF brand"));
                }
                format
            },
            Some(_) => return Err(ContainerError::InvalidData("'ftyp' box must occur first")),
            None => return Err(ContainerError::MissingBox("ftyp")),
        };

        let mut meta = None;

        while let Some(mut b) = iter.next_box()? {
            let start = b.offset() - b.head.offset;
            match b.head.name {
                BoxType::MetadataBox => {
                    if meta.is_some() {
                        return Err(ContainerError::InvalidData("There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1"));
                    }
                    reserved.push(start..start + b.head.size)?;
                    meta = Some(read_meta(&mut b, &options)?);
                },
                BoxType::MediaDataBox => {
                    let offset = b.offset();
                    mdats.push(offset..offset + b.bytes_left())?;
                    skip_box_content(&mut b)?;
                },
                _ => skip_box_content(&mut b)?,
            }

            check_parser_state(&mut b, &options)?;
        }

        let meta = meta.ok_or(ContainerError::MissingBox("meta"))?;
        let layout = FileLayout {
            len: data.len().to_u64(),
            reserved,
            mdats,
            idat: meta.idat.clone(),
        };
        let items = build_items(&meta, &layout, &options)?;

        let format = match items.first().map(|p| p.codec) {
            Some(CodecType::Av1) => ImageFormat::Avif,
            _ => ImageFormat::Heif,
        };
        if format != brand_format {
            debug!("brands say {brand_format}, primary item is {format}");
        }

        Ok(Self { source: data, format, items })
    }

    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// The buffer this handle was parsed from.
    #[must_use]
    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    #[must_use]
    pub fn primary(&self) -> &ItemDescriptor {
        // Parsing fails unless a primary descriptor was pushed first
        &self.items[0]
    }

    /// All coded image items, primary first.
    #[must_use]
    pub fn items(&self) -> &[ItemDescriptor] {
        &self.items
    }

    #[must_use]
    pub fn item(&self, item_id: u32) -> Option<&ItemDescriptor> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// The alpha plane item for `master`, if it has one.
    #[must_use]
    pub fn alpha_of(&self, master: &ItemDescriptor) -> Option<&ItemDescriptor> {
        master.alpha_item.and_then(|id| self.item(id))
    }

    #[must_use]
    pub fn depth_of(&self, master: &ItemDescriptor) -> Option<&ItemDescriptor> {
        master.depth_item.and_then(|id| self.item(id))
    }

    /// Compressed payload of `item`.
    ///
    /// Returns `Cow::Borrowed` for single-extent items, `Cow::Owned` for multi-extent.
    pub fn item_data(&self, item: &ItemDescriptor) -> Result<Cow<'a, [u8]>> {
        let source = self.source;
        let slice = |r: &Range<usize>| {
            source
                .get(r.clone())
                .ok_or(ContainerError::OutOfBounds("extent out of bounds in source buffer"))
        };
        match &item.extents[..] {
            [] => Err(ContainerError::InvalidData("item has no extents")),
            [single] => Ok(Cow::Borrowed(slice(single)?)),
            extents => {
                let mut data = std::vec::Vec::new();
                data.try_reserve_exact(item.data_len())
                    .map_err(|_| ContainerError::OutOfMemory)?;
                for extent in extents {
                    data.extend_from_slice(slice(extent)?);
                }
                Ok(Cow::Owned(data))
            },
        }
    }

    /// Summary of the primary image.
    #[must_use]
    pub fn info(&self) -> ImageInfo {
        let primary = self.primary();
        let (width, height) = primary.display_size();
        ImageInfo {
            format: self.format,
            codec: primary.codec,
            width,
            height,
            bit_depth: primary.bit_depth,
            chroma: primary.chroma,
            has_alpha: primary.alpha_item.is_some(),
            has_depth: primary.depth_item.is_some(),
            premultiplied_alpha: primary.premultiplied_alpha,
        }
    }
}

fn coded_type(item_type: FourCC) -> Option<CodecType> {
    match &item_type.value {
        b"hvc1" => Some(CodecType::Hevc),
        b"av01" => Some(CodecType::Av1),
        _ => None,
    }
}

fn build_items(meta: &MetaBox, layout: &FileLayout, options: &ParseOptions) -> Result<TryVec<ItemDescriptor>> {
    let primary = meta
        .item_infos
        .iter()
        .find(|x| x.item_id == meta.primary_item_id)
        .ok_or(ContainerError::InvalidData("primary_item_id not present in iinf box"))?;

    if primary.item_type.is_unset() {
        return Err(ContainerError::InvalidData("primary item has no item type"));
    }
    if coded_type(primary.item_type).is_none() {
        warn!("primary_item_id type: {}", primary.item_type);
        return Err(match &primary.item_type.value {
            b"grid" | b"iden" | b"iovl" => ContainerError::Unsupported("derived primary images are not supported"),
            _ => ContainerError::Unsupported("primary item type is not hvc1 or av01"),
        });
    }

    for r in meta.item_references.iter() {
        for id in [r.from_item_id, r.to_item_id] {
            if !meta.item_infos.iter().any(|i| i.item_id == id) {
                warn!("{} reference {} -> {}", r.item_type, r.from_item_id, r.to_item_id);
                return Err(ContainerError::InvalidData("iref references an item missing from iinf"));
            }
        }
    }

    let mut items = TryVec::new();
    items.push(describe(meta, layout, primary, ItemRole::Primary, options)?)?;
    for info in meta.item_infos.iter() {
        if info.item_id == meta.primary_item_id {
            continue;
        }
        if coded_type(info.item_type).is_none() {
            trace!("skipping item {} of type {}", info.item_id, info.item_type);
            continue;
        }
        let role = item_role(meta, info.item_id);
        items.push(describe(meta, layout, info, role, options)?)?;
    }
    Ok(items)
}

fn aux_type_of(meta: &MetaBox, item_id: u32) -> Option<&[u8]> {
    meta.properties.iter().find_map(|p| match &p.property {
        ItemProperty::AuxiliaryType(aux) if p.item_id == item_id => Some(aux.aux_type()),
        _ => None,
    })
}

fn item_role(meta: &MetaBox, item_id: u32) -> ItemRole {
    let references = |kind: &[u8; 4]| {
        meta.item_references
            .iter()
            .any(|r| r.from_item_id == item_id && r.item_type == kind)
    };
    if references(b"auxl") {
        match aux_type_of(meta, item_id) {
            Some(urn) if ALPHA_URNS.contains(&urn) => ItemRole::Alpha,
            Some(urn) if DEPTH_URNS.contains(&urn) => ItemRole::Depth,
            _ => ItemRole::Auxiliary,
        }
    } else if references(b"thmb") {
        ItemRole::Thumbnail
    } else {
        ItemRole::Other
    }
}

/// The coded auxiliary item of `master` whose `auxC` type is one of `urns`.
fn auxiliary_of(meta: &MetaBox, master: u32, urns: &[&[u8]]) -> Option<u32> {
    meta.item_references
        .iter()
        .filter(|r| r.item_type == b"auxl" && r.to_item_id == master)
        .map(|r| r.from_item_id)
        .find(|&id| {
            let coded = meta.item_infos.iter().any(|i| i.item_id == id && coded_type(i.item_type).is_some());
            coded && aux_type_of(meta, id).is_some_and(|urn| urns.contains(&urn))
        })
}

fn describe(
    meta: &MetaBox,
    layout: &FileLayout,
    info: &ItemInfoEntry,
    role: ItemRole,
    options: &ParseOptions,
) -> Result<ItemDescriptor> {
    let codec = coded_type(info.item_type).ok_or(ContainerError::Unsupported("item type is not hvc1 or av01"))?;
    let location = meta
        .iloc_items
        .iter()
        .find(|l| l.item_id == info.item_id)
        .ok_or(ContainerError::InvalidData("item not found in iloc"))?;
    let extents = layout.resolve(location, options)?;

    let mut extents_prop = None;
    let mut pixi_depth = None;
    let mut config = None;
    let mut nclx = None;
    let mut has_icc = false;
    let mut transform = Transform::default();

    for prop in meta.properties.iter().filter(|p| p.item_id == info.item_id) {
        match &prop.property {
            ItemProperty::ImageSpatialExtents(e) => extents_prop = Some(*e),
            ItemProperty::Channels(channels) => pixi_depth = channels.first().copied(),
            ItemProperty::Av1Config(c) if codec == CodecType::Av1 => {
                config = Some(CodecConfigRecord::Av1(c.try_clone()?));
            },
            ItemProperty::HevcConfig(c) if codec == CodecType::Hevc => {
                config = Some(CodecConfigRecord::Hevc(c.try_clone()?));
            },
            ItemProperty::Av1Config(_) | ItemProperty::HevcConfig(_) => {
                if !options.lenient {
                    return Err(ContainerError::InvalidData("codec configuration does not match the item type"));
                }
                warn!("item {} has a configuration for another codec", info.item_id);
            },
            ItemProperty::Colour(ColourInformation::Nclx(n)) => nclx = Some(*n),
            ItemProperty::Colour(ColourInformation::Icc) => has_icc = true,
            // Mirror then rotate by r is the same as rotate by -r then mirror
            ItemProperty::Rotation(r) if transform.mirror.is_some() => transform.rotation = (4 - r) % 4,
            ItemProperty::Rotation(r) => transform.rotation = *r,
            ItemProperty::Mirror(axis) => transform.mirror = Some(*axis),
            ItemProperty::AuxiliaryType(_) | ItemProperty::Unsupported => {},
        }
    }

    if config.is_none() {
        if !options.lenient {
            return Err(ContainerError::InvalidData("image item has no codec configuration property"));
        }
        warn!("item {} has no codec configuration", info.item_id);
    }
    let (width, height) = match extents_prop {
        Some(e) => (e.width, e.height),
        None if !options.lenient => return Err(ContainerError::InvalidData("image item has no 'ispe' property")),
        None => {
            warn!("item {} has no ispe", info.item_id);
            (0, 0)
        },
    };

    let bit_depth = config.as_ref().map(CodecConfigRecord::bit_depth).or(pixi_depth).unwrap_or(8);
    let chroma = config.as_ref().map_or(ChromaSampling::Cs420, CodecConfigRecord::chroma);

    let alpha_item = auxiliary_of(meta, info.item_id, &ALPHA_URNS);
    let depth_item = auxiliary_of(meta, info.item_id, &DEPTH_URNS);
    let premultiplied_alpha = alpha_item.is_some_and(|alpha_id| {
        meta.item_references.iter().any(|r| {
            r.from_item_id == info.item_id && r.to_item_id == alpha_id && r.item_type == b"prem"
        })
    });

    debug!(
        "item {} {codec:?} {role:?} {width}x{height} {bit_depth} bit {chroma:?}, alpha {alpha_item:?}",
        info.item_id
    );

    Ok(ItemDescriptor {
        item_id: info.item_id,
        codec,
        role,
        extents,
        width,
        height,
        bit_depth,
        chroma,
        config,
        nclx,
        has_icc,
        alpha_item,
        depth_item,
        premultiplied_alpha,
        transform,
    })
}

/// See ISO 14496-12:2015 § 4.2
struct BMFFBox<'a, T> {
    head: BoxHeader,
    content: Take<&'a mut T>,
}

impl<T: Read> BMFFBox<'_, T> {
    fn read_into_try_vec(&mut self) -> std::io::Result<TryVec<u8>> {
        let limit = usize::try_from(self.content.limit()).map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        let mut vec = std::vec::Vec::new();
        vec.try_reserve_exact(limit)
            .map_err(|_| std::io::ErrorKind::OutOfMemory)?;
        self.content.read_to_end(&mut vec)?; // The default impl
        Ok(vec.into())
    }
}

struct BoxIter<'a, T> {
    src: &'a mut T,
}

impl<T: Read + Remaining> BoxIter<'_, T> {
    fn new(src: &mut T) -> BoxIter<'_, T> {
        BoxIter { src }
    }

    fn next_box(&mut self) -> Result<Option<BMFFBox<'_, T>>> {
        let available = self.src.remaining();
        if available == 0 {
            return Ok(None);
        }
        let h = read_box_header(self.src, available)?;
        Ok(Some(BMFFBox {
            head: h,
            content: self.src.take(h.size - h.offset),
        }))
    }
}

impl<T: Read> Read for BMFFBox<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<T: Offset> Offset for BMFFBox<'_, T> {
    fn offset(&self) -> u64 {
        self.content.get_ref().offset()
    }
}

impl<T> Remaining for BMFFBox<'_, T> {
    fn remaining(&self) -> u64 {
        self.content.limit()
    }
}

impl<T: Read> BMFFBox<'_, T> {
    fn bytes_left(&self) -> u64 {
        self.content.limit()
    }

    const fn get_header(&self) -> &BoxHeader {
        &self.head
    }

    fn box_iter(&mut self) -> BoxIter<'_, Self> {
        BoxIter::new(self)
    }
}

impl<T> Drop for BMFFBox<'_, T> {
    fn drop(&mut self) {
        if self.content.limit() > 0 {
            let name: FourCC = From::from(self.head.name);
            debug!("Dropping {} bytes in '{}'", self.content.limit(), name);
        }
    }
}

/// Read and parse a box header.
///
/// `available` is what is left of the enclosing container (or the file). A box
/// claiming more than that is truncated; size=0 boxes take all of it.
///
/// See ISO 14496-12:2015 § 4.2
fn read_box_header<T: ReadBytesExt>(src: &mut T, available: u64) -> Result<BoxHeader> {
    let size32 = be_u32(src)?;
    let name = BoxType::from(be_u32(src)?);
    let (size, offset) = match size32 {
        0 => (available, BoxHeader::MIN_SIZE),
        1 => {
            let size64 = be_u64(src)?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(ContainerError::SizeOverflow);
            }
            (size64, BoxHeader::MIN_LARGE_SIZE)
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(ContainerError::SizeOverflow);
            }
            (u64::from(size32), BoxHeader::MIN_SIZE)
        },
    };
    if size > available {
        debug!("{name:?} claims {size} bytes, {available} available");
        return Err(ContainerError::Truncated);
    }
    Ok(BoxHeader { name, size, offset })
}

/// Parse the extra header fields for a full box.
fn read_fullbox_extra<T: ReadBytesExt>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags_a = src.read_u8()?;
    let flags_b = src.read_u8()?;
    let flags_c = src.read_u8()?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

// Parse the extra fields for a full box whose flag fields must be zero.
fn read_fullbox_version_no_flags<T: ReadBytesExt>(src: &mut T, options: &ParseOptions) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;

    if flags != 0 {
        if !options.lenient {
            return Err(ContainerError::Unsupported("expected flags to be 0"));
        }
        warn!("ignoring flags {flags:#x}");
    }

    Ok(version)
}

/// Skip over the entire contents of a box.
fn skip_box_content<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    // Skip the contents of unknown chunks.
    let to_skip = {
        let header = src.get_header();
        trace!("{header:?} (skipped)");
        header
            .size
            .checked_sub(header.offset)
            .ok_or(ContainerError::InvalidData("header offset > size"))?
    };
    debug_assert_eq!(to_skip, src.bytes_left());
    skip(src, to_skip)
}

/// Skip over the remain data of a box.
fn skip_box_remain<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<()> {
    let remain = {
        let header = src.get_header();
        let len = src.bytes_left();
        trace!("remain {len} (skipped) in {header:?}");
        len
    };
    skip(src, remain)
}

/// Parse an ftyp box.
/// See ISO 14496-12:2015 § 4.3
fn read_ftyp<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<FileTypeBox> {
    let major = be_u32(src)?;
    let _minor = be_u32(src)?;
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        if !options.lenient {
            return Err(ContainerError::InvalidData("invalid ftyp size"));
        }
        warn!("ftyp brand list is not a multiple of 4 bytes");
    }
    let brand_count = bytes_left / 4;
    let mut brands = TryVec::with_capacity(brand_count.try_into()?)?;
    for _ in 0..brand_count {
        brands.push(be_u32(src)?.into())?;
    }
    Ok(FileTypeBox {
        major_brand: From::from(major),
        compatible_brands: brands,
    })
}

/// Parse a metadata box in the context of a HEIF image
/// See ISO 23008-12:2017 § 6.2
fn read_meta<T: Read + Offset>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<MetaBox> {
    let version = read_fullbox_version_no_flags(src, options)?;

    if version != 0 {
        return Err(ContainerError::Unsupported("unsupported meta version"));
    }

    let mut handler = None;
    let mut primary_item_id = None;
    let mut item_infos = None;
    let mut iloc_items = None;
    let mut item_references = TryVec::new();
    let mut properties = TryVec::new();
    let mut idat = None;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::HandlerBox => {
                handler = Some(read_hdlr(&mut b, options)?);
            },
            BoxType::ItemInfoBox => {
                if item_infos.is_some() {
                    return Err(ContainerError::InvalidData("There should be zero or one iinf boxes per ISO 14496-12:2015 § 8.11.6.1"));
                }
                item_infos = Some(read_iinf(&mut b, options)?);
            },
            BoxType::ItemLocationBox => {
                if iloc_items.is_some() {
                    return Err(ContainerError::InvalidData("There should be zero or one iloc boxes per ISO 14496-12:2015 § 8.11.3.1"));
                }
                iloc_items = Some(read_iloc(&mut b, options)?);
            },
            BoxType::PrimaryItemBox => {
                if primary_item_id.is_some() {
                    return Err(ContainerError::InvalidData("There should be zero or one pitm boxes per ISO 14496-12:2015 § 8.11.4.1"));
                }
                primary_item_id = Some(read_pitm(&mut b, options)?);
            },
            BoxType::ItemReferenceBox => {
                item_references.append(&mut read_iref(&mut b, options)?)?;
            },
            BoxType::ItemPropertiesBox => {
                properties = read_iprp(&mut b, options)?;
            },
            BoxType::ItemDataBox => {
                if idat.is_some() {
                    return Err(ContainerError::InvalidData("There should be zero or one idat boxes"));
                }
                let start = b.offset();
                idat = Some(start..start + b.bytes_left());
                skip_box_content(&mut b)?;
            },
            _ => skip_box_content(&mut b)?,
        }

        check_parser_state(&mut b, options)?;
    }

    match handler {
        Some(h) if h.handler_type != b"pict" => {
            warn!("handler_type: {}", h.handler_type);
            if !options.lenient {
                return Err(ContainerError::InvalidData("meta handler type is not 'pict'"));
            }
        },
        Some(_) => {},
        None if !options.lenient => return Err(ContainerError::MissingBox("hdlr")),
        None => warn!("meta has no hdlr"),
    }

    Ok(MetaBox {
        primary_item_id: primary_item_id.ok_or(ContainerError::MissingBox("pitm"))?,
        item_infos: item_infos.ok_or(ContainerError::MissingBox("iinf"))?,
        iloc_items: iloc_items.ok_or(ContainerError::MissingBox("iloc"))?,
        item_references,
        properties,
        idat,
    })
}

/// Parse a Handler Reference Box
/// See ISO 14496-12:2015 § 8.4.3
fn read_hdlr<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<HandlerBox> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(ContainerError::Unsupported("hdlr version"));
    }
    let _pre_defined = be_u32(src)?;
    let handler_type = FourCC::from(be_u32(src)?);
    for _ in 0..3 {
        let _reserved = be_u32(src)?;
    }
    // Null-terminated name
    skip_box_remain(src)?;
    Ok(HandlerBox { handler_type })
}

/// Parse a Primary Item Box
/// See ISO 14496-12:2015 § 8.11.4
fn read_pitm<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src, options)?;

    let item_id = match version {
        0 => be_u16(src)?.into(),
        1 => be_u32(src)?,
        _ => return Err(ContainerError::Unsupported("unsupported pitm version")),
    };

    Ok(item_id)
}

/// Parse an Item Information Box
/// See ISO 14496-12:2015 § 8.11.6
fn read_iinf<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<TryVec<ItemInfoEntry>> {
    let version = read_fullbox_version_no_flags(src, options)?;

    match version {
        0 | 1 => (),
        _ => return Err(ContainerError::Unsupported("unsupported iinf version")),
    }

    let entry_count = if version == 0 {
        be_u16(src)?.to_usize()
    } else {
        be_u32(src)?.to_usize()
    };
    let mut item_infos = TryVec::with_capacity(entry_count.min(4096))?;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != BoxType::ItemInfoEntry {
            return Err(ContainerError::InvalidData("iinf box should contain only infe boxes"));
        }

        item_infos.push(read_infe(&mut b)?)?;

        check_parser_state(&mut b, options)?;
    }

    if item_infos.len() != entry_count {
        warn!("iinf declares {entry_count} entries, found {}", item_infos.len());
    }

    Ok(item_infos)
}

/// Parse an Item Info Entry
/// See ISO 14496-12:2015 § 8.11.6.2
fn read_infe<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<ItemInfoEntry> {
    // According to the standard, it seems the flags field should be 0, but
    // some encoders set the hidden bit.
    let (version, _) = read_fullbox_extra(src)?;

    // mif1 brand (see ISO 23008-12:2017 § 10.2.1) only requires v2 and 3
    let item_id = match version {
        2 => be_u16(src)?.into(),
        3 => be_u32(src)?,
        _ => return Err(ContainerError::Unsupported("unsupported version in 'infe' box")),
    };

    let item_protection_index = be_u16(src)?;

    if item_protection_index != 0 {
        return Err(ContainerError::Unsupported("protected items (infe.item_protection_index != 0) are not supported"));
    }

    let item_type = FourCC::from(be_u32(src)?);
    debug!("infe item_id {item_id} item_type: {item_type}");

    // Item name and MIME fields follow
    skip_box_remain(src)?;

    Ok(ItemInfoEntry { item_id, item_type })
}

/// Parse an Item Reference Box
/// See ISO 14496-12:2015 § 8.11.12
fn read_iref<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<TryVec<SingleItemTypeReferenceBox>> {
    let mut item_references = TryVec::new();
    let version = read_fullbox_version_no_flags(src, options)?;
    if version > 1 {
        return Err(ContainerError::Unsupported("iref version"));
    }

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        let from_item_id = if version == 0 {
            be_u16(&mut b)?.into()
        } else {
            be_u32(&mut b)?
        };
        let reference_count = be_u16(&mut b)?;
        for _ in 0..reference_count {
            let to_item_id = if version == 0 {
                be_u16(&mut b)?.into()
            } else {
                be_u32(&mut b)?
            };
            if from_item_id == to_item_id {
                return Err(ContainerError::InvalidData("from_item_id and to_item_id must be different"));
            }
            item_references.push(SingleItemTypeReferenceBox {
                item_type: b.head.name.into(),
                from_item_id,
                to_item_id,
            })?;
        }
        check_parser_state(&mut b, options)?;
    }
    Ok(item_references)
}

/// Parse an Item Properties Box
/// See ISO 23008-12:2017 § 9.3.1
fn read_iprp<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<TryVec<AssociatedProperty>> {
    let mut iter = src.box_iter();
    let mut properties = TryVec::new();
    let mut associations = TryVec::new();

    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::ItemPropertyContainerBox => {
                properties = read_ipco(&mut b, options)?;
            },
            BoxType::ItemPropertyAssociationBox => {
                associations.append(&mut read_ipma(&mut b)?)?;
            },
            _ => return Err(ContainerError::InvalidData("unexpected iprp child")),
        }
        check_parser_state(&mut b, options)?;
    }

    let mut associated = TryVec::new();
    for a in associations {
        let index = match a.property_index {
            0 => continue,
            x => usize::from(x) - 1,
        };
        match properties.get(index) {
            Some(ItemProperty::Unsupported) => {
                if a.essential {
                    warn!("item {} has an unsupported essential property", a.item_id);
                }
            },
            Some(prop) => {
                associated.push(AssociatedProperty {
                    item_id: a.item_id,
                    property: prop.try_clone()?,
                })?;
            },
            None if !options.lenient => {
                return Err(ContainerError::InvalidData("ipma references a property missing from ipco"));
            },
            None => warn!("item {} references missing property {}", a.item_id, a.property_index),
        }
    }
    Ok(associated)
}

/// Parse an Item Property Association Box
/// See ISO 23008-12:2017 § 9.3.2
fn read_ipma<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<TryVec<Association>> {
    let (version, flags) = read_fullbox_extra(src)?;
    if version > 1 {
        return Err(ContainerError::Unsupported("ipma version"));
    }

    let mut associations = TryVec::new();

    let entry_count = be_u32(src)?;
    for _ in 0..entry_count {
        let item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        let association_count = src.read_u8()?;
        for _ in 0..association_count {
            let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
            let association = &mut [0; 2][..num_association_bytes];
            src.read_exact(association)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u16(association.remaining().try_into()?)?;
            associations.push(Association {
                item_id,
                essential,
                property_index,
            })?;
        }
    }
    Ok(associations)
}

/// Parse an Item Property Container Box
/// See ISO 23008-12:2017 § 9.3.1
fn read_ipco<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<TryVec<ItemProperty>> {
    let mut properties = TryVec::new();

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        // Must push for every property to have correct index for them
        let prop = match b.head.name {
            BoxType::PixelInformationBox => ItemProperty::Channels(read_pixi(&mut b, options)?),
            BoxType::AuxiliaryTypeProperty => ItemProperty::AuxiliaryType(read_auxc(&mut b, options)?),
            BoxType::ImageSpatialExtentsBox => ItemProperty::ImageSpatialExtents(read_ispe(&mut b, options)?),
            BoxType::AV1CodecConfigurationBox => ItemProperty::Av1Config(Av1Config::parse(&b.read_into_try_vec()?)?),
            BoxType::HEVCConfigurationBox => ItemProperty::HevcConfig(HevcConfig::parse(&b.read_into_try_vec()?)?),
            BoxType::ColourInformationBox => match read_colr(&mut b)? {
                Some(colour) => ItemProperty::Colour(colour),
                None => ItemProperty::Unsupported,
            },
            BoxType::ImageRotationBox => ItemProperty::Rotation(src_u8(&mut b)? & 0b11),
            BoxType::ImageMirrorBox => ItemProperty::Mirror(if src_u8(&mut b)? & 1 == 0 {
                MirrorAxis::Vertical
            } else {
                MirrorAxis::Horizontal
            }),
            _ => {
                skip_box_remain(&mut b)?;
                ItemProperty::Unsupported
            },
        };
        check_parser_state(&mut b, options)?;
        properties.push(prop)?;
    }
    Ok(properties)
}

fn src_u8<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<u8> {
    src.read_u8().map_err(From::from)
}

fn read_pixi<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<ArrayVec<u8, 16>> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(ContainerError::Unsupported("pixi version"));
    }

    let num_channels = usize::from(src.read_u8()?);
    if num_channels > 16 {
        return Err(ContainerError::InvalidData("invalid num_channels"));
    }
    let mut channels = ArrayVec::new();
    channels.extend((0..num_channels).map(|_| 0));
    src.read_exact(&mut channels)?;

    Ok(channels)
}

fn read_auxc<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<AuxiliaryTypeProperty> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(ContainerError::Unsupported("auxC version"));
    }

    let aux_data = src.read_into_try_vec()?;

    Ok(AuxiliaryTypeProperty { aux_data })
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<ImageSpatialExtents> {
    let _version = read_fullbox_version_no_flags(src, options)?;

    let width = be_u32(src)?;
    let height = be_u32(src)?;

    // 0×0 images are invalid
    if width == 0 || height == 0 {
        return Err(ContainerError::InvalidData("ispe dimensions cannot be zero"));
    }

    Ok(ImageSpatialExtents { width, height })
}

/// Parse a Colour Information box. `None` for colour types we don't know.
/// See ISO 14496-12:2015 § 12.1.5
fn read_colr<T: Read>(src: &mut BMFFBox<'_, T>) -> Result<Option<ColourInformation>> {
    let colour_type = FourCC::from(be_u32(src)?);
    match &colour_type.value {
        b"nclx" => {
            let colour_primaries = be_u16(src)?;
            let transfer_characteristics = be_u16(src)?;
            let matrix_coefficients = be_u16(src)?;
            let full_range = src.read_u8()? & 0x80 != 0;
            Ok(Some(ColourInformation::Nclx(Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range,
            })))
        },
        b"rICC" | b"prof" => {
            skip_box_remain(src)?;
            Ok(Some(ColourInformation::Icc))
        },
        _ => {
            debug!("colr type {colour_type}");
            skip_box_remain(src)?;
            Ok(None)
        },
    }
}

/// Parse an iloc box.
/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<TryVec<ItemLocationBoxItem>> {
    let version: IlocVersion = read_fullbox_version_no_flags(src, options)?.try_into()?;

    let iloc = src.read_into_try_vec()?;
    let mut iloc = BitReader::new(&iloc);

    let offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let length_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let base_offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;

    let index_size: Option<IlocFieldSize> = match version {
        IlocVersion::One | IlocVersion::Two => Some(iloc.read_u8(4)?.try_into()?),
        IlocVersion::Zero => {
            let _reserved = iloc.read_u8(4)?;
            None
        },
    };

    let item_count = match version {
        IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
        IlocVersion::Two => iloc.read_u32(32)?,
    };

    let mut items = TryVec::with_capacity(item_count.to_usize().min(4096))?;

    for _ in 0..item_count {
        let item_id = match version {
            IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
            IlocVersion::Two => iloc.read_u32(32)?,
        };

        // Version 0 has no construction_method field and uses file offsets.
        let construction_method = match version {
            IlocVersion::Zero => ConstructionMethod::File,
            IlocVersion::One | IlocVersion::Two => {
                let _reserved = iloc.read_u16(12)?;
                match iloc.read_u16(4)? {
                    0 => ConstructionMethod::File,
                    1 => ConstructionMethod::Idat,
                    2 => return Err(ContainerError::Unsupported("construction_method 'item_offset' is not supported")),
                    _ => return Err(ContainerError::InvalidData("construction_method is taken from the set 0, 1 or 2 per ISO 14496-12:2015 § 8.11.3.3")),
                }
            },
        };

        let data_reference_index = iloc.read_u16(16)?;

        if data_reference_index != 0 {
            return Err(ContainerError::Unsupported("external file references (iloc.data_reference_index != 0) are not supported"));
        }

        let base_offset = iloc.read_u64(base_offset_size.to_bits())?;
        let extent_count = iloc.read_u16(16)?;

        if extent_count < 1 {
            return Err(ContainerError::InvalidData("extent_count must have a value 1 or greater per ISO 14496-12:2015 § 8.11.3.3"));
        }

        let mut extents = TryVec::with_capacity(extent_count.to_usize())?;

        for _ in 0..extent_count {
            // Only meaningful for construction_method 2
            if let Some(index_size) = &index_size {
                let _extent_index = iloc.read_u64(index_size.to_bits())?;
            }

            // A zero-length offset field implies offset 0, which follows from
            // BitReader::read_u64(0) -> 0.
            let extent_offset = iloc.read_u64(offset_size.to_bits())?;
            let extent_length = iloc.read_u64(length_size.to_bits())?;

            // A length of zero means the rest of the source
            let start = base_offset
                .checked_add(extent_offset)
                .ok_or(ContainerError::SizeOverflow)?;
            let extent_range = if extent_length == 0 {
                ExtentRange::ToEnd(RangeFrom { start })
            } else {
                let end = start
                    .checked_add(extent_length)
                    .ok_or(ContainerError::SizeOverflow)?;
                ExtentRange::WithLength(Range { start, end })
            };

            extents.push(extent_range)?;
        }

        items.push(ItemLocationBoxItem { item_id, construction_method, extents })?;
    }

    if iloc.remaining() == 0 {
        Ok(items)
    } else {
        Err(ContainerError::InvalidData("invalid iloc size"))
    }
}

/// Finish a box: unread content is an error, or skipped in lenient mode.
fn check_parser_state<T: Read>(src: &mut BMFFBox<'_, T>, options: &ParseOptions) -> Result<()> {
    let limit = src.bytes_left();
    if limit == 0 {
        return Ok(());
    }
    if options.lenient {
        warn!("skipping {limit} unread bytes in {:?}", src.head.name);
        skip(src, limit)
    } else {
        Err(ContainerError::InvalidData("unread box content or bad parser sync"))
    }
}

/// Skip a number of bytes that we don't care to parse.
fn skip<T: Read>(src: &mut T, bytes: u64) -> Result<()> {
    std::io::copy(&mut src.take(bytes), &mut std::io::sink())?;
    Ok(())
}

fn be_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<byteorder::BigEndian>().map_err(From::from)
}

fn be_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<byteorder::BigEndian>().map_err(From::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(name: &[u8; 4], parts: &[&[u8]]) -> std::vec::Vec<u8> {
        let len = 8 + parts.iter().map(|p| p.len()).sum::<usize>();
        let mut v = (len as u32).to_be_bytes().to_vec();
        v.extend_from_slice(name);
        for p in parts {
            v.extend_from_slice(p);
        }
        v
    }

    fn fullbox(name: &[u8; 4], version: u8, parts: &[&[u8]]) -> std::vec::Vec<u8> {
        let mut body = vec![version, 0, 0, 0];
        for p in parts {
            body.extend_from_slice(p);
        }
        bx(name, &[&body])
    }

    fn infe(id: u16, item_type: &[u8; 4]) -> std::vec::Vec<u8> {
        fullbox(b"infe", 2, &[&id.to_be_bytes(), &[0, 0], item_type, b"\0"])
    }

    fn ispe(w: u32, h: u32) -> std::vec::Vec<u8> {
        fullbox(b"ispe", 0, &[&w.to_be_bytes(), &h.to_be_bytes()])
    }

    const AV1C: [u8; 4] = [0x81, 0x00, 0x0c, 0x00];
    const PAYLOAD: &[u8] = b"\x0a\x0b\x00\x00\x00\x24\xc4\xff\xdf\x00\x68\x02";

    /// One `av01` item; `locate` maps the payload's offset and length to the iloc extent.
    struct Sample {
        item_type: [u8; 4],
        hdlr: bool,
        extra_props: std::vec::Vec<std::vec::Vec<u8>>,
        locate: fn(u32, u32) -> (u32, u32),
        /// Payload in 'idat' (construction method 1) rather than 'mdat'
        in_idat: bool,
        /// Payload split across two extents
        split: bool,
        /// 'mdat' written with a 64-bit size
        large_mdat: bool,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                item_type: *b"av01",
                hdlr: true,
                extra_props: vec![],
                locate: |o, l| (o, l),
                in_idat: false,
                split: false,
                large_mdat: false,
            }
        }
    }

    impl Sample {
        fn iloc(&self, offset: u32, len: u32) -> std::vec::Vec<u8> {
            if self.in_idat {
                return fullbox(b"iloc", 1, &[
                    &[0x44, 0x00],
                    &1u16.to_be_bytes(),
                    &1u16.to_be_bytes(),
                    &1u16.to_be_bytes(), // construction_method 1
                    &0u16.to_be_bytes(),
                    &1u16.to_be_bytes(),
                    &offset.to_be_bytes(),
                    &len.to_be_bytes(),
                ]);
            }
            let mut extents = std::vec::Vec::new();
            if self.split {
                let half = len / 2;
                extents.extend(2u16.to_be_bytes());
                for (o, l) in [(offset, half), (offset.wrapping_add(half), len - half)] {
                    extents.extend(o.to_be_bytes());
                    extents.extend(l.to_be_bytes());
                }
            } else {
                extents.extend(1u16.to_be_bytes());
                extents.extend(offset.to_be_bytes());
                extents.extend(len.to_be_bytes());
            }
            fullbox(b"iloc", 0, &[&[0x44, 0x00], &1u16.to_be_bytes(), &1u16.to_be_bytes(), &0u16.to_be_bytes(), extents.as_slice()])
        }

        fn meta(&self, offset: u32, len: u32) -> std::vec::Vec<u8> {
            let hdlr = fullbox(b"hdlr", 0, &[&[0; 4], b"pict", &[0; 12], b"\0"]);
            let pitm = fullbox(b"pitm", 0, &[&1u16.to_be_bytes()]);
            let iinf = fullbox(b"iinf", 0, &[&1u16.to_be_bytes(), infe(1, &self.item_type).as_slice()]);
            let iloc = self.iloc(offset, len);
            let mut props = vec![ispe(4, 2), bx(b"av1C", &[&AV1C])];
            props.extend(self.extra_props.iter().cloned());
            let ipco = bx(b"ipco", &props.iter().map(|p| p.as_slice()).collect::<std::vec::Vec<_>>());
            let mut assoc = vec![props.len() as u8];
            assoc.extend((1..=props.len() as u8).map(|i| i | 0x80));
            let ipma = fullbox(b"ipma", 0, &[&1u32.to_be_bytes(), &1u16.to_be_bytes(), assoc.as_slice()]);
            let iprp = bx(b"iprp", &[ipco.as_slice(), ipma.as_slice()]);
            let idat = bx(b"idat", &[PAYLOAD]);
            let mut children: std::vec::Vec<&[u8]> = vec![];
            if self.hdlr {
                children.push(hdlr.as_slice());
            }
            children.extend([pitm.as_slice(), iinf.as_slice(), iloc.as_slice(), iprp.as_slice()]);
            if self.in_idat {
                children.push(idat.as_slice());
            }
            fullbox(b"meta", 0, &children)
        }

        fn build(&self) -> std::vec::Vec<u8> {
            let ftyp = bx(b"ftyp", &[b"avif", &[0; 4], b"avif", b"mif1", b"miaf"]);
            let meta_len = self.meta(0, 0).len();
            let mdat_header = if self.large_mdat { 16 } else { 8 };
            let offset = if self.in_idat { 0 } else { (ftyp.len() + meta_len + mdat_header) as u32 };
            let (offset, len) = (self.locate)(offset, PAYLOAD.len() as u32);
            let mut data = [ftyp, self.meta(offset, len)].concat();
            if self.in_idat {
                return data;
            }
            if self.large_mdat {
                data.extend(1u32.to_be_bytes());
                data.extend(b"mdat");
                data.extend(((16 + PAYLOAD.len()) as u64).to_be_bytes());
                data.extend(PAYLOAD);
            } else {
                data.extend(bx(b"mdat", &[PAYLOAD]));
            }
            data
        }
    }

    fn parse(data: &[u8]) -> Result<ContainerHandle<'_>> {
        let _ = env_logger::builder().is_test(true).try_init();
        ContainerHandle::parse(data, &CodecConfig::default())
    }

    #[test]
    fn box_read_to_end() {
        let tmp = &mut b"1234567890".as_slice();
        let mut src = BMFFBox {
            head: BoxHeader { name: BoxType::FileTypeBox, size: 5, offset: 0 },
            content: <_ as Read>::take(tmp, 5),
        };
        let buf = src.read_into_try_vec().unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf, b"12345".as_ref());
    }

    #[test]
    fn minimal_avif() {
        let data = Sample::default().build();
        let handle = parse(&data).unwrap();
        assert_eq!(handle.format(), ImageFormat::Avif);
        let primary = handle.primary();
        assert_eq!(primary.item_id, 1);
        assert_eq!(primary.codec, CodecType::Av1);
        assert_eq!(primary.role, ItemRole::Primary);
        assert_eq!((primary.width, primary.height), (4, 2));
        assert_eq!(primary.bit_depth, 8);
        assert_eq!(primary.chroma, ChromaSampling::Cs420);
        assert!(primary.alpha_item.is_none());

        let payload = handle.item_data(primary).unwrap();
        assert!(matches!(payload, Cow::Borrowed(_)));
        assert_eq!(&*payload, PAYLOAD);
        assert_eq!(handle.info().width, 4);
    }

    #[test]
    fn truncated_ftyp() {
        let data = b"\x00\x00\x00\x18ftypheic";
        assert!(matches!(parse(data), Err(ContainerError::Truncated)));
    }

    #[test]
    fn ftyp_must_come_first() {
        let mut data = bx(b"free", &[]);
        data.extend(Sample::default().build());
        assert!(matches!(parse(&data), Err(ContainerError::InvalidData(_))));
    }

    #[test]
    fn box_smaller_than_header() {
        let mut data = Sample::default().build();
        data.extend_from_slice(b"\x00\x00\x00\x04free");
        assert!(matches!(parse(&data), Err(ContainerError::SizeOverflow)));
    }

    #[test]
    fn primary_without_item_type() {
        let data = Sample { item_type: [0; 4], ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::InvalidData(_))));
    }

    #[test]
    fn derived_primary_is_unsupported() {
        let data = Sample { item_type: *b"grid", ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::Unsupported(_))));
    }

    #[test]
    fn extent_past_end_of_file() {
        let data = Sample { locate: |o, l| (o, l + 1), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));

        let data = Sample { locate: |_, l| (u32::MAX - 2, l), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));
    }

    #[test]
    fn extent_into_meta_is_rejected() {
        let data = Sample { locate: |o, l| (o - 40, l), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));

        let data = Sample { locate: |_, l| (0, l), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));
    }

    #[test]
    fn idat_payload() {
        let data = Sample { in_idat: true, ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        let primary = handle.primary();
        let payload = handle.item_data(primary).unwrap();
        assert!(matches!(payload, Cow::Borrowed(_)));
        assert_eq!(&*payload, PAYLOAD);
        // 'idat' is the last box of the file
        assert_eq!(primary.extents[0].end, data.len());

        let data = Sample { in_idat: true, locate: |o, l| (o, l + 1), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));
        let data = Sample { in_idat: true, locate: |_, l| (u32::MAX, l), ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::OutOfBounds(_))));
    }

    #[test]
    fn multiple_extents_are_joined() {
        let data = Sample { split: true, ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        let primary = handle.primary();
        assert_eq!(primary.extents.len(), 2);
        assert_eq!(primary.data_len(), PAYLOAD.len());
        let payload = handle.item_data(primary).unwrap();
        assert!(matches!(payload, Cow::Owned(_)));
        assert_eq!(&*payload, PAYLOAD);
    }

    #[test]
    fn large_size_box_header() {
        let mut data = Sample { large_mdat: true, ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        assert_eq!(&*handle.item_data(handle.primary()).unwrap(), PAYLOAD);

        // A 64-bit size smaller than its own header
        let size_at = data.len() - PAYLOAD.len() - 8;
        data[size_at..size_at + 8].copy_from_slice(&8u64.to_be_bytes());
        assert!(matches!(parse(&data), Err(ContainerError::SizeOverflow)));
    }

    #[test]
    fn ftyp_brands_decide_acceptance() {
        let mut data = Sample::default().build();
        data[8..12].copy_from_slice(b"isom");
        assert!(parse(&data).is_ok());

        for brand in [16, 20, 24] {
            data[brand..brand + 4].copy_from_slice(b"mp41");
        }
        assert!(matches!(parse(&data), Err(ContainerError::InvalidData(_))));
    }

    #[test]
    fn mirror_before_rotation_is_normalised() {
        let data = Sample { extra_props: vec![bx(b"imir", &[&[1]]), bx(b"irot", &[&[1]])], ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        let transform = handle.primary().transform;
        assert_eq!(transform.rotation, 3);
        assert_eq!(transform.mirror, Some(MirrorAxis::Horizontal));
    }

    #[test]
    fn hdlr_required_only_when_strict() {
        let data = Sample { hdlr: false, ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::MissingBox("hdlr"))));
        let lenient = CodecConfig::default().with_strict(false);
        assert!(ContainerHandle::parse(&data, &lenient).is_ok());
    }

    #[test]
    fn rotation_swaps_display_size() {
        let data = Sample { extra_props: vec![bx(b"irot", &[&[1]]), bx(b"imir", &[&[1]])], ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        let primary = handle.primary();
        assert_eq!(primary.transform.rotation, 1);
        assert_eq!(primary.transform.mirror, Some(MirrorAxis::Horizontal));
        assert_eq!(primary.display_size(), (2, 4));
        assert_eq!((handle.info().width, handle.info().height), (2, 4));
    }

    #[test]
    fn nclx_colour() {
        let colr = bx(b"colr", &[b"nclx", &[0, 1, 0, 13, 0, 6, 0x80]]);
        let data = Sample { extra_props: vec![colr], ..Sample::default() }.build();
        let handle = parse(&data).unwrap();
        let nclx = handle.primary().nclx.unwrap();
        assert_eq!(nclx.matrix(), MatrixCoefficients::Bt601);
        assert!(nclx.full_range);
    }

    #[test]
    fn unread_property_bytes_strict_vs_lenient() {
        let irot = bx(b"irot", &[&[1, 0xff]]);
        let data = Sample { extra_props: vec![irot], ..Sample::default() }.build();
        assert!(matches!(parse(&data), Err(ContainerError::InvalidData(_))));
        let lenient = CodecConfig::default().with_strict(false);
        assert!(ContainerHandle::parse(&data, &lenient).is_ok());
    }

    #[test]
    fn iloc_item_offset_method_is_unsupported() {
        let bytes: &[u8] = &[
            1, 0, 0, 0, // version 1
            0x44, 0x00, 0x00, 0x01, // sizes, item_count
            0x00, 0x01, 0x00, 0x02, // item_id, construction_method 2
            0x00, 0x00, 0x00, 0x01, // data_reference_index, extent_count
            0, 0, 0, 0, 0, 0, 0, 1,
        ];
        let mut cursor = bytes;
        let mut iloc = BMFFBox {
            head: BoxHeader { name: BoxType::ItemLocationBox, size: 32, offset: 8 },
            content: <_ as Read>::take(&mut cursor, 24),
        };
        let options = ParseOptions { lenient: false };
        assert!(matches!(read_iloc(&mut iloc, &options), Err(ContainerError::Unsupported(_))));
    }

    #[test]
    fn av1c_fields() {
        let c = Av1Config::parse(&[0x81, 0x21, 0b0100_0000, 0x10, 0x0a, 0x0b]).unwrap();
        assert_eq!(c.profile, 1);
        assert_eq!(c.level, 1);
        assert_eq!(c.bit_depth, 10);
        assert!(!c.monochrome);
        assert_eq!(c.chroma(), ChromaSampling::Cs444);
        assert_eq!(c.initial_presentation_delay, Some(1));
        assert_eq!(c.config_obus, b"\x0a\x0b".as_ref());

        assert!(Av1Config::parse(&[0x01, 0, 0, 0]).is_err());
        assert!(matches!(Av1Config::parse(&[0x81]), Err(ContainerError::Truncated)));
    }

    #[test]
    fn hvcc_fields() {
        let mut body = vec![1, 0x01, 0x60, 0, 0, 0, 0x90, 0, 0, 0, 0, 0, 90, 0xf0, 0, 0xfc, 0xfd, 0xfa, 0xfa, 0, 0, 0x0f, 1];
        body.extend_from_slice(&[0x20, 0, 1, 0, 3, 0x40, 0x01, 0x0c]);
        let c = HevcConfig::parse(&body).unwrap();
        assert_eq!(c.general_profile_idc, 1);
        assert_eq!(c.general_level_idc, 90);
        assert_eq!(c.chroma_format_idc, 1);
        assert_eq!(c.bit_depth_luma, 10);
        assert_eq!(c.bit_depth_chroma, 10);
        assert_eq!(c.nal_length_size, 4);
        assert_eq!(c.parameter_set_count, 1);
        assert_eq!(c.chroma(), ChromaSampling::Cs420);

        body.truncate(body.len() - 1);
        assert!(HevcConfig::parse(&body).is_err());
    }
}
