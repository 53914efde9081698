// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal HEIF/AVIF container writer for encoded still images.

use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use std::io;

use crate::bridge::EncodedItem;
use crate::container::{CodecConfigRecord, MirrorAxis, Transform};
use crate::image::{CodecType, MatrixCoefficients};
use crate::sniff::ImageFormat;
use crate::CodecError;

const ALPHA_URN: &[u8] = b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha\0";
const ESSENTIAL_BIT: u8 = 0x80;
const COLOR_ITEM_ID: u16 = 1;
const ALPHA_ITEM_ID: u16 = 2;

/// Wraps one encoded colour item, and optionally its alpha item, in a file.
///
/// The output has `ftyp`, `meta` and a single `mdat`. Offsets are 32-bit,
/// so files of 4 GiB or more are refused.
#[derive(Debug, Clone, Copy)]
pub struct HeifWriter {
    width: u32,
    height: u32,
    colour: Option<(MatrixCoefficients, bool)>,
    premultiplied_alpha: bool,
    transform: Transform,
}

impl HeifWriter {
    /// Writer for coded images of `width`×`height`.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            colour: None,
            premultiplied_alpha: false,
            transform: Transform::default(),
        }
    }

    /// Add an `nclx` colour box with sRGB primaries and transfer.
    #[must_use]
    pub fn with_colour(mut self, matrix: MatrixCoefficients, full_range: bool) -> Self {
        self.colour = Some((matrix, full_range));
        self
    }

    /// Link colour to alpha with a `prem` reference.
    #[must_use]
    pub fn with_premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied_alpha = premultiplied;
        self
    }

    /// Add `irot`/`imir` to the colour item.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Serialize the file.
    pub fn write(&self, color: &EncodedItem, alpha: Option<&EncodedItem>) -> Result<Vec<u8>, CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::UnsupportedPixelFormat("image has no pixels"));
        }
        let codec = codec_of(&color.config_record);
        if alpha.is_some_and(|a| codec_of(&a.config_record) != codec) {
            return Err(CodecError::UnsupportedCodec("alpha item must use the colour item's codec"));
        }
        if color.payload.is_empty() || alpha.is_some_and(|a| a.payload.is_empty()) {
            return Err(CodecError::CorruptBitstream("encoded item is empty"));
        }

        let total = color.payload.len() + alpha.map_or(0, |a| a.payload.len());
        let mut out = Vec::new();
        out.try_reserve(total + 512)?;
        let offsets = self.write_boxes(&mut out, color, alpha).map_err(|err| {
            debug!("container write failed: {err}");
            CodecError::ResourceExhausted("file exceeds 32-bit box sizes")
        })?;

        // Alpha first in mdat, patched into the iloc extents
        let mut position = out.len();
        if let (Some(alpha), Some(at)) = (alpha, offsets.alpha) {
            patch_u32(&mut out, at, position)?;
            out.extend_from_slice(&alpha.payload);
            position = out.len();
        }
        patch_u32(&mut out, offsets.color, position)?;
        out.extend_from_slice(&color.payload);
        let mdat_len = out.len() - offsets.mdat;
        patch_u32(&mut out, offsets.mdat, mdat_len)?;

        debug!(
            "wrote {:?} file of {} bytes, alpha {}",
            codec,
            out.len(),
            alpha.is_some()
        );
        Ok(out)
    }

    /// Everything up to the `mdat` payload. Returns where offsets must be patched.
    fn write_boxes(&self, out: &mut Vec<u8>, color: &EncodedItem, alpha: Option<&EncodedItem>) -> io::Result<PatchPoints> {
        let codec = codec_of(&color.config_record);
        let format = match codec {
            CodecType::Av1 => ImageFormat::Avif,
            CodecType::Hevc => ImageFormat::Heif,
        };
        let major = format.major_brand().unwrap_or(*b"mif1");

        write_box(out, b"ftyp", |b| {
            b.extend_from_slice(&major);
            b.write_u32::<BigEndian>(0)?;
            b.extend_from_slice(b"mif1");
            b.extend_from_slice(match codec {
                CodecType::Av1 => b"miaf",
                CodecType::Hevc => b"heic",
            });
            Ok(())
        })?;

        let mut color_offset = 0;
        let mut alpha_offset = None;
        write_full_box(out, b"meta", 0, 0, |m| {
            write_full_box(m, b"hdlr", 0, 0, |b| {
                b.write_u32::<BigEndian>(0)?;
                b.extend_from_slice(b"pict");
                for _ in 0..3 {
                    b.write_u32::<BigEndian>(0)?;
                }
                b.push(0);
                Ok(())
            })?;

            write_full_box(m, b"pitm", 0, 0, |b| b.write_u16::<BigEndian>(COLOR_ITEM_ID))?;

            write_full_box(m, b"iloc", 0, 0, |b| {
                b.push(0x44); // offset_size 4, length_size 4
                b.push(0x00); // base_offset_size 0
                b.write_u16::<BigEndian>(if alpha.is_some() { 2 } else { 1 })?;
                let entry = |b: &mut Vec<u8>, id: u16, len: usize| -> io::Result<usize> {
                    b.write_u16::<BigEndian>(id)?;
                    b.write_u16::<BigEndian>(0)?;
                    b.write_u16::<BigEndian>(1)?;
                    let at = b.len();
                    b.write_u32::<BigEndian>(0)?;
                    b.write_u32::<BigEndian>(to_u32(len)?)?;
                    Ok(at)
                };
                color_offset = entry(b, COLOR_ITEM_ID, color.payload.len())?;
                if let Some(alpha) = alpha {
                    alpha_offset = Some(entry(b, ALPHA_ITEM_ID, alpha.payload.len())?);
                }
                Ok(())
            })?;

            write_full_box(m, b"iinf", 0, 0, |b| {
                b.write_u16::<BigEndian>(if alpha.is_some() { 2 } else { 1 })?;
                write_infe(b, COLOR_ITEM_ID, codec)?;
                if alpha.is_some() {
                    write_infe(b, ALPHA_ITEM_ID, codec)?;
                }
                Ok(())
            })?;

            if alpha.is_some() {
                write_full_box(m, b"iref", 0, 0, |b| {
                    write_reference(b, b"auxl", ALPHA_ITEM_ID, COLOR_ITEM_ID)?;
                    if self.premultiplied_alpha {
                        write_reference(b, b"prem", COLOR_ITEM_ID, ALPHA_ITEM_ID)?;
                    }
                    Ok(())
                })?;
            }

            write_box(m, b"iprp", |b| self.write_properties(b, color, alpha))
        })?;

        let mdat = out.len();
        out.write_u32::<BigEndian>(0)?;
        out.extend_from_slice(b"mdat");
        Ok(PatchPoints {
            color: color_offset,
            alpha: alpha_offset,
            mdat,
        })
    }

    fn write_properties(&self, b: &mut Vec<u8>, color: &EncodedItem, alpha: Option<&EncodedItem>) -> io::Result<()> {
        let mut color_props: Vec<u8> = Vec::new();
        let mut alpha_props: Vec<u8> = Vec::new();
        let mut next = 1u8;
        let mut add = |props: &mut Vec<u8>, essential: bool| {
            props.push(next | if essential { ESSENTIAL_BIT } else { 0 });
            next += 1;
        };

        write_box(b, b"ipco", |p| {
            write_full_box(p, b"ispe", 0, 0, |b| {
                b.write_u32::<BigEndian>(self.width)?;
                b.write_u32::<BigEndian>(self.height)
            })?;
            add(&mut color_props, false);
            let ispe = color_props[0];

            write_config(p, &color.config_record)?;
            add(&mut color_props, true);
            write_pixi(p, 3, color.config_record.bit_depth())?;
            add(&mut color_props, false);

            if let Some((matrix, full_range)) = self.colour {
                write_box(p, b"colr", |b| {
                    b.extend_from_slice(b"nclx");
                    b.write_u16::<BigEndian>(1)?; // BT.709 primaries
                    b.write_u16::<BigEndian>(13)?; // sRGB transfer
                    b.write_u16::<BigEndian>(matrix.cicp())?;
                    b.push(if full_range { 0x80 } else { 0 });
                    Ok(())
                })?;
                add(&mut color_props, false);
            }
            if self.transform.rotation % 4 != 0 {
                write_box(p, b"irot", |b| {
                    b.push(self.transform.rotation % 4);
                    Ok(())
                })?;
                add(&mut color_props, true);
            }
            if let Some(axis) = self.transform.mirror {
                write_box(p, b"imir", |b| {
                    b.push(match axis {
                        MirrorAxis::Vertical => 0,
                        MirrorAxis::Horizontal => 1,
                    });
                    Ok(())
                })?;
                add(&mut color_props, true);
            }

            if let Some(alpha) = alpha {
                alpha_props.push(ispe);
                write_config(p, &alpha.config_record)?;
                add(&mut alpha_props, true);
                write_pixi(p, 1, alpha.config_record.bit_depth())?;
                add(&mut alpha_props, false);
                write_full_box(p, b"auxC", 0, 0, |b| {
                    b.extend_from_slice(ALPHA_URN);
                    Ok(())
                })?;
                add(&mut alpha_props, true);
            }
            Ok(())
        })?;

        write_full_box(b, b"ipma", 0, 0, |b| {
            b.write_u32::<BigEndian>(if alpha.is_some() { 2 } else { 1 })?;
            for (id, props) in [(COLOR_ITEM_ID, &color_props), (ALPHA_ITEM_ID, &alpha_props)] {
                if props.is_empty() {
                    continue;
                }
                b.write_u16::<BigEndian>(id)?;
                b.push(props.len() as u8);
                b.extend_from_slice(props);
            }
            Ok(())
        })
    }
}

/// Byte positions of the fields filled in once the layout is known.
struct PatchPoints {
    color: usize,
    alpha: Option<usize>,
    mdat: usize,
}

fn codec_of(record: &CodecConfigRecord) -> CodecType {
    match record {
        CodecConfigRecord::Av1(_) => CodecType::Av1,
        CodecConfigRecord::Hevc(_) => CodecType::Hevc,
    }
}

fn to_u32(value: usize) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "value exceeds 32 bits"))
}

fn patch_u32(out: &mut [u8], at: usize, value: usize) -> Result<(), CodecError> {
    let value = u32::try_from(value).map_err(|_| CodecError::ResourceExhausted("file exceeds 32-bit offsets"))?;
    out[at..at + 4].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Append a box, filling in its size once `body` has written the payload.
fn write_box(out: &mut Vec<u8>, name: &[u8; 4], body: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> io::Result<()> {
    let start = out.len();
    out.write_u32::<BigEndian>(0)?;
    out.extend_from_slice(name);
    body(out)?;
    let size = to_u32(out.len() - start)?;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

fn write_full_box(
    out: &mut Vec<u8>,
    name: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>) -> io::Result<()>,
) -> io::Result<()> {
    write_box(out, name, |b| {
        b.write_u8(version)?;
        b.write_u24::<BigEndian>(flags)?;
        body(b)
    })
}

fn write_infe(out: &mut Vec<u8>, id: u16, codec: CodecType) -> io::Result<()> {
    write_full_box(out, b"infe", 2, 0, |b| {
        b.write_u16::<BigEndian>(id)?;
        b.write_u16::<BigEndian>(0)?;
        b.extend_from_slice(&codec.item_type());
        b.push(0);
        Ok(())
    })
}

fn write_reference(out: &mut Vec<u8>, kind: &[u8; 4], from: u16, to: u16) -> io::Result<()> {
    write_box(out, kind, |b| {
        b.write_u16::<BigEndian>(from)?;
        b.write_u16::<BigEndian>(1)?;
        b.write_u16::<BigEndian>(to)
    })
}

fn write_pixi(out: &mut Vec<u8>, channels: u8, depth: u8) -> io::Result<()> {
    write_full_box(out, b"pixi", 0, 0, |b| {
        b.push(channels);
        for _ in 0..channels {
            b.push(depth);
        }
        Ok(())
    })
}

/// `av1C` or `hvcC`. See AV1-ISOBMFF § 2.3 and ISO 14496-15 § 8.3.3.
fn write_config(out: &mut Vec<u8>, record: &CodecConfigRecord) -> io::Result<()> {
    match record {
        CodecConfigRecord::Av1(c) => write_box(out, b"av1C", |b| {
            b.push(0x81);
            b.push((c.profile & 0b111) << 5 | (c.level & 0b1_1111));
            b.push(
                (c.tier & 1) << 7
                    | u8::from(c.bit_depth > 8) << 6
                    | u8::from(c.bit_depth == 12) << 5
                    | u8::from(c.monochrome) << 4
                    | u8::from(c.chroma_subsampling_x) << 3
                    | u8::from(c.chroma_subsampling_y) << 2
                    | (c.chroma_sample_position & 0b11),
            );
            b.push(match c.initial_presentation_delay {
                Some(delay) => 0x10 | (delay.saturating_sub(1) & 0x0f),
                None => 0,
            });
            b.extend_from_slice(&c.config_obus);
            Ok(())
        }),
        CodecConfigRecord::Hevc(c) => write_box(out, b"hvcC", |b| {
            b.extend_from_slice(&c.raw);
            Ok(())
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::container::{Av1Config, ContainerHandle, HevcConfig, ItemRole};
    use crate::image::ChromaSampling;

    fn av1_item(payload: &[u8], monochrome: bool) -> EncodedItem {
        let mono = if monochrome { 0x10 } else { 0 };
        let record = Av1Config::parse(&[0x81, 0x08, 0x0c | mono, 0x00]).unwrap();
        EncodedItem {
            payload: payload.to_vec(),
            config_record: CodecConfigRecord::Av1(record),
        }
    }

    fn hevc_item(payload: &[u8]) -> EncodedItem {
        let hvcc = [
            1, 0x01, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 90, 0xf0, 0x00, 0xfc, 0xfd, 0xf8, 0xf8, 0, 0, 0x0f, 0,
        ];
        EncodedItem {
            payload: payload.to_vec(),
            config_record: CodecConfigRecord::Hevc(HevcConfig::parse(&hvcc).unwrap()),
        }
    }

    #[test]
    fn single_item_parses_strictly() {
        let color = av1_item(b"\x12\x00\x0a\x0bcolour-obus", false);
        let file = HeifWriter::new(64, 48)
            .with_colour(MatrixCoefficients::Bt601, true)
            .write(&color, None)
            .unwrap();
        assert_eq!(crate::sniff(&file), ImageFormat::Avif);

        let handle = ContainerHandle::parse(&file, &CodecConfig::default()).unwrap();
        assert_eq!(handle.format(), ImageFormat::Avif);
        let primary = handle.primary();
        assert_eq!(primary.codec, CodecType::Av1);
        assert_eq!((primary.width, primary.height), (64, 48));
        assert_eq!(primary.chroma, ChromaSampling::Cs420);
        assert_eq!(primary.config.as_ref(), Some(&color.config_record));
        assert_eq!(&*handle.item_data(primary).unwrap(), &color.payload[..]);
        let nclx = primary.nclx.unwrap();
        assert_eq!(nclx.matrix(), MatrixCoefficients::Bt601);
        assert!(nclx.full_range);
        assert!(primary.alpha_item.is_none());

        // 'mdat' is last and its size covers the payload
        let mdat_at = file.len() - color.payload.len() - 8;
        assert_eq!(&file[mdat_at + 4..mdat_at + 8], b"mdat");
        let mdat_size = u32::from_be_bytes(file[mdat_at..mdat_at + 4].try_into().unwrap());
        assert_eq!(mdat_size as usize, file.len() - mdat_at);
    }

    #[test]
    fn alpha_item_is_linked() {
        let color = av1_item(b"colour", false);
        let alpha = av1_item(b"alpha plane", true);
        let file = HeifWriter::new(3, 2)
            .with_premultiplied_alpha(true)
            .write(&color, Some(&alpha))
            .unwrap();

        let handle = ContainerHandle::parse(&file, &CodecConfig::default()).unwrap();
        let primary = handle.primary();
        assert_eq!(primary.item_id, 1);
        assert!(primary.premultiplied_alpha);
        let alpha_item = handle.alpha_of(primary).unwrap();
        assert_eq!(alpha_item.role, ItemRole::Alpha);
        assert_eq!(alpha_item.chroma, ChromaSampling::Monochrome);
        assert_eq!((alpha_item.width, alpha_item.height), (3, 2));
        assert_eq!(&*handle.item_data(alpha_item).unwrap(), b"alpha plane");
        assert_eq!(&*handle.item_data(primary).unwrap(), b"colour");
        assert!(handle.info().has_alpha);
    }

    #[test]
    fn transform_is_recorded() {
        let transform = Transform {
            rotation: 1,
            mirror: Some(MirrorAxis::Horizontal),
        };
        let file = HeifWriter::new(4, 2)
            .with_transform(transform)
            .write(&av1_item(b"x", false), None)
            .unwrap();
        let handle = ContainerHandle::parse(&file, &CodecConfig::default()).unwrap();
        assert_eq!(handle.primary().transform, transform);
        assert_eq!(handle.primary().display_size(), (2, 4));
    }

    #[test]
    fn hevc_item_makes_a_heic() {
        let file = HeifWriter::new(8, 8).write(&hevc_item(b"\0\0\0\x02nal"), None).unwrap();
        assert_eq!(&file[8..12], b"heic");
        let handle = ContainerHandle::parse(&file, &CodecConfig::default()).unwrap();
        assert_eq!(handle.format(), ImageFormat::Heif);
        assert_eq!(handle.primary().codec, CodecType::Hevc);
        assert!(handle.primary().nclx.is_none());
    }

    #[test]
    fn mixed_codecs_are_refused() {
        let err = HeifWriter::new(8, 8)
            .write(&av1_item(b"x", false), Some(&hevc_item(b"y")))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedCodec(_)));
        assert!(HeifWriter::new(0, 8).write(&av1_item(b"x", false), None).is_err());
    }
}
