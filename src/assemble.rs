// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion between decoded planes and packed RGBA.

use imgref::ImgVec;
use log::{trace, warn};
use rgb::Rgba;
use yuv::YUV;
use yuv::color::{Depth, Range};
use yuv::convert::RGBConvert;

use crate::bridge::{Plane, PlaneSet};
use crate::config::CodecConfig;
use crate::container::{ItemDescriptor, MirrorAxis, Transform};
use crate::image::{ChromaSampling, MatrixCoefficients, PixelBuffer, PixelFormat};
use crate::{AssemblyError, CodecError, Result};

/// Working image, channel values at the output depth
type Pixels = ImgVec<Rgba<u16>>;

/// How decoded planes become a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions {
    pub output_format: PixelFormat,
    /// Applied after colour conversion: rotation, then mirror
    pub transform: Transform,
    /// Fit the result within `(width, height)`, never upscaling
    pub target_size: Option<(u32, u32)>,
    pub preserve_aspect_ratio: bool,
    /// Colour samples are premultiplied by alpha and must be divided back out
    pub premultiplied_alpha: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            output_format: PixelFormat::Rgba8,
            transform: Transform::default(),
            target_size: None,
            preserve_aspect_ratio: true,
            premultiplied_alpha: false,
        }
    }
}

impl AssembleOptions {
    /// Options for displaying `item` as `config` asks.
    #[must_use]
    pub fn for_item(item: &ItemDescriptor, config: &CodecConfig) -> Self {
        Self {
            output_format: config.output_format,
            transform: if config.apply_transforms { item.transform } else { Transform::default() },
            target_size: config.target_size,
            preserve_aspect_ratio: config.preserve_aspect_ratio,
            premultiplied_alpha: item.premultiplied_alpha,
        }
    }
}

/// `v` on a `0..=from_max` scale moved to `0..=to_max`, rounding to nearest.
fn rescale(v: u16, from_max: u32, to_max: u32) -> u16 {
    let v = u64::from(v).min(u64::from(from_max));
    ((v * u64::from(to_max) + u64::from(from_max / 2)) / u64::from(from_max)) as u16
}

fn max_for(depth: u8) -> u32 {
    (1u32 << depth) - 1
}

fn pixel_vec(len: usize) -> Result<Vec<Rgba<u16>>, CodecError> {
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(len)?;
    Ok(pixels)
}

fn check_plane(plane: &Plane, width: u32, height: u32, what: &'static str) -> Result<(), AssemblyError> {
    if !plane.is_consistent() || plane.width != width || plane.height != height {
        return Err(AssemblyError::PlaneMismatch(what));
    }
    Ok(())
}

fn check_planes(planes: &PlaneSet) -> Result<(), AssemblyError> {
    let (width, height) = (planes.y.width, planes.y.height);
    if !planes.y.is_consistent() {
        return Err(AssemblyError::PlaneMismatch("luma plane is smaller than its dimensions"));
    }
    if !(8..=16).contains(&planes.bit_depth) {
        return Err(AssemblyError::PlaneMismatch("sample depth outside 8 to 16 bits"));
    }
    if planes.chroma != ChromaSampling::Monochrome {
        let (cw, ch) = planes.chroma.chroma_size(width, height);
        for plane in [&planes.u, &planes.v] {
            let plane = plane.as_ref().ok_or(AssemblyError::PlaneMismatch("chroma plane missing"))?;
            check_plane(plane, cw, ch, "chroma plane size does not match the subsampling")?;
        }
    }
    if let Some(alpha) = &planes.alpha {
        check_plane(alpha, width, height, "alpha plane size differs from luma")?;
        if !(8..=16).contains(&planes.alpha_bit_depth) {
            return Err(AssemblyError::PlaneMismatch("alpha depth outside 8 to 16 bits"));
        }
    }
    Ok(())
}

fn narrow(v: u16) -> u8 {
    v.min(0xff) as u8
}

enum Conversion {
    Narrow(RGBConvert<u8>),
    /// Samples are clamped to `in_max`, then shifted up by `shift` bits
    Wide {
        conv: RGBConvert<u16>,
        in_max: u16,
        shift: u8,
    },
}

/// YCbCr to RGB for one plane set.
struct Converter {
    conversion: Conversion,
    /// What the converter returns for white
    conv_max: u32,
    out_max: u32,
}

impl Converter {
    fn new(planes: &PlaneSet, out_max: u32) -> Result<Self, CodecError> {
        let range = if planes.full_range { Range::Full } else { Range::Limited };
        let matrix = match planes.chroma {
            ChromaSampling::Monochrome => yuv::color::MatrixCoefficients::Identity,
            _ => planes.matrix.to_yuv(),
        };
        let fallback = |_: yuv::Error| {
            warn!("no conversion for matrix coefficients {}, using BT.601", planes.matrix.cicp());
        };
        let unsupported = |_: yuv::Error| CodecError::UnsupportedPixelFormat("no YCbCr conversion for these samples");

        let depth = planes.bit_depth;
        let conversion = if depth == 8 {
            let conv = RGBConvert::<u8>::new(range, matrix)
                .or_else(|e| {
                    fallback(e);
                    RGBConvert::<u8>::new(range, yuv::color::MatrixCoefficients::BT601)
                })
                .map_err(unsupported)?;
            Conversion::Narrow(conv)
        } else {
            let (yuv_depth, shift) = match depth {
                10 => (Depth::Depth10, 0),
                12 => (Depth::Depth12, 0),
                _ => (Depth::Depth16, 16 - depth),
            };
            let conv = RGBConvert::<u16>::new(range, matrix, yuv_depth)
                .or_else(|e| {
                    fallback(e);
                    RGBConvert::<u16>::new(range, yuv::color::MatrixCoefficients::BT601, yuv_depth)
                })
                .map_err(unsupported)?;
            Conversion::Wide { conv, in_max: max_for(depth) as u16, shift }
        };

        let white = if planes.full_range { max_for(depth) } else { 235 << (depth - 8) };
        let mut converter = Self { conversion, conv_max: 1, out_max };
        converter.conv_max = u32::from(converter.luma(white as u16)).max(1);
        Ok(converter)
    }

    /// Converter output for a luma sample.
    fn luma(&self, y: u16) -> u16 {
        match &self.conversion {
            Conversion::Narrow(conv) => u16::from(conv.to_luma(narrow(y))),
            Conversion::Wide { conv, in_max, shift } => conv.to_luma(y.min(*in_max) << *shift),
        }
    }

    fn scale(&self, c: u16) -> u16 {
        rescale(c, self.conv_max, self.out_max)
    }

    fn gray(&self, y: u16) -> [u16; 3] {
        let g = self.scale(self.luma(y));
        [g, g, g]
    }

    fn rgb(&self, y: u16, u: u16, v: u16) -> [u16; 3] {
        let rgb = match &self.conversion {
            Conversion::Narrow(conv) => {
                let px = conv.to_rgb(YUV { y: narrow(y), u: narrow(u), v: narrow(v) });
                [px.r, px.g, px.b].map(u16::from)
            },
            Conversion::Wide { conv, in_max, shift } => {
                let widen = |s: u16| s.min(*in_max) << *shift;
                let px = conv.to_rgb(YUV { y: widen(y), u: widen(u), v: widen(v) });
                [px.r, px.g, px.b]
            },
        };
        rgb.map(|c| self.scale(c))
    }
}

/// Convert decoded planes into a packed RGBA image.
///
/// Chroma is upsampled by replication. Depth changes round to nearest.
/// Missing alpha is fully opaque.
pub fn assemble(planes: PlaneSet, options: &AssembleOptions) -> Result<PixelBuffer> {
    check_planes(&planes)?;
    let (width, height) = (planes.y.width, planes.y.height);
    let out_max = u32::from(options.output_format.max_value());
    let converter = Converter::new(&planes, out_max)?;
    let (sx, sy) = planes.chroma.shifts();
    let chroma = match (&planes.u, &planes.v) {
        (Some(u), Some(v)) if planes.chroma != ChromaSampling::Monochrome => Some((u, v)),
        _ => None,
    };
    let alpha = planes.alpha.as_ref().map(|alpha| (alpha, max_for(planes.alpha_bit_depth)));

    let len = (width as usize)
        .checked_mul(height as usize)
        .ok_or(CodecError::ResourceExhausted("image size overflow"))?;
    let mut pixels = pixel_vec(len)?;
    for y in 0..height {
        for x in 0..width {
            let luma = planes.y.get(x, y);
            let [r, g, b] = match chroma {
                Some((u, v)) => converter.rgb(luma, u.get(x >> sx, y >> sy), v.get(x >> sx, y >> sy)),
                None => converter.gray(luma),
            };
            let a = alpha.map_or(out_max as u16, |(alpha, alpha_max)| rescale(alpha.get(x, y), alpha_max, out_max));
            pixels.push(Rgba::new(r, g, b, a));
        }
    }
    let mut image = ImgVec::new(pixels, width as usize, height as usize);

    if options.premultiplied_alpha && alpha.is_some() {
        unpremultiply(&mut image, out_max);
    }
    let image = orient(image, options.transform)?;
    let image = match options.target_size {
        Some(target) => downscale(image, target, options.preserve_aspect_ratio)?,
        None => image,
    };
    Ok(PixelBuffer::from_pixels(image.as_ref(), options.output_format)?)
}

fn unpremultiply(image: &mut Pixels, max: u32) {
    for px in image.buf_mut().iter_mut() {
        let a = u32::from(px.a);
        if a == max {
            continue;
        }
        let div = |c: u16| {
            if a == 0 {
                0
            } else {
                ((u32::from(c) * max + a / 2) / a).min(max) as u16
            }
        };
        *px = Rgba::new(div(px.r), div(px.g), div(px.b), px.a);
    }
}

/// Apply `irot` (anti-clockwise quarter turns) and then `imir`.
fn orient(image: Pixels, transform: Transform) -> Result<Pixels, CodecError> {
    if transform.is_identity() {
        return Ok(image);
    }
    let (w, h) = (image.width(), image.height());
    let (ow, oh) = if transform.swaps_dimensions() { (h, w) } else { (w, h) };
    let mut out = pixel_vec(ow * oh)?;
    trace!("orienting {w}x{h} by {transform:?}");

    for oy in 0..oh {
        for ox in 0..ow {
            // Undo the mirror, then the rotation
            let (rx, ry) = match transform.mirror {
                Some(MirrorAxis::Vertical) => (ow - 1 - ox, oy),
                Some(MirrorAxis::Horizontal) => (ox, oh - 1 - oy),
                None => (ox, oy),
            };
            let (x, y) = match transform.rotation % 4 {
                1 => (w - 1 - ry, rx),
                2 => (w - 1 - rx, h - 1 - ry),
                3 => (ry, h - 1 - rx),
                _ => (rx, ry),
            };
            out.push(image[(x, y)]);
        }
    }
    Ok(ImgVec::new(out, ow, oh))
}

/// Output size for fitting `(width, height)` within `target`. Never larger than the input.
fn fitted_size(width: u32, height: u32, target: (u32, u32), preserve_aspect_ratio: bool) -> (u32, u32) {
    let (tw, th) = (target.0.max(1), target.1.max(1));
    if width <= tw && height <= th {
        return (width, height);
    }
    if !preserve_aspect_ratio {
        return (width.min(tw), height.min(th));
    }
    let (w, h) = (u64::from(width), u64::from(height));
    if u64::from(tw) * h <= u64::from(th) * w {
        let nh = (h * u64::from(tw) + w / 2) / w;
        (tw, nh.clamp(1, h) as u32)
    } else {
        let nw = (w * u64::from(th) + h / 2) / h;
        (nw.clamp(1, w) as u32, th)
    }
}

/// Box-filter `image` down to fit `target`.
fn downscale(image: Pixels, target: (u32, u32), preserve_aspect_ratio: bool) -> Result<Pixels, CodecError> {
    let (w, h) = (image.width() as u32, image.height() as u32);
    let (nw, nh) = fitted_size(w, h, target, preserve_aspect_ratio);
    if (nw, nh) == (w, h) {
        return Ok(image);
    }
    trace!("downscaling {w}x{h} to {nw}x{nh}");
    let mut out = pixel_vec(nw as usize * nh as usize)?;
    let span = |i: u32, n: u32, len: u32| {
        let start = (u64::from(i) * u64::from(len) / u64::from(n)) as usize;
        let end = ((u64::from(i + 1) * u64::from(len) / u64::from(n)) as usize).max(start + 1);
        start..end
    };

    for oy in 0..nh {
        let ys = span(oy, nh, h);
        for ox in 0..nw {
            let xs = span(ox, nw, w);
            let mut sum = [0u64; 4];
            let mut count = 0u64;
            for y in ys.clone() {
                for x in xs.clone() {
                    let px = image[(x, y)];
                    for (s, v) in sum.iter_mut().zip([px.r, px.g, px.b, px.a]) {
                        *s += u64::from(v);
                    }
                    count += 1;
                }
            }
            let [r, g, b, a] = sum.map(|s| ((s + count / 2) / count) as u16);
            out.push(Rgba::new(r, g, b, a));
        }
    }
    Ok(ImgVec::new(out, nw as usize, nh as usize))
}

// BT.601 full range, fixed point scaled by 256
const Y_R: i32 = 77;
const Y_G: i32 = 150;
const Y_B: i32 = 29;
const CB_R: i32 = -43;
const CB_G: i32 = -85;
const CB_B: i32 = 128;
const CR_R: i32 = 128;
const CR_G: i32 = -107;
const CR_B: i32 = -21;

/// Split a packed RGBA image into planes for encoding.
///
/// Quality 100 uses the identity matrix at 4:4:4 so the colour survives a
/// lossless encode exactly. Otherwise BT.601 full range is used, and chroma
/// is subsampled by averaging. 16-bit input is encoded at 10 bits. An alpha
/// plane is produced only when some pixel is not fully opaque.
pub fn split(image: &PixelBuffer, config: &CodecConfig) -> Result<PlaneSet, CodecError> {
    image.validate()?;
    let (width, height) = (image.width, image.height);
    let lossless = config.is_lossless();
    let chroma = match config.chroma_subsampling {
        ChromaSampling::Monochrome => ChromaSampling::Monochrome,
        _ if lossless => ChromaSampling::Cs444,
        other => other,
    };
    let matrix = if lossless && chroma == ChromaSampling::Cs444 {
        MatrixCoefficients::Identity
    } else {
        MatrixCoefficients::Bt601
    };
    let bit_depth = match image.format {
        PixelFormat::Rgba8 => 8,
        PixelFormat::Rgba16 => 10,
    };
    let in_max = u32::from(image.max_value());
    let out_max = max_for(bit_depth);
    let mid = 1i32 << (bit_depth - 1);

    let mut y_plane = Plane::new(width, height)?;
    let mut u_full = Plane::new(width, height)?;
    let mut v_full = Plane::new(width, height)?;
    let mut alpha = if image.is_opaque() { None } else { Some(Plane::new(width, height)?) };

    let clamp = |v: i32| v.clamp(0, out_max as i32) as u16;

    for y in 0..height {
        let row_start = y as usize * width as usize;
        for x in 0..width {
            let [r, g, b, a] = image.pixel(x, y).map(|c| rescale(c, in_max, out_max));
            let i = row_start + x as usize;
            if matrix == MatrixCoefficients::Identity {
                y_plane.samples[i] = g;
                u_full.samples[i] = b;
                v_full.samples[i] = r;
            } else {
                let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
                y_plane.samples[i] = clamp((Y_R * r + Y_G * g + Y_B * b + 128) >> 8);
                u_full.samples[i] = clamp(((CB_R * r + CB_G * g + CB_B * b + 128) >> 8) + mid);
                v_full.samples[i] = clamp(((CR_R * r + CR_G * g + CR_B * b + 128) >> 8) + mid);
            }
            if let Some(alpha) = &mut alpha {
                alpha.samples[i] = a;
            }
        }
    }

    let (u, v) = match chroma {
        ChromaSampling::Monochrome => (None, None),
        ChromaSampling::Cs444 => (Some(u_full), Some(v_full)),
        _ => (Some(subsample(&u_full, chroma)?), Some(subsample(&v_full, chroma)?)),
    };

    Ok(PlaneSet {
        y: y_plane,
        u,
        v,
        alpha,
        bit_depth,
        alpha_bit_depth: bit_depth,
        chroma,
        matrix,
        full_range: true,
    })
}

/// Average blocks of a full-resolution chroma plane down to `chroma`'s size.
fn subsample(full: &Plane, chroma: ChromaSampling) -> Result<Plane, CodecError> {
    let (sx, sy) = chroma.shifts();
    let (cw, ch) = chroma.chroma_size(full.width, full.height);
    let mut out = Plane::new(cw, ch)?;
    for cy in 0..ch {
        for cx in 0..cw {
            let mut sum = 0u32;
            let mut count = 0u32;
            for y in (cy << sy)..((cy + 1) << sy).min(full.height) {
                for x in (cx << sx)..((cx + 1) << sx).min(full.width) {
                    sum += u32::from(full.get(x, y));
                    count += 1;
                }
            }
            out.samples[cy as usize * cw as usize + cx as usize] = ((sum + count / 2) / count) as u16;
        }
    }
    Ok(out)
}
