// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use imgref::ImgRef;
use rgb::Rgba;

use crate::CodecError;
use crate::sniff::ImageFormat;

/// Compression format of a coded image item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// HEVC intra frame, item type `hvc1`
    Hevc,
    /// AV1 key frame, item type `av01`
    Av1,
}

impl CodecType {
    /// The `infe` item type for this codec.
    #[must_use]
    pub const fn item_type(self) -> [u8; 4] {
        match self {
            Self::Hevc => *b"hvc1",
            Self::Av1 => *b"av01",
        }
    }
}

/// Chroma plane layout relative to luma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaSampling {
    /// Luma only
    Monochrome,
    /// Chroma halved horizontally and vertically
    Cs420,
    /// Chroma halved horizontally
    Cs422,
    /// Full resolution chroma
    Cs444,
}

impl ChromaSampling {
    /// Horizontal and vertical subsampling shifts of the chroma planes.
    #[must_use]
    pub const fn shifts(self) -> (u32, u32) {
        match self {
            Self::Monochrome | Self::Cs444 => (0, 0),
            Self::Cs422 => (1, 0),
            Self::Cs420 => (1, 1),
        }
    }

    /// Size of a chroma plane for a `width`×`height` luma plane.
    #[must_use]
    pub const fn chroma_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::Monochrome => (0, 0),
            _ => {
                let (sx, sy) = self.shifts();
                ((width + (1 << sx) - 1) >> sx, (height + (1 << sy) - 1) >> sy)
            },
        }
    }

    pub(crate) const fn from_av1(monochrome: bool, subsampling_x: bool, subsampling_y: bool) -> Self {
        match (monochrome, subsampling_x, subsampling_y) {
            (true, _, _) => Self::Monochrome,
            (false, true, true) => Self::Cs420,
            (false, true, false) => Self::Cs422,
            (false, false, _) => Self::Cs444,
        }
    }

    /// `chroma_format_idc` as signalled in HEVC.
    pub(crate) const fn from_hevc(chroma_format_idc: u8) -> Self {
        match chroma_format_idc {
            0 => Self::Monochrome,
            2 => Self::Cs422,
            3 => Self::Cs444,
            _ => Self::Cs420,
        }
    }
}

/// YCbCr to RGB matrix, numbered as in ISO/IEC 23091-2 (CICP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixCoefficients {
    /// GBR, no conversion
    Identity,
    Bt709,
    Unspecified,
    Fcc,
    Bt470bg,
    Bt601,
    Smpte240,
    YCgCo,
    Bt2020Ncl,
    Bt2020Cl,
    Other(u16),
}

impl MatrixCoefficients {
    #[must_use]
    pub const fn from_cicp(value: u16) -> Self {
        match value {
            0 => Self::Identity,
            1 => Self::Bt709,
            2 => Self::Unspecified,
            4 => Self::Fcc,
            5 => Self::Bt470bg,
            6 => Self::Bt601,
            7 => Self::Smpte240,
            8 => Self::YCgCo,
            9 => Self::Bt2020Ncl,
            10 => Self::Bt2020Cl,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn cicp(self) -> u16 {
        match self {
            Self::Identity => 0,
            Self::Bt709 => 1,
            Self::Unspecified => 2,
            Self::Fcc => 4,
            Self::Bt470bg => 5,
            Self::Bt601 => 6,
            Self::Smpte240 => 7,
            Self::YCgCo => 8,
            Self::Bt2020Ncl => 9,
            Self::Bt2020Cl => 10,
            Self::Other(v) => v,
        }
    }

    /// Matrix used for YCbCr to RGB conversion. Unspecified and unknown codes use BT.601.
    pub(crate) fn to_yuv(self) -> yuv::color::MatrixCoefficients {
        use yuv::color::MatrixCoefficients as Yuv;
        match self {
            Self::Identity => Yuv::Identity,
            Self::Bt709 => Yuv::BT709,
            Self::Fcc => Yuv::FCC,
            Self::Bt470bg => Yuv::BT470BG,
            Self::Bt601 | Self::Unspecified => Yuv::BT601,
            Self::Smpte240 => Yuv::SMPTE240,
            Self::YCgCo => Yuv::YCgCo,
            Self::Bt2020Ncl => Yuv::BT2020NCL,
            Self::Bt2020Cl => Yuv::BT2020CL,
            Self::Other(code) => {
                log::warn!("matrix coefficients {code} treated as BT.601");
                Yuv::BT601
            },
        }
    }
}

/// Packed pixel layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8 bits per channel, R G B A byte order
    #[default]
    Rgba8,
    /// 16 bits per channel in native endianness, R G B A order
    Rgba16,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 => 8,
        }
    }

    #[must_use]
    pub const fn bit_depth(self) -> u8 {
        match self {
            Self::Rgba8 => 8,
            Self::Rgba16 => 16,
        }
    }

    /// Largest channel value.
    #[must_use]
    pub const fn max_value(self) -> u16 {
        match self {
            Self::Rgba8 => 0xff,
            Self::Rgba16 => 0xffff,
        }
    }
}

/// A packed, interleaved RGBA image owned by the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// A zero-filled (transparent black) buffer with a tightly packed stride.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, CodecError> {
        let stride = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or(CodecError::ResourceExhausted("row size overflow"))?;
        let len = stride
            .checked_mul(height as usize)
            .ok_or(CodecError::ResourceExhausted("image size overflow"))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);
        Ok(Self { width, height, stride, format, data })
    }

    /// Wrap tightly packed RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CodecError> {
        let image = Self {
            width,
            height,
            stride: width as usize * 4,
            format: PixelFormat::Rgba8,
            data,
        };
        image.validate()?;
        Ok(image)
    }

    /// Pack RGBA16 samples, four per pixel.
    pub fn from_rgba16(width: u32, height: u32, samples: &[u16]) -> Result<Self, CodecError> {
        let mut image = Self::new(width, height, PixelFormat::Rgba16)?;
        if samples.len() != image.data.len() / 2 {
            return Err(CodecError::UnsupportedPixelFormat("sample count does not match dimensions"));
        }
        for (dst, s) in image.data.chunks_exact_mut(2).zip(samples) {
            dst.copy_from_slice(&s.to_ne_bytes());
        }
        Ok(image)
    }

    /// Pack an RGBA image whose channels are already on `format`'s scale.
    pub(crate) fn from_pixels(pixels: ImgRef<'_, Rgba<u16>>, format: PixelFormat) -> Result<Self, CodecError> {
        let mut image = Self::new(pixels.width() as u32, pixels.height() as u32, format)?;
        for (y, row) in pixels.rows().enumerate() {
            for (x, px) in row.iter().enumerate() {
                image.set_pixel(x as u32, y as u32, [px.r, px.g, px.b, px.a]);
            }
        }
        Ok(image)
    }

    /// Check that dimensions, stride and payload agree.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::UnsupportedPixelFormat("image has no pixels"));
        }
        let row = (self.width as usize)
            .checked_mul(self.format.bytes_per_pixel())
            .ok_or(CodecError::UnsupportedPixelFormat("row size overflow"))?;
        if self.stride < row {
            return Err(CodecError::UnsupportedPixelFormat("stride is shorter than a row"));
        }
        let needed = self
            .stride
            .checked_mul(self.height as usize - 1)
            .and_then(|n| n.checked_add(row))
            .ok_or(CodecError::UnsupportedPixelFormat("image size overflow"))?;
        if self.data.len() < needed {
            return Err(CodecError::UnsupportedPixelFormat("pixel data is shorter than stride × height"));
        }
        Ok(())
    }

    /// Pixel bytes of row `y`, without stride padding.
    #[must_use]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }

    /// Channel values of one pixel, widened to `u16`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u16; 4] {
        let row = self.row(y);
        let mut out = [0; 4];
        match self.format {
            PixelFormat::Rgba8 => {
                let p = &row[x as usize * 4..x as usize * 4 + 4];
                for (o, &v) in out.iter_mut().zip(p) {
                    *o = u16::from(v);
                }
            },
            PixelFormat::Rgba16 => {
                let p = &row[x as usize * 8..x as usize * 8 + 8];
                for (o, v) in out.iter_mut().zip(p.chunks_exact(2)) {
                    *o = u16::from_ne_bytes([v[0], v[1]]);
                }
            },
        }
        out
    }

    pub(crate) fn set_pixel(&mut self, x: u32, y: u32, value: [u16; 4]) {
        let bpp = self.format.bytes_per_pixel();
        let start = y as usize * self.stride + x as usize * bpp;
        let dst = &mut self.data[start..start + bpp];
        match self.format {
            PixelFormat::Rgba8 => {
                for (d, v) in dst.iter_mut().zip(value) {
                    *d = v.min(0xff) as u8;
                }
            },
            PixelFormat::Rgba16 => {
                for (d, v) in dst.chunks_exact_mut(2).zip(value) {
                    d.copy_from_slice(&v.to_ne_bytes());
                }
            },
        }
    }

    /// Largest channel value for this format.
    #[must_use]
    pub const fn max_value(&self) -> u16 {
        self.format.max_value()
    }

    /// True when every pixel has the maximum alpha value.
    #[must_use]
    pub fn is_opaque(&self) -> bool {
        let max = self.max_value();
        (0..self.height).all(|y| (0..self.width).all(|x| self.pixel(x, y)[3] == max))
    }
}

/// Summary of the primary image, available without decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub codec: CodecType,
    /// Display width, after any rotation
    pub width: u32,
    /// Display height, after any rotation
    pub height: u32,
    pub bit_depth: u8,
    pub chroma: ChromaSampling,
    pub has_alpha: bool,
    pub has_depth: bool,
    pub premultiplied_alpha: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_plane_sizes_round_up() {
        assert_eq!(ChromaSampling::Cs420.chroma_size(5, 3), (3, 2));
        assert_eq!(ChromaSampling::Cs422.chroma_size(5, 3), (3, 3));
        assert_eq!(ChromaSampling::Cs444.chroma_size(5, 3), (5, 3));
        assert_eq!(ChromaSampling::Monochrome.chroma_size(5, 3), (0, 0));
    }

    #[test]
    fn matrix_cicp_codes() {
        for code in 0..16 {
            assert_eq!(MatrixCoefficients::from_cicp(code).cicp(), code);
        }
        assert!(MatrixCoefficients::Unspecified.to_yuv() == yuv::color::MatrixCoefficients::BT601);
        assert!(MatrixCoefficients::Other(99).to_yuv() == yuv::color::MatrixCoefficients::BT601);
        assert!(MatrixCoefficients::Bt709.to_yuv() == yuv::color::MatrixCoefficients::BT709);
    }

    #[test]
    fn pixel_buffer_validation() {
        assert!(PixelBuffer::from_rgba8(2, 2, vec![0; 16]).is_ok());
        assert!(PixelBuffer::from_rgba8(2, 2, vec![0; 15]).is_err());
        assert!(PixelBuffer::from_rgba8(0, 2, Vec::new()).is_err());

        let padded = PixelBuffer { width: 1, height: 2, stride: 8, format: PixelFormat::Rgba8, data: vec![0; 12] };
        assert!(padded.validate().is_ok());
    }

    #[test]
    fn rgba16_samples_are_native_endian() {
        let image = PixelBuffer::from_rgba16(1, 1, &[1, 2, 3, 0xffff]).unwrap();
        assert_eq!(image.pixel(0, 0), [1, 2, 3, 0xffff]);
        assert!(image.is_opaque());
    }

    #[test]
    fn set_pixel_clamps_to_format() {
        let mut image = PixelBuffer::new(2, 1, PixelFormat::Rgba8).unwrap();
        image.set_pixel(1, 0, [300, 1, 2, 255]);
        assert_eq!(image.pixel(1, 0), [255, 1, 2, 255]);
        assert_eq!(image.pixel(0, 0), [0, 0, 0, 0]);
        assert!(!image.is_opaque());
    }
}
