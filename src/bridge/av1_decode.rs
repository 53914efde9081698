// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dav1d::{Decoder, PixelLayout, PlanarImageComponent, Settings};
use log::{debug, trace};

use super::{DecodeRequest, IntraDecoder, Plane, PlaneSet};
use crate::image::{ChromaSampling, CodecType, MatrixCoefficients};
use crate::{CodecError, obu};

/// AV1 decoding through libdav1d.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dav1dDecoder;

fn map_error(err: dav1d::Error) -> CodecError {
    match err {
        dav1d::Error::NotEnoughMemory => CodecError::ResourceExhausted("dav1d ran out of memory"),
        dav1d::Error::UnsupportedBitstream => CodecError::UnsupportedProfile("dav1d does not support this bitstream"),
        dav1d::Error::InvalidArgument => CodecError::CorruptBitstream("dav1d rejected the bitstream"),
        dav1d::Error::Again => CodecError::CorruptBitstream("dav1d needs more data than the item holds"),
        dav1d::Error::UnknownError(code) => CodecError::Backend {
            code,
            msg: err.to_string(),
        },
    }
}

impl IntraDecoder for Dav1dDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Av1
    }

    fn decode(&self, request: &DecodeRequest<'_>) -> Result<PlaneSet, CodecError> {
        let mut settings = Settings::new();
        settings.set_n_threads(request.thread_count);
        settings.set_max_frame_delay(1);
        settings.set_all_layers(false);
        if let Some(max) = request.max_dimension {
            settings.set_frame_size_limit(max.saturating_mul(max));
        }

        let mut decoder = Decoder::with_settings(&settings).map_err(map_error)?;

        let mut pending = match decoder.send_data(request.payload.to_vec(), None, None, None) {
            Ok(()) => false,
            // Input queue full, a picture must be taken out first
            Err(e) if e.is_again() => true,
            Err(e) => return Err(map_error(e)),
        };

        // With frame threads the first call after the last input only starts draining.
        let mut idle_polls = 0;
        let picture = loop {
            match decoder.get_picture() {
                Ok(p) => break p,
                Err(e) if e.is_again() && pending => {
                    pending = match decoder.send_pending_data() {
                        Ok(()) => false,
                        Err(e) if e.is_again() => true,
                        Err(e) => return Err(map_error(e)),
                    };
                },
                Err(e) if e.is_again() && idle_polls < 2 => {
                    trace!("dav1d: draining");
                    idle_polls += 1;
                },
                Err(e) if e.is_again() => {
                    return Err(CodecError::CorruptBitstream("AV1 payload holds no displayable frame"));
                },
                Err(e) => return Err(map_error(e)),
            }
        };

        let (width, height) = (picture.width(), picture.height());
        let bit_depth = picture.bit_depth() as u8;
        let chroma = match picture.pixel_layout() {
            PixelLayout::I400 => ChromaSampling::Monochrome,
            PixelLayout::I420 => ChromaSampling::Cs420,
            PixelLayout::I422 => ChromaSampling::Cs422,
            PixelLayout::I444 => ChromaSampling::Cs444,
        };
        debug!("dav1d: {width}x{height} {bit_depth} bit {chroma:?}");

        let copy = |component: PlanarImageComponent, w: u32, h: u32| -> Result<Plane, CodecError> {
            let data = picture.plane(component);
            let stride = picture.stride(component) as usize;
            if bit_depth > 8 {
                Plane::from_ne_u16_bytes(w, h, data.as_ref(), stride)
            } else {
                Plane::from_u8(w, h, data.as_ref(), stride)
            }
        };

        let y = copy(PlanarImageComponent::Y, width, height)?;
        let (u, v) = if chroma == ChromaSampling::Monochrome {
            (None, None)
        } else {
            let (cw, ch) = chroma.chroma_size(width, height);
            (
                Some(copy(PlanarImageComponent::U, cw, ch)?),
                Some(copy(PlanarImageComponent::V, cw, ch)?),
            )
        };

        // Colour description is read from the sequence header, which the
        // bridge has already validated.
        let (matrix, full_range) = match obu::parse_obu(request.payload) {
            Ok(header) => (
                header
                    .color
                    .color_description
                    .map_or(MatrixCoefficients::Unspecified, |(_, _, mc)| MatrixCoefficients::from_cicp(mc.into())),
                header.color.full_range,
            ),
            Err(_) => (MatrixCoefficients::Unspecified, false),
        };

        Ok(PlaneSet {
            y,
            u,
            v,
            alpha: None,
            bit_depth,
            alpha_bit_depth: bit_depth,
            chroma,
            matrix,
            full_range,
        })
    }
}
