// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryClone;
use libheif_rs::{Chroma, ColorSpace, HeifContext, HeifError, HeifErrorCode, LibHeif};
use log::debug;
use std::sync::LazyLock;

use super::{DecodeRequest, EncodedItem, IntraDecoder, Plane, PlaneSet};
use crate::container::CodecConfigRecord;
use crate::image::{ChromaSampling, CodecType};
use crate::writer::HeifWriter;
use crate::CodecError;

static LIB_HEIF: LazyLock<LibHeif> = LazyLock::new(LibHeif::new);

/// HEVC decoding through libheif and libde265.
///
/// libheif only reads whole files, so the item is rewrapped in a minimal
/// single-item HEIF first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibheifDecoder;

fn map_error(err: HeifError) -> CodecError {
    match err.code {
        HeifErrorCode::MemoryAllocationError => CodecError::ResourceExhausted("libheif ran out of memory"),
        HeifErrorCode::UnsupportedFeature | HeifErrorCode::UnsupportedFiletype => {
            CodecError::UnsupportedProfile("libheif does not support this image")
        },
        HeifErrorCode::InvalidInput | HeifErrorCode::DecoderPluginError => {
            CodecError::CorruptBitstream("libheif could not decode the HEVC payload")
        },
        code => CodecError::Backend {
            code: code as i32,
            msg: err.message,
        },
    }
}

impl IntraDecoder for LibheifDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Hevc
    }

    fn decode(&self, request: &DecodeRequest<'_>) -> Result<PlaneSet, CodecError> {
        let Some(record) = request.config else {
            return Err(CodecError::CorruptBitstream("HEVC item has no hvcC configuration"));
        };
        let CodecConfigRecord::Hevc(hvcc) = record else {
            return Err(CodecError::CorruptBitstream("HEVC item carries an AV1 configuration"));
        };
        if request.width == 0 || request.height == 0 {
            return Err(CodecError::CorruptBitstream("HEVC item has no ispe"));
        }
        if request.thread_count != 0 {
            debug!("libheif: thread count {} left to libheif", request.thread_count);
        }

        let mut payload = Vec::new();
        payload.try_reserve_exact(request.payload.len())?;
        payload.extend_from_slice(request.payload);
        let item = EncodedItem {
            payload,
            config_record: record
                .try_clone()
                .map_err(|_| CodecError::ResourceExhausted("hvcC copy failed"))?,
        };
        let file = HeifWriter::new(request.width, request.height).write(&item, None)?;

        let ctx = HeifContext::read_from_bytes(&file).map_err(map_error)?;
        let handle = ctx.primary_image_handle().map_err(map_error)?;

        let chroma = hvcc.chroma();
        let color_space = match chroma {
            ChromaSampling::Monochrome => ColorSpace::Monochrome,
            ChromaSampling::Cs420 => ColorSpace::YCbCr(Chroma::C420),
            ChromaSampling::Cs422 => ColorSpace::YCbCr(Chroma::C422),
            ChromaSampling::Cs444 => ColorSpace::YCbCr(Chroma::C444),
        };
        let image = LIB_HEIF.decode(&handle, color_space, None).map_err(map_error)?;
        let planes = image.planes();

        let copy = |plane: Option<libheif_rs::Plane<&[u8]>>| -> Result<Option<Plane>, CodecError> {
            let Some(p) = plane else { return Ok(None) };
            let plane = if p.storage_bits_per_pixel > 8 {
                Plane::from_ne_u16_bytes(p.width, p.height, p.data, p.stride)?
            } else {
                Plane::from_u8(p.width, p.height, p.data, p.stride)?
            };
            Ok(Some(plane))
        };

        let bit_depth = planes.y.as_ref().map_or(8, |p| p.bits_per_pixel);
        let y = copy(planes.y)?.ok_or(CodecError::CorruptBitstream("libheif returned no luma plane"))?;
        let (u, v) = match chroma {
            ChromaSampling::Monochrome => (None, None),
            _ => (copy(planes.cb)?, copy(planes.cr)?),
        };
        if chroma != ChromaSampling::Monochrome && (u.is_none() || v.is_none()) {
            return Err(CodecError::CorruptBitstream("libheif returned no chroma planes"));
        }
        debug!("libheif: {}x{} {bit_depth} bit {chroma:?}", y.width, y.height);

        let signalled = image
            .color_profile_nclx()
            .or_else(|| handle.color_profile_nclx())
            .map(|nclx| (nclx.matrix_coefficients() as u16, nclx.full_range_flag() != 0));
        let (matrix, full_range) = super::hevc_colour(signalled);

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
