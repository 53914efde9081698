// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::debug;
use rav1e::prelude::{
    ChromaSampling as Rav1eChroma, ColorDescription, ColorPrimaries, Config, Context, EncoderConfig, EncoderStatus,
    Frame, MatrixCoefficients as Rav1eMatrix, Pixel, PixelRange, SpeedSettings, TransferCharacteristics,
};

use super::{EncodedItem, IntraEncoder, PlaneSet};
use crate::config::CodecConfig;
use crate::container::{Av1Config, CodecConfigRecord};
use crate::image::{ChromaSampling, CodecType, MatrixCoefficients};
use crate::CodecError;

/// AV1 still-picture encoding through rav1e.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rav1eEncoder;

/// Map 0-100 quality onto rav1e's 0-255 quantizer. 100 is lossless.
fn quantizer(quality: u8) -> usize {
    let q = f32::from(quality.min(100)) / 100.;
    let x = if q >= 0.85 {
        (1. - q) * 3.
    } else if q > 0.25 {
        1. - 0.125 - q * 0.5
    } else {
        1. - q
    };
    (x * 255.).round() as usize
}

fn map_status(status: EncoderStatus) -> CodecError {
    match status {
        EncoderStatus::Failure => CodecError::Backend {
            code: -1,
            msg: "rav1e failed to encode the frame".into(),
        },
        other => CodecError::Backend {
            code: -2,
            msg: format!("rav1e: {other:?}"),
        },
    }
}

fn encoder_config(planes: &PlaneSet, config: &CodecConfig) -> EncoderConfig {
    let chroma_sampling = match planes.chroma {
        ChromaSampling::Monochrome => Rav1eChroma::Cs400,
        ChromaSampling::Cs420 => Rav1eChroma::Cs420,
        ChromaSampling::Cs422 => Rav1eChroma::Cs422,
        ChromaSampling::Cs444 => Rav1eChroma::Cs444,
    };
    let color_description = match (planes.chroma, planes.matrix) {
        (ChromaSampling::Monochrome, _) => None,
        (_, MatrixCoefficients::Identity) => Some(ColorDescription {
            color_primaries: ColorPrimaries::BT709,
            transfer_characteristics: TransferCharacteristics::SRGB,
            matrix_coefficients: Rav1eMatrix::Identity,
        }),
        _ => Some(ColorDescription {
            color_primaries: ColorPrimaries::BT709,
            transfer_characteristics: TransferCharacteristics::SRGB,
            matrix_coefficients: Rav1eMatrix::BT601,
        }),
    };
    let quantizer = quantizer(config.quality);

    EncoderConfig {
        width: planes.y.width as usize,
        height: planes.y.height as usize,
        bit_depth: usize::from(planes.bit_depth),
        chroma_sampling,
        pixel_range: if planes.full_range { PixelRange::Full } else { PixelRange::Limited },
        color_description,
        still_picture: true,
        quantizer,
        min_quantizer: quantizer.min(255) as u8,
        speed_settings: SpeedSettings::from_preset(config.speed.min(10)),
        ..Default::default()
    }
}

fn fill_frame<T: Pixel>(frame: &mut Frame<T>, planes: &PlaneSet, cast: impl Fn(u16) -> T) {
    let sources = [Some(&planes.y), planes.u.as_ref(), planes.v.as_ref()];
    for (dst, src) in frame.planes.iter_mut().zip(sources) {
        let Some(src) = src else { continue };
        for (y, row) in dst.rows_iter_mut().enumerate().take(src.height as usize) {
            for (d, &s) in row.iter_mut().zip(src.row(y as u32)) {
                *d = cast(s);
            }
        }
    }
}

fn encode_frame<T: Pixel>(planes: &PlaneSet, config: &CodecConfig, cast: impl Fn(u16) -> T) -> Result<EncodedItem, CodecError> {
    let cfg = Config::new()
        .with_encoder_config(encoder_config(planes, config))
        .with_threads(config.thread_count as usize);
    let mut ctx: Context<T> = cfg.new_context().map_err(|e| CodecError::Backend {
        code: -3,
        msg: format!("rav1e configuration: {e}"),
    })?;

    let mut frame = ctx.new_frame();
    fill_frame(&mut frame, planes, cast);
    ctx.send_frame(frame).map_err(map_status)?;
    ctx.flush();

    let mut payload = Vec::new();
    loop {
        match ctx.receive_packet() {
            Ok(packet) => payload.extend_from_slice(&packet.data),
            Err(EncoderStatus::Encoded) => {},
            Err(EncoderStatus::LimitReached) => break,
            Err(status) => return Err(map_status(status)),
        }
    }
    if payload.is_empty() {
        return Err(CodecError::Backend {
            code: -1,
            msg: "rav1e produced no packet".into(),
        });
    }

    let av1c = Av1Config::parse(&ctx.container_sequence_header())
        .map_err(|_| CodecError::CorruptBitstream("rav1e produced an invalid av1C"))?;
    debug!("rav1e: {} bytes, profile {} level {}", payload.len(), av1c.profile, av1c.level);

    Ok(EncodedItem {
        payload,
        config_record: CodecConfigRecord::Av1(av1c),
    })
}

impl IntraEncoder for Rav1eEncoder {
    fn codec(&self) -> CodecType {
        CodecType::Av1
    }

    fn encode(&self, planes: &PlaneSet, config: &CodecConfig) -> Result<EncodedItem, CodecError> {
        match planes.bit_depth {
            8 => encode_frame::<u8>(planes, config, |v| v.min(255) as u8),
            10 | 12 => encode_frame::<u16>(planes, config, |v| v),
            _ => Err(CodecError::UnsupportedPixelFormat("AV1 encodes 8, 10 or 12 bit samples")),
        }
    }
}
