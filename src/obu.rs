// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Just enough of the AV1 bitstream to read the sequence header.
//!
//! See AV1 Bitstream & Decoding Process Specification § 5.3 and § 5.5

use bitreader::BitReader;
use std::num::NonZeroU32;

use crate::ContainerError;

const OBU_SEQUENCE_HEADER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColorConfig {
    /// 8, 10, or 12
    pub bit_depth: u8,
    pub monochrome: bool,
    /// Horizontal and vertical. `false` is full-res.
    pub chroma_subsampling: (bool, bool),
    /// CICP `(colour_primaries, transfer_characteristics, matrix_coefficients)`
    pub color_description: Option<(u8, u8, u8)>,
    pub full_range: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SequenceHeaderObu {
    pub seq_profile: u8,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub max_frame_width: NonZeroU32,
    pub max_frame_height: NonZeroU32,
    pub color: ColorConfig,
}

/// Find and parse the first sequence header OBU in `data`.
pub(crate) fn parse_obu(mut data: &[u8]) -> Result<SequenceHeaderObu, ContainerError> {
    while !data.is_empty() {
        let (obu_type, payload, rest) = split_obu(data)?;
        if obu_type == OBU_SEQUENCE_HEADER {
            return parse_sequence_header(payload);
        }
        data = rest;
    }
    Err(ContainerError::InvalidData("no sequence header OBU"))
}

/// Returns the OBU type, its payload and the data after it.
fn split_obu(data: &[u8]) -> Result<(u8, &[u8], &[u8]), ContainerError> {
    let mut r = BitReader::new(data);
    let forbidden = r.read_bool()?;
    if forbidden {
        return Err(ContainerError::InvalidData("obu_forbidden_bit is set"));
    }
    let obu_type = r.read_u8(4)?;
    let extension_flag = r.read_bool()?;
    let has_size_field = r.read_bool()?;
    let _reserved = r.read_bool()?;
    let mut header_len = 1;
    if extension_flag {
        let _temporal_id = r.read_u8(3)?;
        let _spatial_id = r.read_u8(2)?;
        let _reserved = r.read_u8(3)?;
        header_len += 1;
    }

    let mut rest = data.get(header_len..).ok_or(ContainerError::Truncated)?;
    let size = if has_size_field {
        let size = leb128::read::unsigned(&mut rest).map_err(|e| match e {
            leb128::read::Error::IoError(_) => ContainerError::Truncated,
            leb128::read::Error::Overflow => ContainerError::InvalidData("obu_size overflow"),
        })?;
        usize::try_from(size)?
    } else {
        rest.len()
    };
    if size > rest.len() {
        return Err(ContainerError::Truncated);
    }
    let (payload, rest) = rest.split_at(size);
    Ok((obu_type, payload, rest))
}

fn parse_sequence_header(data: &[u8]) -> Result<SequenceHeaderObu, ContainerError> {
    let mut r = BitReader::new(data);
    let seq_profile = r.read_u8(3)?;
    if seq_profile > 2 {
        return Err(ContainerError::Unsupported("seq_profile"));
    }
    let still_picture = r.read_bool()?;
    let reduced_still_picture_header = r.read_bool()?;
    if reduced_still_picture_header {
        let _seq_level_idx = r.read_u8(5)?;
    } else {
        let timing_info_present = r.read_bool()?;
        let mut decoder_model_info_present = false;
        let mut buffer_delay_length = 0;
        if timing_info_present {
            let _num_units_in_display_tick = r.read_u32(32)?;
            let _time_scale = r.read_u32(32)?;
            if r.read_bool()? {
                let _num_ticks_per_picture_minus_1 = read_uvlc(&mut r)?;
            }
            decoder_model_info_present = r.read_bool()?;
            if decoder_model_info_present {
                buffer_delay_length = r.read_u8(5)? + 1;
                let _num_units_in_decoding_tick = r.read_u32(32)?;
                let _buffer_removal_time_length_minus_1 = r.read_u8(5)?;
                let _frame_presentation_time_length_minus_1 = r.read_u8(5)?;
            }
        }
        let initial_display_delay_present = r.read_bool()?;
        let operating_points_cnt = r.read_u8(5)? + 1;
        for _ in 0..operating_points_cnt {
            let _operating_point_idc = r.read_u16(12)?;
            let seq_level_idx = r.read_u8(5)?;
            if seq_level_idx > 7 {
                let _seq_tier = r.read_bool()?;
            }
            if decoder_model_info_present && r.read_bool()? {
                let _decoder_buffer_delay = r.read_u32(buffer_delay_length)?;
                let _encoder_buffer_delay = r.read_u32(buffer_delay_length)?;
                let _low_delay_mode_flag = r.read_bool()?;
            }
            if initial_display_delay_present && r.read_bool()? {
                let _initial_display_delay_minus_1 = r.read_u8(4)?;
            }
        }
    }

    let frame_width_bits = r.read_u8(4)? + 1;
    let frame_height_bits = r.read_u8(4)? + 1;
    let max_frame_width = NonZeroU32::MIN.saturating_add(r.read_u32(frame_width_bits)?);
    let max_frame_height = NonZeroU32::MIN.saturating_add(r.read_u32(frame_height_bits)?);

    if !reduced_still_picture_header && r.read_bool()? {
        let _delta_frame_id_length_minus_2 = r.read_u8(4)?;
        let _additional_frame_id_length_minus_1 = r.read_u8(3)?;
    }
    let _use_128x128_superblock = r.read_bool()?;
    let _enable_filter_intra = r.read_bool()?;
    let _enable_intra_edge_filter = r.read_bool()?;
    if !reduced_still_picture_header {
        let _enable_interintra_compound = r.read_bool()?;
        let _enable_masked_compound = r.read_bool()?;
        let _enable_warped_motion = r.read_bool()?;
        let _enable_dual_filter = r.read_bool()?;
        let enable_order_hint = r.read_bool()?;
        if enable_order_hint {
            let _enable_jnt_comp = r.read_bool()?;
            let _enable_ref_frame_mvs = r.read_bool()?;
        }
        let seq_choose_screen_content_tools = r.read_bool()?;
        let seq_force_screen_content_tools = if seq_choose_screen_content_tools { 2 } else { r.read_u8(1)? };
        if seq_force_screen_content_tools > 0 {
            let seq_choose_integer_mv = r.read_bool()?;
            if !seq_choose_integer_mv {
                let _seq_force_integer_mv = r.read_bool()?;
            }
        }
        if enable_order_hint {
            let _order_hint_bits_minus_1 = r.read_u8(3)?;
        }
    }
    let _enable_superres = r.read_bool()?;
    let _enable_cdef = r.read_bool()?;
    let _enable_restoration = r.read_bool()?;

    let color = parse_color_config(&mut r, seq_profile)?;
    let _film_grain_params_present = r.read_bool()?;

    Ok(SequenceHeaderObu {
        seq_profile,
        still_picture,
        reduced_still_picture_header,
        max_frame_width,
        max_frame_height,
        color,
    })
}

/// See AV1 § 5.5.2
fn parse_color_config(r: &mut BitReader<'_>, seq_profile: u8) -> Result<ColorConfig, ContainerError> {
    let high_bitdepth = r.read_bool()?;
    let bit_depth = if seq_profile == 2 && high_bitdepth {
        if r.read_bool()? { 12 } else { 10 }
    } else if high_bitdepth {
        10
    } else {
        8
    };
    let monochrome = if seq_profile == 1 { false } else { r.read_bool()? };
    let color_description = if r.read_bool()? {
        Some((r.read_u8(8)?, r.read_u8(8)?, r.read_u8(8)?))
    } else {
        None
    };

    if monochrome {
        let full_range = r.read_bool()?;
        return Ok(ColorConfig {
            bit_depth,
            monochrome,
            chroma_subsampling: (true, true),
            color_description,
            full_range,
        });
    }

    // BT.709 primaries, sRGB transfer, identity matrix
    let (full_range, chroma_subsampling) = if color_description == Some((1, 13, 0)) {
        (true, (false, false))
    } else {
        let full_range = r.read_bool()?;
        let subsampling = match seq_profile {
            0 => (true, true),
            1 => (false, false),
            _ if bit_depth == 12 => {
                let x = r.read_bool()?;
                let y = if x { r.read_bool()? } else { false };
                (x, y)
            },
            _ => (true, false),
        };
        if subsampling == (true, true) {
            let _chroma_sample_position = r.read_u8(2)?;
        }
        (full_range, subsampling)
    };
    let _separate_uv_delta_q = r.read_bool()?;

    Ok(ColorConfig {
        bit_depth,
        monochrome,
        chroma_subsampling,
        color_description,
        full_range,
    })
}

/// Variable length unsigned code. See AV1 § 4.10.3
fn read_uvlc(r: &mut BitReader<'_>) -> Result<u32, ContainerError> {
    let mut leading_zeros = 0u8;
    while !r.read_bool()? {
        leading_zeros += 1;
        if leading_zeros >= 32 {
            return Ok(u32::MAX);
        }
    }
    let value = r.read_u32(leading_zeros)?;
    Ok(value + ((1u32 << leading_zeros) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reduced still-picture header for a 4×4 8-bit 4:2:0 image, as written by rav1e
    const STILL_4X4: &[u8] = &[
        0x0a, 0x06, // OBU_SEQUENCE_HEADER with size field, 6 bytes
        0b000_1_1_000, // profile 0, still, reduced, seq_level_idx 0..
        0b00_0001_00, // ..level, frame_width_bits_minus_1 = 1, height bits..
        0b01_11_11_0_0, // ..= 1, width-1 = 3, height-1 = 3, 128x128 off, filter_intra off
        0b0_0_0_0_0_0_0_1, // intra_edge, superres, cdef, restoration, high_bitdepth, mono, desc, range
        0b0_0_0_00000, // chroma_sample_position, separate_uv_delta_q, film grain
        0x00,
    ];

    #[test]
    fn reduced_still_picture_header() {
        let h = parse_obu(STILL_4X4).unwrap();
        assert_eq!(h.seq_profile, 0);
        assert!(h.still_picture);
        assert!(h.reduced_still_picture_header);
        assert_eq!(h.max_frame_width.get(), 4);
        assert_eq!(h.max_frame_height.get(), 4);
        assert_eq!(h.color.bit_depth, 8);
        assert!(!h.color.monochrome);
        assert_eq!(h.color.chroma_subsampling, (true, true));
        assert!(h.color.full_range);
    }

    #[test]
    fn skips_temporal_delimiter() {
        let mut data = vec![0x12, 0x00];
        data.extend_from_slice(STILL_4X4);
        assert_eq!(parse_obu(&data).unwrap().max_frame_width.get(), 4);
    }

    #[test]
    fn truncated_obu() {
        assert!(matches!(parse_obu(&STILL_4X4[..4]), Err(ContainerError::Truncated)));
        assert!(parse_obu(&[0x12, 0x00]).is_err());
        assert!(parse_obu(&[0x80]).is_err());
    }

    #[test]
    fn uvlc() {
        // 001 01 -> 2 leading zeros, value 1 -> 1 + 3 = 4
        let data = [0b0010_1000];
        let mut r = BitReader::new(&data);
        assert_eq!(read_uvlc(&mut r).unwrap(), 4);
    }
}
