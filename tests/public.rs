// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use std::sync::atomic::{AtomicUsize, Ordering};

use heif_coder::{
    Av1Config, Backends, ChromaSampling, CodecConfig, CodecConfigRecord, CodecError, CodecType, ContainerError,
    ContainerHandle, DecodeRequest, EncodedItem, Error, ErrorKind, HeifWriter, HevcConfig, ImageFormat,
    IntraDecoder, ItemRole, MatrixCoefficients, MirrorAxis, Plane, PlaneSet, Transform,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::max()).try_init();
}

/// Main profile, 8-bit 4:2:0, no parameter sets
const HVCC: [u8; 23] = [
    1, 0x01, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 90, 0xf0, 0x00, 0xfc, 0xfd, 0xf8, 0xf8, 0, 0, 0x0f, 0,
];

fn hevc_item(payload: &[u8]) -> EncodedItem {
    EncodedItem {
        payload: payload.to_vec(),
        config_record: CodecConfigRecord::Hevc(HevcConfig::parse(&HVCC).expect("hvcC")),
    }
}

fn av1_item(payload: &[u8]) -> EncodedItem {
    EncodedItem {
        payload: payload.to_vec(),
        config_record: CodecConfigRecord::Av1(Av1Config::parse(&[0x81, 0x08, 0x0c, 0x00]).expect("av1C")),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present")
}

/// Decodes every item to a flat image whose luma is the payload's first byte.
struct FlatDecoder {
    calls: AtomicUsize,
}

impl FlatDecoder {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IntraDecoder for FlatDecoder {
    fn codec(&self) -> CodecType {
        CodecType::Hevc
    }

    fn decode(&self, request: &DecodeRequest<'_>) -> Result<PlaneSet, CodecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = u16::from(*request.payload.first().ok_or(CodecError::CorruptBitstream("empty"))?);
        let chroma = request.config.map_or(ChromaSampling::Cs420, CodecConfigRecord::chroma);

        let mut y = Plane::new(request.width, request.height)?;
        y.samples.fill(value);
        let (cw, ch) = chroma.chroma_size(request.width, request.height);
        let neutral = || -> Result<Plane, CodecError> {
            let mut p = Plane::new(cw, ch)?;
            p.samples.fill(128);
            Ok(p)
        };
        Ok(PlaneSet {
            y,
            u: Some(neutral()?),
            v: Some(neutral()?),
            alpha: None,
            bit_depth: 8,
            alpha_bit_depth: 8,
            chroma,
            matrix: MatrixCoefficients::Bt601,
            full_range: true,
        })
    }
}

#[test]
fn sniff_is_total_and_pure() {
    let inputs: [&[u8]; 8] = [
        b"",
        b"\0\0\0\x18ftyp",
        b"\0\0\0\x18ftypheic",
        b"\0\0\0\x1cftypavif\0\0\0\0mif1",
        b"\0\0\0\x18ftypmp42\0\0\0\0isom",
        b"\xff\xd8\xff\xe0\0\x10JFIF\0\x01",
        b"\0\0\0\x01ftypheic",
        &[0xff; 64],
    ];
    let expected = [
        ImageFormat::Unknown,
        ImageFormat::Unknown,
        ImageFormat::Heif,
        ImageFormat::Avif,
        ImageFormat::Unknown,
        ImageFormat::Unknown,
        ImageFormat::Unknown,
        ImageFormat::Unknown,
    ];
    for (input, expected) in inputs.iter().zip(expected) {
        assert_eq!(heif_coder::sniff(input), expected, "{input:?}");
        assert_eq!(heif_coder::sniff(input), heif_coder::sniff(input));
    }
}

#[test]
fn truncated_heif_sniffs_but_fails_to_decode() {
    init_logger();
    let prefix = b"\0\0\0\x18ftypheic";
    assert_eq!(prefix.len(), 12);
    assert_eq!(heif_coder::sniff(prefix), ImageFormat::Heif);

    let err = heif_coder::decode(prefix, &CodecConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Container);
    assert!(matches!(err, Error::Container(ContainerError::Truncated)));
}

#[test]
fn primary_item_without_type_is_a_container_error() {
    init_logger();
    let mut file = HeifWriter::new(8, 8).write(&hevc_item(b"\x80"), None).expect("write");
    let at = find(&file, b"hvc1");
    file[at..at + 4].copy_from_slice(&[0; 4]);

    let decoder = FlatDecoder::new();
    let backends = Backends::none().with_decoder(&decoder);
    let err = heif_coder::decode_with(&file, &CodecConfig::default(), &backends).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Container, "{err}");
    assert_eq!(decoder.calls(), 0);
}

#[test]
fn extents_outside_the_input_are_rejected() {
    init_logger();
    let file = HeifWriter::new(8, 8).write(&hevc_item(b"\x80payload"), None).expect("write");
    let iloc = find(&file, b"iloc");
    // name, version+flags, sizes, count, id, dref, extent count
    let offset_at = iloc + 4 + 4 + 2 + 2 + 2 + 2 + 2;
    let length_at = offset_at + 4;

    for lenient in [false, true] {
        let config = CodecConfig::default().with_strict(!lenient);

        let mut long = file.clone();
        long[length_at..length_at + 4].copy_from_slice(&0xffff_0000u32.to_be_bytes());
        let err = ContainerHandle::parse(&long, &config).unwrap_err();
        assert!(matches!(err, ContainerError::OutOfBounds(_)), "{err:?}");

        let mut far = file.clone();
        far[offset_at..offset_at + 4].copy_from_slice(&(file.len() as u32).to_be_bytes());
        assert!(ContainerHandle::parse(&far, &config).is_err());

        let mut into_meta = file.clone();
        into_meta[offset_at..offset_at + 4].copy_from_slice(&40u32.to_be_bytes());
        let err = ContainerHandle::parse(&into_meta, &config).unwrap_err();
        assert!(matches!(err, ContainerError::OutOfBounds(_)), "{err:?}");
    }
}

#[test]
fn oversized_images_never_reach_the_decoder() {
    init_logger();
    let decoder = FlatDecoder::new();
    let backends = Backends::none().with_decoder(&decoder);

    let huge = HeifWriter::new(20000, 10).write(&hevc_item(b"\x80"), None).expect("write");
    let err = heif_coder::decode_with(&huge, &CodecConfig::default(), &backends).unwrap_err();
    assert!(matches!(
        err,
        Error::Codec(CodecError::DimensionsTooLarge { width: 20000, height: 10, max: 16384 })
    ));

    let small = HeifWriter::new(16, 16).write(&hevc_item(b"\x80"), None).expect("write");
    let config = CodecConfig::default().with_max_dimension(8);
    let err = heif_coder::decode_with(&small, &config, &backends).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
    assert_eq!(decoder.calls(), 0);

    // Still parseable, and decodable once the limit allows it
    assert_eq!(heif_coder::probe(&huge, &CodecConfig::default()).expect("probe").width, 20000);
    heif_coder::decode_with(&small, &CodecConfig::default(), &backends).expect("decode");
    assert_eq!(decoder.calls(), 1);
}

#[test]
fn missing_backend_is_a_codec_error() {
    let file = HeifWriter::new(4, 4).write(&hevc_item(b"\x80"), None).expect("write");
    let err = heif_coder::decode_with(&file, &CodecConfig::default(), &Backends::none()).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::UnsupportedCodec(_))));
}

#[test]
fn alpha_item_is_composited() {
    init_logger();
    let file = HeifWriter::new(5, 3)
        .with_colour(MatrixCoefficients::Bt601, true)
        .write(&hevc_item(b"\x80colour"), Some(&hevc_item(b"\x40alpha")))
        .expect("write");

    let handle = ContainerHandle::parse(&file, &CodecConfig::default()).expect("parse");
    assert_eq!(handle.format(), ImageFormat::Heif);
    let alpha = handle.alpha_of(handle.primary()).expect("alpha item");
    assert_eq!(alpha.role, ItemRole::Alpha);

    let decoder = FlatDecoder::new();
    let backends = Backends::none().with_decoder(&decoder);
    let image = heif_coder::decode_with(&file, &CodecConfig::default(), &backends).expect("decode");
    assert_eq!((image.width, image.height), (5, 3));
    assert_eq!(decoder.calls(), 2);
    for y in 0..3 {
        for x in 0..5 {
            assert_eq!(image.pixel(x, y), [128, 128, 128, 64]);
        }
    }
}

#[test]
fn premultiplied_alpha_is_undone() {
    let file = HeifWriter::new(2, 2)
        .with_colour(MatrixCoefficients::Bt601, true)
        .with_premultiplied_alpha(true)
        .write(&hevc_item(b"\x40"), Some(&hevc_item(b"\x80")))
        .expect("write");
    assert!(heif_coder::probe(&file, &CodecConfig::default()).expect("probe").premultiplied_alpha);

    let decoder = FlatDecoder::new();
    let backends = Backends::none().with_decoder(&decoder);
    let image = heif_coder::decode_with(&file, &CodecConfig::default(), &backends).expect("decode");
    assert_eq!(image.pixel(1, 1), [128, 128, 128, 128]);
}

#[test]
fn orientation_and_target_size() {
    let transform = Transform {
        rotation: 1,
        mirror: Some(MirrorAxis::Vertical),
    };
    let file = HeifWriter::new(8, 4)
        .with_transform(transform)
        .write(&hevc_item(b"\x80"), None)
        .expect("write");
    let decoder = FlatDecoder::new();
    let backends = Backends::none().with_decoder(&decoder);

    let info = heif_coder::probe(&file, &CodecConfig::default()).expect("probe");
    assert_eq!((info.width, info.height), (4, 8));

    let image = heif_coder::decode_with(&file, &CodecConfig::default(), &backends).expect("decode");
    assert_eq!((image.width, image.height), (4, 8));

    let config = CodecConfig::default().with_apply_transforms(false);
    let image = heif_coder::decode_with(&file, &config, &backends).expect("decode");
    assert_eq!((image.width, image.height), (8, 4));

    let config = CodecConfig::default().with_target_size(2, 2);
    let image = heif_coder::decode_with(&file, &config, &backends).expect("decode");
    assert_eq!((image.width, image.height), (1, 2));

    let config = CodecConfig::default().with_target_size(100, 100);
    let image = heif_coder::decode_with(&file, &config, &backends).expect("decode");
    assert_eq!((image.width, image.height), (4, 8));
}

#[test]
fn strict_and_lenient_parsing() {
    init_logger();
    let mut file = HeifWriter::new(4, 4).write(&hevc_item(b"\x80"), None).expect("write");
    let at = find(&file, b"pict");
    file[at..at + 4].copy_from_slice(b"vide");

    let err = ContainerHandle::parse(&file, &CodecConfig::default()).unwrap_err();
    assert!(matches!(err, ContainerError::InvalidData(_)));
    let handle = ContainerHandle::parse(&file, &CodecConfig::default().with_strict(false)).expect("lenient");
    assert_eq!(handle.primary().codec, CodecType::Hevc);
}

#[test]
fn format_follows_the_primary_codec() {
    let avif = HeifWriter::new(4, 4).write(&av1_item(b"\x12\x00"), None).expect("write");
    let info = heif_coder::probe(&avif, &CodecConfig::default()).expect("probe");
    assert_eq!(info.format, ImageFormat::Avif);
    assert_eq!(info.codec, CodecType::Av1);
    assert!(!info.has_alpha);

    let heic = HeifWriter::new(4, 4).write(&hevc_item(b"\x80"), None).expect("write");
    assert_eq!(heif_coder::probe(&heic, &CodecConfig::default()).expect("probe").format, ImageFormat::Heif);
}

#[test]
fn encoding_without_an_encoder_fails() {
    let image = heif_coder::PixelBuffer::from_rgba8(1, 1, vec![1, 2, 3, 255]).expect("image");
    let err = heif_coder::encode_with(&image, &CodecConfig::default(), &Backends::none(), ImageFormat::Heif)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedCodec(_)));
    let err = heif_coder::encode_with(&image, &CodecConfig::default(), &Backends::none(), ImageFormat::Unknown)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnsupportedCodec(_)));
}

#[cfg(all(feature = "dav1d", feature = "rav1e"))]
mod av1 {
    use heif_coder::{CodecConfig, ImageFormat, PixelBuffer};

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> PixelBuffer {
        let data = rgba.iter().copied().cycle().take(width as usize * height as usize * 4).collect();
        PixelBuffer::from_rgba8(width, height, data).expect("image")
    }

    #[test]
    fn lossless_red_square() {
        super::init_logger();
        let config = CodecConfig::default().with_quality(100).with_speed(10);
        let file = heif_coder::encode(&solid(4, 4, [255, 0, 0, 255]), &config).expect("encode");
        assert_eq!(heif_coder::sniff(&file), ImageFormat::Avif);

        let image = heif_coder::decode(&file, &CodecConfig::default()).expect("decode");
        assert_eq!((image.width, image.height), (4, 4));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(image.pixel(x, y), [255, 0, 0, 255]);
            }
        }
    }

    #[test]
    fn lossless_alpha_round_trip() {
        let mut data = Vec::new();
        for i in 0..16u8 {
            data.extend_from_slice(&[i * 10, 255 - i * 10, 7, if i % 2 == 0 { 255 } else { i * 8 }]);
        }
        let original = PixelBuffer::from_rgba8(4, 4, data).expect("image");
        let config = CodecConfig::default().with_quality(100).with_speed(10);
        let file = heif_coder::encode(&original, &config).expect("encode");
        assert!(heif_coder::probe(&file, &config).expect("probe").has_alpha);

        let image = heif_coder::decode(&file, &config).expect("decode");
        assert_eq!(image, original);
    }

    #[test]
    fn lossy_round_trip_stays_close() {
        let original = solid(16, 8, [200, 100, 50, 255]);
        let config = CodecConfig::default().with_quality(80).with_speed(10);
        let file = heif_coder::encode(&original, &config).expect("encode");

        let image = heif_coder::decode(&file, &config).expect("decode");
        assert_eq!((image.width, image.height), (16, 8));
        for y in 0..8 {
            for x in 0..16 {
                let got = image.pixel(x, y);
                let want = original.pixel(x, y);
                for c in 0..4 {
                    assert!(got[c].abs_diff(want[c]) <= 10, "({x},{y}) {got:?} vs {want:?}");
                }
            }
        }
    }
}
