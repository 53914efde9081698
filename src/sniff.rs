// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Container family, as told by the `ftyp` brands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// HEIF with HEVC coded items (`.heic`)
    Heif,
    /// AV1 Image File Format
    Avif,
    Unknown,
}

const AVIF_BRANDS: [&[u8; 4]; 2] = [b"avif", b"avis"];
const HEIF_BRANDS: [&[u8; 4]; 6] = [b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx"];
const GENERIC_BRANDS: [&[u8; 4]; 3] = [b"mif1", b"msf1", b"miaf"];

impl ImageFormat {
    /// Classify a file from its major brand and compatible brands.
    ///
    /// A specific major brand wins. A generic MIAF major brand defers to the
    /// compatible brands, preferring AVIF.
    pub(crate) fn from_brands<'a>(major: &[u8; 4], compatible: impl IntoIterator<Item = &'a [u8; 4]>) -> Self {
        if AVIF_BRANDS.contains(&major) {
            return Self::Avif;
        }
        if HEIF_BRANDS.contains(&major) {
            return Self::Heif;
        }
        let mut avif = false;
        let mut heif = GENERIC_BRANDS.contains(&major);
        for brand in compatible {
            avif |= AVIF_BRANDS.contains(&brand);
            heif |= HEIF_BRANDS.contains(&brand) || GENERIC_BRANDS.contains(&brand);
        }
        if avif {
            Self::Avif
        } else if heif {
            Self::Heif
        } else {
            Self::Unknown
        }
    }

    /// Major brand written by the encoder for this family.
    pub(crate) fn major_brand(self) -> Option<[u8; 4]> {
        match self {
            Self::Heif => Some(*b"heic"),
            Self::Avif => Some(*b"avif"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heif => "HEIF",
            Self::Avif => "AVIF",
            Self::Unknown => "unknown",
        })
    }
}

/// Classify the first bytes of a file as HEIF, AVIF or neither.
///
/// Needs at least 12 bytes. Only the supplied prefix is read, and malformed
/// input yields [`ImageFormat::Unknown`] rather than an error.
///
/// ```
/// use heif_coder::{ImageFormat, sniff};
///
/// assert_eq!(sniff(b"\x00\x00\x00\x18ftypheic"), ImageFormat::Heif);
/// assert_eq!(sniff(b"\x00\x00\x00\x18ftypavif"), ImageFormat::Avif);
/// assert_eq!(sniff(b"GIF89a\x01\x00\x01\x00\x00\x00"), ImageFormat::Unknown);
/// ```
#[must_use]
pub fn sniff(prefix: &[u8]) -> ImageFormat {
    let Some(header) = prefix.get(..12) else {
        return ImageFormat::Unknown;
    };
    if &header[4..8] != b"ftyp" {
        return ImageFormat::Unknown;
    }

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let (brands_start, declared_end) = match size {
        0 => (8, prefix.len()),
        1 => {
            let Some(large) = prefix.get(8..16) else {
                return ImageFormat::Unknown;
            };
            let mut bytes = [0; 8];
            bytes.copy_from_slice(large);
            let large = u64::from_be_bytes(bytes);
            if large < 20 {
                return ImageFormat::Unknown;
            }
            (16, usize::try_from(large).unwrap_or(usize::MAX))
        },
        2..=11 => return ImageFormat::Unknown,
        n => (8, n as usize),
    };

    let Some(major) = prefix.get(brands_start..brands_start + 4) else {
        return ImageFormat::Unknown;
    };
    let mut major_brand = [0; 4];
    major_brand.copy_from_slice(major);

    // Compatible brands follow the 4-byte minor version.
    let compat_end = declared_end.min(prefix.len());
    let compatible = prefix
        .get(brands_start + 8..compat_end.max(brands_start + 8))
        .unwrap_or_default()
        .chunks_exact(4)
        .filter_map(|c| <&[u8; 4]>::try_from(c).ok());

    ImageFormat::from_brands(&major_brand, compatible)
}
