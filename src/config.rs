// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::image::{ChromaSampling, PixelFormat};

/// Options for parsing, decoding and encoding.
///
/// Limits are checked **before** a codec backend is invoked, so an image that
/// claims unrealistic dimensions is rejected without allocating frame buffers.
///
/// # Examples
///
/// ```rust
/// use heif_coder::{CodecConfig, PixelFormat};
///
/// // Default limits, strict parsing, RGBA8 output
/// let config = CodecConfig::default();
///
/// // Best-effort parsing of slightly damaged files, 16-bit output
/// let config = CodecConfig::default()
///     .with_strict(false)
///     .with_output_format(PixelFormat::Rgba16)
///     .with_thread_count(4);
///
/// // Thumbnail-sized output
/// let config = CodecConfig::default().with_target_size(256, 256);
///
/// // No dimension limit
/// let config = CodecConfig::unlimited();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Worker threads the codec backend may use. 0 lets the backend decide.
    /// Default: 0
    pub thread_count: u32,

    /// Fail on any structural violation instead of recovering.
    /// Default: true
    pub strict: bool,

    /// Largest width or height accepted, in pixels.
    /// Default: 16384
    pub max_dimension: Option<u32>,

    /// Layout of decoded pixels.
    /// Default: [`PixelFormat::Rgba8`]
    pub output_format: PixelFormat,

    /// Downscale decoded images to fit within `(width, height)`. Never upscales.
    /// Default: None
    pub target_size: Option<(u32, u32)>,

    /// Keep the aspect ratio when fitting into `target_size`.
    /// Default: true
    pub preserve_aspect_ratio: bool,

    /// Apply `irot`/`imir` so the output is in display orientation.
    /// Default: true
    pub apply_transforms: bool,

    /// Encode quality, 0 to 100. 100 is mathematically lossless.
    /// Default: 80
    pub quality: u8,

    /// Encoder effort, 0 (slowest) to 10 (fastest).
    /// Default: 6
    pub speed: u8,

    /// Chroma layout used when encoding lossy images.
    /// Default: [`ChromaSampling::Cs444`]
    pub chroma_subsampling: ChromaSampling,

    /// The input to `encode` has premultiplied alpha; signal it with `prem`.
    /// Default: false
    pub premultiplied_alpha: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            strict: true,
            max_dimension: Some(16384),
            output_format: PixelFormat::Rgba8,
            target_size: None,
            preserve_aspect_ratio: true,
            apply_transforms: true,
            quality: 80,
            speed: 6,
            chroma_subsampling: ChromaSampling::Cs444,
            premultiplied_alpha: false,
        }
    }
}

impl CodecConfig {
    /// Create a configuration with no dimension limit.
    pub fn unlimited() -> Self {
        Self {
            max_dimension: None,
            ..Self::default()
        }
    }

    /// Set the worker thread hint
    pub fn with_thread_count(mut self, threads: u32) -> Self {
        self.thread_count = threads;
        self
    }

    /// Enable or disable strict parsing
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the maximum width and height
    pub fn with_max_dimension(mut self, pixels: u32) -> Self {
        self.max_dimension = Some(pixels);
        self
    }

    /// Set the decoded pixel layout
    pub fn with_output_format(mut self, format: PixelFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Fit decoded images within `width`×`height`
    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_size = Some((width, height));
        self
    }

    pub fn with_preserve_aspect_ratio(mut self, preserve: bool) -> Self {
        self.preserve_aspect_ratio = preserve;
        self
    }

    pub fn with_apply_transforms(mut self, apply: bool) -> Self {
        self.apply_transforms = apply;
        self
    }

    /// Set encode quality, clamped to 100
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    /// Set encoder speed, clamped to 10
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed.min(10);
        self
    }

    pub fn with_chroma_subsampling(mut self, chroma: ChromaSampling) -> Self {
        self.chroma_subsampling = chroma;
        self
    }

    pub fn with_premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied_alpha = premultiplied;
        self
    }

    /// True when `width`×`height` respects `max_dimension`.
    pub(crate) fn allows(&self, width: u32, height: u32) -> bool {
        self.max_dimension.is_none_or(|max| width <= max && height <= max)
    }

    pub(crate) fn is_lossless(&self) -> bool {
        self.quality >= 100
    }
}
