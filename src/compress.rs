//! Best-effort compression of transformed variants.
//!
//! A [`CompressionPipeline`] runs an ordered chain of [`CodecPass`]es, each
//! one receiving the previous pass's output. Compression is strictly
//! optional: if any pass fails, the whole attempt is abandoned and the
//! transformed bytes are returned untouched as [`Compressed::Degraded`].

use crate::constants::{
    JPEG_RECOMPRESS_MAX_MEAN_ERROR, LIBDEFLATER_HIGH_LEVEL, LIBDEFLATER_LOW_LEVEL, OXIPNG_PRESET,
    ZOPFLI_ITERATIONS,
};
use crate::error::{PipelineError, Result};
use crate::formats::OutputFormat;
use crate::transform::TransformedImage;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use oxipng::{Deflaters, Options};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU8;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// Quality search range in `0.0..=1.0`.
///
/// Codecs treat this as a range to search, not an exact setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBound {
    pub lower: f32,
    pub upper: f32,
}

impl QualityBound {
    pub fn validate(&self) -> Result<()> {
        let in_range = |q: f32| (0.0..=1.0).contains(&q);
        if !in_range(self.lower) || !in_range(self.upper) || self.lower > self.upper {
            return Err(PipelineError::InvalidConfig(format!(
                "quality bound must satisfy 0 <= lower <= upper <= 1, got [{}, {}]",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// The bound as JPEG quality settings, each in `1..=100`.
    pub fn jpeg_range(&self) -> (u8, u8) {
        let scale = |q: f32| (q * 100.0).round().clamp(1.0, 100.0) as u8;
        (scale(self.lower), scale(self.upper))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{codec} failed: {reason}")]
pub struct CodecError {
    pub codec: &'static str,
    pub reason: String,
}

impl CodecError {
    pub fn new(codec: &'static str, reason: impl Into<String>) -> Self {
        Self {
            codec,
            reason: reason.into(),
        }
    }
}

/// One step of the compression chain.
///
/// A pass that does not understand the payload's format must hand it back
/// unchanged rather than fail.
pub trait CodecPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn compress(
        &self,
        input: &[u8],
        quality: QualityBound,
    ) -> std::result::Result<Vec<u8>, CodecError>;
}

/// Codec passes selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    JpegRecompress,
    JpegOptimize,
    PngOptimize,
}

impl CodecKind {
    pub fn build(&self) -> Box<dyn CodecPass> {
        match self {
            CodecKind::JpegRecompress => Box::new(JpegRecompress::default()),
            CodecKind::JpegOptimize => Box::new(JpegOptimize),
            CodecKind::PngOptimize => Box::new(PngOptimize),
        }
    }
}

/// Result of a compression attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressed {
    Optimized(Vec<u8>),
    /// Some pass failed; `bytes` are the untouched transformed bytes.
    Degraded { bytes: Vec<u8>, cause: CodecError },
}

impl Compressed {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Compressed::Optimized(bytes) | Compressed::Degraded { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Compressed::Optimized(bytes) | Compressed::Degraded { bytes, .. } => bytes,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Compressed::Degraded { .. })
    }
}

pub struct CompressionPipeline {
    passes: Vec<Box<dyn CodecPass>>,
    quality: QualityBound,
}

impl CompressionPipeline {
    pub fn new(passes: Vec<Box<dyn CodecPass>>, quality: QualityBound) -> Self {
        Self { passes, quality }
    }

    pub fn from_kinds(kinds: &[CodecKind], quality: QualityBound) -> Self {
        Self::new(kinds.iter().map(CodecKind::build).collect(), quality)
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass in order. Never fails: a failing or panicking pass
    /// turns the whole attempt into [`Compressed::Degraded`].
    pub fn compress(&self, image: &TransformedImage) -> Compressed {
        match self.run_chain(&image.bytes) {
            Ok(bytes) => {
                debug!(
                    before = image.bytes.len(),
                    after = bytes.len(),
                    "Image compression complete"
                );
                Compressed::Optimized(bytes)
            }
            Err(cause) => {
                warn!(
                    error = %cause,
                    "[Handled] Could not compress image, using resized image only"
                );
                Compressed::Degraded {
                    bytes: image.bytes.clone(),
                    cause,
                }
            }
        }
    }

    fn run_chain(&self, input: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        let mut current = input.to_vec();
        for pass in &self.passes {
            let name = pass.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                pass.compress(&current, self.quality)
            }))
            .map_err(|_| CodecError::new(name, "codec panicked"))?;
            current = outcome?;
            debug!(codec = name, size = current.len(), "Codec pass finished");
        }
        Ok(current)
    }
}

/// Lossy JPEG re-encode that searches the quality bound for the lowest
/// setting whose pixels stay within an error budget of the input.
#[derive(Debug, Clone)]
pub struct JpegRecompress {
    pub max_mean_error: f64,
}

impl Default for JpegRecompress {
    fn default() -> Self {
        Self {
            max_mean_error: JPEG_RECOMPRESS_MAX_MEAN_ERROR,
        }
    }
}

impl JpegRecompress {
    const NAME: &'static str = "jpeg-recompress";

    fn encode(&self, pixels: &RgbImage, quality: u8) -> std::result::Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            encoder
                .encode_image(pixels)
                .map_err(|e| CodecError::new(Self::NAME, e.to_string()))?;
        }
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<RgbImage, CodecError> {
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| CodecError::new(Self::NAME, e.to_string()))
    }
}

fn mean_abs_error(a: &RgbImage, b: &RgbImage) -> f64 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return f64::INFINITY;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| u64::from(x.abs_diff(*y)))
        .sum();
    total as f64 / a.as_raw().len() as f64
}

impl CodecPass for JpegRecompress {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compress(
        &self,
        input: &[u8],
        quality: QualityBound,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        if OutputFormat::detect(input) != Some(OutputFormat::Jpeg) {
            return Ok(input.to_vec());
        }

        let reference = self.decode(input)?;
        let (lower, upper) = quality.jpeg_range();

        // Error shrinks as quality grows, so binary search for the lowest
        // quality inside the budget.
        let (mut lo, mut hi) = (lower, upper);
        let mut best = None;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = self.encode(&reference, mid)?;
            let error = mean_abs_error(&reference, &self.decode(&candidate)?);
            if error <= self.max_mean_error {
                best = Some(candidate);
                if mid == lower {
                    break;
                }
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }

        let candidate = match best {
            Some(bytes) => bytes,
            None => self.encode(&reference, upper)?,
        };
        if candidate.len() < input.len() {
            Ok(candidate)
        } else {
            Ok(input.to_vec())
        }
    }
}

/// Lossless JPEG pass that drops metadata segments (EXIF, XMP, ICC, comments).
///
/// The JFIF `APP0` and Adobe `APP14` segments are kept since decoders rely on
/// them for colour interpretation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegOptimize;

impl JpegOptimize {
    const NAME: &'static str = "jpeg-optimize";

    fn strip(input: &[u8]) -> std::result::Result<Vec<u8>, String> {
        if input.len() < 4 || input[0..2] != [0xFF, 0xD8] {
            return Err("missing SOI marker".to_string());
        }

        let mut out = Vec::with_capacity(input.len());
        out.extend_from_slice(&input[..2]);
        let mut pos = 2;

        loop {
            if input.get(pos) != Some(&0xFF) {
                return Err(format!("expected marker at offset {}", pos));
            }
            while input.get(pos) == Some(&0xFF) {
                pos += 1;
            }
            let marker = *input
                .get(pos)
                .ok_or_else(|| "unexpected end of stream".to_string())?;
            pos += 1;

            match marker {
                0xD9 => {
                    out.extend_from_slice(&[0xFF, 0xD9]);
                    return Ok(out);
                }
                0x01 | 0xD0..=0xD7 => {
                    out.extend_from_slice(&[0xFF, marker]);
                    continue;
                }
                _ => {}
            }

            let len = input
                .get(pos..pos + 2)
                .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
                .ok_or_else(|| "truncated segment length".to_string())?;
            let end = pos + len;
            if len < 2 || end > input.len() {
                return Err(format!("truncated segment 0xFF{:02X}", marker));
            }

            let metadata = matches!(marker, 0xE1..=0xED | 0xEF | 0xFE);
            if !metadata {
                out.extend_from_slice(&[0xFF, marker]);
                out.extend_from_slice(&input[pos..end]);
            }
            pos = end;

            // Entropy-coded data follows SOS; copy it verbatim.
            if marker == 0xDA {
                out.extend_from_slice(&input[pos..]);
                return Ok(out);
            }
        }
    }
}

impl CodecPass for JpegOptimize {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compress(
        &self,
        input: &[u8],
        _quality: QualityBound,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        if OutputFormat::detect(input) != Some(OutputFormat::Jpeg) {
            return Ok(input.to_vec());
        }
        Self::strip(input).map_err(|reason| CodecError::new(Self::NAME, reason))
    }
}

/// Lossless PNG optimization through oxipng.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngOptimize;

impl PngOptimize {
    const NAME: &'static str = "png-optimize";

    fn options(quality: QualityBound) -> Options {
        let mut options = Options::from_preset(OXIPNG_PRESET);
        let upper = (quality.upper * 100.0).round() as u8;
        options.deflate = if upper >= 90 {
            Deflaters::Zopfli {
                iterations: NonZeroU8::new(ZOPFLI_ITERATIONS).unwrap_or(NonZeroU8::MIN),
            }
        } else if upper >= 70 {
            Deflaters::Libdeflater {
                compression: LIBDEFLATER_HIGH_LEVEL,
            }
        } else {
            Deflaters::Libdeflater {
                compression: LIBDEFLATER_LOW_LEVEL,
            }
        };
        options
    }
}

impl CodecPass for PngOptimize {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compress(
        &self,
        input: &[u8],
        quality: QualityBound,
    ) -> std::result::Result<Vec<u8>, CodecError> {
        if OutputFormat::detect(input) != Some(OutputFormat::Png) {
            return Ok(input.to_vec());
        }
        oxipng::optimize_from_memory(input, &Self::options(quality))
            .map_err(|e| CodecError::new(Self::NAME, e.to_string()))
    }
}
