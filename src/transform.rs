use crate::config::{BackgroundColor, Gravity, PipelineConfig};
use crate::constants::{CANVAS_BYTES_PER_PIXEL, DECODE_MEMORY_SHARE, TRANSFORM_JPEG_QUALITY};
use crate::error::{PipelineError, Result};
use crate::formats::OutputFormat;
use crate::size_spec::SizeToken;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageReader, Limits, RgbImage, RgbaImage,
};
use std::io::Cursor;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

/// The uploaded original, fetched once per invocation.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub bucket: String,
    pub key: String,
}

/// A letterboxed variant, exactly `width x height`, encoded as `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    /// Pixels subtracted from each target dimension to get the content box.
    pub border: u32,
    pub background: BackgroundColor,
    pub gravity: Gravity,
    pub format: OutputFormat,
}

impl From<&PipelineConfig> for TransformOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            border: config.border,
            background: config.background,
            gravity: config.gravity,
            format: config.output_format,
        }
    }
}

pub struct ImageTransformer {
    options: TransformOptions,
    limits: Limits,
}

impl ImageTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self {
            options,
            limits: decode_limits(),
        }
    }

    /// Replaces the allocation budget shared by the decoder and the canvas.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.limits.max_alloc = Some(bytes);
        self
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Decodes and letterboxes `source` for one token.
    ///
    /// # Errors
    /// * `PipelineError::Decode` - the bytes are not a readable raster image
    /// * `PipelineError::Encode` - the canvas could not be written out
    pub fn transform(&self, source: &[u8], token: &SizeToken) -> Result<TransformedImage> {
        let img = self.decode(source)?;
        self.render(&img, token)
    }

    /// Decodes source bytes with EXIF orientation applied.
    ///
    /// Only pixels survive decoding, so embedded ICC profiles and EXIF blocks
    /// never reach the encoded variants.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        let decode_err = |e: image::ImageError| PipelineError::Decode(e.to_string());

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        reader.limits(self.limits.clone());

        let mut decoder = reader.into_decoder().map_err(decode_err)?;
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
        img.apply_orientation(orientation);

        if img.width() == 0 || img.height() == 0 {
            return Err(PipelineError::Decode("image has no pixels".to_string()));
        }
        debug!(
            width = img.width(),
            height = img.height(),
            ?orientation,
            "Decoded source image"
        );
        Ok(img)
    }

    /// Letterboxes an already decoded image onto a `token`-sized canvas.
    ///
    /// # Errors
    /// * `PipelineError::CanvasTooLarge` - the canvas would not fit the allocation budget
    /// * `PipelineError::Encode` - the canvas could not be written out
    pub fn render(&self, img: &DynamicImage, token: &SizeToken) -> Result<TransformedImage> {
        self.check_canvas(token.dimensions())?;
        let canvas = letterbox(img, token.dimensions(), &self.options);
        let (width, height) = canvas.dimensions();
        let bytes = self.encode(canvas)?;

        debug!(
            token = %token,
            width,
            height,
            size = bytes.len(),
            "Rendered variant canvas"
        );
        Ok(TransformedImage {
            bytes,
            width,
            height,
            format: self.options.format,
        })
    }

    fn check_canvas(&self, (width, height): (u32, u32)) -> Result<()> {
        let budget = self.limits.max_alloc.unwrap_or(u64::MAX);
        let needed = u64::from(width)
            .checked_mul(u64::from(height))
            .and_then(|pixels| pixels.checked_mul(CANVAS_BYTES_PER_PIXEL));
        match needed {
            Some(bytes) if bytes <= budget && usize::try_from(bytes).is_ok() => Ok(()),
            _ => Err(PipelineError::CanvasTooLarge {
                width,
                height,
                budget,
            }),
        }
    }

    fn encode(&self, canvas: RgbImage) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self.options.format {
            OutputFormat::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut buf, TRANSFORM_JPEG_QUALITY);
                encoder
                    .encode_image(&canvas)
                    .map_err(|e| PipelineError::Encode(e.to_string()))?;
            }
            other => {
                DynamicImage::ImageRgb8(canvas)
                    .write_to(&mut Cursor::new(&mut buf), other.to_image_format())
                    .map_err(|e| PipelineError::Encode(e.to_string()))?;
            }
        }
        Ok(buf)
    }
}

/// Caps decoder allocations at a share of the memory currently available.
fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    let mut sys =
        System::new_with_specifics(RefreshKind::new().with_memory(MemoryRefreshKind::new()));
    sys.refresh_memory();

    let available = sys.available_memory();
    if available > 0 {
        limits.max_alloc = Some((available as f64 * DECODE_MEMORY_SHARE) as u64);
    }
    limits
}

/// Target dimensions minus the border, never below one pixel.
pub fn content_box(width: u32, height: u32, border: u32) -> (u32, u32) {
    (
        width.saturating_sub(border).max(1),
        height.saturating_sub(border).max(1),
    )
}

/// Largest size with the source's aspect ratio that fits inside `bounds`.
/// Sources that already fit are left at their own size.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = source;
    let (bw, bh) = bounds;
    if sw <= bw && sh <= bh {
        return source;
    }

    let scale = f64::min(bw as f64 / sw as f64, bh as f64 / sh as f64);
    let w = ((sw as f64 * scale).round() as u32).clamp(1, bw);
    let h = ((sh as f64 * scale).round() as u32).clamp(1, bh);
    (w, h)
}

/// Resizes `img` into the content box and composites it on an opaque canvas
/// of exactly `target` pixels.
pub fn letterbox(img: &DynamicImage, target: (u32, u32), options: &TransformOptions) -> RgbImage {
    let (width, height) = target;
    let bounds = content_box(width, height, options.border);
    let fitted = fit_within(img.dimensions(), bounds);

    let content = if fitted == img.dimensions() {
        img.to_rgba8()
    } else {
        img.resize_exact(fitted.0, fitted.1, FilterType::Lanczos3)
            .to_rgba8()
    };

    let [r, g, b] = options.background.0;
    let mut canvas = RgbaImage::from_pixel(width, height, image::Rgba([r, g, b, 255]));
    let (x, y) = options.gravity.offset(target, fitted);
    imageops::overlay(&mut canvas, &content, i64::from(x), i64::from(y));

    DynamicImage::ImageRgba8(canvas).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};

    fn options(border: u32, format: OutputFormat) -> TransformOptions {
        TransformOptions {
            border,
            background: BackgroundColor([255, 255, 255]),
            gravity: Gravity::Center,
            format,
        }
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_content_box() {
        assert_eq!(content_box(700, 700, 30), (670, 670));
        assert_eq!(content_box(700, 700, 0), (700, 700));
        assert_eq!(content_box(20, 10, 30), (1, 1));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within((300, 200), (670, 670)), (300, 200));
        assert_eq!(fit_within((1, 1), (1770, 1770)), (1, 1));
    }

    #[test]
    fn test_fit_within_downscales_preserving_ratio() {
        assert_eq!(fit_within((4000, 2000), (670, 670)), (670, 335));
        assert_eq!(fit_within((1000, 3000), (500, 500)), (167, 500));
        assert_eq!(fit_within((10000, 1), (100, 100)), (100, 1));
    }

    #[test]
    fn test_letterbox_centres_small_source() {
        let img = solid(300, 200, [0, 0, 0]);
        let canvas = letterbox(&img, (700, 700), &options(30, OutputFormat::Png));

        assert_eq!(canvas.dimensions(), (700, 700));
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(199, 349), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(200, 250), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(499, 449), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(500, 449), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(499, 450), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_keeps_border_for_large_source() {
        let img = solid(2000, 1000, [10, 20, 30]);
        let canvas = letterbox(&img, (100, 100), &options(20, OutputFormat::Png));

        // Content box is 80x80, so the image becomes 80x40 at (10, 30).
        assert_eq!(canvas.dimensions(), (100, 100));
        assert_eq!(canvas.get_pixel(9, 50), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(50, 29), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(50, 50), &Rgb([10, 20, 30]));
        assert_eq!(canvas.get_pixel(90, 50), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_letterbox_flattens_transparency_onto_background() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 0])));
        let mut opts = options(0, OutputFormat::Png);
        opts.background = BackgroundColor([0, 128, 0]);

        let canvas = letterbox(&img, (8, 8), &opts);
        assert_eq!(canvas.get_pixel(4, 4), &Rgb([0, 128, 0]));
    }

    #[test]
    fn test_transform_produces_exact_dimensions() {
        let transformer = ImageTransformer::new(options(30, OutputFormat::Jpeg));
        let source = png_bytes(&solid(300, 200, [200, 10, 10]));
        let token = SizeToken::parse("700x500").unwrap();

        let out = transformer.transform(&source, &token).unwrap();
        assert_eq!((out.width, out.height), (700, 500));
        assert_eq!(out.format, OutputFormat::Jpeg);
        assert_eq!(OutputFormat::detect(&out.bytes), Some(OutputFormat::Jpeg));

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (700, 500));
    }

    #[test]
    fn test_transform_png_output_is_lossless() {
        let transformer = ImageTransformer::new(options(0, OutputFormat::Png));
        let source = png_bytes(&solid(1, 1, [1, 2, 3]));
        let token = SizeToken::parse("3x3").unwrap();

        let out = transformer.transform(&source, &token).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([1, 2, 3]));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    /// Splices an APP1 EXIF segment holding only an Orientation tag after SOI.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(b"MM\0\x2A\0\0\0\x08");
        exif.extend_from_slice(&1u16.to_be_bytes());
        exif.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        exif.extend_from_slice(&orientation.to_be_bytes());
        exif.extend_from_slice(&[0x00, 0x00]);
        exif.extend_from_slice(&0u32.to_be_bytes());

        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn luma(pixel: &Rgb<u8>) -> u32 {
        pixel.0.iter().map(|&c| u32::from(c)).sum::<u32>() / 3
    }

    #[test]
    fn test_decode_applies_exif_rotation() {
        // Left half black, right half white; orientation 6 turns it 90° clockwise.
        let upright = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        }));
        let mut jpeg = Cursor::new(Vec::new());
        upright.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
        let source = with_exif_orientation(jpeg.get_ref(), 6);

        let mut opts = options(0, OutputFormat::Png);
        opts.background = BackgroundColor([0, 128, 0]);
        let transformer = ImageTransformer::new(opts);

        let decoded = transformer.decode(&source).unwrap();
        assert_eq!(decoded.dimensions(), (20, 40));
        let rotated = decoded.to_rgb8();
        assert!(luma(rotated.get_pixel(10, 5)) < 64);
        assert!(luma(rotated.get_pixel(10, 34)) > 192);

        // 20x40 content centred on 60x60 lands at (20, 10).
        let token = SizeToken::parse("60x60").unwrap();
        let out = transformer.render(&decoded, &token).unwrap();
        let canvas = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
        assert_eq!(canvas.get_pixel(5, 30), &Rgb([0, 128, 0]));
        assert_eq!(canvas.get_pixel(30, 5), &Rgb([0, 128, 0]));
        assert!(luma(canvas.get_pixel(30, 15)) < 64);
        assert!(luma(canvas.get_pixel(30, 44)) > 192);
    }

    #[test]
    fn test_render_rejects_canvas_over_budget() {
        let transformer =
            ImageTransformer::new(options(0, OutputFormat::Png)).with_max_alloc(64 * 64 * 7);
        let img = solid(4, 4, [0, 0, 0]);

        let fits = SizeToken::parse("64x64").unwrap();
        assert!(transformer.render(&img, &fits).is_ok());

        let too_big = SizeToken::parse("65x64").unwrap();
        assert!(matches!(
            transformer.render(&img, &too_big),
            Err(PipelineError::CanvasTooLarge { width: 65, height: 64, .. })
        ));
    }

    #[test]
    fn test_render_rejects_overflowing_canvas() {
        let transformer = ImageTransformer::new(options(0, OutputFormat::Jpeg));
        let img = solid(4, 4, [0, 0, 0]);
        let token = SizeToken::parse("4294967295x4294967295").unwrap();

        let result = transformer.render(&img, &token);
        assert!(matches!(result, Err(PipelineError::CanvasTooLarge { .. })));
    }

    #[test]
    fn test_decode_error_for_garbage() {
        let transformer = ImageTransformer::new(options(0, OutputFormat::Jpeg));
        let token = SizeToken::parse("10x10").unwrap();
        let result = transformer.transform(b"definitely not an image", &token);
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }
}
