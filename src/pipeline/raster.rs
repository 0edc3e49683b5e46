//! Raster buffers handed between pipeline stages

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, Rgba};

use crate::{Error, InputLimits, Result};

/// Pixels with alpha below this are treated as transparent everywhere in the
/// pipeline.
pub const ALPHA_THRESHOLD: u8 = 128;

/// A decoded image: row-major, interleaved RGB or RGBA bytes.
///
/// The buffer length always equals `width * height * channels`. Stages that
/// need a different resolution consume the image and return a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    channels: u8,
    buffer: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, channels: u8, buffer: Vec<u8>) -> Result<Self> {
        if channels != 3 && channels != 4 {
            return Err(Error::InvalidInput(format!("unsupported channel count {}", channels)));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!("zero-size image {}x{}", width, height)));
        }
        let expected = width as usize * height as usize * channels as usize;
        if buffer.len() != expected {
            return Err(Error::InvalidInput(format!(
                "buffer holds {} bytes, expected {} for {}x{}x{}",
                buffer.len(),
                expected,
                width,
                height,
                channels
            )));
        }
        Ok(Self { width, height, channels, buffer })
    }

    /// Decode encoded image bytes, enforcing `limits` before the full decode.
    ///
    /// Oversized payloads and dimensions are `InvalidInput`; anything the
    /// decoder cannot make sense of is `SourceUnavailable`.
    pub fn decode(bytes: &[u8], limits: &InputLimits) -> Result<Self> {
        probe_dimensions(bytes, limits)?;

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::SourceUnavailable(format!("Failed to decode image: {}", e)))?;
        if decoded.color().has_alpha() {
            let rgba = decoded.into_rgba8();
            let (w, h) = rgba.dimensions();
            Self::new(w, h, 4, rgba.into_raw())
        } else {
            let rgb = decoded.into_rgb8();
            let (w, h) = rgb.dimensions();
            Self::new(w, h, 3, rgb.into_raw())
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.buffer
    }

    /// RGBA value at `(x, y)`; three-channel images report alpha 255.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let c = self.channels as usize;
        let i = (y as usize * self.width as usize + x as usize) * c;
        let p = &self.buffer[i..i + c];
        if c == 4 {
            [p[0], p[1], p[2], p[3]]
        } else {
            [p[0], p[1], p[2], 255]
        }
    }

    /// Consume the image and return one whose longest side is at most
    /// `max_side`, keeping the aspect ratio.
    ///
    /// Fails with `InvalidInput` when scaling collapses a side below one pixel.
    pub fn fit_within(self, max_side: u32) -> Result<Self> {
        if self.width <= max_side && self.height <= max_side {
            return Ok(self);
        }
        let (w, h) = scaled_dimensions(self.width, self.height, max_side);
        if w == 0 || h == 0 {
            return Err(Error::InvalidInput(format!(
                "{}x{} image degenerates to {}x{} at working resolution {}",
                self.width, self.height, w, h, max_side
            )));
        }
        self.resized(w, h)
    }

    /// Nearest-neighbour copy at exactly `width` x `height`. Nearest sampling
    /// never invents colors, so palettes computed on the copy are real colors
    /// of the source.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let bad_buffer = || Error::LocalPipelineFailure("raster buffer does not match its dimensions".into());
        if self.channels == 4 {
            let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(self.width, self.height, &self.buffer[..])
                .ok_or_else(bad_buffer)?;
            let out = imageops::resize(&view, width, height, FilterType::Nearest);
            Self::new(width, height, 4, out.into_raw())
        } else {
            let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(self.width, self.height, &self.buffer[..])
                .ok_or_else(bad_buffer)?;
            let out = imageops::resize(&view, width, height, FilterType::Nearest);
            Self::new(width, height, 3, out.into_raw())
        }
    }
}

/// Read the image header and check `bytes` against `limits` without decoding
/// pixel data. Same classification as [`RasterImage::decode`].
pub fn probe_dimensions(bytes: &[u8], limits: &InputLimits) -> Result<(u32, u32)> {
    if bytes.len() as u64 > limits.max_input_bytes {
        return Err(Error::InvalidInput(format!(
            "input is {} bytes, limit is {}",
            bytes.len(),
            limits.max_input_bytes
        )));
    }

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::SourceUnavailable(format!("Failed to read image header: {}", e)))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| Error::SourceUnavailable(format!("Unsupported image data: {}", e)))?;
    if width == 0 || height == 0 {
        return Err(Error::InvalidInput(format!("zero-size image {}x{}", width, height)));
    }
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(Error::InvalidInput(format!(
            "image is {}x{}, limit is {} px per side",
            width, height, limits.max_dimension
        )));
    }
    Ok((width, height))
}

/// Dimensions after scaling so the longest side equals `max_side`. Sides are
/// floored and may come out as zero for extreme aspect ratios.
pub fn scaled_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side {
        return (width, height);
    }
    let scale = max_side as f64 / longest as f64;
    let w = (width as f64 * scale).floor() as u32;
    let h = (height as f64 * scale).floor() as u32;
    (w.min(max_side), h.min(max_side))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(img: image::DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn new_checks_buffer_invariant() {
        assert!(RasterImage::new(2, 2, 4, vec![0; 16]).is_ok());
        assert!(matches!(RasterImage::new(2, 2, 4, vec![0; 15]), Err(Error::InvalidInput(_))));
        assert!(matches!(RasterImage::new(0, 2, 3, vec![]), Err(Error::InvalidInput(_))));
        assert!(matches!(RasterImage::new(1, 1, 2, vec![0; 2]), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn decode_keeps_alpha_channel() {
        let img = image::RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 40]));
        let bytes = encode_png(image::DynamicImage::ImageRgba8(img));
        let raster = RasterImage::decode(&bytes, &InputLimits::default()).unwrap();
        assert_eq!((raster.width(), raster.height(), raster.channels()), (3, 2, 4));
        assert_eq!(raster.pixel(2, 1), [10, 20, 30, 40]);
    }

    #[test]
    fn decode_rgb_reports_opaque_pixels() {
        let img = image::RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let bytes = encode_png(image::DynamicImage::ImageRgb8(img));
        let raster = RasterImage::decode(&bytes, &InputLimits::default()).unwrap();
        assert_eq!(raster.channels(), 3);
        assert_eq!(raster.pixel(1, 1), [1, 2, 3, 255]);
    }

    #[test]
    fn decode_rejects_garbage_as_source_unavailable() {
        let err = RasterImage::decode(b"definitely not an image", &InputLimits::default()).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)), "got {:?}", err);
    }

    #[test]
    fn decode_enforces_limits_before_decoding() {
        let img = image::RgbImage::from_pixel(20, 10, Rgb([0, 0, 0]));
        let bytes = encode_png(image::DynamicImage::ImageRgb8(img));

        let small_dims = InputLimits { max_input_bytes: 1 << 20, max_dimension: 16 };
        assert!(matches!(RasterImage::decode(&bytes, &small_dims), Err(Error::InvalidInput(_))));

        let small_bytes = InputLimits { max_input_bytes: 8, max_dimension: 8000 };
        assert!(matches!(RasterImage::decode(&bytes, &small_bytes), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn fit_within_scales_longest_side() {
        let img = RasterImage::new(400, 200, 3, vec![7; 400 * 200 * 3]).unwrap();
        let small = img.fit_within(100).unwrap();
        assert_eq!((small.width(), small.height()), (100, 50));
        assert_eq!(small.pixel(99, 49), [7, 7, 7, 255]);
    }

    #[test]
    fn fit_within_leaves_small_images_alone() {
        let img = RasterImage::new(10, 10, 4, vec![1; 400]).unwrap();
        let same = img.clone().fit_within(512).unwrap();
        assert_eq!(same, img);
    }

    #[test]
    fn fit_within_degenerate_is_invalid_input() {
        let img = RasterImage::new(1000, 1, 3, vec![0; 3000]).unwrap();
        assert!(matches!(img.fit_within(100), Err(Error::InvalidInput(_))));
    }
}
