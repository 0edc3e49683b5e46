//! Local vectorization pipeline.
//!
//! `analyze -> trace -> compose -> serialize`, all in-process and pure: the
//! caller decodes the source beforehand and stores the bytes afterwards.

pub mod compose;
pub mod palette;
pub mod raster;
pub mod serialize;
pub mod simplify;
pub mod trace;

use log::debug;

use crate::request::{ColorMode, Complexity, OutputFormat, Quality, VectorizationRequest};
use crate::{Error, Result};
use compose::{compose, Metadata, VectorDocument};
use palette::{analyze, Palette, Rgb};
use raster::RasterImage;
use trace::{trace, TraceParams, DEFAULT_THRESHOLD};

/// Knobs for [`run_local`], usually derived from a request
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub output_format: OutputFormat,
    pub quality: Quality,
    pub color_mode: ColorMode,
    pub complexity: Complexity,
    pub title: String,
    /// Explicit canvas size; defaults to the source image size
    pub target_size: Option<(u32, u32)>,
    pub background: Option<Rgb>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::default(),
            quality: Quality::default(),
            color_mode: ColorMode::default(),
            complexity: Complexity::default(),
            title: "Vectorized image".to_string(),
            target_size: None,
            background: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_request(req: &VectorizationRequest) -> Self {
        Self {
            output_format: req.output_format,
            quality: req.quality,
            color_mode: req.color_mode,
            complexity: req.complexity,
            ..Default::default()
        }
    }
}

/// What the local pipeline produced
#[derive(Debug, Clone)]
pub struct LocalOutput {
    pub palette: Palette,
    pub document: VectorDocument,
    /// `document` encoded in the requested format
    pub bytes: Vec<u8>,
}

/// Vectorize a decoded image.
///
/// A fully transparent image has nothing to trace and fails with
/// `InvalidInput`.
pub fn run_local(image: RasterImage, opts: &PipelineOptions) -> Result<LocalOutput> {
    let source_size = (image.width(), image.height());

    let palette = analyze(&image, opts.color_mode.palette_size())?.retain_min_share(opts.color_mode.min_share_percent());
    if palette.is_empty() {
        return Err(Error::InvalidInput("image is fully transparent".into()));
    }
    debug!(
        "palette: {} colors from {} sampled pixels",
        palette.len(),
        palette.sampled_pixels()
    );

    let monochrome = opts.quality == Quality::Fast;
    let params = TraceParams {
        threshold: DEFAULT_THRESHOLD,
        color_mode: opts.color_mode,
        complexity: opts.complexity,
        tolerance: opts.quality.tolerance(),
        monochrome,
        palette: if monochrome { None } else { Some(palette.clone()) },
    };
    let traced = trace(image, &params)?;

    let colors = if monochrome { 1 } else { palette.len() };
    let metadata = Metadata {
        title: opts.title.clone(),
        description: format!(
            "Traced at {}x{} with {} color layer(s), {:?} quality",
            traced.width, traced.height, colors, opts.quality
        ),
        source_size: Some(source_size),
        target_size: opts.target_size,
        background: opts.background,
    };
    let document = compose(traced.layers, traced.width, traced.height, &metadata);
    debug!(
        "composed {} layers, {} paths",
        document.layers().count(),
        document.elements.iter().map(|e| e.path_count()).sum::<usize>()
    );

    let bytes = serialize::serialize(&document, opts.output_format);
    Ok(LocalOutput { palette, document, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use compose::VectorPrimitive;

    fn red_square(size: u32, from: u32, to: u32) -> RasterImage {
        let mut buf = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                if (from..to).contains(&x) && (from..to).contains(&y) {
                    buf.extend_from_slice(&[255, 0, 0, 255]);
                } else {
                    buf.extend_from_slice(&[0, 0, 0, 0]);
                }
            }
        }
        RasterImage::new(size, size, 4, buf).unwrap()
    }

    #[test]
    fn red_square_becomes_one_layer_with_one_path() {
        let out = run_local(red_square(40, 10, 30), &PipelineOptions::default()).unwrap();
        let layers: Vec<_> = out.document.layers().collect();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].path_count(), 1);
        assert_eq!(layers[0].bounds(), Some((10.0, 10.0, 30.0, 30.0)));
        match layers[0] {
            VectorPrimitive::Group { id, children } => {
                assert_eq!(id.as_deref(), Some("color-1"));
                assert!(matches!(children[0], VectorPrimitive::Path { fill: Some(c), .. } if c == Rgb::new(255, 0, 0)));
            }
            other => panic!("unexpected {:?}", other),
        }
        let svg = String::from_utf8(out.bytes).unwrap();
        assert!(svg.contains("fill=\"#ff0000\""));
    }

    #[test]
    fn fast_quality_traces_in_black() {
        let opts = PipelineOptions { quality: Quality::Fast, ..Default::default() };
        let out = run_local(red_square(20, 5, 15), &opts).unwrap();
        let svg = String::from_utf8(out.bytes).unwrap();
        // red is darker than the threshold
        assert!(svg.contains("fill=\"#000000\""));
    }

    fn point_count(p: &VectorPrimitive) -> usize {
        match p {
            VectorPrimitive::Path { subpaths, .. } => subpaths.iter().map(|s| s.len()).sum(),
            VectorPrimitive::Rectangle { .. } => 4,
            VectorPrimitive::Group { children, .. } => children.iter().map(point_count).sum(),
        }
    }

    #[test]
    fn standard_quality_emits_fewer_points_than_high() {
        let (size, r) = (160i64, 60i64);
        let mut buf = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let (dx, dy) = (x - size / 2, y - size / 2);
                if dx * dx + dy * dy < r * r {
                    buf.extend_from_slice(&[20, 90, 200, 255]);
                } else {
                    buf.extend_from_slice(&[0, 0, 0, 0]);
                }
            }
        }
        let disc = RasterImage::new(size as u32, size as u32, 4, buf).unwrap();
        let count = |quality| {
            let opts = PipelineOptions { quality, ..Default::default() };
            let out = run_local(disc.clone(), &opts).unwrap();
            out.document.elements.iter().map(point_count).sum::<usize>()
        };
        let (high, standard) = (count(Quality::High), count(Quality::Standard));
        assert!(standard < high, "standard={} high={}", standard, high);
    }

    #[test]
    fn transparent_image_is_invalid_input() {
        let img = RasterImage::new(10, 10, 4, vec![0; 400]).unwrap();
        assert!(matches!(run_local(img, &PipelineOptions::default()), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn canvas_keeps_source_size_after_downsampling() {
        let opts = PipelineOptions { complexity: Complexity::Low, ..Default::default() };
        let out = run_local(red_square(600, 100, 500), &opts).unwrap();
        assert_eq!((out.document.width, out.document.height), (600, 600));
        assert_eq!(out.document.view_box, (256, 256));
    }
}
