//! End-to-end behaviour of the local pipeline through the public API

use std::io::Cursor;
use std::sync::Arc;

use rfvector::pipeline::compose::VectorPrimitive;
use rfvector::pipeline::palette::{analyze, Rgb};
use rfvector::pipeline::raster::RasterImage;
use rfvector::pipeline::trace::{trace, TraceParams};
use rfvector::pipeline::{run_local, PipelineOptions};
use rfvector::{
    Dispatcher, ErrorKind, HealthRegistry, OutputFormat, ServiceConfig, VectorizationRequest, LOCAL_BACKEND,
};

fn encode_png(img: image::RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// 200x200 transparent canvas with an opaque red 100x100 square at 50..150
fn red_square_png() -> Vec<u8> {
    encode_png(image::RgbaImage::from_fn(200, 200, |x, y| {
        if (50..150).contains(&x) && (50..150).contains(&y) {
            image::Rgba([255, 0, 0, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    }))
}

fn local_dispatcher(tag: &str) -> Dispatcher {
    let config = ServiceConfig {
        output_dir: std::env::temp_dir().join(format!("rfvector-pipeline-{}-{}", tag, std::process::id())),
        ..Default::default()
    };
    let registry = Arc::new(HealthRegistry::new(&config));
    Dispatcher::new(config, registry).unwrap()
}

#[test]
fn red_square_end_to_end() {
    let d = local_dispatcher("e2e");
    let r = d.dispatch(VectorizationRequest::from_bytes(red_square_png()));
    assert!(r.success, "{:?}", r);
    assert_eq!(r.backend, LOCAL_BACKEND);
    assert_eq!(r.format, OutputFormat::Svg);

    let name = r.vector_url.as_deref().unwrap().rsplit('/').next().unwrap().to_string();
    let svg = std::fs::read_to_string(d.config().output_dir.join(&name)).unwrap();
    assert_eq!(r.file_size, Some(svg.len() as u64));
    assert_eq!(svg.matches("<g id=").count(), 1);
    assert!(svg.contains("<g id=\"color-1\">"));
    assert_eq!(svg.matches("<path ").count(), 1);
    assert!(svg.contains("fill=\"#ff0000\""));
    assert!(svg.contains("M150 50L150 150L50 150L50 50Z"), "{}", svg);
}

#[test]
fn red_square_document_bounds() {
    let image = RasterImage::decode(&red_square_png(), &Default::default()).unwrap();
    let out = run_local(image, &PipelineOptions::default()).unwrap();
    let layers: Vec<_> = out.document.layers().collect();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].path_count(), 1);
    assert_eq!(layers[0].bounds(), Some((50.0, 50.0, 150.0, 150.0)));
    assert_eq!(layers[0].filled_area(), 100.0 * 100.0);
}

#[test]
fn fully_transparent_image_is_invalid_input() {
    let png = encode_png(image::RgbaImage::from_pixel(10, 10, image::Rgba([0, 0, 0, 0])));
    let image = RasterImage::decode(&png, &Default::default()).unwrap();
    assert!(analyze(&image, 10).unwrap().is_empty());

    let r = local_dispatcher("transparent").dispatch(VectorizationRequest::from_bytes(png));
    assert!(!r.success);
    assert_eq!(r.error_kind, Some(ErrorKind::InvalidInput));
    assert_eq!(r.backend, LOCAL_BACKEND);
}

#[test]
fn output_is_byte_identical_across_runs() {
    let png = encode_png(image::RgbaImage::from_fn(120, 80, |x, y| {
        let c = ((x / 20 + y / 20) % 3) as u8;
        image::Rgba([c * 100, 255 - c * 80, (x % 2) as u8 * 255, 255])
    }));
    for format in [OutputFormat::Svg, OutputFormat::Eps, OutputFormat::Pdf] {
        let opts = PipelineOptions { output_format: format, ..Default::default() };
        let a = run_local(RasterImage::decode(&png, &Default::default()).unwrap(), &opts).unwrap();
        let b = run_local(RasterImage::decode(&png, &Default::default()).unwrap(), &opts).unwrap();
        assert_eq!(a.bytes, b.bytes, "{:?} output differs", format);
    }
}

#[test]
fn square_with_hole_area_is_outer_minus_hole() {
    // 10x10 black square with a 4x4 hole, on white
    let mut buf = Vec::new();
    for y in 0..14u32 {
        for x in 0..14u32 {
            let in_outer = (2..12).contains(&x) && (2..12).contains(&y);
            let in_hole = (5..9).contains(&x) && (5..9).contains(&y);
            let v = if in_outer && !in_hole { 0 } else { 255 };
            buf.extend_from_slice(&[v, v, v]);
        }
    }
    let image = RasterImage::new(14, 14, 3, buf).unwrap();
    let params = TraceParams { monochrome: true, tolerance: 0.2, ..Default::default() };
    let traced = trace(image, &params).unwrap();

    assert_eq!(traced.layers.len(), 1);
    let area: f64 = traced.layers.iter().map(|l| l.filled_area()).sum();
    assert_eq!(area, 100.0 - 16.0);

    match &traced.layers[0] {
        VectorPrimitive::Group { children, .. } => {
            assert_eq!(children.len(), 1, "hole must be a sub-path, not a separate shape");
            match &children[0] {
                VectorPrimitive::Path { subpaths, fill, .. } => {
                    assert_eq!(subpaths.len(), 2);
                    assert_eq!(*fill, Some(Rgb::BLACK));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn oversized_input_is_rejected_before_decoding() {
    let config = ServiceConfig {
        output_dir: std::env::temp_dir().join(format!("rfvector-pipeline-limits-{}", std::process::id())),
        limits: rfvector::InputLimits { max_input_bytes: 1 << 20, max_dimension: 100 },
        ..Default::default()
    };
    let registry = Arc::new(HealthRegistry::new(&config));
    let d = Dispatcher::new(config, registry).unwrap();
    let r = d.dispatch(VectorizationRequest::from_bytes(red_square_png()));
    assert_eq!(r.error_kind, Some(ErrorKind::InvalidInput));
}
