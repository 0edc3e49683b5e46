//! Vector tracing: raster masks to closed boundary paths.
//!
//! Every layer (the thresholded image, or one palette color) becomes a
//! boolean mask. Boundaries are followed along pixel edges with the filled
//! side always on the right, which makes outer boundaries run clockwise on
//! screen and holes counter-clockwise. Where two filled pixels touch only at
//! a corner the walk turns right, so regions are 4-connected and every
//! boundary belongs to exactly one region.

use std::collections::{BTreeMap, HashMap};

use super::compose::{Point, VectorPrimitive};
use super::palette::{analyze, Palette, Rgb};
use super::raster::{RasterImage, ALPHA_THRESHOLD};
use super::simplify::simplify_rings;
use crate::request::{ColorMode, Complexity, Quality};
use crate::{Error, Result};

/// Grayscale cut-off for threshold tracing
pub const DEFAULT_THRESHOLD: u8 = 128;

/// Parameters for [`trace`]
#[derive(Debug, Clone, PartialEq)]
pub struct TraceParams {
    /// Pixels darker than this are filled in threshold mode
    pub threshold: u8,
    /// Palette size and pruning when no palette is supplied
    pub color_mode: ColorMode,
    /// Bounds the working resolution
    pub complexity: Complexity,
    /// Simplification tolerance in working-resolution pixels
    pub tolerance: f64,
    /// Single-color threshold tracing instead of per-color layers
    pub monochrome: bool,
    /// Palette to quantize to; computed from the image when `None`
    pub palette: Option<Palette>,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            color_mode: ColorMode::default(),
            complexity: Complexity::default(),
            tolerance: Quality::default().tolerance(),
            monochrome: false,
            palette: None,
        }
    }
}

/// Traced layers plus the raster size their coordinates refer to
#[derive(Debug, Clone, PartialEq)]
pub struct Traced {
    pub width: u32,
    pub height: u32,
    /// One group per non-empty layer, most frequent color first
    pub layers: Vec<VectorPrimitive>,
}

/// Trace `image` into one group of filled paths per color layer.
pub fn trace(image: RasterImage, params: &TraceParams) -> Result<Traced> {
    let image = image.fit_within(params.complexity.working_resolution())?;

    let layers: Vec<(Rgb, Mask)> = if params.monochrome {
        vec![(Rgb::BLACK, Mask::threshold(&image, params.threshold))]
    } else {
        let palette = match &params.palette {
            Some(p) => p.clone(),
            None => analyze(&image, params.color_mode.palette_size())?
                .retain_min_share(params.color_mode.min_share_percent()),
        };
        if palette.is_empty() {
            return Err(Error::InvalidInput("image has no opaque pixels to trace".into()));
        }
        palette.colors().zip(quantize(&image, &palette)).collect()
    };

    let mut groups = Vec::with_capacity(layers.len());
    for (color, mask) in layers {
        if mask.count() == 0 {
            continue;
        }
        let paths = trace_layer(&mask, color, params.tolerance);
        if paths.is_empty() {
            continue;
        }
        groups.push(VectorPrimitive::Group { id: None, children: paths });
    }

    Ok(Traced { width: image.width(), height: image.height(), layers: groups })
}

/// Boolean raster; reads outside the image are `false`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, bits: vec![false; width as usize * height as usize] }
    }

    /// Opaque pixels whose luminance is below `threshold`
    pub fn threshold(image: &RasterImage, threshold: u8) -> Self {
        let mut mask = Self::new(image.width(), image.height());
        for y in 0..image.height() {
            for x in 0..image.width() {
                let [r, g, b, a] = image.pixel(x, y);
                if a >= ALPHA_THRESHOLD && luminance(r, g, b) < threshold {
                    mask.set(x, y);
                }
            }
        }
        mask
    }

    pub fn set(&mut self, x: u32, y: u32) {
        let i = y as usize * self.width as usize + x as usize;
        self.bits[i] = true;
    }

    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

/// ITU-R 601 luma, as most grayscale conversions use
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// Split `image` into one mask per palette entry by nearest color.
/// Transparent pixels land in no mask.
pub fn quantize(image: &RasterImage, palette: &Palette) -> Vec<Mask> {
    let mut masks = vec![Mask::new(image.width(), image.height()); palette.len()];
    let mut cache: HashMap<u32, usize> = HashMap::new();
    for y in 0..image.height() {
        for x in 0..image.width() {
            let [r, g, b, a] = image.pixel(x, y);
            if a < ALPHA_THRESHOLD {
                continue;
            }
            let color = Rgb::new(r, g, b);
            let slot = match cache.get(&color.packed()) {
                Some(&i) => Some(i),
                None => {
                    let found = palette.nearest(color);
                    if let Some(i) = found {
                        cache.insert(color.packed(), i);
                    }
                    found
                }
            };
            if let Some(i) = slot {
                masks[i].set(x, y);
            }
        }
    }
    masks
}

/// Paths for one mask: one `Path` per 4-connected region, outer boundary
/// first, then its holes.
pub fn trace_layer(mask: &Mask, color: Rgb, tolerance: f64) -> Vec<VectorPrimitive> {
    let labels = label_regions(mask);
    let (ring_labels, mut rings) = extract_rings(mask, &labels);
    simplify_rings(&mut rings, tolerance);

    let mut regions: BTreeMap<u32, Vec<Vec<Point>>> = BTreeMap::new();
    for (label, ring) in ring_labels.into_iter().zip(rings) {
        regions.entry(label).or_default().push(ring);
    }
    regions
        .into_values()
        .map(|subpaths| VectorPrimitive::Path { subpaths, fill: Some(color), stroke: None })
        .collect()
}

/// 4-connected region labels in scan order, starting at 1; 0 is empty.
fn label_regions(mask: &Mask) -> Vec<u32> {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let mut labels = vec![0u32; mask.bits.len()];
    let mut next = 0u32;
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            if !mask.bits[i] || labels[i] != 0 {
                continue;
            }
            next += 1;
            labels[i] = next;
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (nx, ny) in [(cx + 1, cy), (cx - 1, cy), (cx, cy + 1), (cx, cy - 1)] {
                    if mask.get(nx, ny) {
                        let j = (ny * w + nx) as usize;
                        if labels[j] == 0 {
                            labels[j] = next;
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }
    labels
}

const NONE: usize = usize::MAX;

// E, S, W, N in screen coordinates
const EAST: u8 = 0;
const SOUTH: u8 = 1;
const WEST: u8 = 2;
const NORTH: u8 = 3;

struct Edge {
    to: usize,
    dir: u8,
    label: u32,
}

/// Closed rings, ordered by their first edge in scan order, with the label
/// of the region each one bounds. Ring points are the corners only.
fn extract_rings(mask: &Mask, labels: &[u32]) -> (Vec<u32>, Vec<Vec<Point>>) {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let stride = (w + 1) as usize;
    let vid = |x: i64, y: i64| y as usize * stride + x as usize;

    let mut edges: Vec<Edge> = Vec::new();
    let mut outgoing: Vec<[usize; 2]> = vec![[NONE; 2]; stride * (h as usize + 1)];
    let mut push = |edges: &mut Vec<Edge>, from: usize, to: usize, dir: u8, label: u32| {
        let slot = &mut outgoing[from];
        if slot[0] == NONE {
            slot[0] = edges.len();
        } else {
            slot[1] = edges.len();
        }
        edges.push(Edge { to, dir, label });
    };

    for y in 0..h {
        for x in 0..w {
            if !mask.get(x, y) {
                continue;
            }
            let label = labels[(y * w + x) as usize];
            if !mask.get(x, y - 1) {
                push(&mut edges, vid(x, y), vid(x + 1, y), EAST, label);
            }
            if !mask.get(x + 1, y) {
                push(&mut edges, vid(x + 1, y), vid(x + 1, y + 1), SOUTH, label);
            }
            if !mask.get(x, y + 1) {
                push(&mut edges, vid(x + 1, y + 1), vid(x, y + 1), WEST, label);
            }
            if !mask.get(x - 1, y) {
                push(&mut edges, vid(x, y + 1), vid(x, y), NORTH, label);
            }
        }
    }

    let mut visited = vec![false; edges.len()];
    let mut ring_labels = Vec::new();
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if visited[start] {
            continue;
        }
        let mut points = Vec::new();
        let mut e = start;
        loop {
            visited[e] = true;
            let next = next_edge(&edges, outgoing[edges[e].to], edges[e].dir);
            if edges[next].dir != edges[e].dir {
                let v = edges[e].to;
                points.push(Point::new((v % stride) as f64, (v / stride) as f64));
            }
            if next == start || visited[next] {
                debug_assert_eq!(next, start, "boundary walk left its ring");
                break;
            }
            e = next;
        }
        ring_labels.push(edges[start].label);
        rings.push(points);
    }
    (ring_labels, rings)
}

/// Continue a walk heading `dir`: right turn first, then straight, then left.
fn next_edge(edges: &[Edge], candidates: [usize; 2], dir: u8) -> usize {
    if candidates[1] == NONE {
        return candidates[0];
    }
    for want in [(dir + 1) % 4, dir, (dir + 3) % 4] {
        for &c in &candidates {
            if edges[c].dir == want {
                return c;
            }
        }
    }
    candidates[0]
}
