//! Color analysis: ranked palette extraction from a raster image.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::raster::{scaled_dimensions, RasterImage, ALPHA_THRESHOLD};
use crate::Result;

/// Longest side of the copy the analyzer samples from. Bounds analysis cost
/// independently of the input size.
pub const ANALYSIS_RESOLUTION: u32 = 200;

/// An opaque RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `0xRRGGBB`
    pub fn packed(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    pub fn from_packed(v: u32) -> Self {
        Self { r: (v >> 16) as u8, g: (v >> 8) as u8, b: v as u8 }
    }

    pub fn distance_sq(self, other: Rgb) -> u32 {
        let dr = self.r as i32 - other.r as i32;
        let dg = self.g as i32 - other.g as i32;
        let db = self.b as i32 - other.b as i32;
        (dr * dr + dg * dg + db * db) as u32
    }

    /// Channel values scaled to `0.0..=1.0`, for PostScript and PDF operators
    pub fn unit(self) -> [f64; 3] {
        [self.r as f64 / 255.0, self.g as f64 / 255.0, self.b as f64 / 255.0]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaletteEntry {
    pub color: Rgb,
    pub frequency: usize,
}

/// Colors ranked by descending frequency. Equal frequencies keep the order
/// in which the colors were first met while scanning rows top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
    sampled: usize,
}

impl Palette {
    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    pub fn colors(&self) -> impl Iterator<Item = Rgb> + '_ {
        self.entries.iter().map(|e| e.color)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of opaque pixels the analyzer looked at
    pub fn sampled_pixels(&self) -> usize {
        self.sampled
    }

    /// Index of the closest palette color; ties go to the more frequent one.
    pub fn nearest(&self, color: Rgb) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, e) in self.entries.iter().enumerate() {
            let d = e.color.distance_sq(color);
            if d == 0 {
                return Some(i);
            }
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Drop colors below `percent` of the sampled pixels, always keeping the
    /// dominant one.
    pub fn retain_min_share(mut self, percent: usize) -> Self {
        if percent == 0 || self.entries.is_empty() {
            return self;
        }
        let sampled = self.sampled;
        let mut first = true;
        self.entries.retain(|e| {
            let keep = first || e.frequency * 100 >= sampled * percent;
            first = false;
            keep
        });
        self
    }
}

/// Extract up to `top_k` colors from `image`.
///
/// The image is sampled through a nearest-neighbour copy no larger than
/// [`ANALYSIS_RESOLUTION`] on its longest side. Transparent pixels are skipped,
/// so a fully transparent image yields an empty palette.
pub fn analyze(image: &RasterImage, top_k: usize) -> Result<Palette> {
    let (w, h) = scaled_dimensions(image.width(), image.height(), ANALYSIS_RESOLUTION);
    let (w, h) = (w.max(1), h.max(1));
    let sample: Cow<'_, RasterImage> = if (w, h) == (image.width(), image.height()) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(image.resized(w, h)?)
    };

    let mut index: HashMap<u32, usize> = HashMap::new();
    let mut entries: Vec<PaletteEntry> = Vec::new();
    let mut sampled = 0usize;

    for y in 0..sample.height() {
        for x in 0..sample.width() {
            let [r, g, b, a] = sample.pixel(x, y);
            if a < ALPHA_THRESHOLD {
                continue;
            }
            sampled += 1;
            let color = Rgb::new(r, g, b);
            match index.get(&color.packed()) {
                Some(&i) => entries[i].frequency += 1,
                None => {
                    index.insert(color.packed(), entries.len());
                    entries.push(PaletteEntry { color, frequency: 1 });
                }
            }
        }
    }

    // sort_by is stable: ties stay in first-encountered order
    entries.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    entries.truncate(top_k);

    Ok(Palette { entries, sampled })
}
