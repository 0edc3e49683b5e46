//! Vector primitives and document assembly.
//!
//! Composition is pure: it wraps traced primitives in a [`VectorDocument`],
//! names the color layers and settles the canvas size. Serialization lives in
//! [`super::serialize`]; writing the artifact is the caller's job.

use super::palette::Rgb;

/// A point in the traced raster's coordinate space (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds: `(min_x, min_y, max_x, max_y)`
pub type Bounds = (f64, f64, f64, f64);

/// Element of a vector document. Groups own their children.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorPrimitive {
    /// One filled region. The first sub-path is the outer boundary; holes
    /// follow with opposite winding so nonzero filling leaves them empty.
    Path {
        subpaths: Vec<Vec<Point>>,
        fill: Option<Rgb>,
        stroke: Option<Rgb>,
    },
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        fill: Rgb,
    },
    Group {
        id: Option<String>,
        children: Vec<VectorPrimitive>,
    },
}

impl VectorPrimitive {
    /// Bounds of everything this primitive draws, `None` for empty groups
    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            VectorPrimitive::Path { subpaths, .. } => {
                subpaths.iter().flatten().fold(None, |acc, p| Some(extend(acc, p.x, p.y)))
            }
            VectorPrimitive::Rectangle { x, y, width, height, .. } => {
                Some((*x, *y, x + width, y + height))
            }
            VectorPrimitive::Group { children, .. } => children
                .iter()
                .filter_map(|c| c.bounds())
                .fold(None, |acc, (x0, y0, x1, y1)| Some(extend(Some(extend(acc, x0, y0)), x1, y1))),
        }
    }

    /// Filled area by the shoelace formula, honouring winding: holes subtract.
    pub fn filled_area(&self) -> f64 {
        match self {
            VectorPrimitive::Path { subpaths, .. } => subpaths.iter().map(|s| signed_area(s)).sum(),
            VectorPrimitive::Rectangle { width, height, .. } => width * height,
            VectorPrimitive::Group { children, .. } => children.iter().map(|c| c.filled_area()).sum(),
        }
    }

    /// Number of `Path` primitives in this subtree
    pub fn path_count(&self) -> usize {
        match self {
            VectorPrimitive::Path { .. } => 1,
            VectorPrimitive::Rectangle { .. } => 0,
            VectorPrimitive::Group { children, .. } => children.iter().map(|c| c.path_count()).sum(),
        }
    }
}

fn extend(acc: Option<Bounds>, x: f64, y: f64) -> Bounds {
    match acc {
        None => (x, y, x, y),
        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
    }
}

/// Shoelace area of a closed ring. Positive for rings that run clockwise on
/// screen (outer boundaries), negative for holes.
pub fn signed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Document-level information that is not geometry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: String,
    pub description: String,
    /// Size of the original image; the canvas keeps its aspect ratio
    pub source_size: Option<(u32, u32)>,
    /// Explicit canvas size; wins over `source_size`
    pub target_size: Option<(u32, u32)>,
    /// Solid backdrop drawn under every layer
    pub background: Option<Rgb>,
}

/// A composed vector document, ready to serialize
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    /// Canvas width in output units
    pub width: u32,
    pub height: u32,
    /// Coordinate space of the primitives (the traced raster's size)
    pub view_box: (u32, u32),
    pub title: String,
    pub description: String,
    pub elements: Vec<VectorPrimitive>,
}

impl VectorDocument {
    /// Top-level color layers, in paint order
    pub fn layers(&self) -> impl Iterator<Item = &VectorPrimitive> {
        self.elements.iter().filter(|e| matches!(e, VectorPrimitive::Group { .. }))
    }

    /// Output units per view-box unit, horizontally and vertically
    pub fn scale(&self) -> (f64, f64) {
        (
            self.width as f64 / self.view_box.0.max(1) as f64,
            self.height as f64 / self.view_box.1.max(1) as f64,
        )
    }
}

/// Assemble `primitives`, drawn in a `width` x `height` coordinate space, into
/// a document.
///
/// Top-level groups are renamed `color-1`, `color-2`, ... in order, so ids are
/// stable for identical input.
pub fn compose(primitives: Vec<VectorPrimitive>, width: u32, height: u32, metadata: &Metadata) -> VectorDocument {
    let (canvas_w, canvas_h) = metadata.target_size.or(metadata.source_size).unwrap_or((width, height));

    let mut elements = Vec::with_capacity(primitives.len() + 1);
    if let Some(bg) = metadata.background {
        elements.push(VectorPrimitive::Rectangle {
            x: 0.0,
            y: 0.0,
            width: width as f64,
            height: height as f64,
            fill: bg,
        });
    }

    let mut layer = 0;
    for prim in primitives {
        match prim {
            VectorPrimitive::Group { children, .. } => {
                layer += 1;
                elements.push(VectorPrimitive::Group { id: Some(format!("color-{}", layer)), children });
            }
            other => elements.push(other),
        }
    }

    VectorDocument {
        width: canvas_w,
        height: canvas_h,
        view_box: (width, height),
        title: metadata.title.clone(),
        description: metadata.description.clone(),
        elements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x0 + size, y0),
            Point::new(x0 + size, y0 + size),
            Point::new(x0, y0 + size),
        ]
    }

    fn layer(points: Vec<Point>) -> VectorPrimitive {
        VectorPrimitive::Group {
            id: Some("ignored".into()),
            children: vec![VectorPrimitive::Path { subpaths: vec![points], fill: Some(Rgb::BLACK), stroke: None }],
        }
    }

    #[test]
    fn clockwise_on_screen_is_positive() {
        assert_eq!(signed_area(&square(0.0, 0.0, 2.0)), 4.0);
        let mut ccw = square(0.0, 0.0, 2.0);
        ccw.reverse();
        assert_eq!(signed_area(&ccw), -4.0);
    }

    #[test]
    fn holes_subtract_from_filled_area() {
        let mut hole = square(1.0, 1.0, 2.0);
        hole.reverse();
        let p = VectorPrimitive::Path { subpaths: vec![square(0.0, 0.0, 4.0), hole], fill: None, stroke: None };
        assert_eq!(p.filled_area(), 12.0);
        assert_eq!(p.bounds(), Some((0.0, 0.0, 4.0, 4.0)));
    }

    #[test]
    fn group_bounds_cover_all_children() {
        let group = VectorPrimitive::Group {
            id: None,
            children: vec![
                layer(square(3.0, 1.0, 2.0)),
                VectorPrimitive::Group { id: None, children: vec![] },
                VectorPrimitive::Rectangle { x: -1.0, y: 4.0, width: 2.0, height: 3.0, fill: Rgb::BLACK },
            ],
        };
        assert_eq!(group.bounds(), Some((-1.0, 1.0, 5.0, 7.0)));
        assert_eq!(VectorPrimitive::Group { id: None, children: vec![] }.bounds(), None);
    }

    #[test]
    fn compose_assigns_sequential_layer_ids() {
        let doc = compose(
            vec![layer(square(0.0, 0.0, 1.0)), layer(square(2.0, 2.0, 1.0))],
            10,
            10,
            &Metadata::default(),
        );
        let ids: Vec<_> = doc
            .layers()
            .map(|l| match l {
                VectorPrimitive::Group { id, .. } => id.clone().unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec!["color-1", "color-2"]);
    }

    #[test]
    fn canvas_follows_target_then_source() {
        let md = Metadata { source_size: Some((400, 200)), ..Default::default() };
        let doc = compose(vec![], 200, 100, &md);
        assert_eq!((doc.width, doc.height, doc.view_box), (400, 200, (200, 100)));
        assert_eq!(doc.scale(), (2.0, 2.0));

        let md = Metadata { source_size: Some((400, 200)), target_size: Some((50, 50)), ..Default::default() };
        let doc = compose(vec![], 200, 100, &md);
        assert_eq!((doc.width, doc.height), (50, 50));

        let doc = compose(vec![], 30, 20, &Metadata::default());
        assert_eq!((doc.width, doc.height), (30, 20));
    }

    #[test]
    fn background_goes_under_layers() {
        let md = Metadata { background: Some(Rgb::new(255, 255, 255)), ..Default::default() };
        let doc = compose(vec![layer(square(0.0, 0.0, 1.0))], 8, 8, &md);
        assert!(matches!(doc.elements[0], VectorPrimitive::Rectangle { width, .. } if width == 8.0));
        assert_eq!(doc.layers().count(), 1);
    }
}
