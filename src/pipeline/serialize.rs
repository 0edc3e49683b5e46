//! Wire formats for a composed [`VectorDocument`].
//!
//! Everything here is a pure function of the document: groups and paths are
//! written in document order and numbers are printed with a fixed precision,
//! so identical documents always produce identical bytes.

use super::compose::{Point, VectorDocument, VectorPrimitive};
use super::palette::Rgb;
use crate::request::OutputFormat;

const CREATOR: &str = concat!("rfvector ", env!("CARGO_PKG_VERSION"));

/// Encode `doc` in `format`.
pub fn serialize(doc: &VectorDocument, format: OutputFormat) -> Vec<u8> {
    match format {
        OutputFormat::Svg => to_svg(doc).into_bytes(),
        OutputFormat::Eps => to_eps(doc).into_bytes(),
        // Illustrator opens PDF-compatible .ai files
        OutputFormat::Pdf | OutputFormat::Ai => to_pdf(doc),
    }
}

/// Two decimals, trailing zeros trimmed, never `-0`.
pub fn fmt_num(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    let s = format!("{:.2}", rounded);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

// ----- SVG -----

pub fn to_svg(doc: &VectorDocument) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\">\n",
        doc.width, doc.height, doc.view_box.0, doc.view_box.1
    ));
    if !doc.title.is_empty() {
        out.push_str(&format!("<title>{}</title>\n", escape_xml(&doc.title)));
    }
    if !doc.description.is_empty() {
        out.push_str(&format!("<desc>{}</desc>\n", escape_xml(&doc.description)));
    }
    for el in &doc.elements {
        svg_element(&mut out, el, 0);
    }
    out.push_str("</svg>\n");
    out
}

fn svg_element(out: &mut String, el: &VectorPrimitive, depth: usize) {
    let indent = "  ".repeat(depth);
    match el {
        VectorPrimitive::Group { id, children } => {
            match id {
                Some(id) => out.push_str(&format!("{}<g id=\"{}\">\n", indent, escape_xml(id))),
                None => out.push_str(&format!("{}<g>\n", indent)),
            }
            for child in children {
                svg_element(out, child, depth + 1);
            }
            out.push_str(&format!("{}</g>\n", indent));
        }
        VectorPrimitive::Rectangle { x, y, width, height, fill } => {
            out.push_str(&format!(
                "{}<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\"/>\n",
                indent,
                fmt_num(*x),
                fmt_num(*y),
                fmt_num(*width),
                fmt_num(*height),
                fill
            ));
        }
        VectorPrimitive::Path { subpaths, fill, stroke } => {
            let d = svg_path_data(subpaths);
            if d.is_empty() {
                return;
            }
            let fill = fill.map_or_else(|| "none".to_string(), |c| c.to_string());
            match stroke {
                Some(s) => out.push_str(&format!("{}<path fill=\"{}\" stroke=\"{}\" d=\"{}\"/>\n", indent, fill, s, d)),
                None => out.push_str(&format!("{}<path fill=\"{}\" d=\"{}\"/>\n", indent, fill, d)),
            }
        }
    }
}

fn svg_path_data(subpaths: &[Vec<Point>]) -> String {
    let mut parts = Vec::new();
    for ring in subpaths.iter().filter(|r| r.len() >= 2) {
        let mut s = format!("M{} {}", fmt_num(ring[0].x), fmt_num(ring[0].y));
        for p in &ring[1..] {
            s.push_str(&format!("L{} {}", fmt_num(p.x), fmt_num(p.y)));
        }
        s.push('Z');
        parts.push(s);
    }
    parts.join("")
}

pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// ----- PostScript operators shared by EPS and PDF -----

/// Operator names differ between the two, the drawing model does not.
struct Ops {
    color: &'static str,
    stroke_color: &'static str,
    move_to: &'static str,
    line_to: &'static str,
    close: &'static str,
    fill: &'static str,
    stroke: &'static str,
    save: &'static str,
    restore: &'static str,
}

const PS_OPS: Ops = Ops {
    color: "setrgbcolor",
    stroke_color: "setrgbcolor",
    move_to: "moveto",
    line_to: "lineto",
    close: "closepath",
    fill: "fill",
    stroke: "stroke",
    save: "gsave",
    restore: "grestore",
};

const PDF_OPS: Ops = Ops {
    color: "rg",
    stroke_color: "RG",
    move_to: "m",
    line_to: "l",
    close: "h",
    fill: "f",
    stroke: "S",
    save: "q",
    restore: "Q",
};

fn color_operands(c: Rgb) -> String {
    let [r, g, b] = c.unit();
    format!("{} {} {}", fmt_num(r), fmt_num(g), fmt_num(b))
}

fn draw_element(out: &mut String, el: &VectorPrimitive, ops: &Ops, pdf: bool) {
    match el {
        VectorPrimitive::Group { children, .. } => {
            out.push_str(ops.save);
            out.push('\n');
            for child in children {
                draw_element(out, child, ops, pdf);
            }
            out.push_str(ops.restore);
            out.push('\n');
        }
        VectorPrimitive::Rectangle { x, y, width, height, fill } => {
            out.push_str(&format!("{} {}\n", color_operands(*fill), ops.color));
            if !pdf {
                out.push_str("newpath\n");
            }
            let corners = [
                Point::new(*x, *y),
                Point::new(x + width, *y),
                Point::new(x + width, y + height),
                Point::new(*x, y + height),
            ];
            draw_ring(out, &corners, ops);
            out.push_str(ops.fill);
            out.push('\n');
        }
        VectorPrimitive::Path { subpaths, fill, stroke } => {
            let rings: Vec<&Vec<Point>> = subpaths.iter().filter(|r| r.len() >= 2).collect();
            if rings.is_empty() {
                return;
            }
            if let Some(c) = fill {
                out.push_str(&format!("{} {}\n", color_operands(*c), ops.color));
            }
            if let Some(c) = stroke {
                out.push_str(&format!("{} {}\n", color_operands(*c), ops.stroke_color));
            }
            if !pdf {
                out.push_str("newpath\n");
            }
            for ring in rings {
                draw_ring(out, ring, ops);
            }
            match (fill.is_some(), stroke.is_some()) {
                (true, true) if pdf => out.push_str("B\n"),
                (true, true) => out.push_str("gsave fill grestore stroke\n"),
                (true, false) => {
                    out.push_str(ops.fill);
                    out.push('\n');
                }
                (false, true) => {
                    out.push_str(ops.stroke);
                    out.push('\n');
                }
                (false, false) if pdf => out.push_str("n\n"),
                (false, false) => out.push_str("newpath\n"),
            }
        }
    }
}

fn draw_ring(out: &mut String, ring: &[Point], ops: &Ops) {
    out.push_str(&format!("{} {} {}\n", fmt_num(ring[0].x), fmt_num(ring[0].y), ops.move_to));
    for p in &ring[1..] {
        out.push_str(&format!("{} {} {}\n", fmt_num(p.x), fmt_num(p.y), ops.line_to));
    }
    out.push_str(ops.close);
    out.push('\n');
}

/// Matrix taking view-box coordinates (y down) to page space (y up).
fn page_matrix(doc: &VectorDocument) -> [String; 6] {
    let (sx, sy) = doc.scale();
    [fmt_num(sx), "0".into(), "0".into(), fmt_num(-sy), "0".into(), doc.height.to_string()]
}

// ----- EPS -----

pub fn to_eps(doc: &VectorDocument) -> String {
    let mut out = String::new();
    out.push_str("%!PS-Adobe-3.0 EPSF-3.0\n");
    out.push_str(&format!("%%BoundingBox: 0 0 {} {}\n", doc.width, doc.height));
    out.push_str(&format!("%%Creator: {}\n", CREATOR));
    if !doc.title.is_empty() {
        out.push_str(&format!("%%Title: {}\n", single_line(&doc.title)));
    }
    out.push_str("%%Pages: 1\n");
    out.push_str("%%EndComments\n");
    out.push_str("gsave\n");
    out.push_str(&format!("[{}] concat\n", page_matrix(doc).join(" ")));
    for el in &doc.elements {
        draw_element(&mut out, el, &PS_OPS, false);
    }
    out.push_str("grestore\n");
    out.push_str("showpage\n");
    out.push_str("%%EOF\n");
    out
}

fn single_line(s: &str) -> String {
    s.chars().map(|c| if c.is_control() { ' ' } else { c }).collect()
}

// ----- PDF -----

pub fn to_pdf(doc: &VectorDocument) -> Vec<u8> {
    let mut content = String::new();
    content.push_str("q\n");
    content.push_str(&format!("{} cm\n", page_matrix(doc).join(" ")));
    for el in &doc.elements {
        draw_element(&mut content, el, &PDF_OPS, true);
    }
    content.push_str("Q\n");

    let mut info = format!("<< /Producer ({})", pdf_string(CREATOR));
    if !doc.title.is_empty() {
        info.push_str(&format!(" /Title ({})", pdf_string(&doc.title)));
    }
    if !doc.description.is_empty() {
        info.push_str(&format!(" /Subject ({})", pdf_string(&doc.description)));
    }
    info.push_str(" >>");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Contents 4 0 R /Resources << >> >>",
            doc.width, doc.height
        ),
        format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
        info,
    ];

    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for off in offsets {
        xref.push_str(&format!("{:010} 00000 n \n", off));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        objects.len(),
        xref_at
    ));
    out.extend_from_slice(xref.as_bytes());
    out
}

/// Literal string body: escapes delimiters, drops non-ASCII.
fn pdf_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}
