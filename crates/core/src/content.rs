//! Content-stream operator generation for flattened annotations
//!
//! Each helper returns the operations for one annotation in PDF page
//! space (origin bottom-left, units in points). Callers wrap every
//! annotation in q/Q so graphics state never leaks between them.

use doc_model::{Color, PercentPoint};
use lopdf::content::Operation;
use lopdf::Object;

/// Font size for plain note text, before scale is applied
pub const NOTE_FONT_SIZE: f32 = 11.0;
/// Font size for evidence badge labels, before scale is applied
pub const BADGE_FONT_SIZE: f32 = 10.0;
/// Maximum line width for wrapped note text, in points
pub const NOTE_MAX_WIDTH_PT: f32 = 240.0;
/// Signature images never grow wider than this, regardless of scale
pub const SIGNATURE_MAX_WIDTH_PT: f32 = 500.0;
/// Signature box height at scale 1.0
pub const SIGNATURE_BOX_HEIGHT_PT: f32 = 40.0;

/// Rough Helvetica advance width as a fraction of font size; good enough
/// for badge sizing and wrap estimates without font metrics
const AVG_GLYPH_WIDTH: f32 = 0.5;

const BADGE_FILL: (f32, f32, f32) = (1.0, 0.92, 0.61);
const BADGE_BORDER: (f32, f32, f32) = (0.62, 0.47, 0.0);

/// One page's dimensions in points, used to resolve percent coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    pub width: f32,
    pub height: f32,
}

impl PageFrame {
    /// Resolve a stored percent position into page space
    ///
    /// UI coordinates originate top-left, PDF pages bottom-left, so the
    /// vertical axis flips here. Getting this backwards puts every
    /// annotation on the wrong half of the page.
    pub fn resolve(&self, p: PercentPoint) -> (f32, f32) {
        let x = p.x / 100.0 * self.width;
        let y = self.height - p.y / 100.0 * self.height;
        (x, y)
    }
}

fn real(value: f32) -> Object {
    value.into()
}

/// Connected polyline through the resolved path points
pub fn polyline_ops(
    frame: PageFrame,
    path: &[PercentPoint],
    color: Color,
    stroke_width: f32,
) -> Vec<Operation> {
    let (r, g, b) = color.to_normalized();
    let mut ops = vec![
        Operation::new("RG", vec![real(r), real(g), real(b)]),
        Operation::new("w", vec![real(stroke_width)]),
        Operation::new("J", vec![1.into()]),
        Operation::new("j", vec![1.into()]),
    ];

    let (x0, y0) = frame.resolve(path[0]);
    ops.push(Operation::new("m", vec![real(x0), real(y0)]));
    for point in &path[1..] {
        let (x, y) = frame.resolve(*point);
        ops.push(Operation::new("l", vec![real(x), real(y)]));
    }
    ops.push(Operation::new("S", vec![]));
    ops
}

/// Wrapped note text at the resolved position
pub fn note_ops(
    frame: PageFrame,
    position: PercentPoint,
    text: &str,
    scale: f32,
    font_name: &str,
) -> Vec<Operation> {
    let (x, y) = frame.resolve(position);
    let font_size = NOTE_FONT_SIZE * scale;
    let lines = wrap_text(text, NOTE_MAX_WIDTH_PT, font_size);

    let mut ops = vec![
        Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font_name.into()), real(font_size)]),
        Operation::new("TL", vec![real(font_size * 1.2)]),
        Operation::new("Td", vec![real(x), real(y)]),
    ];
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            ops.push(Operation::new("T*", vec![]));
        }
        ops.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

/// Filled, bordered badge with the evidence label on top
///
/// Visually distinct from a plain note: the rectangle is drawn first so
/// the label sits on the fill.
pub fn badge_ops(
    frame: PageFrame,
    position: PercentPoint,
    label: &str,
    scale: f32,
    font_name: &str,
) -> Vec<Operation> {
    let (x, y) = frame.resolve(position);
    let font_size = BADGE_FONT_SIZE * scale;
    let text_width = label.chars().count() as f32 * font_size * AVG_GLYPH_WIDTH;
    let pad = 0.5 * font_size;

    let rect_x = x - pad;
    let rect_y = y - 0.3 * font_size - pad;
    let rect_w = text_width + 2.0 * pad;
    let rect_h = font_size + 2.0 * pad;

    vec![
        Operation::new("rg", vec![real(BADGE_FILL.0), real(BADGE_FILL.1), real(BADGE_FILL.2)]),
        Operation::new(
            "RG",
            vec![real(BADGE_BORDER.0), real(BADGE_BORDER.1), real(BADGE_BORDER.2)],
        ),
        Operation::new("w", vec![real(1.0)]),
        Operation::new("re", vec![real(rect_x), real(rect_y), real(rect_w), real(rect_h)]),
        Operation::new("B", vec![]),
        Operation::new("rg", vec![real(0.15), real(0.12), real(0.0)]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font_name.into()), real(font_size)]),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new("Tj", vec![Object::string_literal(label)]),
        Operation::new("ET", vec![]),
    ]
}

/// Fallback signature line when no signature image is available
pub fn signature_text_ops(
    frame: PageFrame,
    position: PercentPoint,
    signer_name: &str,
    scale: f32,
    font_name: &str,
) -> Vec<Operation> {
    let (x, y) = frame.resolve(position);
    let font_size = NOTE_FONT_SIZE * scale;
    let label = format!("Signed: {signer_name}");

    vec![
        Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font_name.into()), real(font_size)]),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new("Tj", vec![Object::string_literal(label)]),
        Operation::new("ET", vec![]),
    ]
}

/// Place an already-registered image XObject centered on the position
pub fn image_ops(
    frame: PageFrame,
    position: PercentPoint,
    xobject_name: &str,
    draw_width: f32,
    draw_height: f32,
) -> Vec<Operation> {
    let (cx, cy) = frame.resolve(position);
    let x = cx - draw_width / 2.0;
    let y = cy - draw_height / 2.0;

    vec![
        Operation::new(
            "cm",
            vec![real(draw_width), real(0.0), real(0.0), real(draw_height), real(x), real(y)],
        ),
        Operation::new("Do", vec![Object::Name(xobject_name.into())]),
    ]
}

/// Fit image dimensions inside a bounding box, preserving aspect ratio
///
/// Whichever bound is more constraining wins, so an extremely wide
/// signature shrinks to the width limit and a tall one to the height
/// limit.
pub fn fit_within(width: f32, height: f32, max_width: f32, max_height: f32) -> (f32, f32) {
    if width <= 0.0 || height <= 0.0 {
        return (0.0, 0.0);
    }
    let ratio = (max_width / width).min(max_height / height).min(1.0);
    (width * ratio, height * ratio)
}

/// Greedy word wrap against an estimated glyph width
pub fn wrap_text(text: &str, max_width_pt: f32, font_size: f32) -> Vec<String> {
    let max_chars = ((max_width_pt / (font_size * AVG_GLYPH_WIDTH)) as usize).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_owned();
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_owned();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
