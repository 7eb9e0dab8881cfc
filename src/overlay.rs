//! Detection overlay geometry.
//!
//! The AI service reports bounding boxes in source-image pixel space; the
//! shell renders them on an overlay canvas whose size rarely matches the
//! image. This module owns the conversion: independent per-axis scaling,
//! clamping into the canvas rect, and caption anchor placement. Nothing
//! here touches the DOM or any renderer; the output is plain geometry.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Vertical gap between a box's top edge and its caption anchor, in canvas
/// pixels. The anchor is clamped to the canvas top so captions for boxes
/// near the upper edge stay visible.
pub const LABEL_OFFSET_PX: f64 = 4.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Axis-aligned box in source-image pixels, stored as its corners.
///
/// Serializes as the `[left, top, right, bottom]` array the detection
/// endpoint emits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.left, b.top, b.right, b.bottom]
    }
}

/// One detection as the AI service returns it: an optional class label, a
/// box in source-image pixels, and the detector's confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub label: Option<String>,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Width and height of an image or canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_positive(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Caption anchor in canvas coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayLabel {
    pub text: String,
    pub x: f64,
    pub y: f64,
}

/// A rectangle ready to draw on the overlay canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayShape {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: Option<OverlayLabel>,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Maps detections from source-image pixels onto the overlay canvas.
///
/// Horizontal and vertical scale factors are computed independently, so an
/// image displayed with a different aspect ratio still lines up. Boxes with
/// non-positive area are dropped, and every emitted shape is clamped to lie
/// fully inside the canvas. Returns nothing when either size is degenerate.
pub fn map_to_overlay(
    annotations: &[Annotation],
    natural: Dimensions,
    canvas: Dimensions,
) -> Vec<OverlayShape> {
    if !natural.is_positive() || !canvas.is_positive() {
        tracing::warn!(
            natural_w = natural.width,
            natural_h = natural.height,
            canvas_w = canvas.width,
            canvas_h = canvas.height,
            "overlay mapping skipped: degenerate dimensions"
        );
        return Vec::new();
    }

    let scale_x = canvas.width / natural.width;
    let scale_y = canvas.height / natural.height;

    annotations
        .iter()
        .filter_map(|ann| map_annotation(ann, scale_x, scale_y, canvas))
        .collect()
}

fn map_annotation(
    ann: &Annotation,
    scale_x: f64,
    scale_y: f64,
    canvas: Dimensions,
) -> Option<OverlayShape> {
    let raw_width = ann.bbox.width() * scale_x;
    let raw_height = ann.bbox.height() * scale_y;
    if raw_width <= 0.0 || raw_height <= 0.0 || !raw_width.is_finite() || !raw_height.is_finite()
    {
        return None;
    }

    // Clamp each edge into the canvas. A box entirely outside collapses to
    // zero width or height and is dropped with the degenerate ones.
    let x = (ann.bbox.left * scale_x).clamp(0.0, canvas.width);
    let y = (ann.bbox.top * scale_y).clamp(0.0, canvas.height);
    let width = (ann.bbox.right * scale_x).clamp(0.0, canvas.width) - x;
    let height = (ann.bbox.bottom * scale_y).clamp(0.0, canvas.height) - y;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }

    let label = ann.label.as_ref().map(|text| OverlayLabel {
        text: text.clone(),
        x,
        y: (y - LABEL_OFFSET_PX).max(0.0),
    });

    Some(OverlayShape {
        x,
        y,
        width,
        height,
        label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_annotation(label: Option<&str>, bbox: [f64; 4]) -> Annotation {
        Annotation {
            label: label.map(String::from),
            bbox: bbox.into(),
            score: Some(0.9),
        }
    }

    #[test]
    fn scales_axes_independently() {
        let anns = vec![make_annotation(Some("nodule"), [100.0, 100.0, 300.0, 200.0])];
        let shapes = map_to_overlay(
            &anns,
            Dimensions::new(1000.0, 500.0),
            Dimensions::new(500.0, 500.0),
        );
        assert_eq!(shapes.len(), 1);
        let s = &shapes[0];
        assert_eq!(s.x, 50.0);
        assert_eq!(s.y, 100.0);
        assert_eq!(s.width, 100.0);
        assert_eq!(s.height, 100.0);
    }

    #[test]
    fn drops_boxes_without_positive_area() {
        let anns = vec![
            make_annotation(Some("inverted"), [300.0, 100.0, 100.0, 200.0]),
            make_annotation(Some("flat"), [10.0, 50.0, 90.0, 50.0]),
            make_annotation(Some("ok"), [10.0, 10.0, 20.0, 20.0]),
        ];
        let dims = Dimensions::new(100.0, 100.0);
        let shapes = map_to_overlay(&anns, dims, dims);
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].label.as_ref().unwrap().text, "ok");
    }

    #[test]
    fn clamps_shapes_into_canvas() {
        let anns = vec![make_annotation(None, [-20.0, -10.0, 90.0, 120.0])];
        let dims = Dimensions::new(100.0, 100.0);
        let shapes = map_to_overlay(&anns, dims, dims);
        assert_eq!(shapes.len(), 1);
        let s = &shapes[0];
        assert!(s.x >= 0.0 && s.y >= 0.0);
        assert!(s.x + s.width <= 100.0);
        assert!(s.y + s.height <= 100.0);
    }

    #[test]
    fn drops_boxes_entirely_outside_canvas() {
        let anns = vec![make_annotation(Some("gone"), [150.0, 150.0, 180.0, 180.0])];
        let dims = Dimensions::new(100.0, 100.0);
        let shapes = map_to_overlay(&anns, dims, dims);
        assert!(shapes.is_empty());
    }

    #[test]
    fn label_anchor_sits_above_box_and_clamps_at_top() {
        let dims = Dimensions::new(100.0, 100.0);

        let low = vec![make_annotation(Some("low"), [10.0, 50.0, 30.0, 70.0])];
        let shapes = map_to_overlay(&low, dims, dims);
        let label = shapes[0].label.as_ref().unwrap();
        assert_eq!(label.y, 50.0 - LABEL_OFFSET_PX);

        let high = vec![make_annotation(Some("high"), [10.0, 1.0, 30.0, 20.0])];
        let shapes = map_to_overlay(&high, dims, dims);
        let label = shapes[0].label.as_ref().unwrap();
        assert_eq!(label.y, 0.0);
    }

    #[test]
    fn unlabeled_annotations_yield_unlabeled_shapes() {
        let anns = vec![make_annotation(None, [10.0, 10.0, 40.0, 40.0])];
        let dims = Dimensions::new(100.0, 100.0);
        let shapes = map_to_overlay(&anns, dims, dims);
        assert!(shapes[0].label.is_none());
    }

    #[test]
    fn degenerate_dimensions_yield_nothing() {
        let anns = vec![make_annotation(Some("x"), [10.0, 10.0, 40.0, 40.0])];
        let good = Dimensions::new(100.0, 100.0);
        assert!(map_to_overlay(&anns, Dimensions::new(0.0, 480.0), good).is_empty());
        assert!(map_to_overlay(&anns, good, Dimensions::new(640.0, -1.0)).is_empty());
    }

    #[test]
    fn bounding_box_parses_from_corner_array() {
        let ann: Annotation =
            serde_json::from_str(r#"{"label": "1", "bbox": [12.5, 3.0, 200.0, 150.5], "score": 0.87}"#)
                .unwrap();
        assert_eq!(ann.bbox.left, 12.5);
        assert_eq!(ann.bbox.bottom, 150.5);
        assert_eq!(ann.bbox.width(), 187.5);
    }
}
