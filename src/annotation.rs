//! Human-drawn prompts for annotation segmentation: a bounding box or a set
//! of brush strokes, both in native slice pixel coordinates.

use crate::error::{ViewerError, ViewerResult};
use egui::Pos2;
use image::{GrayImage, ImageFormat, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use serde::Serialize;
use std::io::Cursor;

/// Line width of strokes in the mask sent to the backend.
pub const BRUSH_MASK_WIDTH: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationTool {
    #[default]
    None,
    Box,
    Brush,
}

impl AnnotationTool {
    /// Also the value of the `tool` form field.
    pub fn label(self) -> &'static str {
        match self {
            AnnotationTool::None => "none",
            AnnotationTool::Box => "box",
            AnnotationTool::Brush => "brush",
        }
    }
}

/// A box as dragged: `(xmin, ymin)` is where the drag started, so the
/// corners may be in any order until [`BoundingBox::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn at(p: Pos2) -> Self {
        Self {
            xmin: p.x,
            ymin: p.y,
            xmax: p.x,
            ymax: p.y,
        }
    }

    pub fn with_far_corner(self, p: Pos2) -> Self {
        Self {
            xmax: p.x,
            ymax: p.y,
            ..self
        }
    }

    pub fn normalized(&self) -> Self {
        Self {
            xmin: self.xmin.min(self.xmax),
            ymin: self.ymin.min(self.ymax),
            xmax: self.xmin.max(self.xmax),
            ymax: self.ymin.max(self.ymax),
        }
    }

    /// Corners of the normalised box, clockwise from top-left.
    pub fn corners(&self) -> [Pos2; 4] {
        let b = self.normalized();
        [
            Pos2::new(b.xmin, b.ymin),
            Pos2::new(b.xmax, b.ymin),
            Pos2::new(b.xmax, b.ymax),
            Pos2::new(b.xmin, b.ymax),
        ]
    }

    /// JSON body of the `box` form field.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.normalized()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationState {
    pub tool: AnnotationTool,
    pub is_drawing: bool,
    pub bounding_box: Option<BoundingBox>,
    pub brush_strokes: Vec<Vec<Pos2>>,
    pub show_annotations: bool,
}

impl Default for AnnotationState {
    fn default() -> Self {
        Self {
            tool: AnnotationTool::None,
            is_drawing: false,
            bounding_box: None,
            brush_strokes: Vec::new(),
            show_annotations: true,
        }
    }
}

impl AnnotationState {
    pub fn with_tool(mut self, tool: AnnotationTool) -> Self {
        self.tool = tool;
        self.is_drawing = false;
        self
    }

    /// Drop the drawn box and strokes; tool and visibility are kept.
    pub fn cleared(mut self) -> Self {
        self.is_drawing = false;
        self.bounding_box = None;
        self.brush_strokes.clear();
        self
    }

    /// Start a new interaction at `p`: previous geometry is discarded.
    pub fn begin(self, p: Pos2) -> Self {
        let mut next = self.cleared();
        match next.tool {
            AnnotationTool::None => return next,
            AnnotationTool::Box => next.bounding_box = Some(BoundingBox::at(p)),
            AnnotationTool::Brush => next.brush_strokes.push(vec![p]),
        }
        next.is_drawing = true;
        next
    }

    /// Extend the current interaction to `p`. Ignored unless drawing.
    pub fn extend(mut self, p: Pos2) -> Self {
        if !self.is_drawing {
            return self;
        }
        match self.tool {
            AnnotationTool::None => {}
            AnnotationTool::Box => {
                self.bounding_box = self.bounding_box.map(|b| b.with_far_corner(p));
            }
            AnnotationTool::Brush => {
                if let Some(stroke) = self.brush_strokes.last_mut() {
                    stroke.push(p);
                }
            }
        }
        self
    }

    pub fn finish(mut self) -> Self {
        self.is_drawing = false;
        self
    }

    /// Turn the drawn geometry into a request prompt, or refuse if the
    /// active tool has nothing to send.
    pub fn prompt(&self, native: (u32, u32)) -> ViewerResult<AnnotationPrompt> {
        match self.tool {
            AnnotationTool::None => Err(ViewerError::Validation(
                "select the box or brush tool first".to_string(),
            )),
            AnnotationTool::Box => match self.bounding_box {
                Some(b) => Ok(AnnotationPrompt::Box(b.normalized())),
                None => Err(ViewerError::Validation("draw a bounding box first".to_string())),
            },
            AnnotationTool::Brush => {
                if self.brush_strokes.is_empty() {
                    return Err(ViewerError::Validation("paint with the brush first".to_string()));
                }
                let png = brush_mask_png(&self.brush_strokes, native.0, native.1)?;
                Ok(AnnotationPrompt::Brush(png))
            }
        }
    }
}

/// Validated input of an annotation segmentation request.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationPrompt {
    /// Normalised box.
    Box(BoundingBox),
    /// PNG of the rasterised strokes.
    Brush(Vec<u8>),
}

impl AnnotationPrompt {
    pub fn tool(&self) -> AnnotationTool {
        match self {
            AnnotationPrompt::Box(_) => AnnotationTool::Box,
            AnnotationPrompt::Brush(_) => AnnotationTool::Brush,
        }
    }
}

/// Rasterise strokes white-on-black with round caps and joins. Strokes with
/// fewer than two points draw nothing.
pub fn rasterize_strokes(strokes: &[Vec<Pos2>], width: u32, height: u32, line_width: f32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let radius = (line_width / 2.0).round().max(1.0) as i32;
    for stroke in strokes.iter().filter(|s| s.len() >= 2) {
        for pair in stroke.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let steps = (b - a).length().ceil().max(1.0) as usize;
            for i in 0..=steps {
                let p = a + (b - a) * (i as f32 / steps as f32);
                draw_filled_circle_mut(&mut mask, (p.x.round() as i32, p.y.round() as i32), radius, Luma([255]));
            }
        }
    }
    mask
}

/// PNG-encoded brush mask at native slice resolution.
pub fn brush_mask_png(strokes: &[Vec<Pos2>], width: u32, height: u32) -> ViewerResult<Vec<u8>> {
    let mask = rasterize_strokes(strokes, width, height, BRUSH_MASK_WIDTH);
    let mut png = Vec::new();
    mask.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}
