//! Pointer and wheel handling over the slice canvas.
//!
//! The controller is a reducer: it takes the current state records and an
//! event and returns the replacement records. The only thing it remembers
//! between events is the last pointer position, which pan deltas are
//! measured from.

use crate::annotation::{AnnotationState, AnnotationTool};
use crate::view::{ViewTransform, ViewerState};
use egui::Pos2;

/// Zoom factor for one modified wheel notch away from the user.
pub const ZOOM_OUT_STEP: f32 = 0.95;
/// Zoom factor for one modified wheel notch towards the user.
pub const ZOOM_IN_STEP: f32 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Pos2),
    Move(Pos2),
    Up,
    Leave,
    /// `modifier` is the zoom modifier (ctrl/cmd) being held.
    Wheel { delta_y: f32, modifier: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    Idle,
    Panning,
    DrawingBox,
    DrawingBrush,
}

impl InteractionMode {
    pub fn of(viewer: &ViewerState, annotation: &AnnotationState) -> Self {
        if viewer.is_panning {
            return InteractionMode::Panning;
        }
        match (annotation.tool, annotation.is_drawing) {
            (AnnotationTool::Box, true) => InteractionMode::DrawingBox,
            (AnnotationTool::Brush, true) => InteractionMode::DrawingBrush,
            _ => InteractionMode::Idle,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Controller {
    last_pointer: Option<Pos2>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. `extent` is the slice count along the current
    /// orientation.
    pub fn handle(
        &mut self,
        viewer: ViewerState,
        annotation: AnnotationState,
        event: PointerEvent,
        transform: &ViewTransform,
        extent: usize,
    ) -> (ViewerState, AnnotationState) {
        match event {
            PointerEvent::Wheel { delta_y, modifier } => {
                if delta_y == 0.0 {
                    return (viewer, annotation);
                }
                let viewer = if modifier {
                    viewer.zoomed(if delta_y > 0.0 { ZOOM_OUT_STEP } else { ZOOM_IN_STEP })
                } else {
                    viewer.stepped(if delta_y > 0.0 { 1 } else { -1 }, extent)
                };
                (viewer, annotation)
            }
            PointerEvent::Down(p) => {
                if annotation.tool == AnnotationTool::None {
                    self.last_pointer = Some(p);
                    return (viewer.with_panning(true), annotation);
                }
                let at = transform.screen_to_volume(p);
                (viewer, annotation.begin(at))
            }
            PointerEvent::Move(p) => match InteractionMode::of(&viewer, &annotation) {
                InteractionMode::Panning => {
                    let delta = self.last_pointer.map(|last| p - last).unwrap_or_default();
                    self.last_pointer = Some(p);
                    (viewer.panned(delta), annotation)
                }
                InteractionMode::DrawingBox | InteractionMode::DrawingBrush => {
                    let at = transform.screen_to_volume(p);
                    (viewer, annotation.extend(at))
                }
                InteractionMode::Idle => (viewer, annotation),
            },
            PointerEvent::Up | PointerEvent::Leave => {
                self.last_pointer = None;
                (viewer.with_panning(false), annotation.finish())
            }
        }
    }
}
