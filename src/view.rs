//! Camera state of a viewer session and the slice-to-screen transform.

use crate::intensity::WindowParams;
use crate::slice::Orientation;
use egui::{pos2, vec2, Pos2, Vec2};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 10.0;

/// Quarter-turn display rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next quarter turn clockwise on screen.
    pub fn next(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// Width and height trade places on screen.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Exact `(sin, cos)`; computing these from radians would leave
    /// rounding residue that breaks pixel round trips.
    fn sin_cos(self) -> (f32, f32) {
        match self {
            Rotation::Deg0 => (0.0, 1.0),
            Rotation::Deg90 => (1.0, 0.0),
            Rotation::Deg180 => (0.0, -1.0),
            Rotation::Deg270 => (-1.0, 0.0),
        }
    }
}

/// Camera and display parameters of one viewer session.
///
/// Updated by replacing the whole record; the transition methods take and
/// return `Self`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerState {
    pub current_slice: usize,
    pub orientation: Orientation,
    pub zoom: f32,
    pub pan: Vec2,
    pub rotation: Rotation,
    pub window_width: f32,
    pub window_level: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub is_panning: bool,
}

impl Default for ViewerState {
    fn default() -> Self {
        let window = WindowParams::default();
        Self {
            current_slice: 0,
            orientation: Orientation::Axial,
            zoom: 1.0,
            pan: Vec2::ZERO,
            rotation: Rotation::Deg0,
            window_width: window.width,
            window_level: window.level,
            brightness: window.brightness,
            contrast: window.contrast,
            is_panning: false,
        }
    }
}

impl ViewerState {
    pub fn window(&self) -> WindowParams {
        WindowParams {
            width: self.window_width,
            level: self.window_level,
            brightness: self.brightness,
            contrast: self.contrast,
        }
    }

    /// Bring `current_slice` back into `[0, extent-1]`.
    pub fn clamped(mut self, extent: usize) -> Self {
        self.current_slice = self.current_slice.min(extent.saturating_sub(1));
        self
    }

    /// Switch orientation, re-clamping the slice index to the new axis.
    pub fn with_orientation(mut self, orientation: Orientation, dims: [usize; 3]) -> Self {
        self.orientation = orientation;
        self.clamped(orientation.extent(dims))
    }

    /// Jump to a slice, clamped to the extent.
    pub fn with_slice(mut self, index: usize, extent: usize) -> Self {
        self.current_slice = index;
        self.clamped(extent)
    }

    /// Move `delta` slices, clamped to the extent.
    pub fn stepped(self, delta: i64, extent: usize) -> Self {
        let last = extent.saturating_sub(1) as i64;
        let target = (self.current_slice as i64 + delta).clamp(0, last.max(0));
        self.with_slice(target as usize, extent)
    }

    /// Multiply zoom by `factor`, clamped to `[MIN_ZOOM, MAX_ZOOM]`.
    pub fn zoomed(mut self, factor: f32) -> Self {
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        self
    }

    pub fn panned(mut self, delta: Vec2) -> Self {
        self.pan += delta;
        self
    }

    pub fn rotated(mut self) -> Self {
        self.rotation = self.rotation.next();
        self
    }

    /// Zoom 1, no pan, no rotation. Slice and window are kept.
    pub fn reset_view(mut self) -> Self {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
        self.rotation = Rotation::Deg0;
        self
    }

    pub fn with_panning(mut self, is_panning: bool) -> Self {
        self.is_panning = is_panning;
        self
    }
}

/// Size of the display surface for a native slice of `native` pixels.
pub fn display_size(native: Vec2, rotation: Rotation) -> Vec2 {
    if rotation.swaps_axes() {
        vec2(native.y, native.x)
    } else {
        native
    }
}

/// Maps native slice pixels to screen points and back.
///
/// Forward: translate(center + pan) → scale(zoom) → rotate → translate(-native/2),
/// all relative to `origin`, the top-left of the display surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub origin: Pos2,
    pub native: Vec2,
    pub display: Vec2,
    pub zoom: f32,
    pub pan: Vec2,
    pub rotation: Rotation,
}

impl ViewTransform {
    /// Transform for a slice of `native` pixels drawn on a surface whose
    /// top-left corner is at `origin`.
    pub fn new(state: &ViewerState, native: Vec2, origin: Pos2) -> Self {
        Self {
            origin,
            native,
            display: display_size(native, state.rotation),
            zoom: state.zoom,
            pan: state.pan,
            rotation: state.rotation,
        }
    }

    fn center(&self) -> Pos2 {
        self.origin + self.display / 2.0 + self.pan
    }

    pub fn volume_to_screen(&self, p: Pos2) -> Pos2 {
        let (sin, cos) = self.rotation.sin_cos();
        let local = p - self.native / 2.0;
        let rotated = vec2(local.x * cos - local.y * sin, local.x * sin + local.y * cos);
        self.center() + rotated * self.zoom
    }

    pub fn screen_to_volume(&self, p: Pos2) -> Pos2 {
        let (sin, cos) = self.rotation.sin_cos();
        let local = (p - self.center()) / self.zoom;
        // rotate by -angle
        let unrotated = vec2(local.x * cos + local.y * sin, -local.x * sin + local.y * cos);
        pos2(0.0, 0.0) + self.native / 2.0 + unrotated
    }

    /// Screen positions of the slice corners: top-left, top-right,
    /// bottom-right, bottom-left in native orientation.
    pub fn quad(&self) -> [Pos2; 4] {
        let (w, h) = (self.native.x, self.native.y);
        [
            self.volume_to_screen(pos2(0.0, 0.0)),
            self.volume_to_screen(pos2(w, 0.0)),
            self.volume_to_screen(pos2(w, h)),
            self.volume_to_screen(pos2(0.0, h)),
        ]
    }
}
