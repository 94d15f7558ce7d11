//! Composition of the current slice, its mask overlays and the annotation
//! geometry into a paint-ready [`Scene`], and the two ways of drawing one:
//! through an egui painter, or headless into an image.

use crate::annotation::AnnotationState;
use crate::error::ViewerResult;
use crate::intensity::map_slice;
use crate::masks::SliceMasks;
use crate::segmentation::SegmentationState;
use crate::slice::{checked_index, extract_slice};
use crate::view::{ViewTransform, ViewerState};
use crate::volume::Volume;
use egui::epaint::{Mesh, Vertex};
use egui::{pos2, vec2, Align2, Color32, ColorImage, FontId, Painter, Pos2, Rect, Shape, Stroke, TextureHandle};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use log::debug;
use ndarray::Array2;

/// Opacity of mask overlays.
pub const MASK_OPACITY: f32 = 0.5;

/// Screen width of the box outline.
const BOX_STROKE: f32 = 1.5;
/// Screen width of brush strokes.
const BRUSH_STROKE: f32 = 5.0;

const ANNOTATION_COLOR: Color32 = Color32::from_rgba_premultiplied(230, 0, 0, 230);
const BOX_FILL: Color32 = Color32::from_rgba_premultiplied(51, 0, 0, 51);

/// A frame ready to be painted.
#[derive(Debug, Clone)]
pub struct Scene {
    /// Windowed slice with masks blended in, at native resolution.
    pub image: ColorImage,
    pub transform: ViewTransform,
    /// Screen corners of the image: top-left, top-right, bottom-right,
    /// bottom-left in native orientation.
    pub quad: [Pos2; 4],
    /// Screen corners of the annotation box.
    pub box_outline: Option<[Pos2; 4]>,
    /// Brush strokes in screen space; strokes shorter than two points are
    /// left out.
    pub strokes: Vec<Vec<Pos2>>,
    /// Readout drawn untransformed in the top-left corner.
    pub hud: Vec<String>,
}

/// Heads-up readout for the current state.
pub fn hud_lines(viewer: &ViewerState, annotation: &AnnotationState, extent: usize, native: [usize; 2]) -> Vec<String> {
    vec![
        format!("Slice: {}/{}", viewer.current_slice + 1, extent),
        format!("Orientation: {}", viewer.orientation),
        format!("Zoom: {:.0}%", viewer.zoom * 100.0),
        format!("W/L: {}/{}", viewer.window_width, viewer.window_level),
        format!("Size: {} × {}", native[0], native[1]),
        format!("Tool: {}", annotation.tool.label()),
    ]
}

fn blend(base: Color32, mask: &Rgba<u8>) -> Color32 {
    let a = f32::from(mask.0[3]) / 255.0 * MASK_OPACITY;
    if a <= 0.0 {
        return base;
    }
    let mix = |b: u8, m: u8| (f32::from(b) * (1.0 - a) + f32::from(m) * a).round() as u8;
    Color32::from_rgb(
        mix(base.r(), mask.0[0]),
        mix(base.g(), mask.0[1]),
        mix(base.b(), mask.0[2]),
    )
}

fn overlay(pixels: &mut [Color32], mask: &RgbaImage, native: [usize; 2]) -> bool {
    let [w, h] = native;
    if mask.width() as usize != w || mask.height() as usize != h {
        debug!(
            "skipping {}x{} mask on a {w}x{h} slice",
            mask.width(),
            mask.height()
        );
        return false;
    }
    for (pixel, m) in pixels.iter_mut().zip(mask.pixels()) {
        *pixel = blend(*pixel, m);
    }
    true
}

/// Masks drawn on the current slice, in drawing order: the annotation mask
/// first, then the selected organs.
fn visible_masks<'a>(viewer: &ViewerState, segmentation: &'a SegmentationState) -> Vec<&'a RgbaImage> {
    let index = viewer.current_slice;
    let mut masks = Vec::new();
    if segmentation.show_annotations {
        if let Some(mask) = segmentation
            .annotation_masks
            .as_deref()
            .and_then(|m: &SliceMasks| m.get(viewer.orientation, index))
        {
            masks.push(mask);
        }
    }
    if segmentation.show_organs {
        if let Some(organs) = segmentation.organ_masks.as_deref() {
            masks.extend(
                segmentation
                    .selected_organs
                    .iter()
                    .filter_map(|organ| organs.get(organ))
                    .filter_map(|m| m.get(viewer.orientation, index)),
            );
        }
    }
    masks
}

fn gray_image(plane: &Array2<u8>) -> ColorImage {
    let (h, w) = plane.dim();
    let pixels = plane.iter().map(|&v| Color32::from_gray(v)).collect();
    ColorImage {
        size: [w, h],
        pixels,
        source_size: egui::Vec2::new(w as f32, h as f32),
    }
}

/// Build the frame for the current state. `origin` is the screen position
/// of the display surface's top-left corner.
pub fn compose(
    volume: &Volume,
    viewer: &ViewerState,
    annotation: &AnnotationState,
    segmentation: &SegmentationState,
    origin: Pos2,
) -> ViewerResult<Scene> {
    let plane = extract_slice(volume, viewer.current_slice, viewer.orientation)?;
    let mapped = map_slice(plane.view(), &viewer.window());
    let mut image = gray_image(&mapped);
    let native = image.size;

    for mask in visible_masks(viewer, segmentation) {
        overlay(&mut image.pixels, mask, native);
    }

    let transform = ViewTransform::new(viewer, vec2(native[0] as f32, native[1] as f32), origin);
    let (box_outline, strokes) = if annotation.show_annotations {
        let box_outline = annotation
            .bounding_box
            .map(|b| b.corners().map(|p| transform.volume_to_screen(p)));
        let strokes = annotation
            .brush_strokes
            .iter()
            .filter(|s| s.len() >= 2)
            .map(|s| s.iter().map(|&p| transform.volume_to_screen(p)).collect())
            .collect();
        (box_outline, strokes)
    } else {
        (None, Vec::new())
    };

    let extent = viewer.orientation.extent(volume.dims());
    Ok(Scene {
        quad: transform.quad(),
        hud: hud_lines(viewer, annotation, extent, native),
        image,
        transform,
        box_outline,
        strokes,
    })
}

/// Texture sampling for slices: voxels stay crisp when zoomed.
pub fn texture_options() -> egui::TextureOptions {
    egui::TextureOptions::NEAREST
}

/// Paint a scene whose image has been uploaded as `texture`.
pub fn paint(scene: &Scene, painter: &Painter, texture: &TextureHandle) {
    let uvs = [pos2(0.0, 0.0), pos2(1.0, 0.0), pos2(1.0, 1.0), pos2(0.0, 1.0)];
    let mut mesh = Mesh::with_texture(texture.id());
    for (pos, uv) in scene.quad.iter().zip(uvs) {
        mesh.vertices.push(Vertex {
            pos: *pos,
            uv,
            color: Color32::WHITE,
        });
    }
    mesh.indices.extend([0, 1, 2, 0, 2, 3]);
    painter.add(Shape::mesh(mesh));

    if let Some(corners) = scene.box_outline {
        painter.add(Shape::convex_polygon(
            corners.to_vec(),
            BOX_FILL,
            Stroke::new(BOX_STROKE, ANNOTATION_COLOR),
        ));
    }
    for stroke in &scene.strokes {
        painter.add(Shape::line(stroke.clone(), Stroke::new(BRUSH_STROKE, ANNOTATION_COLOR)));
        // round caps and joins
        for p in stroke {
            painter.circle_filled(*p, BRUSH_STROKE / 2.0, ANNOTATION_COLOR);
        }
    }

    paint_hud(&scene.hud, painter);
}

fn paint_hud(lines: &[String], painter: &Painter) {
    let font = FontId::proportional(12.0);
    let line_h = 15.0;
    let origin = painter.clip_rect().min + vec2(10.0, 10.0);
    let panel = Rect::from_min_size(origin, vec2(250.0, 10.0 + line_h * lines.len() as f32));
    painter.rect_filled(panel, 0.0, Color32::from_black_alpha(180));
    for (i, line) in lines.iter().enumerate() {
        painter.text(
            origin + vec2(10.0, 5.0 + line_h * i as f32),
            Align2::LEFT_TOP,
            line,
            font.clone(),
            Color32::WHITE,
        );
    }
}

/// Rasterise a scene composed at the origin into an image of its display
/// size, sampling the slice by inverse mapping. The readout is not drawn.
pub fn render_frame(scene: &Scene) -> RgbaImage {
    let t = &scene.transform;
    let (width, height) = (t.display.x.round() as u32, t.display.y.round() as u32);
    let [w, h] = scene.image.size;
    let mut frame = RgbaImage::from_fn(width, height, |x, y| {
        let screen = t.origin + vec2(x as f32 + 0.5, y as f32 + 0.5);
        let p = t.screen_to_volume(screen);
        let (vx, vy) = (p.x.floor(), p.y.floor());
        if vx < 0.0 || vy < 0.0 || vx >= w as f32 || vy >= h as f32 {
            return Rgba([0, 0, 0, 255]);
        }
        let c = scene.image.pixels[vy as usize * w + vx as usize];
        Rgba([c.r(), c.g(), c.b(), 255])
    });

    let [r, g, b, _] = ANNOTATION_COLOR.to_array();
    let color = Rgba([r, g, b, 255]);
    let local = |p: Pos2| ((p.x - t.origin.x), (p.y - t.origin.y));
    if let Some(corners) = scene.box_outline {
        for i in 0..4 {
            draw_line_segment_mut(&mut frame, local(corners[i]), local(corners[(i + 1) % 4]), color);
        }
    }
    let radius = (BRUSH_STROKE / 2.0).round() as i32;
    for stroke in &scene.strokes {
        for pair in stroke.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            draw_line_segment_mut(&mut frame, local(a), local(b), color);
            let (bx, by) = local(b);
            draw_filled_circle_mut(&mut frame, (bx.round() as i32, by.round() as i32), radius, color);
        }
    }
    frame
}

/// Headless frame of one slice without annotations or masks. `slice`
/// defaults to the middle of the axis and is range-checked.
pub fn render_slice(volume: &Volume, viewer: ViewerState, slice: Option<i64>) -> ViewerResult<RgbaImage> {
    let extent = viewer.orientation.extent(volume.dims());
    let index = checked_index(volume, viewer.orientation, slice.unwrap_or(extent as i64 / 2))?;
    let viewer = viewer.with_slice(index, extent);
    let scene = compose(
        volume,
        &viewer,
        &AnnotationState::default(),
        &SegmentationState::default(),
        Pos2::ZERO,
    )?;
    Ok(render_frame(&scene))
}

/// Colour of the frame at a screen point, if it falls on the slice.
pub fn sample(scene: &Scene, screen: Pos2) -> Option<Color32> {
    let p = scene.transform.screen_to_volume(screen);
    let [w, h] = scene.image.size;
    if p.x < 0.0 || p.y < 0.0 || p.x >= w as f32 || p.y >= h as f32 {
        return None;
    }
    Some(scene.image.pixels[p.y as usize * w + p.x as usize])
}
