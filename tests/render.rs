mod common;

use common::counting_u8;
use medassist_viewer::render::render_slice;
use medassist_viewer::slice::Orientation;
use medassist_viewer::view::{Rotation, ViewerState};
use medassist_viewer::volume::decode;
use medassist_viewer::ViewerError;

/// Window that maps the normalized 0..=255 range onto itself.
fn identity() -> ViewerState {
    ViewerState {
        window_width: 255.0,
        window_level: 127.5,
        ..ViewerState::default()
    }
}

#[test]
fn middle_slice_is_rendered_by_default() {
    let volume = decode(&counting_u8([4, 2, 3])).unwrap();
    let frame = render_slice(&volume, identity(), None).unwrap();
    assert_eq!(frame.dimensions(), (4, 2));
    // slice 1 of 3 holds 8..16, normalized to its own range
    assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0, 255]);
    assert_eq!(frame.get_pixel(3, 1).0, [255, 255, 255, 255]);
}

#[test]
fn quarter_turn_swaps_the_frame() {
    let volume = decode(&counting_u8([4, 2, 3])).unwrap();
    let viewer = ViewerState {
        orientation: Orientation::Coronal,
        rotation: Rotation::Deg90,
        ..identity()
    };
    let frame = render_slice(&volume, viewer, Some(0)).unwrap();
    // coronal planes are width × depth = 4 × 3, turned on their side
    assert_eq!(frame.dimensions(), (3, 4));
}

#[test]
fn out_of_range_slice_is_refused() {
    let volume = decode(&counting_u8([4, 2, 3])).unwrap();
    let result = render_slice(&volume, identity(), Some(3));
    assert!(matches!(result, Err(ViewerError::Range(_))));
}

#[test]
fn frames_save_as_png() {
    let volume = decode(&common::gzip(&counting_u8([4, 4, 2]))).unwrap();
    let frame = render_slice(&volume, identity(), Some(1)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slice.png");
    frame.save(&path).unwrap();
    let reloaded = image::open(&path).unwrap().to_rgba8();
    assert_eq!(reloaded, frame);
}
