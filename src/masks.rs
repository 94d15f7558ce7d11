//! Decoding of segmentation mask images into tinted overlays.

use crate::error::{ViewerError, ViewerResult};
use crate::slice::Orientation;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::debug;
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Luminance at or above which a mask pixel is inside the mask.
pub const MASK_THRESHOLD: u8 = 128;

pub const ORGAN_COLORS: [(&str, [u8; 3]); 7] = [
    ("liver", [255, 0, 0]),
    ("spleen", [0, 255, 0]),
    ("kidney_right", [0, 0, 255]),
    ("kidney_left", [255, 255, 0]),
    ("gallbladder", [255, 0, 255]),
    ("stomach", [0, 255, 255]),
    ("pancreas", [128, 0, 128]),
];

/// Organs selected for display before the user changes anything.
pub const DEFAULT_ORGANS: [&str; 2] = ["liver", "spleen"];

pub const ANNOTATION_COLOR: [u8; 3] = [0, 0, 255];

/// Palette colour of an organ; white for organs the palette does not name.
pub fn organ_color(organ: &str) -> [u8; 3] {
    ORGAN_COLORS
        .iter()
        .find(|(name, _)| *name == organ)
        .map(|(_, color)| *color)
        .unwrap_or([255, 255, 255])
}

/// Loads the bytes behind a mask reference that is not a data URL.
pub type FetchFn<'a> = &'a (dyn Fn(&str) -> ViewerResult<Vec<u8>> + Sync);

/// Masks of one series, keyed by slice index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SliceMasks {
    /// Orientation the slice indices refer to.
    pub orientation: Orientation,
    pub by_slice: BTreeMap<usize, RgbaImage>,
}

impl SliceMasks {
    pub fn get(&self, orientation: Orientation, index: usize) -> Option<&RgbaImage> {
        if orientation != self.orientation {
            return None;
        }
        self.by_slice.get(&index)
    }

    pub fn len(&self) -> usize {
        self.by_slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slice.is_empty()
    }
}

/// Organ name to that organ's slice masks.
pub type OrganMasks = BTreeMap<String, SliceMasks>;

fn slice_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"slice_(\d+)").expect("slice pattern is valid"))
}

/// Slice index encoded in a mask file name such as `slice_12.png`.
pub fn slice_index(name: &str) -> Option<usize> {
    slice_pattern()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Volume file name without its `.nii.gz` or `.nii` suffix; the key the
/// segmentation backend files masks under.
pub fn file_stem(file_name: &str) -> String {
    file_name.replacen(".nii.gz", "", 1).replacen(".nii", "", 1)
}

/// Bytes of a mask reference: inline `data:` URLs are decoded, anything
/// else goes through `fetch`.
pub fn mask_bytes(reference: &str, fetch: FetchFn<'_>) -> ViewerResult<Vec<u8>> {
    let Some(rest) = reference.strip_prefix("data:") else {
        return fetch(reference);
    };
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ViewerError::Format("data URL has no payload".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(ViewerError::Format(format!(
            "unsupported data URL encoding: {meta}"
        )));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ViewerError::Format(format!("bad base64 in mask: {e}")))
}

/// Decode a mask image for a `native = (width, height)` slice.
///
/// The backend writes masks array-major, so the image is scaled to
/// `height × width` and transposed back. Pixels below [`MASK_THRESHOLD`]
/// become transparent, the rest take `color` fully opaque.
pub fn decode_mask(bytes: &[u8], native: (u32, u32), color: [u8; 3]) -> ViewerResult<RgbaImage> {
    let (width, height) = native;
    let gray = image::load_from_memory(bytes)?.to_luma8();
    let scaled = imageops::resize(&gray, height, width, FilterType::Nearest);
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        if scaled.get_pixel(y, x).0[0] < MASK_THRESHOLD {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([color[0], color[1], color[2], 255])
        }
    }))
}

/// Decode every `slice_<N>` entry of `files`. Entries without a slice
/// number are skipped; any failure fails the whole set.
pub fn decode_slice_masks(
    files: &BTreeMap<String, String>,
    native: (u32, u32),
    orientation: Orientation,
    color: [u8; 3],
    fetch: FetchFn<'_>,
) -> ViewerResult<SliceMasks> {
    let decoded = files
        .par_iter()
        .filter_map(|(name, reference)| slice_index(name).map(|index| (index, reference)))
        .map(|(index, reference)| {
            let bytes = mask_bytes(reference, fetch)?;
            Ok((index, decode_mask(&bytes, native, color)?))
        })
        .collect::<ViewerResult<Vec<_>>>()?;
    debug!("decoded {} of {} mask files", decoded.len(), files.len());
    Ok(SliceMasks {
        orientation,
        by_slice: decoded.into_iter().collect(),
    })
}

/// Decode per-organ masks, tinting each organ with its palette colour.
pub fn decode_organ_masks(
    organs: &BTreeMap<String, BTreeMap<String, String>>,
    native: (u32, u32),
    orientation: Orientation,
    fetch: FetchFn<'_>,
) -> ViewerResult<OrganMasks> {
    organs
        .iter()
        .map(|(organ, files)| {
            let masks = decode_slice_masks(files, native, orientation, organ_color(organ), fetch)?;
            Ok((organ.clone(), masks))
        })
        .collect()
}
