//! Extraction of 2D planes from a volume.

use crate::error::{ViewerError, ViewerResult};
use crate::volume::{Volume, Voxels};
use ndarray::{s, Array2, Array3};
use std::fmt;

/// Anatomical plane a slice is taken along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    /// Fixed z, spans x and y.
    #[default]
    Axial,
    /// Fixed x, spans y and z.
    Sagittal,
    /// Fixed y, spans x and z.
    Coronal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Sagittal,
        Orientation::Coronal,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Sagittal => "sagittal",
            Orientation::Coronal => "coronal",
        }
    }

    /// Number of slices along this orientation for `[width, height, depth]`.
    pub fn extent(self, dims: [usize; 3]) -> usize {
        let [w, h, d] = dims;
        match self {
            Orientation::Axial => d,
            Orientation::Sagittal => w,
            Orientation::Coronal => h,
        }
    }

    /// `(plane_width, plane_height)` of a slice for `[width, height, depth]`.
    pub fn plane_dims(self, dims: [usize; 3]) -> (usize, usize) {
        let [w, h, d] = dims;
        match self {
            Orientation::Axial => (w, h),
            Orientation::Sagittal => (h, d),
            Orientation::Coronal => (w, d),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Validate a signed, user-supplied index against the extent of
/// `orientation`.
pub fn checked_index(volume: &Volume, orientation: Orientation, requested: i64) -> ViewerResult<usize> {
    let extent = orientation.extent(volume.dims());
    if requested < 0 || requested as u64 >= extent as u64 {
        return Err(out_of_range(requested, orientation, extent));
    }
    Ok(requested as usize)
}

fn out_of_range(index: impl fmt::Display, orientation: Orientation, extent: usize) -> ViewerError {
    ViewerError::Range(format!(
        "slice index {index} out of bounds for {orientation} orientation (max: {})",
        extent as i64 - 1
    ))
}

fn take_plane<T: Copy + Into<f64>>(
    voxels: &Array3<T>,
    index: usize,
    orientation: Orientation,
) -> Array2<f32> {
    // Storage axes are (z, y, x); each view below comes out as
    // (plane_height, plane_width) in standard order.
    let plane = match orientation {
        Orientation::Axial => voxels.slice(s![index, .., ..]),
        Orientation::Sagittal => voxels.slice(s![.., .., index]),
        Orientation::Coronal => voxels.slice(s![.., index, ..]),
    };
    plane.mapv(|v| Into::<f64>::into(v) as f32)
}

/// Extract slice `index` along `orientation`.
///
/// The result has shape `(plane_height, plane_width)`; flattened it is the
/// plane in row-major order (axial `x + y*width`, sagittal `y + z*height`,
/// coronal `x + z*width`).
pub fn extract_slice(volume: &Volume, index: usize, orientation: Orientation) -> ViewerResult<Array2<f32>> {
    let extent = orientation.extent(volume.dims());
    if index >= extent {
        return Err(out_of_range(index, orientation, extent));
    }
    Ok(match volume.voxels() {
        Voxels::U8(a) => take_plane(a, index, orientation),
        Voxels::I16(a) => take_plane(a, index, orientation),
        Voxels::I32(a) => take_plane(a, index, orientation),
        Voxels::F32(a) => take_plane(a, index, orientation),
        Voxels::F64(a) => take_plane(a, index, orientation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential(dims: [usize; 3]) -> Volume {
        let [w, h, d] = dims;
        let values: Vec<f32> = (0..w * h * d).map(|v| v as f32).collect();
        let voxels = Voxels::F32(Array3::from_shape_vec((d, h, w), values).unwrap());
        Volume::from_voxels(voxels, [1.0; 3])
    }

    #[test]
    fn plane_sizes_match_orientation() {
        let volume = sequential([5, 3, 4]);
        for orientation in Orientation::ALL {
            let (pw, ph) = orientation.plane_dims(volume.dims());
            for index in 0..orientation.extent(volume.dims()) {
                let plane = extract_slice(&volume, index, orientation).unwrap();
                assert_eq!(plane.dim(), (ph, pw));
                assert_eq!(plane.len(), pw * ph);
            }
        }
    }

    #[test]
    fn coronal_gathers_rows_across_depth() {
        let volume = sequential([4, 4, 2]);
        let plane = extract_slice(&volume, 1, Orientation::Coronal).unwrap();
        let flat: Vec<f32> = plane.iter().copied().collect();
        assert_eq!(flat, vec![4.0, 5.0, 6.0, 7.0, 20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn index_at_extent_is_rejected() {
        let volume = sequential([4, 4, 2]);
        assert!(matches!(
            extract_slice(&volume, 2, Orientation::Axial),
            Err(ViewerError::Range(_))
        ));
        assert!(matches!(
            extract_slice(&volume, 4, Orientation::Sagittal),
            Err(ViewerError::Range(_))
        ));
    }

    #[test]
    fn negative_request_is_rejected() {
        let volume = sequential([4, 4, 2]);
        assert!(matches!(
            checked_index(&volume, Orientation::Axial, -1),
            Err(ViewerError::Range(_))
        ));
        assert_eq!(checked_index(&volume, Orientation::Axial, 1).unwrap(), 1);
    }
}
