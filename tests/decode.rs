mod common;

use approx::assert_relative_eq;
use common::{counting_u8, gzip, nifti};
use medassist_viewer::slice::{checked_index, extract_slice, Orientation};
use medassist_viewer::volume::{decode, DataType};
use medassist_viewer::ViewerError;

fn values(volume: &medassist_viewer::volume::Volume, index: usize, orientation: Orientation) -> Vec<f32> {
    extract_slice(volume, index, orientation).unwrap().iter().copied().collect()
}

#[test]
fn axial_slices_follow_storage_order() {
    let volume = decode(&counting_u8([4, 4, 2])).unwrap();
    assert_eq!(volume.dims(), [4, 4, 2]);
    assert_eq!(volume.data_type(), DataType::U8);

    let first: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let second: Vec<f32> = (16..32).map(|v| v as f32).collect();
    assert_eq!(values(&volume, 0, Orientation::Axial), first);
    assert_eq!(values(&volume, 1, Orientation::Axial), second);
}

#[test]
fn sagittal_slice_holds_the_first_column() {
    let volume = decode(&counting_u8([4, 4, 2])).unwrap();
    assert_eq!(
        values(&volume, 0, Orientation::Sagittal),
        vec![0.0, 4.0, 8.0, 12.0, 16.0, 20.0, 24.0, 28.0]
    );
}

#[test]
fn side_planes_run_along_rows_then_depth() {
    // value = x + 3y + 6z
    let volume = decode(&counting_u8([3, 2, 4])).unwrap();
    assert_eq!(
        values(&volume, 1, Orientation::Sagittal),
        vec![1.0, 4.0, 7.0, 10.0, 13.0, 16.0, 19.0, 22.0]
    );
    let coronal: Vec<f32> = [3, 4, 5, 9, 10, 11, 15, 16, 17, 21, 22, 23].map(|v| v as f32).to_vec();
    assert_eq!(values(&volume, 1, Orientation::Coronal), coronal);
}

#[test]
fn plane_sizes_per_orientation() {
    let volume = decode(&counting_u8([5, 3, 2])).unwrap();
    assert_eq!(extract_slice(&volume, 0, Orientation::Axial).unwrap().dim(), (3, 5));
    assert_eq!(extract_slice(&volume, 0, Orientation::Sagittal).unwrap().dim(), (2, 3));
    assert_eq!(extract_slice(&volume, 0, Orientation::Coronal).unwrap().dim(), (2, 5));
}

#[test]
fn out_of_range_indices_are_rejected() {
    let volume = decode(&counting_u8([5, 3, 2])).unwrap();
    assert!(matches!(checked_index(&volume, Orientation::Axial, 2), Err(ViewerError::Range(_))));
    assert!(matches!(checked_index(&volume, Orientation::Sagittal, -1), Err(ViewerError::Range(_))));
    assert_eq!(checked_index(&volume, Orientation::Sagittal, 4).unwrap(), 4);
    assert!(matches!(extract_slice(&volume, 3, Orientation::Coronal), Err(ViewerError::Range(_))));
}

#[test]
fn gzip_is_transparent() {
    let raw = counting_u8([4, 4, 2]);
    let plain = decode(&raw).unwrap();
    let inflated = decode(&gzip(&raw)).unwrap();
    assert_eq!(inflated.dims(), plain.dims());
    assert_eq!(
        values(&inflated, 1, Orientation::Coronal),
        values(&plain, 1, Orientation::Coronal)
    );
}

#[test]
fn spacing_comes_from_pixdim() {
    let volume = decode(&counting_u8([2, 2, 2])).unwrap();
    let [x, y, z] = volume.voxel_spacing();
    assert_relative_eq!(x, 0.8);
    assert_relative_eq!(y, 0.8);
    assert_relative_eq!(z, 2.5);
}

#[test]
fn bad_magic_is_a_format_error() {
    let mut bytes = counting_u8([2, 2, 2]);
    bytes[344..348].copy_from_slice(b"xyz\0");
    assert!(matches!(decode(&bytes), Err(ViewerError::Format(_))));
}

#[test]
fn short_payload_is_a_format_error() {
    let mut bytes = counting_u8([4, 4, 2]);
    bytes.truncate(bytes.len() - 1);
    assert!(matches!(decode(&bytes), Err(ViewerError::Format(_))));
    assert!(matches!(decode(&bytes[..100]), Err(ViewerError::Format(_))));
}

#[test]
fn sixteen_bit_volumes_decode() {
    let payload: Vec<u8> = [-1000i16, 0, 40, 3000].iter().flat_map(|v| v.to_le_bytes()).collect();
    let volume = decode(&nifti([2, 2, 1], 4, 16, &payload)).unwrap();
    assert_eq!(volume.data_type(), DataType::I16);
    assert_eq!(values(&volume, 0, Orientation::Axial), vec![-1000.0, 0.0, 40.0, 3000.0]);
    let stats = volume.intensity_stats();
    assert_relative_eq!(stats.min, -1000.0);
    assert_relative_eq!(stats.max, 3000.0);
    assert_relative_eq!(stats.mean, 510.0);
}

#[test]
fn unknown_type_falls_back_to_float32() {
    let payload: Vec<u8> = [1.5f32, 2.5, 3.5, 4.5].iter().flat_map(|v| v.to_le_bytes()).collect();
    // 512 is uint16, which the viewer does not read natively
    let volume = decode(&nifti([2, 2, 1], 512, 16, &payload)).unwrap();
    assert_eq!(volume.data_type(), DataType::F32);
    assert_eq!(volume.declared_type_code(), 512);
    assert_eq!(values(&volume, 0, Orientation::Axial), vec![1.5, 2.5, 3.5, 4.5]);
}
