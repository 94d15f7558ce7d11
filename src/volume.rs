//! NIfTI-1 volume decoding.
//!
//! The header is parsed by the `nifti` crate; the voxel payload is read here
//! so that the element type can be chosen from the declared type code, with
//! the same float fallback the viewer has always used for codes it does not
//! know about.

use crate::error::{ViewerError, ViewerResult};
use crate::intensity::IntensityStats;
use flate2::read::GzDecoder;
use log::{debug, warn};
use ndarray::Array3;
use nifti::NiftiHeader;
use std::borrow::Cow;
use std::io::{Cursor, Read};

/// Size of a NIfTI-1 header; the payload never starts before it.
const NIFTI1_HEADER_SIZE: usize = 348;

/// Element type of the voxel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I16,
    I32,
    F32,
    F64,
}

impl DataType {
    /// Map a NIfTI `datatype` code. `None` for codes the viewer cannot
    /// interpret directly.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(DataType::U8),
            4 => Some(DataType::I16),
            8 => Some(DataType::I32),
            16 => Some(DataType::F32),
            64 => Some(DataType::F64),
            _ => None,
        }
    }

    /// Bytes per element.
    pub fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }
}

/// Typed voxel storage. Every array has shape `(depth, height, width)` in
/// standard order, so its flat layout is x fastest, then y, then z.
#[derive(Debug, Clone)]
pub enum Voxels {
    U8(Array3<u8>),
    I16(Array3<i16>),
    I32(Array3<i32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

impl Voxels {
    /// `[width, height, depth]`.
    pub fn dims(&self) -> [usize; 3] {
        let (d, h, w) = match self {
            Voxels::U8(a) => a.dim(),
            Voxels::I16(a) => a.dim(),
            Voxels::I32(a) => a.dim(),
            Voxels::F32(a) => a.dim(),
            Voxels::F64(a) => a.dim(),
        };
        [w, h, d]
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Voxels::U8(_) => DataType::U8,
            Voxels::I16(_) => DataType::I16,
            Voxels::I32(_) => DataType::I32,
            Voxels::F32(_) => DataType::F32,
            Voxels::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        let [w, h, d] = self.dims();
        w * h * d
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn for_each_value(&self, mut f: impl FnMut(f64)) {
        match self {
            Voxels::U8(a) => a.iter().for_each(|&v| f(v.into())),
            Voxels::I16(a) => a.iter().for_each(|&v| f(v.into())),
            Voxels::I32(a) => a.iter().for_each(|&v| f(v.into())),
            Voxels::F32(a) => a.iter().for_each(|&v| f(v.into())),
            Voxels::F64(a) => a.iter().for_each(|&v| f(v)),
        }
    }
}

/// A decoded volume. Immutable once built.
#[derive(Debug, Clone)]
pub struct Volume {
    voxel_spacing: [f32; 3],
    declared_type_code: i16,
    voxels: Voxels,
}

impl Volume {
    /// Wrap already typed voxels. The declared type code is derived from the
    /// storage type.
    pub fn from_voxels(voxels: Voxels, voxel_spacing: [f32; 3]) -> Self {
        let declared_type_code = match voxels.data_type() {
            DataType::U8 => 2,
            DataType::I16 => 4,
            DataType::I32 => 8,
            DataType::F32 => 16,
            DataType::F64 => 64,
        };
        Self {
            voxel_spacing,
            declared_type_code,
            voxels,
        }
    }

    /// `[width, height, depth]` in voxels.
    pub fn dims(&self) -> [usize; 3] {
        self.voxels.dims()
    }

    pub fn voxel_spacing(&self) -> [f32; 3] {
        self.voxel_spacing
    }

    /// Storage type actually used for the voxels.
    pub fn data_type(&self) -> DataType {
        self.voxels.data_type()
    }

    /// The `datatype` code found in the header, which differs from
    /// [`Volume::data_type`] when the float fallback was taken.
    pub fn declared_type_code(&self) -> i16 {
        self.declared_type_code
    }

    pub fn voxels(&self) -> &Voxels {
        &self.voxels
    }

    /// Min/max/mean/std over every voxel.
    pub fn intensity_stats(&self) -> IntensityStats {
        let mut acc = IntensityStats::accumulator();
        self.voxels.for_each_value(|v| acc.push(v));
        acc.finish()
    }
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn decompress(bytes: &[u8]) -> ViewerResult<Cow<'_, [u8]>> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::new();
    GzDecoder::new(Cursor::new(bytes))
        .read_to_end(&mut out)
        .map_err(|e| ViewerError::Format(format!("gzip stream is corrupt: {e}")))?;
    debug!("inflated {} bytes to {}", bytes.len(), out.len());
    Ok(Cow::Owned(out))
}

/// The header stores `sizeof_hdr = 348`; if that reads correctly as
/// little-endian the whole file is little-endian.
fn is_little_endian(data: &[u8]) -> bool {
    match data.get(0..4) {
        Some(b) => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) == NIFTI1_HEADER_SIZE as i32,
        None => true,
    }
}

fn read_elements<T, const N: usize>(
    payload: &[u8],
    count: usize,
    little_endian: bool,
    from_le: fn([u8; N]) -> T,
    from_be: fn([u8; N]) -> T,
) -> Vec<T> {
    payload
        .chunks_exact(N)
        .take(count)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            if little_endian {
                from_le(bytes)
            } else {
                from_be(bytes)
            }
        })
        .collect()
}

fn to_array<T>(shape: (usize, usize, usize), values: Vec<T>) -> ViewerResult<Array3<T>> {
    Array3::from_shape_vec(shape, values)
        .map_err(|e| ViewerError::Format(format!("voxel buffer does not fit dimensions: {e}")))
}

/// Decode a NIfTI-1 volume, inflating it first if it is gzip-compressed.
pub fn decode(bytes: &[u8]) -> ViewerResult<Volume> {
    let data = decompress(bytes)?;
    let header = NiftiHeader::from_reader(Cursor::new(data.as_ref()))
        .map_err(|e| ViewerError::Format(format!("not a NIfTI-1 volume: {e}")))?;

    let mut dims = [0usize; 3];
    for (axis, dim) in dims.iter_mut().enumerate() {
        let declared = i64::from(header.dim[axis + 1]);
        if declared <= 0 {
            return Err(ViewerError::Format(format!(
                "dimension {} is {declared}, expected a positive size",
                axis + 1
            )));
        }
        *dim = declared as usize;
    }
    let [width, height, depth] = dims;
    let voxel_spacing = [header.pixdim[1], header.pixdim[2], header.pixdim[3]];

    let declared_type_code = header.datatype;
    let data_type = DataType::from_code(declared_type_code).unwrap_or_else(|| {
        warn!(
            "unsupported datatype code {declared_type_code}, reading payload as float32"
        );
        DataType::F32
    });

    let count = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(depth))
        .ok_or_else(|| ViewerError::Format("volume dimensions overflow".to_string()))?;
    let needed = count
        .checked_mul(data_type.size())
        .ok_or_else(|| ViewerError::Format("volume dimensions overflow".to_string()))?;

    let offset = header.vox_offset.max(NIFTI1_HEADER_SIZE as f32) as usize;
    let payload = data.get(offset..).unwrap_or(&[]);
    if payload.len() < needed {
        return Err(ViewerError::Format(format!(
            "payload holds {} bytes, {width}x{height}x{depth} {} needs {needed}",
            payload.len(),
            data_type.label()
        )));
    }

    let little = is_little_endian(&data);
    let shape = (depth, height, width);
    let voxels = match data_type {
        DataType::U8 => Voxels::U8(to_array(shape, payload[..count].to_vec())?),
        DataType::I16 => Voxels::I16(to_array(
            shape,
            read_elements(payload, count, little, i16::from_le_bytes, i16::from_be_bytes),
        )?),
        DataType::I32 => Voxels::I32(to_array(
            shape,
            read_elements(payload, count, little, i32::from_le_bytes, i32::from_be_bytes),
        )?),
        DataType::F32 => Voxels::F32(to_array(
            shape,
            read_elements(payload, count, little, f32::from_le_bytes, f32::from_be_bytes),
        )?),
        DataType::F64 => Voxels::F64(to_array(
            shape,
            read_elements(payload, count, little, f64::from_le_bytes, f64::from_be_bytes),
        )?),
    };

    debug!(
        "decoded {width}x{height}x{depth} {} volume, spacing {voxel_spacing:?}",
        data_type.label()
    );
    Ok(Volume {
        voxel_spacing,
        declared_type_code,
        voxels,
    })
}
