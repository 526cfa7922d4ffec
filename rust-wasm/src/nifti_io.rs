//! NIfTI label image decoding
//!
//! Loads label images (atlases, parcellations) and analysis masks from byte
//! arrays, suitable for WebAssembly where filesystem access is not available.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};
use tracing::debug;

use crate::dataset::MaskVolume;
use crate::error::{ReduceError, ReduceResult};

/// 3D image whose voxel values are region labels
#[derive(Clone, Debug, PartialEq)]
pub struct LabelImage {
    /// Labels in Fortran order (index = x + y*nx + z*nx*ny)
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl LabelImage {
    /// Wrap in-memory labels with unit voxels and an identity affine
    pub fn new(data: Vec<f64>, dims: (usize, usize, usize)) -> ReduceResult<Self> {
        let n_total = grid_len(dims)?;
        if data.len() != n_total {
            return Err(ReduceError::shape("label image voxels", n_total, data.len()));
        }
        Ok(Self {
            data,
            dims,
            voxel_size: (1.0, 1.0, 1.0),
            affine: scaling_affine((1.0, 1.0, 1.0)),
        })
    }
}

/// Voxel count of an (nx, ny, nz) grid, rejecting sizes that overflow
pub(crate) fn grid_len(dims: (usize, usize, usize)) -> ReduceResult<usize> {
    let (nx, ny, nz) = dims;
    nx.checked_mul(ny)
        .and_then(|n| n.checked_mul(nz))
        .ok_or_else(|| {
            ReduceError::InvalidArgument(format!("grid {}x{}x{} is too large", nx, ny, nz))
        })
}

/// Header affines are stored as f32, so grids are compared with this tolerance (mm)
const AFFINE_TOLERANCE: f64 = 1e-4;

/// Whether two voxel-to-world affines describe the same sampling grid
pub(crate) fn same_grid(a: &[f64; 16], b: &[f64; 16]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= AFFINE_TOLERANCE)
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Header summary for error messages
fn header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("File too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn read_object(bytes: &[u8]) -> ReduceResult<InMemNiftiObject> {
    if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = match GzDecoder::new(Cursor::new(bytes)).read_to_end(&mut decompressed) {
                Ok(_) => header_info(&decompressed),
                Err(_) => "Could not decompress".to_string(),
            };
            ReduceError::Nifti(format!("Failed to read gzipped NIfTI: {} ({})", e, info))
        })
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(|e| {
            ReduceError::Nifti(format!("Failed to read NIfTI: {} ({})", e, header_info(bytes)))
        })
    }
}

/// Load a label image from .nii or .nii.gz bytes
///
/// Only the first volume of a 4D image is used.
pub fn load_label_image(bytes: &[u8]) -> ReduceResult<LabelImage> {
    let obj = read_object(bytes)?;
    let header = obj.header();

    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(ReduceError::Nifti(format!(
            "Expected at least 3D volume, got {}D",
            ndim
        )));
    }

    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| ReduceError::Nifti(format!("Failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(ReduceError::Nifti(format!(
            "Expected at least 3D array, got {}D",
            shape.len()
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    // Fortran order, x fastest
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(v);
            }
        }
    }

    debug!(nx, ny, nz, "loaded label image");

    Ok(LabelImage {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Load an analysis mask from .nii or .nii.gz bytes; nonzero voxels are inside
///
/// The mask keeps the image affine, so label images sampled on another grid
/// are rejected when masked.
pub fn load_mask(bytes: &[u8]) -> ReduceResult<MaskVolume> {
    let image = load_label_image(bytes)?;
    let mask = image.data.iter().map(|&v| u8::from(v != 0.0)).collect();
    Ok(MaskVolume::from_mask(mask, image.dims)?.with_affine(image.affine))
}

/// Diagonal voxel-to-world affine for voxel sizes in mm
fn scaling_affine(voxel_size: (f64, f64, f64)) -> [f64; 16] {
    let (vsx, vsy, vsz) = voxel_size;
    [
        vsx, 0.0, 0.0, 0.0,
        0.0, vsy, 0.0, 0.0,
        0.0, 0.0, vsz, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Voxel-to-world affine of a label image
///
/// Atlases are usually distributed with an sform placing them in template
/// space (e.g. MNI); without one only the voxel scaling is known.
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code <= 0 {
        return scaling_affine((
            header.pixdim[1] as f64,
            header.pixdim[2] as f64,
            header.pixdim[3] as f64,
        ));
    }

    let mut affine = [0.0; 16];
    affine[15] = 1.0;
    for (r, row) in [header.srow_x, header.srow_y, header.srow_z].iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            affine[r * 4 + c] = v as f64;
        }
    }
    affine
}
