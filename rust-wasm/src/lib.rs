//! ROI-WASM: region-of-interest reduction of voxel activation maps
//!
//! Collapses voxel x mappable activation data (one column per study or
//! statistical map) into region x mappable summaries using a label image that
//! partitions the brain into regions. Compiled to WebAssembly for browser-based
//! meta-analysis, and usable as a plain Rust library.
//!
//! # Modules
//! - `reduce`: Region averaging and binarization
//! - `regions`: Region sets and the voxel-to-region assignment matrix
//! - `dataset`: Mask / activation / storage collaborators and an in-memory dataset
//! - `nifti_io`: Label image and mask decoding from NIfTI bytes
//! - `config`: Reduction options
//! - `error`: Error types

pub mod config;
pub mod dataset;
pub mod error;
pub mod nifti_io;
pub mod reduce;
pub mod regions;

pub use config::ReduceOptions;
pub use dataset::{ActivationSource, ActivationStore, Dataset, ImageTable, LabelMasker, MaskVolume};
pub use error::{ReduceError, ReduceResult};
pub use nifti_io::LabelImage;
pub use reduce::{average_dataset_regions, average_within_regions, compute_region_means, RegionMeans, RegionSummary};
pub use regions::{assignment_matrix, RegionSet};

use ndarray::Array2;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

#[allow(unused_macros)]
macro_rules! console_log {
    ($($t:tt)*) => (log(&format_args!($($t)*).to_string()))
}

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn to_js(e: ReduceError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Interpret a flat row-major buffer as (n_voxels x n_mappables)
fn activation_from_flat(
    activation: &[f64],
    n_voxels: usize,
    n_mappables: usize,
) -> Result<Array2<f64>, ReduceError> {
    let expected = n_voxels.checked_mul(n_mappables).ok_or_else(|| {
        ReduceError::InvalidArgument(format!(
            "{} voxels x {} mappables overflows the address space",
            n_voxels, n_mappables
        ))
    })?;
    if activation.len() != expected {
        return Err(ReduceError::shape("activation values", expected, activation.len()));
    }
    Array2::from_shape_vec((n_voxels, n_mappables), activation.to_vec())
        .map_err(|e| ReduceError::InvalidArgument(e.to_string()))
}

fn summary_to_flat(summary: RegionSummary) -> Vec<f64> {
    summary.to_f64().iter().copied().collect()
}

// ============================================================================
// WASM Exports: Region Reduction
// ============================================================================

/// Average activation within each region
///
/// # Arguments
/// * `labels` - Label volume, one whole-number label per in-mask voxel
/// * `activation` - Activation matrix (n_voxels * n_mappables), row-major
/// * `n_mappables` - Number of columns in `activation`
/// * `threshold` - Optional fraction in [0, 1]; when given the result is binarized
/// * `remove_zero` - Ignore voxels labelled 0
///
/// # Returns
/// Region x mappable matrix (n_regions * n_mappables), row-major, regions in
/// ascending label order. Binarized results are 1.0 / 0.0.
#[wasm_bindgen]
pub fn average_within_regions_wasm(
    labels: &[f64],
    activation: &[f64],
    n_mappables: usize,
    threshold: Option<f64>,
    remove_zero: bool,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM average_within_regions: {} voxels x {} mappables, thr={:?}",
                 labels.len(), n_mappables, threshold);

    let options = ReduceOptions { threshold, remove_zero };
    let data = activation_from_flat(activation, labels.len(), n_mappables).map_err(to_js)?;
    let summary = reduce::average_within_regions(labels, data.view(), &options).map_err(to_js)?;

    let (n_regions, _) = summary.dim();
    console_log!("WASM average_within_regions complete: {} regions", n_regions);
    Ok(summary_to_flat(summary))
}

/// Average within regions with options given as JSON
///
/// `options_json` is an object such as `{"threshold": 0.05, "remove_zero": true}`;
/// missing fields take their defaults.
#[wasm_bindgen]
pub fn average_within_regions_json_wasm(
    labels: &[f64],
    activation: &[f64],
    n_mappables: usize,
    options_json: &str,
) -> Result<Vec<f64>, JsValue> {
    let options = ReduceOptions::from_json(options_json).map_err(to_js)?;
    average_within_regions_wasm(labels, activation, n_mappables, options.threshold, options.remove_zero)
}

/// Sorted region labels of a label volume (the row order of reduced matrices)
#[wasm_bindgen]
pub fn region_labels_wasm(labels: &[f64], remove_zero: bool) -> Result<Vec<f64>, JsValue> {
    let regions = RegionSet::from_labels(labels, remove_zero).map_err(to_js)?;
    console_log!("WASM region_labels: {} regions", regions.len());
    Ok(regions.labels().to_vec())
}

/// Restrict a label image to the voxels of an analysis mask
///
/// # Arguments
/// * `label_bytes` - Label image as .nii or .nii.gz bytes
/// * `mask_bytes` - Mask image with the same dimensions
///
/// # Returns
/// Label volume (one label per in-mask voxel, Fortran order)
#[wasm_bindgen]
pub fn mask_label_image_wasm(label_bytes: &[u8], mask_bytes: &[u8]) -> Result<Vec<f64>, JsValue> {
    let image = nifti_io::load_label_image(label_bytes).map_err(to_js)?;
    let mask = nifti_io::load_mask(mask_bytes).map_err(to_js)?;
    let labels = mask.mask(&image).map_err(to_js)?;

    console_log!("WASM mask_label_image: {}x{}x{} -> {} voxels",
                 image.dims.0, image.dims.1, image.dims.2, labels.len());
    Ok(labels)
}

// ============================================================================
// WASM Exports: NIfTI I/O
// ============================================================================

/// Load a label image from bytes
///
/// Returns a JS object with: data (Float64Array), dims (array), voxelSize (array), affine (array)
#[wasm_bindgen]
pub fn load_label_image_wasm(bytes: &[u8]) -> Result<js_sys::Object, JsValue> {
    let image = nifti_io::load_label_image(bytes).map_err(to_js)?;

    let result = js_sys::Object::new();

    let data = js_sys::Float64Array::from(image.data.as_slice());
    js_sys::Reflect::set(&result, &"data".into(), &data)?;

    let dims = js_sys::Array::new();
    dims.push(&JsValue::from(image.dims.0 as u32));
    dims.push(&JsValue::from(image.dims.1 as u32));
    dims.push(&JsValue::from(image.dims.2 as u32));
    js_sys::Reflect::set(&result, &"dims".into(), &dims)?;

    let voxel_size = js_sys::Array::new();
    voxel_size.push(&JsValue::from(image.voxel_size.0));
    voxel_size.push(&JsValue::from(image.voxel_size.1));
    voxel_size.push(&JsValue::from(image.voxel_size.2));
    js_sys::Reflect::set(&result, &"voxelSize".into(), &voxel_size)?;

    let affine = js_sys::Float64Array::from(image.affine.as_slice());
    js_sys::Reflect::set(&result, &"affine".into(), &affine)?;

    console_log!("WASM load_label_image: {}x{}x{}, voxel=({:.2},{:.2},{:.2})",
                 image.dims.0, image.dims.1, image.dims.2,
                 image.voxel_size.0, image.voxel_size.1, image.voxel_size.2);

    Ok(result)
}

// ============================================================================
// WASM Exports: Utilities
// ============================================================================

/// Check if WASM module is loaded and working
#[wasm_bindgen]
pub fn wasm_health_check() -> bool {
    console_log!("ROI-WASM module loaded successfully!");
    true
}

/// Get version string
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
