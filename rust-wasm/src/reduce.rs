//! Dimensionality reduction of voxel data to regions of interest
//!
//! Collapses a voxel x mappable activation matrix into a region x mappable
//! matrix. For binary activation maps each entry is the fraction of active
//! voxels of a region in one mappable (study or statistical map).

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::config::{check_threshold, ReduceOptions};
use crate::dataset::{ActivationSource, LabelMasker};
use crate::error::{ReduceError, ReduceResult};
use crate::nifti_io::LabelImage;
use crate::regions::{assignment_matrix, RegionSet};

/// Per-region means together with the region labels labelling their rows
#[derive(Clone, Debug, PartialEq)]
pub struct RegionMeans {
    regions: RegionSet,
    means: Array2<f64>,
}

impl RegionMeans {
    /// Region labels, one per row of `means`
    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    /// Matrix of shape (n_regions, n_mappables)
    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    pub fn into_means(self) -> Array2<f64> {
        self.means
    }

    /// Mark regions as active in each mappable
    ///
    /// Means below `threshold` are zeroed and the matrix is then cast to bool,
    /// so an entry is true when its mean is at least `threshold` and nonzero.
    pub fn binarize(&self, threshold: f64) -> ReduceResult<Array2<bool>> {
        check_threshold(threshold)?;
        Ok(binarize(&self.means, threshold))
    }
}

fn binarize(means: &Array2<f64>, threshold: f64) -> Array2<bool> {
    means.mapv(|v| if v < threshold { false } else { v != 0.0 })
}

/// Output of a reduction: raw means, or active-region indicators when thresholded
#[derive(Clone, Debug, PartialEq)]
pub enum RegionSummary {
    Means(Array2<f64>),
    Active(Array2<bool>),
}

impl RegionSummary {
    /// (n_regions, n_mappables)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            RegionSummary::Means(m) => m.dim(),
            RegionSummary::Active(a) => a.dim(),
        }
    }

    /// Numeric view for storage; indicators become 1.0 / 0.0
    pub fn to_f64(&self) -> Array2<f64> {
        match self {
            RegionSummary::Means(m) => m.clone(),
            RegionSummary::Active(a) => a.mapv(|b| if b { 1.0 } else { 0.0 }),
        }
    }
}

/// Average activation within each region
///
/// # Arguments
/// * `labels` - Label volume (n_voxels), whole-number region labels
/// * `activation` - Activation matrix (n_voxels x n_mappables)
/// * `remove_zero` - Ignore voxels labelled 0
///
/// # Returns
/// RegionMeans with rows in ascending label order
pub fn compute_region_means(
    labels: &[f64],
    activation: ArrayView2<f64>,
    remove_zero: bool,
) -> ReduceResult<RegionMeans> {
    let (n_voxels, n_mappables) = activation.dim();
    if labels.len() != n_voxels {
        return Err(ReduceError::shape("activation rows", labels.len(), n_voxels));
    }

    let regions = RegionSet::from_labels(labels, remove_zero)?;
    if regions.is_empty() {
        return Err(ReduceError::InvalidArgument(
            "label volume contains no regions".to_string(),
        ));
    }

    debug!(
        n_voxels,
        n_mappables,
        n_regions = regions.len(),
        "averaging within regions"
    );

    // (n_regions x n_voxels) . (n_voxels x n_mappables)
    let assignment = assignment_matrix(labels, &regions);
    let means = assignment.t().dot(&activation);

    Ok(RegionMeans { regions, means })
}

/// Average within regions, binarizing when `options.threshold` is set
///
/// Options are validated before any work is done.
pub fn average_within_regions(
    labels: &[f64],
    activation: ArrayView2<f64>,
    options: &ReduceOptions,
) -> ReduceResult<RegionSummary> {
    options.validate()?;

    let result = compute_region_means(labels, activation, options.remove_zero)?;

    Ok(match options.threshold {
        Some(t) => {
            debug!(threshold = t, "binarizing region means");
            RegionSummary::Active(binarize(result.means(), t))
        }
        None => RegionSummary::Means(result.into_means()),
    })
}

/// Reduce a dataset's activation data using the regions of a label image
///
/// # Arguments
/// * `dataset` - Provides the analysis mask and the activation matrix
/// * `image` - Label image defining the regions
/// * `ids` - Mappables to include (all when None)
/// * `options` - Threshold and background handling
pub fn average_dataset_regions<D>(
    dataset: &D,
    image: &LabelImage,
    ids: Option<&[String]>,
    options: &ReduceOptions,
) -> ReduceResult<RegionSummary>
where
    D: LabelMasker + ActivationSource,
{
    options.validate()?;
    let labels = dataset.mask(image)?;
    let activation = dataset.activation_matrix(ids)?;
    average_within_regions(&labels, activation.view(), options)
}
