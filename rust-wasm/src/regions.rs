//! Region definitions from a label volume
//!
//! A region is every voxel carrying one label value. Spatial adjacency plays no
//! part: two disconnected blobs with the same label are a single region.

use ndarray::Array2;

use crate::error::{ReduceError, ReduceResult};

/// Background label
pub const BACKGROUND: f64 = 0.0;

/// Sorted, distinct region labels found in a label volume
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSet {
    labels: Vec<f64>,
}

impl RegionSet {
    /// Collect the distinct labels of `labels` in ascending order
    ///
    /// # Arguments
    /// * `labels` - Label volume (one value per in-mask voxel), whole numbers
    /// * `remove_zero` - Drop the background label
    pub fn from_labels(labels: &[f64], remove_zero: bool) -> ReduceResult<Self> {
        check_labels(labels)?;

        let mut unique: Vec<f64> = labels.iter().map(|&l| l + 0.0).collect();
        unique.sort_by(|a, b| a.total_cmp(b));
        unique.dedup();
        if remove_zero {
            unique.retain(|&l| l != BACKGROUND);
        }

        Ok(Self { labels: unique })
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row index of `label` in region-ordered output
    pub fn index_of(&self, label: f64) -> Option<usize> {
        self.labels.binary_search_by(|l| l.total_cmp(&(label + 0.0))).ok()
    }

    /// Number of voxels in each region, in region order
    pub fn voxel_counts(&self, labels: &[f64]) -> Vec<usize> {
        let mut counts = vec![0usize; self.labels.len()];
        for &l in labels {
            if let Some(r) = self.index_of(l) {
                counts[r] += 1;
            }
        }
        counts
    }
}

/// Labels must be finite whole numbers
fn check_labels(labels: &[f64]) -> ReduceResult<()> {
    if let Some((i, l)) = labels
        .iter()
        .enumerate()
        .find(|(_, l)| !l.is_finite() || l.fract() != 0.0)
    {
        return Err(ReduceError::InvalidArgument(format!(
            "label {} at voxel {} is not a whole number",
            l, i
        )));
    }
    Ok(())
}

/// Build the voxel-to-region averaging projection
///
/// Column `r` holds `1 / n_r` for each voxel of region `r` (n_r = its voxel count)
/// and 0 elsewhere, so `assignment.t().dot(data)` averages `data` within regions.
/// Voxels whose label is not in `regions` get an all-zero row.
///
/// # Returns
/// Matrix of shape (n_voxels, n_regions)
pub fn assignment_matrix(labels: &[f64], regions: &RegionSet) -> Array2<f64> {
    let counts = regions.voxel_counts(labels);
    let mut m = Array2::<f64>::zeros((labels.len(), regions.len()));

    for (v, &l) in labels.iter().enumerate() {
        if let Some(r) = regions.index_of(l) {
            m[[v, r]] = 1.0 / counts[r] as f64;
        }
    }

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_region_set_sorted_unique() {
        let labels = [3.0, 1.0, 0.0, 3.0, 2.0, 1.0];
        let regions = RegionSet::from_labels(&labels, true).unwrap();
        assert_eq!(regions.labels(), &[1.0, 2.0, 3.0]);

        let with_zero = RegionSet::from_labels(&labels, false).unwrap();
        assert_eq!(with_zero.labels(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_negative_zero_is_background() {
        let labels = [-0.0, 0.0, 4.0];
        let regions = RegionSet::from_labels(&labels, false).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions.index_of(-0.0), Some(0));
        assert_eq!(RegionSet::from_labels(&labels, true).unwrap().labels(), &[4.0]);
    }

    #[test]
    fn test_non_integer_labels_rejected() {
        assert!(matches!(
            RegionSet::from_labels(&[1.0, 1.5], true),
            Err(ReduceError::InvalidArgument(_))
        ));
        assert!(RegionSet::from_labels(&[f64::NAN], true).is_err());
        assert!(RegionSet::from_labels(&[f64::INFINITY], true).is_err());
    }

    #[test]
    fn test_index_and_counts() {
        let labels = [5.0, 5.0, 7.0, 0.0, 5.0];
        let regions = RegionSet::from_labels(&labels, true).unwrap();
        assert_eq!(regions.index_of(5.0), Some(0));
        assert_eq!(regions.index_of(7.0), Some(1));
        assert_eq!(regions.index_of(0.0), None);
        assert_eq!(regions.voxel_counts(&labels), vec![3, 1]);
    }

    #[test]
    fn test_assignment_columns_sum_to_one() {
        let labels = [1.0, 1.0, 2.0, 2.0, 0.0, 2.0, 9.0];
        let regions = RegionSet::from_labels(&labels, true).unwrap();
        let m = assignment_matrix(&labels, &regions);

        assert_eq!(m.dim(), (7, 3));
        for col in m.columns() {
            assert_abs_diff_eq!(col.sum(), 1.0, epsilon = 1e-12);
        }
        // Background voxel contributes to nothing
        assert_eq!(m.row(4).sum(), 0.0);
        assert_abs_diff_eq!(m[[2, 1]], 1.0 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn test_non_contiguous_voxels_share_region() {
        // Same label at opposite ends of the volume
        let labels = [8.0, 0.0, 0.0, 0.0, 8.0];
        let regions = RegionSet::from_labels(&labels, true).unwrap();
        assert_eq!(regions.len(), 1);
        let m = assignment_matrix(&labels, &regions);
        assert_eq!(m[[0, 0]], 0.5);
        assert_eq!(m[[4, 0]], 0.5);
    }
}
