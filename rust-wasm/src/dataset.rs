//! Dataset collaborators for ROI reduction
//!
//! The reduction only needs three capabilities from a dataset: masking a label
//! image down to the analysis voxels, producing the voxel x mappable activation
//! matrix, and optionally storing a reduced matrix back. They are expressed as
//! traits so other storage layouts can plug in; `Dataset` is the in-memory
//! implementation.

use ndarray::{Array2, Axis};
use tracing::{debug, info};

use crate::config::ReduceOptions;
use crate::error::{ReduceError, ReduceResult};
use crate::nifti_io::{grid_len, same_grid, LabelImage};
use crate::reduce::{compute_region_means, RegionSummary};
use crate::regions::RegionSet;

/// Converts a label image into a label volume over the analysis mask
pub trait LabelMasker {
    /// Labels of the in-mask voxels, in Fortran order
    fn mask(&self, image: &LabelImage) -> ReduceResult<Vec<f64>>;
}

/// Supplies the dense voxel x mappable activation matrix
pub trait ActivationSource {
    /// Columns follow `ids` when given, otherwise every mappable in storage order
    fn activation_matrix(&self, ids: Option<&[String]>) -> ReduceResult<Array2<f64>>;
}

/// Accepts a matrix in place of the stored activation matrix
pub trait ActivationStore {
    fn store(&mut self, matrix: Array2<f64>) -> ReduceResult<()>;
}

/// Binary analysis mask over a 3D grid
#[derive(Clone, Debug)]
pub struct MaskVolume {
    mask: Vec<u8>,
    dims: (usize, usize, usize),
    n_voxels: usize,
    affine: Option<[f64; 16]>,
}

impl MaskVolume {
    /// # Arguments
    /// * `mask` - Binary mask (nx * ny * nz), nonzero = inside
    /// * `dims` - (nx, ny, nz)
    pub fn from_mask(mask: Vec<u8>, dims: (usize, usize, usize)) -> ReduceResult<Self> {
        let n_total = grid_len(dims)?;
        if mask.len() != n_total {
            return Err(ReduceError::shape("mask voxels", n_total, mask.len()));
        }
        let n_voxels = mask.iter().filter(|&&m| m != 0).count();
        Ok(Self { mask, dims, n_voxels, affine: None })
    }

    /// Require label images to share this voxel-to-world affine
    pub fn with_affine(mut self, affine: [f64; 16]) -> Self {
        self.affine = Some(affine);
        self
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Number of in-mask voxels
    pub fn n_voxels(&self) -> usize {
        self.n_voxels
    }
}

impl LabelMasker for MaskVolume {
    fn mask(&self, image: &LabelImage) -> ReduceResult<Vec<f64>> {
        let axes = [
            ("label image nx", self.dims.0, image.dims.0),
            ("label image ny", self.dims.1, image.dims.1),
            ("label image nz", self.dims.2, image.dims.2),
        ];
        for (what, expected, actual) in axes {
            if expected != actual {
                return Err(ReduceError::shape(what, expected, actual));
            }
        }
        if image.data.len() != self.mask.len() {
            return Err(ReduceError::shape(
                "label image voxels",
                self.mask.len(),
                image.data.len(),
            ));
        }
        if let Some(affine) = &self.affine {
            if !same_grid(affine, &image.affine) {
                return Err(ReduceError::InvalidArgument(
                    "label image and mask are sampled on different grids".to_string(),
                ));
            }
        }

        let labels: Vec<f64> = image
            .data
            .iter()
            .zip(&self.mask)
            .filter(|(_, &m)| m != 0)
            .map(|(&l, _)| l)
            .collect();

        debug!(n_voxels = labels.len(), "masked label image");
        Ok(labels)
    }
}

/// Activation matrix with the ids of its mappables
#[derive(Clone, Debug)]
pub struct ImageTable {
    ids: Vec<String>,
    data: Array2<f64>,
}

impl ImageTable {
    /// # Arguments
    /// * `ids` - One unique id per column
    /// * `data` - Activation matrix (n_voxels x n_mappables)
    pub fn new(ids: Vec<String>, data: Array2<f64>) -> ReduceResult<Self> {
        if data.ncols() != ids.len() {
            return Err(ReduceError::shape("mappable columns", ids.len(), data.ncols()));
        }
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                return Err(ReduceError::InvalidArgument(format!(
                    "duplicate mappable id {}",
                    id
                )));
            }
        }
        Ok(Self { ids, data })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    fn column_of(&self, id: &str) -> ReduceResult<usize> {
        self.ids
            .iter()
            .position(|i| i == id)
            .ok_or_else(|| ReduceError::UnknownMappable(id.to_string()))
    }
}

impl ActivationSource for ImageTable {
    fn activation_matrix(&self, ids: Option<&[String]>) -> ReduceResult<Array2<f64>> {
        match ids {
            None => Ok(self.data.clone()),
            Some(ids) => {
                let columns = ids
                    .iter()
                    .map(|id| self.column_of(id))
                    .collect::<ReduceResult<Vec<_>>>()?;
                Ok(self.data.select(Axis(1), &columns))
            }
        }
    }
}

impl ActivationStore for ImageTable {
    fn store(&mut self, matrix: Array2<f64>) -> ReduceResult<()> {
        if matrix.ncols() != self.ids.len() {
            return Err(ReduceError::shape("mappable columns", self.ids.len(), matrix.ncols()));
        }
        self.data = matrix;
        Ok(())
    }
}

/// Analysis mask plus the activation data defined over it
#[derive(Clone, Debug)]
pub struct Dataset {
    volume: MaskVolume,
    table: ImageTable,
    /// Row labels once the voxel rows have been replaced by region rows
    row_regions: Option<RegionSet>,
}

impl Dataset {
    pub fn new(volume: MaskVolume, table: ImageTable) -> ReduceResult<Self> {
        if table.n_rows() != volume.n_voxels() {
            return Err(ReduceError::shape(
                "activation rows",
                volume.n_voxels(),
                table.n_rows(),
            ));
        }
        Ok(Self {
            volume,
            table,
            row_regions: None,
        })
    }

    pub fn volume(&self) -> &MaskVolume {
        &self.volume
    }

    pub fn table(&self) -> &ImageTable {
        &self.table
    }

    /// Regions labelling the table rows after `replace_with_region_averages`
    pub fn row_regions(&self) -> Option<&RegionSet> {
        self.row_regions.as_ref()
    }

    /// Whether the table rows still correspond to the in-mask voxels
    pub fn has_voxel_rows(&self) -> bool {
        self.table.n_rows() == self.volume.n_voxels() && self.row_regions.is_none()
    }

    /// Replace the voxel activation matrix with its region averages
    ///
    /// Thresholded results are stored as 1.0 / 0.0. Nothing is modified when
    /// the reduction fails.
    ///
    /// Afterwards the table holds one row per region (see `row_regions`) and
    /// the dataset no longer masks label images: `mask` and therefore
    /// `average_dataset_regions` return `InvalidArgument` until voxel data is
    /// stored again.
    ///
    /// # Returns
    /// The regions labelling the rows of the stored matrix
    pub fn replace_with_region_averages(
        &mut self,
        image: &LabelImage,
        options: &ReduceOptions,
    ) -> ReduceResult<RegionSet> {
        options.validate()?;
        let labels = self.mask(image)?;
        let result = compute_region_means(&labels, self.table.data.view(), options.remove_zero)?;

        let summary = match options.threshold {
            Some(t) => RegionSummary::Active(result.binarize(t)?),
            None => RegionSummary::Means(result.means().clone()),
        };
        let (n_regions, n_mappables) = summary.dim();
        self.table.store(summary.to_f64())?;
        self.row_regions = Some(result.regions().clone());
        info!(n_regions, n_mappables, "replaced voxel data with region averages");

        Ok(result.regions().clone())
    }
}

impl LabelMasker for Dataset {
    fn mask(&self, image: &LabelImage) -> ReduceResult<Vec<f64>> {
        if !self.has_voxel_rows() {
            return Err(ReduceError::InvalidArgument(
                "dataset rows are no longer voxels; cannot mask a label image".to_string(),
            ));
        }
        self.volume.mask(image)
    }
}

impl ActivationSource for Dataset {
    fn activation_matrix(&self, ids: Option<&[String]>) -> ReduceResult<Array2<f64>> {
        self.table.activation_matrix(ids)
    }
}

impl ActivationStore for Dataset {
    /// Rows of an externally stored matrix are unlabelled; storing one with a
    /// row per in-mask voxel restores voxel data
    fn store(&mut self, matrix: Array2<f64>) -> ReduceResult<()> {
        self.table.store(matrix)?;
        self.row_regions = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::{average_dataset_regions, RegionSummary};
    use ndarray::array;

    /// 3x2x1 grid, last voxel outside the mask
    fn dataset() -> Dataset {
        let volume = MaskVolume::from_mask(vec![1, 1, 1, 1, 1, 0], (3, 2, 1)).unwrap();
        let table = ImageTable::new(
            vec!["study_a".to_string(), "study_b".to_string()],
            array![[1.0, 0.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [5.0, 1.0]],
        )
        .unwrap();
        Dataset::new(volume, table).unwrap()
    }

    fn label_image() -> LabelImage {
        LabelImage::new(vec![1.0, 1.0, 2.0, 2.0, 0.0, 3.0], (3, 2, 1)).unwrap()
    }

    #[test]
    fn test_mask_skips_outside_voxels() {
        let ds = dataset();
        assert_eq!(ds.volume().n_voxels(), 5);
        // Label 3 lies outside the mask
        assert_eq!(ds.mask(&label_image()).unwrap(), vec![1.0, 1.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_mask_dims_mismatch() {
        let ds = dataset();
        let image = LabelImage::new(vec![0.0; 6], (2, 3, 1)).unwrap();
        assert_eq!(
            ds.mask(&image),
            Err(ReduceError::shape("label image nx", 3, 2))
        );
    }

    #[test]
    fn test_mask_length_checked() {
        assert!(MaskVolume::from_mask(vec![1; 5], (3, 2, 1)).is_err());
        assert!(matches!(
            MaskVolume::from_mask(Vec::new(), (usize::MAX / 2 + 1, 2, 1)),
            Err(ReduceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mask_rejects_short_label_data() {
        let ds = dataset();
        // Public fields allow dims that disagree with the data length
        let image = LabelImage {
            data: vec![1.0; 4],
            ..label_image()
        };
        assert_eq!(
            ds.mask(&image),
            Err(ReduceError::shape("label image voxels", 6, 4))
        );
    }

    #[test]
    fn test_mask_checks_affine_when_known() {
        let volume = MaskVolume::from_mask(vec![1, 1, 1, 1, 1, 0], (3, 2, 1)).unwrap();
        let image = label_image();
        assert!(volume.clone().with_affine(image.affine).mask(&image).is_ok());

        let mut shifted = image.affine;
        shifted[3] = 12.0;
        assert!(matches!(
            volume.with_affine(shifted).mask(&image),
            Err(ReduceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_select_mappables() {
        let ds = dataset();
        let ids = vec!["study_b".to_string()];
        let m = ds.activation_matrix(Some(&ids)).unwrap();
        assert_eq!(m, array![[0.0], [0.0], [1.0], [0.0], [1.0]]);

        let all = ds.activation_matrix(None).unwrap();
        assert_eq!(all.dim(), (5, 2));

        let unknown = vec!["missing".to_string()];
        assert_eq!(
            ds.activation_matrix(Some(&unknown)),
            Err(ReduceError::UnknownMappable("missing".to_string()))
        );
    }

    #[test]
    fn test_table_validation() {
        let ids = vec!["a".to_string(), "a".to_string()];
        assert!(matches!(
            ImageTable::new(ids, Array2::zeros((3, 2))),
            Err(ReduceError::InvalidArgument(_))
        ));
        assert!(ImageTable::new(vec!["a".to_string()], Array2::zeros((3, 2))).is_err());

        let volume = MaskVolume::from_mask(vec![1, 0], (2, 1, 1)).unwrap();
        let table = ImageTable::new(vec!["a".to_string()], Array2::zeros((2, 1))).unwrap();
        assert!(Dataset::new(volume, table).is_err());
    }

    #[test]
    fn test_average_dataset_regions() {
        let ds = dataset();
        let result =
            average_dataset_regions(&ds, &label_image(), None, &ReduceOptions::default()).unwrap();
        assert_eq!(result, RegionSummary::Means(array![[0.5, 0.0], [1.0, 0.5]]));

        let ids = vec!["study_a".to_string()];
        let opts = ReduceOptions::default().with_threshold(0.6);
        let result = average_dataset_regions(&ds, &label_image(), Some(&ids), &opts).unwrap();
        assert_eq!(result, RegionSummary::Active(array![[false], [true]]));
    }

    #[test]
    fn test_replace_with_region_averages() {
        let mut ds = dataset();
        let opts = ReduceOptions::default().with_remove_zero(false);
        let regions = ds.replace_with_region_averages(&label_image(), &opts).unwrap();

        assert_eq!(regions.labels(), &[0.0, 1.0, 2.0]);
        assert_eq!(ds.table().data(), &array![[5.0, 1.0], [0.5, 0.0], [1.0, 0.5]]);
        assert_eq!(ds.table().ids(), &["study_a".to_string(), "study_b".to_string()]);
        assert_eq!(ds.row_regions(), Some(&regions));
    }

    #[test]
    fn test_replace_thresholded() {
        let mut ds = dataset();
        let opts = ReduceOptions::default().with_threshold(0.6);
        let regions = ds.replace_with_region_averages(&label_image(), &opts).unwrap();
        assert_eq!(regions.labels(), &[1.0, 2.0]);
        assert_eq!(ds.table().data(), &array![[0.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_region_rows_stop_masking() {
        let mut ds = dataset();
        assert!(ds.has_voxel_rows());
        ds.replace_with_region_averages(&label_image(), &ReduceOptions::default())
            .unwrap();
        assert!(!ds.has_voxel_rows());

        assert!(matches!(
            average_dataset_regions(&ds, &label_image(), None, &ReduceOptions::default()),
            Err(ReduceError::InvalidArgument(_))
        ));
        assert!(ds
            .replace_with_region_averages(&label_image(), &ReduceOptions::default())
            .is_err());

        // Storing voxel data again restores masking
        ds.store(Array2::ones((5, 2))).unwrap();
        assert!(ds.has_voxel_rows());
        assert_eq!(ds.row_regions(), None);
        assert!(average_dataset_regions(&ds, &label_image(), None, &ReduceOptions::default()).is_ok());
    }

    #[test]
    fn test_replace_is_atomic_on_error() {
        let mut ds = dataset();
        let before = ds.table().data().clone();

        let opts = ReduceOptions::default().with_threshold(3.0);
        assert!(ds.replace_with_region_averages(&label_image(), &opts).is_err());
        assert_eq!(ds.table().data(), &before);

        let bad = LabelImage::new(vec![1.5; 6], (3, 2, 1)).unwrap();
        assert!(ds
            .replace_with_region_averages(&bad, &ReduceOptions::default())
            .is_err());
        assert_eq!(ds.table().data(), &before);
    }

    #[test]
    fn test_store_checks_columns() {
        let mut ds = dataset();
        assert!(ds.store(Array2::zeros((2, 3))).is_err());
        ds.store(Array2::zeros((2, 2))).unwrap();
        assert_eq!(ds.table().n_rows(), 2);
    }
}
