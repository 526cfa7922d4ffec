//! Reduction parameters
//!
//! Options can be built in code or deserialized from JSON, e.g.
//! `{"threshold": 0.05, "remove_zero": true}`. Missing fields take their defaults.

use serde::Deserialize;

use crate::error::{ReduceError, ReduceResult};

/// Parameters for region averaging
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReduceOptions {
    /// Binarize the result: regions whose mean is below this fraction become false.
    /// Must lie in [0, 1].
    pub threshold: Option<f64>,
    /// Ignore voxels labelled 0 instead of treating them as a region
    pub remove_zero: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            remove_zero: true,
        }
    }
}

impl ReduceOptions {
    /// Parse options from a JSON object
    pub fn from_json(json: &str) -> ReduceResult<Self> {
        let options: ReduceOptions = serde_json::from_str(json)
            .map_err(|e| ReduceError::InvalidArgument(format!("Bad options JSON: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_remove_zero(mut self, remove_zero: bool) -> Self {
        self.remove_zero = remove_zero;
        self
    }

    pub fn validate(&self) -> ReduceResult<()> {
        if let Some(t) = self.threshold {
            check_threshold(t)?;
        }
        Ok(())
    }
}

/// Thresholds are fractions of active voxels
pub(crate) fn check_threshold(threshold: f64) -> ReduceResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ReduceError::InvalidArgument(format!(
            "threshold must be in [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}
