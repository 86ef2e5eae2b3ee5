use std::fmt;
use std::str::FromStr;

use nalgebra::Matrix3;

use crate::error::ConfigError;

use super::fit::{self, FitError};
use super::Correspondence;

/// Parametric family of 2-D frame-to-frame motions.
///
/// Every model is represented as a 3×3 homogeneous matrix; the restricted
/// families simply leave some entries fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MotionModel {
    #[serde(rename = "trans")]
    Translation,
    #[serde(rename = "trans&scale")]
    TranslationAndScale,
    #[serde(rename = "rigid")]
    Rigid,
    #[serde(rename = "similarity")]
    Similarity,
    #[serde(rename = "affine")]
    Affine,
    #[serde(rename = "homography")]
    Homography,
}

impl MotionModel {
    pub const ALL: [MotionModel; 6] = [
        MotionModel::Translation,
        MotionModel::TranslationAndScale,
        MotionModel::Rigid,
        MotionModel::Similarity,
        MotionModel::Affine,
        MotionModel::Homography,
    ];

    /// Configuration tag, as accepted by [`FromStr`].
    pub fn tag(self) -> &'static str {
        match self {
            Self::Translation => "trans",
            Self::TranslationAndScale => "trans&scale",
            Self::Rigid => "rigid",
            Self::Similarity => "similarity",
            Self::Affine => "affine",
            Self::Homography => "homography",
        }
    }

    /// Degrees of freedom.
    pub fn dof(self) -> usize {
        match self {
            Self::Translation => 2,
            Self::TranslationAndScale | Self::Rigid => 3,
            Self::Similarity => 4,
            Self::Affine => 6,
            Self::Homography => 8,
        }
    }

    /// Smallest number of correspondences that determines the model.
    pub fn min_subset_size(self) -> usize {
        match self {
            Self::Translation => 1,
            Self::TranslationAndScale | Self::Rigid | Self::Similarity => 2,
            Self::Affine => 3,
            Self::Homography => 4,
        }
    }

    /// Inlier threshold in pixels used when the configuration says "auto".
    pub fn default_inlier_threshold(self) -> f64 {
        match self {
            Self::Homography => 1.0,
            _ => 0.5,
        }
    }

    /// Fit the model to `corrs`: exact for a minimal set, least squares otherwise.
    pub fn fit(self, corrs: &[Correspondence]) -> Result<Matrix3<f64>, FitError> {
        let needed = self.min_subset_size();
        if corrs.len() < needed {
            return Err(FitError::TooFewPoints {
                needed,
                got: corrs.len(),
            });
        }
        match self {
            Self::Translation => fit::fit_translation(corrs),
            Self::TranslationAndScale => fit::fit_translation_scale(corrs),
            Self::Rigid => fit::fit_rigid(corrs),
            Self::Similarity => fit::fit_similarity(corrs),
            Self::Affine => fit::fit_affine(corrs),
            Self::Homography => fit::fit_homography_dlt(corrs),
        }
    }
}

impl fmt::Display for MotionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for MotionModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.tag() == s)
            .ok_or_else(|| ConfigError::UnknownModel(s.to_string()))
    }
}
