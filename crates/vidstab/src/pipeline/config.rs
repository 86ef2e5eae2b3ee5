//! Pipeline configuration and the string option table.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::compositor::BorderMode;
use crate::error::ConfigError;
use crate::features::KeypointTrackerConfig;
use crate::motion::{MotionModel, RobustFitParams};
use crate::stabilizer::TrimPolicy;

/// Which stabilizer drives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StabilizationMode {
    /// Causal, frame-by-frame.
    OnePass,
    /// Whole-clip analysis before output.
    #[default]
    TwoPass,
}

impl fmt::Display for StabilizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OnePass => "one-pass",
            Self::TwoPass => "two-pass",
        })
    }
}

impl FromStr for StabilizationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one-pass" => Ok(Self::OnePass),
            "two-pass" => Ok(Self::TwoPass),
            other => Err(ConfigError::InvalidValue {
                key: "mode".to_string(),
                value: other.to_string(),
                reason: "expected one-pass or two-pass".to_string(),
            }),
        }
    }
}

/// Model, RANSAC and keypoint settings for one motion estimator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub model: MotionModel,
    pub ransac: RobustFitParams,
    pub keypoints: KeypointTrackerConfig,
    /// Drop locally inconsistent correspondences before the global fit.
    pub local_outlier_rejection: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            model: MotionModel::Affine,
            // Subset resolves to the model minimum.
            ransac: RobustFitParams {
                subset_size: None,
                inlier_threshold: Some(5.0),
                ..Default::default()
            },
            keypoints: KeypointTrackerConfig::default(),
            local_outlier_rejection: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WobbleConfig {
    pub enabled: bool,
    /// Keyframe spacing in frames.
    pub period: usize,
    pub estimator: EstimatorConfig,
}

impl Default for WobbleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 30,
            estimator: EstimatorConfig {
                model: MotionModel::Homography,
                ransac: RobustFitParams::default(),
                keypoints: KeypointTrackerConfig::default(),
                local_outlier_rejection: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeblurConfig {
    pub enabled: bool,
    /// Spatial radius in pixels; the unsharp-mask sigma is a third of it.
    pub radius: u32,
    pub sensitivity: f64,
}

impl Default for DeblurConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 15,
            sensitivity: 0.1,
        }
    }
}

/// Complete pipeline configuration.
///
/// Build it programmatically or from `key=value` options with
/// [`StabilizeConfig::from_options`]; the pipeline calls
/// [`StabilizeConfig::validate`] before reading any frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StabilizeConfig {
    pub mode: StabilizationMode,
    /// Smoothing radius in frames.
    pub radius: usize,
    pub trim: TrimPolicy,
    /// Limit corrections so the trimmed rectangle stays inside the frame.
    pub correction_for_inclusion: bool,
    pub border: BorderMode,
    pub estimator: EstimatorConfig,
    pub wobble: WobbleConfig,
    pub deblur: DeblurConfig,
    /// Output location; `None` disables file output.
    pub output: Option<PathBuf>,
    /// Output frame rate; `None` follows the source.
    pub output_fps: Option<f64>,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            mode: StabilizationMode::TwoPass,
            radius: 15,
            trim: TrimPolicy::default(),
            correction_for_inclusion: false,
            border: BorderMode::Replicate,
            estimator: EstimatorConfig::default(),
            wobble: WobbleConfig::default(),
            deblur: DeblurConfig::default(),
            output: Some(PathBuf::from("stabilized")),
            output_fps: None,
        }
    }
}

/// Accepted option keys, in table order.
pub const OPTION_KEYS: &[&str] = &[
    "deblur",
    "radius",
    "deblur-sens",
    "wobble-suppress",
    "ws-period",
    "ws-model",
    "ws-subset",
    "ws-thresh",
    "ws-outlier-ratio",
    "ws-min-inlier-ratio",
    "ws-nkps",
    "ws-local-outlier-rejection",
    "output",
    "mode",
    "stab-radius",
    "model",
    "subset",
    "thresh",
    "outlier-ratio",
    "min-inlier-ratio",
    "nkps",
    "local-outlier-rejection",
    "trim-ratio",
    "est-trim",
    "incl-constr",
    "border-mode",
    "output-fps",
];

// ── Value parsing ──────────────────────────────────────────────────────────

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value, "expected yes or no")),
    }
}

fn parse_num<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_auto<T>(key: &str, value: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if value == "auto" {
        Ok(None)
    } else {
        parse_num(key, value).map(Some)
    }
}

fn parse_border(key: &str, value: &str) -> Result<BorderMode, ConfigError> {
    match value {
        "replicate" => Ok(BorderMode::Replicate),
        "const" | "constant" => Ok(BorderMode::Constant([0, 0, 0])),
        _ => Err(invalid(key, value, "expected replicate or const")),
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected: "> 0",
        })
    }
}

fn at_least_one(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value as f64,
            expected: ">= 1",
        })
    }
}

impl StabilizeConfig {
    /// Defaults overridden by `(key, value)` options.
    ///
    /// Unknown keys and unparsable values fail immediately; range and
    /// consistency checks are left to [`StabilizeConfig::validate`].
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (k, v) in options {
            config.set_option(k.as_ref(), v.as_ref())?;
        }
        Ok(config)
    }

    /// Apply one option from the table.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "deblur" => self.deblur.enabled = parse_flag(key, value)?,
            "radius" => self.deblur.radius = parse_num(key, value)?,
            "deblur-sens" => self.deblur.sensitivity = parse_num(key, value)?,
            "wobble-suppress" => self.wobble.enabled = parse_flag(key, value)?,
            "ws-period" => self.wobble.period = parse_num(key, value)?,
            "ws-model" => self.wobble.estimator.model = value.parse()?,
            "ws-subset" => self.wobble.estimator.ransac.subset_size = parse_auto(key, value)?,
            "ws-thresh" => self.wobble.estimator.ransac.inlier_threshold = parse_auto(key, value)?,
            "ws-outlier-ratio" => {
                self.wobble.estimator.ransac.max_outlier_ratio = parse_num(key, value)?
            }
            "ws-min-inlier-ratio" => {
                self.wobble.estimator.ransac.min_inlier_ratio = parse_num(key, value)?
            }
            "ws-nkps" => self.wobble.estimator.keypoints.max_keypoints = parse_num(key, value)?,
            "ws-local-outlier-rejection" => {
                self.wobble.estimator.local_outlier_rejection = parse_flag(key, value)?
            }
            "output" => {
                self.output = match value {
                    "no" => None,
                    "" => return Err(invalid(key, value, "empty path")),
                    path => Some(PathBuf::from(path)),
                }
            }
            "mode" => self.mode = value.parse()?,
            "stab-radius" => self.radius = parse_num(key, value)?,
            "model" => self.estimator.model = value.parse()?,
            "subset" => self.estimator.ransac.subset_size = parse_auto(key, value)?,
            "thresh" => self.estimator.ransac.inlier_threshold = parse_auto(key, value)?,
            "outlier-ratio" => self.estimator.ransac.max_outlier_ratio = parse_num(key, value)?,
            "min-inlier-ratio" => {
                self.estimator.ransac.min_inlier_ratio = parse_num(key, value)?
            }
            "nkps" => self.estimator.keypoints.max_keypoints = parse_num(key, value)?,
            "local-outlier-rejection" => {
                self.estimator.local_outlier_rejection = parse_flag(key, value)?
            }
            "trim-ratio" => self.trim.ratio = parse_num(key, value)?,
            "est-trim" => self.trim.estimate_automatically = parse_flag(key, value)?,
            "incl-constr" => self.correction_for_inclusion = parse_flag(key, value)?,
            "border-mode" => self.border = parse_border(key, value)?,
            "output-fps" => self.output_fps = parse_auto(key, value)?,
            other => return Err(ConfigError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("stab_radius", self.radius)?;
        self.trim.validate()?;
        self.estimator.ransac.resolve(self.estimator.model)?;
        at_least_one("nkps", self.estimator.keypoints.max_keypoints)?;

        if self.wobble.enabled {
            if self.mode != StabilizationMode::TwoPass {
                return Err(ConfigError::WobbleRequiresTwoPass);
            }
            at_least_one("ws_period", self.wobble.period)?;
            let ws = &self.wobble.estimator;
            ws.ransac.resolve(ws.model)?;
            at_least_one("ws_nkps", ws.keypoints.max_keypoints)?;
        }

        if self.deblur.enabled {
            at_least_one("deblur_radius", self.deblur.radius as usize)?;
            if !(self.deblur.sensitivity.is_finite() && self.deblur.sensitivity >= 0.0) {
                return Err(ConfigError::OutOfRange {
                    name: "deblur_sens",
                    value: self.deblur.sensitivity,
                    expected: ">= 0",
                });
            }
        }

        if let Some(fps) = self.output_fps {
            positive("output_fps", fps)?;
        }
        Ok(())
    }
}
