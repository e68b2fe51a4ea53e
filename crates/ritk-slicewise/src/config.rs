//! Registration parameters and the closed option enums behind them.
//!
//! Every option is validated once, while parsing, so that a bad value stops
//! the run before any input is staged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlicewiseError};

/// Slice-wise registration algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Translation,
    Rigid,
    Affine,
    Syn,
    BSplineSyn,
    /// Align centers of mass only.
    CenterMass,
    /// Align centers of mass and rotate by the estimated slice angle.
    CenterMassRot,
    /// Two-pass per-column scaling of binary masks.
    Columnwise,
}

impl Algorithm {
    /// Whether slices are handed to a registration engine.
    pub fn uses_engine(self) -> bool {
        matches!(self, Self::Translation | Self::Rigid | Self::Affine | Self::Syn | Self::BSplineSyn)
    }

    /// Family-specific engine parameters appended after the gradient step.
    pub fn transform_parameters(self) -> &'static str {
        match self {
            Self::Syn => "3,0",
            Self::BSplineSyn => "1,3",
            _ => "",
        }
    }

    /// Transform name as understood by the registration engine.
    pub fn engine_name(self) -> &'static str {
        match self {
            Self::Translation => "Translation",
            Self::Rigid => "Rigid",
            Self::Affine => "Affine",
            Self::Syn => "SyN",
            Self::BSplineSyn => "BSplineSyN",
            Self::CenterMass => "CenterMass",
            Self::CenterMassRot => "CenterMassRot",
            Self::Columnwise => "Columnwise",
        }
    }
}

impl FromStr for Algorithm {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "translation" => Ok(Self::Translation),
            "rigid" => Ok(Self::Rigid),
            "affine" => Ok(Self::Affine),
            "syn" => Ok(Self::Syn),
            "bsplinesyn" => Ok(Self::BSplineSyn),
            "centermass" => Ok(Self::CenterMass),
            "centermassrot" => Ok(Self::CenterMassRot),
            "columnwise" => Ok(Self::Columnwise),
            other => Err(SlicewiseError::configuration(format!("unknown algorithm '{other}'"))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.engine_name().to_ascii_lowercase())
    }
}

/// How `centermassrot` estimates the slice angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMethod {
    /// Principal axes of the segmentation.
    #[default]
    Pca,
    /// Symmetry of the gradient-orientation histogram of the image.
    Hog,
    /// PCA per side, falling back to HOG when the axis is not trusted.
    Auto,
}

impl FromStr for RotationMethod {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pca" => Ok(Self::Pca),
            "hog" => Ok(Self::Hog),
            "auto" => Ok(Self::Auto),
            other => Err(SlicewiseError::configuration(format!(
                "unknown rotation method '{other}' (expected pca, hog or auto)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimilarityMetric {
    #[serde(rename = "MI")]
    MutualInformation,
    #[default]
    MeanSquares,
    #[serde(rename = "CC")]
    CrossCorrelation,
}

impl SimilarityMetric {
    /// Histogram bins for mutual information, neighbourhood radius otherwise.
    pub fn default_parameter(self) -> usize {
        match self {
            Self::MutualInformation => 32,
            _ => 4,
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mi" | "mattes" => Ok(Self::MutualInformation),
            "meansquares" | "mse" => Ok(Self::MeanSquares),
            "cc" => Ok(Self::CrossCorrelation),
            other => Err(SlicewiseError::configuration(format!("unknown metric '{other}'"))),
        }
    }
}

/// Initial alignment handed to the registration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initializer {
    /// Match the geometric centers of the two slices.
    Geometric,
    /// Match intensity-weighted centers of mass.
    CenterMass,
    /// Match the image origins.
    Origin,
}

impl Initializer {
    /// Numeric code of the `-r` initial transform argument.
    pub fn code(self) -> u8 {
        match self {
            Self::Geometric => 0,
            Self::CenterMass => 1,
            Self::Origin => 2,
        }
    }
}

impl FromStr for Initializer {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "geometric" | "0" => Ok(Self::Geometric),
            "centermass" | "1" => Ok(Self::CenterMass),
            "origin" | "2" => Ok(Self::Origin),
            other => Err(SlicewiseError::configuration(format!("unknown initializer '{other}'"))),
        }
    }
}

/// What replaces a slice the registration engine failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Reuse the last successfully registered slice below, identity if none.
    #[default]
    RepeatPrevious,
    Identity,
    /// Fail the whole volume.
    AbortVolume,
}

impl FromStr for FallbackPolicy {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "previous" | "repeat_previous" => Ok(Self::RepeatPrevious),
            "identity" => Ok(Self::Identity),
            "abort" | "abort_volume" => Ok(Self::AbortVolume),
            other => Err(SlicewiseError::configuration(format!("unknown fallback policy '{other}'"))),
        }
    }
}

/// Kernel applied to the gradient-orientation histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramSmoothing {
    #[default]
    Median,
    Gaussian,
}

impl FromStr for HistogramSmoothing {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(Self::Median),
            "gaussian" => Ok(Self::Gaussian),
            other => Err(SlicewiseError::configuration(format!("unknown histogram smoothing '{other}'"))),
        }
    }
}

/// Which volumes a registration step works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// The source and destination images.
    #[default]
    #[serde(rename = "im")]
    Image,
    /// The two segmentations.
    #[serde(rename = "seg")]
    Segmentation,
    /// Segmentations steer, images feed the symmetry detector.
    #[serde(rename = "imseg")]
    ImageAndSegmentation,
}

impl FromStr for InputType {
    type Err = SlicewiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "im" => Ok(Self::Image),
            "seg" => Ok(Self::Segmentation),
            "imseg" => Ok(Self::ImageAndSegmentation),
            other => Err(SlicewiseError::configuration(format!("unknown input type '{other}'"))),
        }
    }
}

/// Parse a multi-resolution schedule such as `"10x5"`.
pub fn parse_schedule<T: FromStr>(key: &str, value: &str) -> Result<Vec<T>> {
    value
        .split('x')
        .map(|level| {
            level.trim().parse::<T>().map_err(|_| {
                SlicewiseError::configuration(format!("invalid {key} level '{level}' in '{value}'"))
            })
        })
        .collect()
}

fn format_schedule<T: ToString>(levels: &[T]) -> String {
    levels.iter().map(ToString::to_string).collect::<Vec<_>>().join("x")
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SlicewiseError::configuration(format!("invalid value '{value}' for {key}")))
}

/// All options of one slice-wise registration step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParams {
    pub input_type: InputType,
    pub algorithm: Algorithm,
    pub rotation_method: RotationMethod,
    pub metric: SimilarityMetric,
    /// Iterations per resolution level.
    pub iterations: Vec<usize>,
    pub shrink_factors: Vec<usize>,
    /// Pyramid smoothing per level, in mm.
    pub smoothing_sigmas: Vec<f64>,
    pub gradient_step: f64,
    pub initializer: Option<Initializer>,
    /// Width of the Gaussian regularizing slice angles along z (slices).
    pub filter_size: f64,
    pub pca_eigenratio_threshold: f64,
    /// Width of the Gaussian smoothing the columnwise y grids (pixels).
    pub smooth_warp_xy: f64,
    /// Capture ranges in degrees.
    pub pca_range_deg: f64,
    pub symmetry_range_deg: f64,
    pub hybrid_symmetry_range_deg: f64,
    pub histogram_smoothing: HistogramSmoothing,
    pub fallback: FallbackPolicy,
    pub max_concurrency: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            input_type: InputType::Image,
            algorithm: Algorithm::Translation,
            rotation_method: RotationMethod::Pca,
            metric: SimilarityMetric::MeanSquares,
            iterations: vec![10],
            shrink_factors: vec![1],
            smoothing_sigmas: vec![0.0],
            gradient_step: 0.5,
            initializer: None,
            filter_size: 0.0,
            pca_eigenratio_threshold: 1.6,
            smooth_warp_xy: 1.0,
            pca_range_deg: 20.0,
            symmetry_range_deg: 20.0,
            hybrid_symmetry_range_deg: 10.0,
            histogram_smoothing: HistogramSmoothing::Median,
            fallback: FallbackPolicy::RepeatPrevious,
            max_concurrency: 1,
        }
    }
}

impl RegistrationParams {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm, ..Self::default() }
    }

    pub fn with_input_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_rotation_method(mut self, method: RotationMethod) -> Self {
        self.rotation_method = method;
        self
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_schedule(mut self, iterations: Vec<usize>, shrink_factors: Vec<usize>, smoothing_sigmas: Vec<f64>) -> Self {
        self.iterations = iterations;
        self.shrink_factors = shrink_factors;
        self.smoothing_sigmas = smoothing_sigmas;
        self
    }

    pub fn with_gradient_step(mut self, step: f64) -> Self {
        self.gradient_step = step;
        self
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_filter_size(mut self, filter_size: f64) -> Self {
        self.filter_size = filter_size;
        self
    }

    pub fn with_eigenratio_threshold(mut self, threshold: f64) -> Self {
        self.pca_eigenratio_threshold = threshold;
        self
    }

    pub fn with_smooth_warp_xy(mut self, width: f64) -> Self {
        self.smooth_warp_xy = width;
        self
    }

    pub fn with_histogram_smoothing(mut self, smoothing: HistogramSmoothing) -> Self {
        self.histogram_smoothing = smoothing;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Metric parameter sent with every engine request.
    pub fn metric_parameter(&self) -> usize {
        self.metric.default_parameter()
    }

    /// Whether both sides need an intensity image next to the segmentation.
    pub fn needs_image_and_segmentation(&self) -> bool {
        self.input_type == InputType::ImageAndSegmentation
    }

    /// Whether the segmentations of both volumes must be supplied.
    pub fn needs_segmentations(&self) -> bool {
        self.input_type != InputType::Image
    }

    /// Apply one `key=value` option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "step" => {
                let step: usize = parse_number(key, value)?;
                if step != 1 {
                    return Err(SlicewiseError::configuration(format!(
                        "step={step}: only single-step registration is supported, run one step per invocation"
                    )));
                }
            }
            "type" => self.input_type = value.parse()?,
            "algo" => self.algorithm = value.parse()?,
            "rot_method" => self.rotation_method = value.parse()?,
            "metric" => self.metric = value.parse()?,
            "iter" => self.iterations = parse_schedule(key, value)?,
            "shrink" => self.shrink_factors = parse_schedule(key, value)?,
            "smooth" => self.smoothing_sigmas = parse_schedule(key, value)?,
            "gradStep" => self.gradient_step = parse_number(key, value)?,
            "init" => self.initializer = Some(value.parse()?),
            "filter_size" => self.filter_size = parse_number(key, value)?,
            "pca_eigenratio_th" => self.pca_eigenratio_threshold = parse_number(key, value)?,
            "smoothWarpXY" => self.smooth_warp_xy = parse_number(key, value)?,
            "pca_range" => self.pca_range_deg = parse_number(key, value)?,
            "hog_range" => self.symmetry_range_deg = parse_number(key, value)?,
            "hybrid_range" => self.hybrid_symmetry_range_deg = parse_number(key, value)?,
            "histo_smooth" => self.histogram_smoothing = value.parse()?,
            "fallback" => self.fallback = value.parse()?,
            "max_concurrency" => self.max_concurrency = parse_number(key, value)?,
            other => return Err(SlicewiseError::configuration(format!("unknown parameter '{other}'"))),
        }
        Ok(())
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let levels = self.iterations.len();
        if levels == 0 {
            return Err(SlicewiseError::configuration("empty iteration schedule"));
        }
        if self.shrink_factors.len() != levels || self.smoothing_sigmas.len() != levels {
            return Err(SlicewiseError::configuration(format!(
                "schedule level counts differ: iter={}, shrink={}, smooth={}",
                format_schedule(&self.iterations),
                format_schedule(&self.shrink_factors),
                format_schedule(&self.smoothing_sigmas),
            )));
        }
        if self.shrink_factors.contains(&0) {
            return Err(SlicewiseError::configuration("shrink factors must be at least 1"));
        }
        if self.smoothing_sigmas.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(SlicewiseError::configuration("smoothing sigmas must be non-negative"));
        }
        let non_negative = [
            ("filter_size", self.filter_size),
            ("smoothWarpXY", self.smooth_warp_xy),
            ("pca_range", self.pca_range_deg),
            ("hog_range", self.symmetry_range_deg),
            ("hybrid_range", self.hybrid_symmetry_range_deg),
        ];
        for (key, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SlicewiseError::configuration(format!("{key} must be non-negative, got {value}")));
            }
        }
        if !(self.pca_eigenratio_threshold > 0.0) {
            return Err(SlicewiseError::configuration("pca_eigenratio_th must be positive"));
        }
        if !(self.gradient_step > 0.0) || !self.gradient_step.is_finite() {
            return Err(SlicewiseError::configuration("gradStep must be positive"));
        }
        let needs_images = self.algorithm == Algorithm::CenterMassRot
            && matches!(self.rotation_method, RotationMethod::Hog | RotationMethod::Auto);
        if needs_images != self.needs_image_and_segmentation() {
            return Err(SlicewiseError::configuration(if needs_images {
                "rot_method=hog and rot_method=auto need type=imseg"
            } else {
                "type=imseg is only used by algo=centermassrot with rot_method=hog or auto"
            }));
        }
        if self.max_concurrency == 0 {
            return Err(SlicewiseError::configuration("max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

impl FromStr for RegistrationParams {
    type Err = SlicewiseError;

    /// Parse the compact `key=value,key=value` form.
    fn from_str(s: &str) -> Result<Self> {
        let mut params = Self::default();
        for option in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| SlicewiseError::configuration(format!("expected key=value, got '{option}'")))?;
            params.set(key.trim(), value.trim())?;
        }
        params.validate()?;
        Ok(params)
    }
}
