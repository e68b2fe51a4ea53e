//! End-to-end slice-wise registration of two volumes on disk.
//!
//! A run moves through [`Stage`]s in order. Parameters are checked before
//! anything is staged, so a bad option never touches the file system.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use ritk_io::NiftiVolume;
use tracing::{info, warn};

use crate::columnwise::ColumnwiseEstimator;
use crate::config::{Algorithm, InputType, RegistrationParams};
use crate::debug::{DebugRenderer, NullRenderer};
use crate::engine::{EngineAdapter, GradientSliceEngine, SliceRegistrationEngine, TransformFamily};
use crate::error::{Result, SlicewiseError};
use crate::field::FieldPair;
use crate::rotation::{RotationEstimator, RotationOptions, SliceChannels};
use crate::warp_field::write_warping_field;
use crate::workspace::{self, Workspace};

/// Backend of the built-in per-slice engine.
pub type DefaultEngineBackend = Autodiff<NdArray<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Configured,
    Staged,
    Dispatched,
    Executed,
    Published,
    CleanedUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Input volumes. The segmentations are only read when the input type
/// asks for them.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub src: PathBuf,
    pub dest: PathBuf,
    pub src_seg: Option<PathBuf>,
    pub dest_seg: Option<PathBuf>,
    pub mask: Option<PathBuf>,
}

impl Inputs {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            ..Self::default()
        }
    }

    pub fn with_segmentations(mut self, src_seg: impl Into<PathBuf>, dest_seg: impl Into<PathBuf>) -> Self {
        self.src_seg = Some(src_seg.into());
        self.dest_seg = Some(dest_seg.into());
        self
    }

    pub fn with_mask(mut self, mask: impl Into<PathBuf>) -> Self {
        self.mask = Some(mask.into());
        self
    }
}

/// Where the two fields are published.
#[derive(Debug, Clone)]
pub struct Outputs {
    /// Forward field, on the destination grid.
    pub warp: PathBuf,
    /// Inverse field, on the source grid.
    pub warp_inverse: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Slices left at identity or filled by the fallback policy.
    pub excluded_slices: Vec<usize>,
    /// Scratch directory, when kept.
    pub workspace: Option<PathBuf>,
    pub stage: Stage,
}

/// The estimator chosen for the configured algorithm.
#[derive(Debug, Clone)]
enum Dispatch {
    Rotation(RotationOptions),
    Columnwise { smooth_width: f64 },
    Engine(TransformFamily),
}

impl Dispatch {
    fn select(params: &RegistrationParams) -> Result<Self> {
        match params.algorithm {
            Algorithm::CenterMass | Algorithm::CenterMassRot => Ok(Self::Rotation(RotationOptions::from_params(params)?)),
            Algorithm::Columnwise => Ok(Self::Columnwise {
                smooth_width: params.smooth_warp_xy,
            }),
            a if a.uses_engine() => Ok(Self::Engine(TransformFamily::from_algorithm(a)?)),
            other => Err(SlicewiseError::configuration(format!("algorithm {other} has no estimator"))),
        }
    }
}

/// Staged volumes of one run.
struct Staged {
    src: NiftiVolume,
    dest: NiftiVolume,
    src_seg: Option<NiftiVolume>,
    dest_seg: Option<NiftiVolume>,
    mask: Option<NiftiVolume>,
}

pub struct SlicewiseRegistration {
    params: RegistrationParams,
    dispatch: Dispatch,
    engine: Arc<dyn SliceRegistrationEngine>,
    renderer: Arc<dyn DebugRenderer>,
    remove_temp_files: bool,
    stage: Stage,
}

impl SlicewiseRegistration {
    /// Validate `params` and select the estimator.
    pub fn new(params: RegistrationParams) -> Result<Self> {
        params.validate()?;
        let dispatch = Dispatch::select(&params)?;
        info!(algorithm = %params.algorithm, "configured slice-wise registration");
        Ok(Self {
            params,
            dispatch,
            engine: Arc::new(GradientSliceEngine::<DefaultEngineBackend>::default()),
            renderer: Arc::new(NullRenderer),
            remove_temp_files: true,
            stage: Stage::Configured,
        })
    }

    /// Engine used by the translation, rigid, affine and SyN families.
    /// Defaults to the in-process gradient engine.
    pub fn with_engine(mut self, engine: Arc<dyn SliceRegistrationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DebugRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_remove_temp_files(mut self, remove: bool) -> Self {
        self.remove_temp_files = remove;
        self
    }

    pub fn params(&self) -> &RegistrationParams {
        &self.params
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn run(&mut self, inputs: &Inputs, outputs: &Outputs) -> Result<RunReport> {
        self.stage = Stage::Configured;
        self.check_inputs(inputs)?;

        let workspace = Workspace::create()?;
        let staged = self.stage_inputs(&workspace, inputs)?;
        self.advance(Stage::Staged);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.max_concurrency)
            .build()
            .map_err(|e| SlicewiseError::configuration(format!("cannot build thread pool: {e}")))?;
        self.advance(Stage::Dispatched);

        let (fields, excluded) = pool.install(|| self.execute(&staged, &workspace))?;
        let (src_grid, dest_grid) = self.reference_volumes(&staged);
        write_warping_field(workspace.file(workspace::FORWARD_WARP), &fields.forward, &dest_grid.header)?;
        write_warping_field(workspace.file(workspace::INVERSE_WARP), &fields.inverse, &src_grid.header)?;
        self.advance(Stage::Executed);

        workspace.publish(workspace::FORWARD_WARP, &outputs.warp)?;
        workspace.publish(workspace::INVERSE_WARP, &outputs.warp_inverse)?;
        self.advance(Stage::Published);

        let kept = workspace.finish(self.remove_temp_files)?;
        if kept.is_none() {
            self.advance(Stage::CleanedUp);
        }
        if !excluded.is_empty() {
            warn!(slices = ?excluded, "some slices were not registered");
        }
        Ok(RunReport {
            excluded_slices: excluded,
            workspace: kept,
            stage: self.stage,
        })
    }

    fn advance(&mut self, stage: Stage) {
        info!(from = %self.stage, to = %stage, "stage");
        self.stage = stage;
    }

    fn check_inputs(&self, inputs: &Inputs) -> Result<()> {
        if self.params.needs_segmentations() && (inputs.src_seg.is_none() || inputs.dest_seg.is_none()) {
            return Err(SlicewiseError::configuration(format!(
                "input type {:?} needs segmentations of both volumes",
                self.params.input_type
            )));
        }
        if let Dispatch::Engine(family) = self.dispatch {
            if !self.engine.supports(family) {
                return Err(SlicewiseError::configuration(format!(
                    "engine {} cannot run algorithm {}",
                    self.engine.name(),
                    self.params.algorithm
                )));
            }
        }
        Ok(())
    }

    fn stage_inputs(&self, workspace: &Workspace, inputs: &Inputs) -> Result<Staged> {
        let segmentations = self.params.needs_segmentations();
        let optional = |path: &Option<PathBuf>, name: &str| -> Result<Option<NiftiVolume>> {
            path.as_deref().map(|p| workspace.stage(p, name)).transpose()
        };
        Ok(Staged {
            src: workspace.stage(&inputs.src, workspace::SOURCE)?,
            dest: workspace.stage(&inputs.dest, workspace::DESTINATION)?,
            src_seg: if segmentations { optional(&inputs.src_seg, workspace::SOURCE_SEGMENTATION)? } else { None },
            dest_seg: if segmentations { optional(&inputs.dest_seg, workspace::DESTINATION_SEGMENTATION)? } else { None },
            mask: optional(&inputs.mask, workspace::MASK)?,
        })
    }

    /// The registered volumes, whose grids the fields are defined on.
    fn reference_volumes<'s>(&self, staged: &'s Staged) -> (&'s NiftiVolume, &'s NiftiVolume) {
        match (self.params.input_type, &staged.src_seg, &staged.dest_seg) {
            (InputType::Image, _, _) | (_, None, _) | (_, _, None) => (&staged.src, &staged.dest),
            (_, Some(src_seg), Some(dest_seg)) => (src_seg, dest_seg),
        }
    }

    fn execute(&self, staged: &Staged, workspace: &Workspace) -> Result<(FieldPair, Vec<usize>)> {
        let renderer = self.renderer.as_ref();
        let (src, dest) = self.reference_volumes(staged);
        match &self.dispatch {
            Dispatch::Rotation(options) => {
                let (source, destination) = if self.params.needs_image_and_segmentation() {
                    (SliceChannels::with_image(src, &staged.src), SliceChannels::with_image(dest, &staged.dest))
                } else {
                    (SliceChannels::segmentation(src), SliceChannels::segmentation(dest))
                };
                let outcome = RotationEstimator::new(options.clone(), renderer).run(source, destination)?;
                let excluded = outcome.excluded_slices();
                Ok((outcome.fields, excluded))
            }
            Dispatch::Columnwise { smooth_width } => {
                let outcome = ColumnwiseEstimator::new(*smooth_width, renderer).run(src, dest)?;
                Ok((outcome.fields, outcome.skipped))
            }
            Dispatch::Engine(family) => {
                let engine = self.engine.as_ref();
                info!(family = ?family, engine = engine.name(), "dispatching slices to engine");
                let outcome = EngineAdapter::new(engine, &self.params, renderer).run(
                    src,
                    dest,
                    staged.mask.as_ref(),
                    workspace.path(),
                )?;
                Ok((outcome.fields, outcome.failed))
            }
        }
    }
}
