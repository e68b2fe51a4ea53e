use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ritk_slicewise::{
    CommandEngine, DebugRenderer, Inputs, NullRenderer, Outputs, RegistrationParams, SlicewiseRegistration,
    TracingRenderer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sct-register-slicewise")]
#[command(about = "Slice-by-slice 2D registration producing forward and inverse 3D warping fields")]
struct Cli {
    /// Source volume
    #[arg(long)]
    src: PathBuf,

    /// Destination volume
    #[arg(long)]
    dest: PathBuf,

    /// Source segmentation, read with type=seg or type=imseg
    #[arg(long, requires = "dest_seg")]
    src_seg: Option<PathBuf>,

    /// Destination segmentation
    #[arg(long, requires = "src_seg")]
    dest_seg: Option<PathBuf>,

    /// Mask in destination space
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Parameters as key=value pairs, e.g. "algo=columnwise,smoothWarpXY=2"
    #[arg(short, long, default_value = "")]
    param: String,

    /// Forward warping field (destination space)
    #[arg(long, default_value = "warp_forward.nii.gz")]
    out_warp: PathBuf,

    /// Inverse warping field (source space)
    #[arg(long, default_value = "warp_inverse.nii.gz")]
    out_warp_inv: PathBuf,

    /// Run each slice through this ANTs-compatible registration program
    /// instead of the built-in engine (needed for algo=syn and bsplinesyn)
    #[arg(long, value_name = "PROGRAM", num_args = 0..=1, default_missing_value = "isct_antsRegistration")]
    engine_command: Option<PathBuf>,

    /// Keep the temporary workspace
    #[arg(long)]
    keep_temp: bool,

    /// Verbosity; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let fallback = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();

    let params: RegistrationParams = cli.param.parse().context("Invalid --param")?;
    let renderer: Arc<dyn DebugRenderer> = if cli.verbose >= 2 {
        Arc::new(TracingRenderer)
    } else {
        Arc::new(NullRenderer)
    };

    let mut inputs = Inputs::new(cli.src, cli.dest);
    if let (Some(src_seg), Some(dest_seg)) = (cli.src_seg, cli.dest_seg) {
        inputs = inputs.with_segmentations(src_seg, dest_seg);
    }
    if let Some(mask) = cli.mask {
        inputs = inputs.with_mask(mask);
    }
    let outputs = Outputs {
        warp: cli.out_warp,
        warp_inverse: cli.out_warp_inv,
    };

    let mut registration = SlicewiseRegistration::new(params)?
        .with_renderer(renderer)
        .with_remove_temp_files(!cli.keep_temp);
    if let Some(program) = cli.engine_command {
        info!(program = %program.display(), "using external registration program");
        registration = registration.with_engine(Arc::new(CommandEngine::new(program)));
    }
    let report = registration.run(&inputs, &outputs).context("Slice-wise registration failed")?;

    info!(
        warp = %outputs.warp.display(),
        warp_inverse = %outputs.warp_inverse.display(),
        excluded = ?report.excluded_slices,
        "done"
    );
    if let Some(workspace) = report.workspace {
        println!("Temporary files kept in {}", workspace.display());
    }
    Ok(())
}
