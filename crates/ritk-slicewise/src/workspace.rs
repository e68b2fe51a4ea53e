//! Scratch directory holding the staged inputs and the produced fields.

use std::fs;
use std::path::{Path, PathBuf};

use ritk_io::{read_nifti_volume, write_volume, NiftiVolume};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::error::{Result, SlicewiseError};

pub const SOURCE: &str = "src.nii";
pub const DESTINATION: &str = "dest.nii";
pub const SOURCE_SEGMENTATION: &str = "src_seg.nii";
pub const DESTINATION_SEGMENTATION: &str = "dest_seg.nii";
pub const MASK: &str = "mask.nii.gz";
pub const FORWARD_WARP: &str = "warp_forward.nii.gz";
pub const INVERSE_WARP: &str = "warp_inverse.nii.gz";

/// A temporary directory, removed on drop unless kept.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("slicewise_")
            .tempdir()
            .map_err(|e| SlicewiseError::io(format!("cannot create workspace: {e}")))?;
        info!(path = %dir.path().display(), "created workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Read `input` and store it under the canonical `name`.
    pub fn stage(&self, input: &Path, name: &str) -> Result<NiftiVolume> {
        let volume = read_nifti_volume(input)?;
        write_volume(self.file(name), &volume.data, &volume.header)?;
        debug!(input = %input.display(), staged = name, dims = ?volume.dims(), "staged input");
        Ok(volume)
    }

    /// Copy a workspace file to a caller-visible path.
    pub fn publish(&self, name: &str, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.file(name), target)
            .map_err(|e| SlicewiseError::io(format!("cannot publish {name} to {}: {e}", target.display())))?;
        info!(file = name, target = %target.display(), "published");
        Ok(())
    }

    /// Remove the directory, or keep it and return its path.
    pub fn finish(self, remove: bool) -> Result<Option<PathBuf>> {
        if remove {
            let path = self.dir.path().to_path_buf();
            self.dir
                .close()
                .map_err(|e| SlicewiseError::io(format!("cannot remove workspace {}: {e}", path.display())))?;
            debug!(path = %path.display(), "removed workspace");
            Ok(None)
        } else {
            let path = self.dir.keep();
            info!(path = %path.display(), "kept workspace");
            Ok(Some(path))
        }
    }
}
