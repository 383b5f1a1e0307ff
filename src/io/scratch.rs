//! Scoped scratch directories for intermediate rasters

use crate::io::raster::RasterStore;
use crate::types::{AtmoResult, Raster};
use std::path::{Path, PathBuf};

/// Directory for intermediate products of one processing step.
///
/// The directory is removed when the value is dropped, on success and error
/// paths alike, unless debug mode is on or the directory already existed
/// before it was acquired. In debug mode intermediates are written into it
/// and left behind for inspection.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    remove_on_drop: bool,
    debug: bool,
}

impl ScratchDir {
    /// Create (or reuse) `parent/name`
    pub fn create(parent: &Path, name: &str, debug: bool) -> AtmoResult<Self> {
        let path = parent.join(name);
        let pre_existing = path.exists();
        if !pre_existing {
            std::fs::create_dir_all(&path)?;
        }
        log::debug!(
            "Scratch directory {} (pre-existing: {}, debug: {})",
            path.display(),
            pre_existing,
            debug
        );
        Ok(Self {
            path,
            remove_on_drop: !pre_existing && !debug,
            debug,
        })
    }

    /// Scratch space under the system temp directory
    pub fn temporary(prefix: &str, debug: bool) -> AtmoResult<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.into_path();
        Ok(Self {
            path,
            remove_on_drop: !debug,
            debug,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Write an intermediate raster when debugging; a no-op otherwise
    pub fn keep(&self, store: &mut dyn RasterStore, name: &str, raster: &Raster) -> AtmoResult<()> {
        if !self.debug {
            return Ok(());
        }
        let path = store.output_path(&self.path, name);
        log::debug!("Keeping intermediate {}", path.display());
        store.write(&path, raster)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.remove_on_drop {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                log::warn!("Failed to remove scratch directory {}: {}", self.path.display(), e);
            }
        }
    }
}
