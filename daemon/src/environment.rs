use ::sesame::compositor::ComposedImage;
use ::sesame::error::Result;

use std::fs;
use std::path::PathBuf;

/// Whatever actually displays the skybox. Only ever called from the main loop.
pub trait Environment {
    fn apply_environment(&mut self, id: &str, image: &ComposedImage) -> Result<()>;
}

/// Headless stand-in for a renderer: logs each swap and, when configured, writes the
/// active skybox to disk so something outside the daemon can pick it up.
pub struct SnapshotEnvironment {
    snapshot: Option<PathBuf>,
}

impl SnapshotEnvironment {
    pub fn new(snapshot: Option<PathBuf>) -> SnapshotEnvironment {
        return SnapshotEnvironment { snapshot };
    }
}

impl Environment for SnapshotEnvironment {
    fn apply_environment(&mut self, id: &str, image: &ComposedImage) -> Result<()> {
        tracing::info!(id, width = image.width(), height = image.height(), "skybox flipped");
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        // write-then-rename so readers never see a half-written png
        let partial = path.with_extension("png.partial");
        image.save_png(&partial)?;
        fs::rename(&partial, path)?;
        tracing::debug!(path = %path.display(), "snapshot written");
        return Ok(());
    }
}
