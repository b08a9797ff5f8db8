use std::path::{Path, PathBuf};

use cortex_store::Store;
use tempfile::TempDir;

/// Disposable workspace bundling a temp directory and an in-memory store.
/// Integration tests build their runtime on top of this.
pub struct TestWorld {
    dir: TempDir,
    pub store: Store,
}

impl TestWorld {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            store: Store::open_in_memory()?,
        })
    }

    /// A workspace with a seeded SOP catalog under `sops/`
    pub fn with_sops() -> anyhow::Result<Self> {
        let world = Self::new()?;
        crate::write_sop_catalog(&world.sops_dir())?;
        Ok(world)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sops_dir(&self) -> PathBuf {
        self.dir.path().join("sops")
    }
}
