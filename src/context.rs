//! Build context shared across all pipeline stages.

use std::path::{Path, PathBuf};

/// Shared context for one pipeline invocation.
///
/// Created once in main, passed by reference to every stage, and
/// discarded at process exit. Nothing persists across invocations
/// except the contents of `cache_dir`.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Project base directory (where the command was invoked).
    pub base_dir: PathBuf,
    /// Output directory for build artifacts (`<base>/output`).
    pub output_dir: PathBuf,
    /// Persistent cache directory (sources + stage records).
    pub cache_dir: PathBuf,
    /// Verbose logging.
    pub verbose: bool,
}

impl BuildContext {
    pub fn new(base_dir: &Path, cache_dir: &Path, verbose: bool) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            output_dir: base_dir.join("output"),
            cache_dir: cache_dir.to_path_buf(),
            verbose,
        }
    }

    /// Rootfs staging tree populated by the userspace build stage.
    pub fn rootfs_staging(&self) -> PathBuf {
        self.output_dir.join("rootfs-staging")
    }

    /// Context rooted in a scratch directory. Tests only.
    #[doc(hidden)]
    pub fn for_testing(base_dir: &Path) -> Self {
        Self::new(base_dir, &base_dir.join("cache"), false)
    }
}
