//! Artifact exporter.
//!
//! Copies finished artifacts out of the build tree into a caller-chosen
//! directory. Always a copy, never a move: the build tree keeps its
//! artifacts so later stages (and re-exports) still find them.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{self, ArtifactKind};
use crate::context::BuildContext;
use crate::error::BuildError;

/// Export the requested artifact kinds to `dest`. Fails with
/// `MissingDependency` if any requested artifact was never produced.
pub fn export_artifacts(
    ctx: &BuildContext,
    kinds: &[ArtifactKind],
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create export directory {}", dest.display()))?;

    let mut exported = Vec::new();
    for &kind in kinds {
        let src = artifact::output_path(ctx, kind);
        if !src.is_file() {
            return Err(BuildError::MissingDependency(format!(
                "artifact '{}' was never produced (expected at {})",
                kind,
                src.display()
            ))
            .into());
        }

        let dst = dest.join(kind.file_name());
        fs::copy(&src, &dst).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dst.display())
        })?;
        println!("  exported {} -> {}", kind, dst.display());
        exported.push(dst);
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn export_copies_without_moving() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        fs::create_dir_all(&ctx.output_dir).unwrap();

        let src = artifact::output_path(&ctx, ArtifactKind::KernelImage);
        fs::write(&src, b"kernel bytes").unwrap();

        let dest = tmp.path().join("exported");
        let out = export_artifacts(&ctx, &[ArtifactKind::KernelImage], &dest).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(fs::read(&out[0]).unwrap(), b"kernel bytes");
        assert!(src.is_file(), "source must remain after export");
    }

    #[test]
    fn missing_artifact_is_missing_dependency() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let dest = tmp.path().join("exported");

        let err = export_artifacts(&ctx, &[ArtifactKind::IsoImage], &dest).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingDependency(_))
        ));
    }
}
