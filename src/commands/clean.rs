//! Clean command - removes build artifacts.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::context::BuildContext;

/// What to clean.
#[derive(Debug, Clone, Copy)]
pub enum CleanTarget {
    /// Build outputs only (default; cache preserved).
    Outputs,
    /// Cached source trees.
    Sources,
    /// Stage completion records.
    Cache,
    /// Everything.
    All,
}

/// Execute the clean command.
pub fn cmd_clean(ctx: &BuildContext, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Outputs => clean_outputs(ctx)?,
        CleanTarget::Sources => remove_dir(&ctx.cache_dir.join("sources"), "cached sources")?,
        CleanTarget::Cache => remove_dir(&ctx.cache_dir.join("stages"), "stage records")?,
        CleanTarget::All => {
            clean_outputs(ctx)?;
            remove_dir(&ctx.cache_dir, "cache")?;
        }
    }
    println!("Clean complete.");
    Ok(())
}

fn clean_outputs(ctx: &BuildContext) -> Result<()> {
    remove_dir(&ctx.output_dir, "build outputs")
}

fn remove_dir(dir: &Path, what: &str) -> Result<()> {
    if dir.exists() {
        println!("Removing {} ({})...", what, dir.display());
        fs::remove_dir_all(dir)?;
    } else {
        println!("No {} to clean.", what);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn outputs_clean_preserves_cache() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        fs::create_dir_all(&ctx.output_dir).unwrap();
        fs::create_dir_all(ctx.cache_dir.join("sources/kernel-1")).unwrap();

        cmd_clean(&ctx, CleanTarget::Outputs).unwrap();
        assert!(!ctx.output_dir.exists());
        assert!(ctx.cache_dir.join("sources/kernel-1").exists());
    }

    #[test]
    fn all_clean_removes_cache_too() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        fs::create_dir_all(&ctx.output_dir).unwrap();
        fs::create_dir_all(ctx.cache_dir.join("stages")).unwrap();

        cmd_clean(&ctx, CleanTarget::All).unwrap();
        assert!(!ctx.output_dir.exists());
        assert!(!ctx.cache_dir.exists());
    }
}
