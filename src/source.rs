//! Artifact source resolver.
//!
//! Resolves a named source (kernel, userspace, bootloader) at a pinned
//! version to a local directory. Cache layout is one subdirectory per
//! (name, version) pair under `<cache>/sources/`; an existing entry is
//! reused without any network access. A miss fetches from the primary
//! URL, then once from the fallback. Fetches land in `<cache>/tmp/` and
//! are renamed into the cache only when complete, so an entry either
//! exists whole or not at all - a failed attempt removes its partial
//! tree before the next one starts.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::sha256_file;
use crate::config::SourceSpec;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::process::Cmd;

pub struct SourceResolver {
    cache_dir: PathBuf,
    verbose: bool,
}

impl SourceResolver {
    pub fn new(ctx: &BuildContext) -> Self {
        Self {
            cache_dir: ctx.cache_dir.clone(),
            verbose: ctx.verbose,
        }
    }

    fn sources_dir(&self) -> PathBuf {
        self.cache_dir.join("sources")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.cache_dir.join("tmp")
    }

    /// Path a resolved source will live at, whether or not it is cached yet.
    pub fn entry_path(&self, spec: &SourceSpec) -> PathBuf {
        self.sources_dir().join(spec.cache_entry())
    }

    /// Return the local source tree for (name, version), fetching on a
    /// cache miss. Idempotent: a cached entry short-circuits.
    pub fn resolve(&self, spec: &SourceSpec) -> Result<PathBuf> {
        let entry = self.entry_path(spec);
        if entry.is_dir() {
            println!("[SKIP] {} {} already cached", spec.name, spec.version);
            return Ok(entry);
        }

        fs::create_dir_all(self.sources_dir())?;
        fs::create_dir_all(self.tmp_dir())?;

        let staging = self
            .tmp_dir()
            .join(format!("{}-{}", spec.cache_entry(), std::process::id()));

        println!("Fetching {} {}...", spec.name, spec.version);
        let primary_err = match self.fetch_into(spec, &spec.primary_url, &staging) {
            Ok(()) => {
                finalize(&staging, &entry)?;
                return Ok(entry);
            }
            Err(e) => e,
        };

        // Single fallback attempt; the partial primary tree is gone by now.
        eprintln!(
            "  [WARN] primary fetch failed ({:#}), trying fallback...",
            primary_err
        );
        match self.fetch_into(spec, &spec.fallback_url, &staging) {
            Ok(()) => {
                finalize(&staging, &entry)?;
                Ok(entry)
            }
            Err(fallback_err) => Err(BuildError::SourceFetchFailure {
                name: spec.name.clone(),
                version: spec.version.clone(),
                reason: format!("primary: {:#}; fallback: {:#}", primary_err, fallback_err),
            }
            .into()),
        }
    }

    /// Fetch one URL into `staging`. Removes `staging` on any failure.
    fn fetch_into(&self, spec: &SourceSpec, url: &str, staging: &Path) -> Result<()> {
        if staging.exists() {
            fs::remove_dir_all(staging)?;
        }
        fs::create_dir_all(staging)?;

        let result = if url.ends_with(".git") || url.starts_with("git://") {
            self.clone_repo(url, staging)
        } else {
            self.download_archive(spec, url, staging)
        };

        if result.is_err() {
            let _ = fs::remove_dir_all(staging);
        }
        result
    }

    fn clone_repo(&self, url: &str, staging: &Path) -> Result<()> {
        Cmd::new("git")
            .args(["clone", "--depth", "1", url])
            .arg_path(&staging.join("tree"))
            .error_msg(&format!("git clone of {} failed", url))
            .run()?;
        // Flatten: the tree itself is the cache entry content.
        flatten_single_subdir(staging)
    }

    fn download_archive(&self, spec: &SourceSpec, url: &str, staging: &Path) -> Result<()> {
        let archive_name = url.rsplit('/').next().unwrap_or("source.tar");
        let archive = staging.join(archive_name);

        let mut curl = Cmd::new("curl")
            .args(["-L", "-f", "-o"])
            .arg_path(&archive)
            .arg(url)
            .error_msg(&format!("download of {} failed", url));
        if !self.verbose {
            curl = curl.arg("--silent").arg("--show-error");
        }
        curl.run()?;

        if let Some(expected) = &spec.sha256 {
            let (actual, _) = sha256_file(&archive)?;
            if actual != *expected {
                bail!(
                    "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
                    archive_name,
                    expected,
                    actual
                );
            }
            println!("  checksum verified OK");
        }

        Cmd::new("tar")
            .args(["xf"])
            .arg_path(&archive)
            .args(["--strip-components=1", "-C"])
            .arg_path(staging)
            .error_msg(&format!("extraction of {} failed", archive_name))
            .run()?;
        fs::remove_file(&archive)
            .with_context(|| format!("Failed to remove {}", archive.display()))?;
        Ok(())
    }
}

/// Atomic publication: rename the completed staging tree into the cache.
fn finalize(staging: &Path, entry: &Path) -> Result<()> {
    fs::rename(staging, entry).with_context(|| {
        format!(
            "Failed to move fetched source into cache entry {}",
            entry.display()
        )
    })?;
    println!("  cached at {}", entry.display());
    Ok(())
}

/// git clone leaves `<staging>/tree`; hoist its contents up one level.
fn flatten_single_subdir(staging: &Path) -> Result<()> {
    let tree = staging.join("tree");
    for dir_entry in fs::read_dir(&tree)? {
        let dir_entry = dir_entry?;
        fs::rename(
            dir_entry.path(),
            staging.join(dir_entry.file_name()),
        )?;
    }
    fs::remove_dir(&tree)?;
    Ok(())
}
