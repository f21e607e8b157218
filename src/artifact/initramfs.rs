//! Initramfs assembler.
//!
//! Serializes a prepared root filesystem tree into a gzip-compressed
//! newc cpio archive - the format the kernel unpacks at boot. cpio run
//! from inside the tree preserves permissions, ownership, and symlinks.
//! Entry ordering is whatever `find` emits; byte-for-byte
//! reproducibility across runs is not guaranteed.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use crate::artifact::{self, Artifact, ArtifactKind};
use crate::context::BuildContext;
use crate::error::BuildError;

/// Name of the executable entry point the kernel runs as PID 1.
const INIT_NAME: &str = "init";

/// Pack `rootfs_dir` into the context's initramfs-archive output path.
pub fn build_initramfs(ctx: &BuildContext, rootfs_dir: &Path) -> Result<Artifact> {
    if !rootfs_dir.is_dir() {
        return Err(BuildError::MissingInputFile {
            path: rootfs_dir.to_path_buf(),
        }
        .into());
    }
    check_init(rootfs_dir)?;

    fs::create_dir_all(&ctx.output_dir)?;
    let output = artifact::output_path(ctx, ArtifactKind::InitramfsArchive);
    let temp = output.with_extension("gz.tmp");

    println!(
        "Packing initramfs from {} ({} KB tree)...",
        rootfs_dir.display(),
        tree_size(rootfs_dir) / 1024
    );

    // cpio writes the archive to stdout; capture raw bytes, not text.
    let packed = Command::new("sh")
        .current_dir(rootfs_dir)
        .args([
            "-c",
            "find . -print0 | cpio --null -o -H newc 2>/dev/null | gzip -9",
        ])
        .output()
        .context("Failed to run find | cpio | gzip")?;

    if !packed.status.success() {
        bail!(
            "cpio packing failed: {}",
            String::from_utf8_lossy(&packed.stderr)
        );
    }
    if packed.stdout.is_empty() {
        bail!("cpio packing produced an empty archive");
    }

    fs::write(&temp, &packed.stdout)
        .with_context(|| format!("Failed to write {}", temp.display()))?;
    fs::rename(&temp, &output)
        .with_context(|| format!("Failed to move initramfs into {}", output.display()))?;

    let built = Artifact::from_path(ArtifactKind::InitramfsArchive, &output)?;
    println!("  initramfs: {} ({} KB)", output.display(), built.size_bytes / 1024);
    Ok(built)
}

/// Total size of the regular files in a tree. Symlinks not followed.
pub fn tree_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// The tree must carry an executable /init or the image will panic at boot.
fn check_init(rootfs_dir: &Path) -> Result<()> {
    let init = rootfs_dir.join(INIT_NAME);
    let meta = match fs::metadata(&init) {
        Ok(m) if m.is_file() => m,
        _ => {
            return Err(BuildError::ValidationFailure {
                path: init,
                reason: "rootfs tree has no init program".to_string(),
            }
            .into())
        }
    };
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(BuildError::ValidationFailure {
            path: init,
            reason: "init program is not executable".to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use crate::validate;
    use tempfile::TempDir;

    fn make_rootfs(dir: &Path) {
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::create_dir_all(dir.join("proc")).unwrap();
        fs::write(dir.join("bin/busybox"), b"\x7fELF fake").unwrap();
        fs::write(dir.join(INIT_NAME), b"#!/bin/sh\nexec /bin/sh\n").unwrap();
        let mut perms = fs::metadata(dir.join(INIT_NAME)).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(dir.join(INIT_NAME), perms).unwrap();
    }

    #[test]
    fn packed_archive_starts_with_gzip_magic() {
        if !process::exists("cpio") || !process::exists("gzip") {
            eprintln!("skipping: cpio/gzip not installed");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let rootfs = tmp.path().join("rootfs");
        make_rootfs(&rootfs);

        let built = build_initramfs(&ctx, &rootfs).unwrap();
        assert_eq!(built.kind, ArtifactKind::InitramfsArchive);

        let bytes = fs::read(&built.path).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        validate::verify_artifact(ArtifactKind::InitramfsArchive, &built.path).unwrap();
    }

    #[test]
    fn missing_init_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(rootfs.join("bin")).unwrap();

        let err = build_initramfs(&ctx, &rootfs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn non_executable_init_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();
        fs::write(rootfs.join(INIT_NAME), b"#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(rootfs.join(INIT_NAME)).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(rootfs.join(INIT_NAME), perms).unwrap();

        let err = build_initramfs(&ctx, &rootfs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn tree_size_sums_regular_files_only() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(rootfs.join("bin")).unwrap();
        fs::write(rootfs.join("bin/a"), vec![0u8; 100]).unwrap();
        fs::write(rootfs.join("b"), vec![0u8; 50]).unwrap();
        std::os::unix::fs::symlink("b", rootfs.join("c")).unwrap();

        assert_eq!(tree_size(&rootfs), 150);
    }

    #[test]
    fn missing_rootfs_dir_is_missing_input() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let err = build_initramfs(&ctx, &tmp.path().join("nope")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingInputFile { .. })
        ));
    }
}
