//! Scoped acquisition around the mount/unmount pair.
//!
//! Two guards enforce the disk image builder's resource rules:
//! - `PathLock` - advisory exclusive lock scoping a mount point or
//!   output image to a single builder instance.
//! - `MountGuard` - owns the mount point directory and the active
//!   mount. Release runs exactly once on every exit path: the explicit
//!   `finish()` on success, or `Drop` on error/interrupt - unmount if
//!   mounted, then remove the mount point directory if it is empty.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::process::Cmd;

/// Exclusive advisory lock on a path-scoped resource. The lock file is
/// a sibling of the resource and is removed when the guard drops.
pub struct PathLock {
    _file: File,
    lock_path: PathBuf,
}

impl PathLock {
    pub fn acquire(target: &Path) -> Result<Self> {
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .context("lock target has no file name")?;
        let lock_path = target.with_file_name(format!("{file_name}.lock"));
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never unlink a "stale" lock file here: a second process could
        // recreate it and acquire a separate lock on the new inode.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "{} is locked by another miniso instance",
                target.display()
            );
        }

        Ok(Self {
            _file: file,
            lock_path,
        })
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// An active loop mount of the disk image.
#[derive(Debug)]
pub struct MountGuard {
    mount_point: PathBuf,
    mounted: bool,
}

impl MountGuard {
    /// Create (or adopt an empty) mount point directory and loop-mount
    /// the image onto it. A non-empty directory means another user of
    /// the path and is rejected as `MountFailure`.
    pub fn mount(image: &Path, mount_point: &Path) -> Result<Self> {
        if mount_point.exists() {
            let occupied = fs::read_dir(mount_point)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(true);
            if occupied {
                return Err(BuildError::MountFailure {
                    mount_point: mount_point.to_path_buf(),
                    reason: "mount point directory exists and is not empty".to_string(),
                }
                .into());
            }
        } else {
            fs::create_dir_all(mount_point).with_context(|| {
                format!("Failed to create mount point {}", mount_point.display())
            })?;
        }

        // Guard exists before the mount attempt so a failed mount still
        // removes the directory on drop.
        let mut guard = Self {
            mount_point: mount_point.to_path_buf(),
            mounted: false,
        };

        let mounted = Cmd::new("mount")
            .args(["-o", "loop"])
            .arg_path(image)
            .arg_path(mount_point)
            .allow_fail()
            .run()?;
        if !mounted.success() {
            return Err(BuildError::MountFailure {
                mount_point: mount_point.to_path_buf(),
                reason: format!(
                    "mount exited with code {}: {}",
                    mounted.code(),
                    mounted.stderr.trim()
                ),
            }
            .into());
        }

        guard.mounted = true;
        Ok(guard)
    }

    /// Copy one payload file into the mounted filesystem.
    pub fn copy_in(&self, source: &Path, dest_name: &str) -> Result<()> {
        let dest = self.mount_point.join(dest_name);
        fs::copy(source, &dest).with_context(|| {
            format!("Failed to copy {} into image as {}", source.display(), dest_name)
        })?;
        Ok(())
    }

    /// Explicit release: unmount and remove the mount point, reporting
    /// failures. After this, the destructor has nothing left to do.
    pub fn finish(mut self) -> Result<()> {
        Cmd::new("umount")
            .arg_path(&self.mount_point)
            .error_msg("umount failed")
            .run()?;
        self.mounted = false;
        fs::remove_dir(&self.mount_point).with_context(|| {
            format!(
                "Failed to remove mount point {}",
                self.mount_point.display()
            )
        })?;
        Ok(())
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        if self.mounted {
            let _ = Cmd::new("umount")
                .arg_path(&self.mount_point)
                .allow_fail()
                .run();
            self.mounted = false;
        }
        let empty = fs::read_dir(&self.mount_point)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            let _ = fs::remove_dir(&self.mount_point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_lock_on_same_target_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("boot.img");

        let first = PathLock::acquire(&target).unwrap();
        let second = PathLock::acquire(&target);
        assert!(second.is_err());

        // Released lock can be re-acquired.
        drop(first);
        PathLock::acquire(&target).unwrap();
    }

    #[test]
    fn failed_mount_removes_created_mount_point() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("no-such-image.img");
        let mount_point = tmp.path().join("mnt");

        let err = MountGuard::mount(&image, &mount_point).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MountFailure { .. })
        ));
        assert!(
            !mount_point.exists(),
            "mount point must be cleaned up after a failed mount"
        );
    }

    #[test]
    fn occupied_mount_point_is_rejected_and_preserved() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("boot.img");
        fs::write(&image, b"image").unwrap();
        let mount_point = tmp.path().join("mnt");
        fs::create_dir_all(&mount_point).unwrap();
        fs::write(mount_point.join("keep-me"), b"data").unwrap();

        let err = MountGuard::mount(&image, &mount_point).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MountFailure { .. })
        ));
        assert!(
            mount_point.join("keep-me").is_file(),
            "foreign mount point contents must not be touched"
        );
    }

    #[test]
    fn drop_cleanup_is_idempotent_when_nothing_is_mounted() {
        let tmp = TempDir::new().unwrap();
        let mount_point = tmp.path().join("mnt");
        fs::create_dir_all(&mount_point).unwrap();

        // Simulates the cleanup transition firing before any mount happened.
        let guard = MountGuard {
            mount_point: mount_point.clone(),
            mounted: false,
        };
        drop(guard);
        assert!(!mount_point.exists());

        // Firing again with the directory already gone is harmless.
        let guard = MountGuard {
            mount_point: mount_point.clone(),
            mounted: false,
        };
        drop(guard);
        assert!(!mount_point.exists());
    }
}
