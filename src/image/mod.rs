//! Raw disk image builder.
//!
//! Produces a bootable FAT32 disk image from a kernel, an initramfs
//! archive, and a bootloader configuration:
//! create (zero-filled) -> capacity check -> format -> install
//! bootloader -> mount -> copy payload -> unmount.
//!
//! Every step is a state transition; any failure or observed
//! termination signal routes through the same cleanup: the mount guard
//! unmounts and removes the mount point on drop, so no exit path leaves
//! a mounted filesystem or stale mount directory behind.

pub mod mount;

pub use mount::{MountGuard, PathLock};

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactKind};
use crate::error::BuildError;
use crate::process::Cmd;

/// Fixed destination names inside the image.
pub const KERNEL_DEST: &str = "bzImage";
pub const INITRD_DEST: &str = "initramfs";
pub const CONFIG_DEST: &str = "syslinux.cfg";

/// Default image size in megabytes.
pub const DEFAULT_SIZE_MB: u64 = 50;

/// One payload file: host source and its fixed name inside the image.
#[derive(Debug, Clone)]
pub struct PayloadFile {
    pub source: PathBuf,
    pub dest_name: String,
}

/// Everything the builder needs to materialize one image.
#[derive(Debug, Clone)]
pub struct DiskImageSpec {
    pub size_mb: u64,
    pub output: PathBuf,
    pub mount_point: PathBuf,
    pub payload: Vec<PayloadFile>,
    /// Overwrite an existing output without confirmation.
    pub force: bool,
}

impl DiskImageSpec {
    /// Standard three-file boot payload under fixed destination names.
    /// The mount point is scoped to the output path.
    pub fn for_boot_files(
        output: &Path,
        size_mb: u64,
        kernel: &Path,
        initrd: &Path,
        config: &Path,
        force: bool,
    ) -> Self {
        let mount_point = output.with_file_name(format!(
            "{}.mnt",
            output.file_name().and_then(|n| n.to_str()).unwrap_or("boot.img")
        ));
        Self {
            size_mb,
            output: output.to_path_buf(),
            mount_point,
            payload: vec![
                PayloadFile {
                    source: kernel.to_path_buf(),
                    dest_name: KERNEL_DEST.to_string(),
                },
                PayloadFile {
                    source: initrd.to_path_buf(),
                    dest_name: INITRD_DEST.to_string(),
                },
                PayloadFile {
                    source: config.to_path_buf(),
                    dest_name: CONFIG_DEST.to_string(),
                },
            ],
            force,
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.size_mb * 1024 * 1024
    }

    /// Combined payload size. Every file must already exist.
    pub fn payload_bytes(&self) -> Result<u64> {
        let mut total = 0u64;
        for file in &self.payload {
            total += fs::metadata(&file.source)
                .with_context(|| format!("Failed to stat {}", file.source.display()))?
                .len();
        }
        Ok(total)
    }
}

/// Builder state. Transitions run in declaration order; cleanup is
/// reachable from every intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImageState {
    Idle,
    Validated,
    ImageCreated,
    Formatted,
    BootloaderInstalled,
    Mounted,
    FilesCopied,
    Unmounted,
}

pub struct DiskImageBuilder {
    spec: DiskImageSpec,
    state: ImageState,
    interrupt: Option<Arc<AtomicBool>>,
}

impl DiskImageBuilder {
    pub fn new(spec: DiskImageSpec) -> Self {
        Self {
            spec,
            state: ImageState::Idle,
            interrupt: None,
        }
    }

    /// Observe a termination-signal flag between state transitions.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Run the full pipeline. On any failure the cleanup transition has
    /// already run by the time the error is returned.
    pub fn run(&mut self) -> Result<Artifact> {
        // One builder per output path and per mount point.
        let _output_lock = PathLock::acquire(&self.spec.output)
            .context("output image is in use by another build")?;
        let _mount_lock =
            PathLock::acquire(&self.spec.mount_point).map_err(|e| BuildError::MountFailure {
                mount_point: self.spec.mount_point.clone(),
                reason: format!("{e:#}"),
            })?;

        self.checkpoint()?;
        self.validate()?;
        self.checkpoint()?;
        self.create_image()?;
        self.check_capacity()?;
        self.checkpoint()?;
        self.format()?;
        self.checkpoint()?;
        self.install_bootloader()?;
        self.checkpoint()?;
        self.copy_payload()?;

        println!("=== Disk Image Built ===");
        println!("  Output: {}", self.spec.output.display());
        Artifact::from_path(ArtifactKind::RawDiskImage, &self.spec.output)
    }

    /// Step 1: every payload file exists and is non-empty.
    fn validate(&mut self) -> Result<()> {
        for file in &self.spec.payload {
            let ok = fs::metadata(&file.source).map(|m| m.len() > 0).unwrap_or(false);
            if !ok {
                return Err(BuildError::MissingInputFile {
                    path: file.source.clone(),
                }
                .into());
            }
        }
        self.state = ImageState::Validated;
        Ok(())
    }

    /// Step 2: allocate the zero-filled raw image. Overwriting an
    /// existing image requires the force flag (the CLI may have asked
    /// the user interactively and translated a "yes" into force).
    fn create_image(&mut self) -> Result<()> {
        if self.spec.output.exists() && !self.spec.force {
            return Err(BuildError::UserAborted(format!(
                "{} already exists (pass --force to overwrite)",
                self.spec.output.display()
            ))
            .into());
        }

        println!(
            "Creating {} MB image at {}...",
            self.spec.size_mb,
            self.spec.output.display()
        );
        let file = File::create(&self.spec.output)
            .with_context(|| format!("Failed to create {}", self.spec.output.display()))?;
        file.set_len(self.spec.capacity_bytes())
            .context("Failed to size the image file")?;
        self.state = ImageState::ImageCreated;
        Ok(())
    }

    /// Payload must fit before any filesystem write happens.
    fn check_capacity(&self) -> Result<()> {
        let payload_bytes = self.spec.payload_bytes()?;
        let capacity_bytes = self.spec.capacity_bytes();
        if payload_bytes > capacity_bytes {
            return Err(BuildError::CapacityExceeded {
                payload_bytes,
                capacity_bytes,
            }
            .into());
        }
        Ok(())
    }

    /// Step 3: FAT32, the filesystem syslinux expects.
    fn format(&mut self) -> Result<()> {
        println!("Formatting (FAT32)...");
        Cmd::new("mkfs.vfat")
            .args(["-F", "32"])
            .arg_path(&self.spec.output)
            .error_msg("mkfs.vfat failed")
            .run()?;
        self.state = ImageState::Formatted;
        Ok(())
    }

    /// Step 4: write the boot sector and loader into the image.
    fn install_bootloader(&mut self) -> Result<()> {
        println!("Installing bootloader...");
        Cmd::new("syslinux")
            .args(["--install"])
            .arg_path(&self.spec.output)
            .error_msg("syslinux installation failed")
            .run()?;
        self.state = ImageState::BootloaderInstalled;
        Ok(())
    }

    /// Steps 5-7: mount, copy payload under fixed names, unmount. The
    /// guard releases the mount on every exit path out of this scope.
    fn copy_payload(&mut self) -> Result<()> {
        let guard = MountGuard::mount(&self.spec.output, &self.spec.mount_point)?;
        self.state = ImageState::Mounted;

        for file in &self.spec.payload {
            self.checkpoint()?;
            println!("  copying {} -> {}", file.source.display(), file.dest_name);
            guard.copy_in(&file.source, &file.dest_name)?;
        }
        self.state = ImageState::FilesCopied;

        guard.finish()?;
        self.state = ImageState::Unmounted;
        Ok(())
    }

    /// A pending termination signal takes the same route as an error;
    /// guards in scope unwind the mount exactly like any other failure.
    fn checkpoint(&self) -> Result<()> {
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                return Err(BuildError::Interrupted.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use tempfile::TempDir;

    fn boot_inputs(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let kernel = dir.join("bzImage");
        fs::write(&kernel, vec![0xaa; 4096]).unwrap();
        let initrd = dir.join("initramfs");
        fs::write(&initrd, vec![0xbb; 2048]).unwrap();
        let config = dir.join("syslinux.cfg");
        fs::write(&config, b"DEFAULT miniso\n").unwrap();
        (kernel, initrd, config)
    }

    fn spec(dir: &Path, size_mb: u64, force: bool) -> DiskImageSpec {
        let (kernel, initrd, config) = boot_inputs(dir);
        DiskImageSpec::for_boot_files(
            &dir.join("boot.img"),
            size_mb,
            &kernel,
            &initrd,
            &config,
            force,
        )
    }

    #[test]
    fn missing_payload_fails_validation_without_touching_anything() {
        let tmp = TempDir::new().unwrap();
        let spec = DiskImageSpec::for_boot_files(
            &tmp.path().join("boot.img"),
            DEFAULT_SIZE_MB,
            &tmp.path().join("no-kernel"),
            &tmp.path().join("no-initrd"),
            &tmp.path().join("no-config"),
            false,
        );
        let mount_point = spec.mount_point.clone();
        let output = spec.output.clone();

        let mut builder = DiskImageBuilder::new(spec);
        let err = builder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingInputFile { .. })
        ));
        assert_eq!(builder.state(), ImageState::Idle);
        assert!(!output.exists(), "image must not be created");
        assert!(!mount_point.exists(), "mount point must not exist");
    }

    #[test]
    fn existing_output_without_force_is_user_aborted() {
        let tmp = TempDir::new().unwrap();
        let spec = spec(tmp.path(), DEFAULT_SIZE_MB, false);
        fs::write(&spec.output, b"precious existing image").unwrap();

        let mut builder = DiskImageBuilder::new(spec.clone());
        let err = builder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::UserAborted(_))
        ));
        assert_eq!(
            fs::read(&spec.output).unwrap(),
            b"precious existing image",
            "declined overwrite must leave the file untouched"
        );
    }

    #[test]
    fn oversized_payload_fails_before_format() {
        let tmp = TempDir::new().unwrap();
        let mut spec = spec(tmp.path(), 1, true);
        // 2 MB payload into a 1 MB image.
        fs::write(&spec.payload[0].source, vec![0u8; 2 * 1024 * 1024]).unwrap();
        spec.force = true;

        let mount_point = spec.mount_point.clone();
        let output = spec.output.clone();
        let mut builder = DiskImageBuilder::new(spec);
        let err = builder.run().unwrap_err();

        match err.downcast_ref::<BuildError>() {
            Some(BuildError::CapacityExceeded {
                payload_bytes,
                capacity_bytes,
            }) => {
                assert!(payload_bytes > capacity_bytes);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(builder.state(), ImageState::ImageCreated);

        // Zero-filled only: no boot sector signature means no format ran.
        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[510..512], &[0u8, 0u8]);
        assert!(!mount_point.exists());
    }

    #[test]
    fn interrupt_flag_takes_the_cleanup_path() {
        let tmp = TempDir::new().unwrap();
        let spec = spec(tmp.path(), DEFAULT_SIZE_MB, true);
        let mount_point = spec.mount_point.clone();

        let flag = Arc::new(AtomicBool::new(true));
        let mut builder = DiskImageBuilder::new(spec).with_interrupt_flag(flag);
        let err = builder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Interrupted)
        ));
        assert!(!mount_point.exists());
    }

    #[test]
    fn locked_mount_point_rejects_a_second_builder() {
        let tmp = TempDir::new().unwrap();
        let spec = spec(tmp.path(), DEFAULT_SIZE_MB, true);

        let _held = PathLock::acquire(&spec.mount_point).unwrap();
        let mut builder = DiskImageBuilder::new(spec);
        let err = builder.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MountFailure { .. })
        ));
    }

    /// Full pipeline. Needs mkfs.vfat and syslinux; the mount step needs
    /// root and loop device support. Whatever the outcome, the mount
    /// point must be gone afterwards - that is the property under test.
    #[test]
    fn pipeline_never_leaves_a_mount_point_behind() {
        for tool in ["mkfs.vfat", "syslinux", "mount", "umount"] {
            if !process::exists(tool) {
                eprintln!("skipping: {} not installed", tool);
                return;
            }
        }
        let tmp = TempDir::new().unwrap();
        let spec = spec(tmp.path(), DEFAULT_SIZE_MB, true);
        let output = spec.output.clone();
        let mount_point = spec.mount_point.clone();

        let mut builder = DiskImageBuilder::new(spec);
        match builder.run() {
            Ok(artifact) => {
                assert_eq!(builder.state(), ImageState::Unmounted);
                assert!(artifact.size_bytes >= DEFAULT_SIZE_MB * 1024 * 1024);
            }
            Err(err) => {
                // Unprivileged environments fail at the mount step; the
                // image is still created, formatted, and bootable-signed.
                assert!(matches!(
                    err.downcast_ref::<BuildError>(),
                    Some(BuildError::MountFailure { .. })
                ));
            }
        }

        assert!(
            !mount_point.exists(),
            "mount point must neither exist nor be mounted after a run"
        );
        let bytes = fs::read(&output).unwrap();
        assert!(bytes.len() >= (DEFAULT_SIZE_MB * 1024 * 1024) as usize);
        assert_eq!(&bytes[510..512], &[0x55, 0xaa], "boot sector signature");
    }
}
