//! Image command - assembles the raw bootable disk image.

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::artifact::ArtifactKind;
use crate::error::BuildError;
use crate::image::{DiskImageBuilder, DiskImageSpec};
use crate::preflight;
use crate::validate;

/// Parsed CLI arguments for `miniso image`.
#[derive(Debug, Clone)]
pub struct ImageArgs {
    pub size_mb: u64,
    pub output: PathBuf,
    pub kernel: PathBuf,
    pub initrd: PathBuf,
    pub config: PathBuf,
    pub force: bool,
}

/// Execute the image command.
pub fn cmd_image(args: &ImageArgs) -> Result<()> {
    preflight::require_tools(preflight::IMAGE_TOOLS)?;

    let mut force = args.force;
    if args.output.exists() && !force {
        force = confirm_overwrite(&args.output)?;
        if !force {
            return Err(BuildError::UserAborted(format!(
                "refusing to overwrite {}",
                args.output.display()
            ))
            .into());
        }
    }

    let interrupted = install_signal_flag()?;
    let spec = DiskImageSpec::for_boot_files(
        &args.output,
        args.size_mb,
        &args.kernel,
        &args.initrd,
        &args.config,
        force,
    );

    let mut builder = DiskImageBuilder::new(spec).with_interrupt_flag(interrupted);
    let artifact = builder.run()?;

    validate::verify_artifact(ArtifactKind::RawDiskImage, &artifact.path)?;
    println!(
        "  Size: {} MB, bootable FAT32, payload: bzImage, initramfs, syslinux.cfg",
        artifact.size_bytes / 1024 / 1024
    );
    Ok(())
}

/// Ask on the terminal; non-interactive runs never overwrite implicitly.
fn confirm_overwrite(output: &std::path::Path) -> Result<bool> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("{} already exists. Overwrite? [y/N] ", output.display());
    std::io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Register SIGINT/SIGTERM to set a flag the builder polls between
/// state transitions. A second signal falls through to the default
/// handler so the process can still be killed outright.
fn install_signal_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_default(signal, Arc::clone(&flag))
            .context("Failed to register signal handler")?;
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .context("Failed to register signal handler")?;
    }
    Ok(flag)
}
