//! Bootable ISO assembler.
//!
//! Lays the kernel, initramfs, and isolinux files out in a staging
//! directory matching the bootloader's expected structure, then masters
//! a BIOS-bootable ISO 9660 image with an El Torito boot catalog via
//! xorriso.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{self, Artifact, ArtifactKind};
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::process::Cmd;

/// isolinux files inside a syslinux source tree.
const ISOLINUX_BIN: &str = "bios/core/isolinux.bin";
const LDLINUX_C32: &str = "bios/com32/elflink/ldlinux/ldlinux.c32";

const ISOLINUX_CFG: &str = "\
DEFAULT miniso
TIMEOUT 30
PROMPT 1

LABEL miniso
    MENU LABEL MinISO
    LINUX /bzImage
    INITRD /initramfs
    APPEND console=tty0 rdinit=/init
";

/// Master a bootable ISO from the kernel, the initramfs archive, and a
/// syslinux source tree. Also publishes the isolinux loader as the
/// bootloader-binary artifact.
pub fn build_iso(
    ctx: &BuildContext,
    kernel: &Path,
    initramfs: &Path,
    bootloader_tree: &Path,
) -> Result<Vec<Artifact>> {
    let isolinux_bin = bootloader_tree.join(ISOLINUX_BIN);
    let ldlinux = bootloader_tree.join(LDLINUX_C32);
    for required in [kernel, initramfs, &isolinux_bin, &ldlinux] {
        require_input(required)?;
    }

    println!("=== Building ISO ===");
    let iso_root = stage_layout(ctx, kernel, initramfs, &isolinux_bin, &ldlinux)?;

    let output = artifact::output_path(ctx, ArtifactKind::IsoImage);
    let temp = output.with_extension("iso.tmp");

    println!("Mastering ISO via xorriso...");
    Cmd::new("xorriso")
        .args(["-as", "mkisofs", "-o"])
        .arg_path(&temp)
        .args(["-c", "isolinux/boot.cat"])
        .args(["-b", "isolinux/isolinux.bin"])
        .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
        .arg_path(&iso_root)
        .error_msg("xorriso failed to master the ISO")
        .run()?;

    fs::rename(&temp, &output)
        .with_context(|| format!("Failed to move ISO into {}", output.display()))?;

    // Publish the loader so it can be exported/validated on its own.
    let bootloader_out = artifact::output_path(ctx, ArtifactKind::BootloaderBinary);
    fs::copy(&isolinux_bin, &bootloader_out).with_context(|| {
        format!("Failed to copy isolinux.bin to {}", bootloader_out.display())
    })?;

    let iso = Artifact::from_path(ArtifactKind::IsoImage, &output)?;
    println!("  ISO: {} ({} MB)", output.display(), iso.size_bytes / 1024 / 1024);
    Ok(vec![
        iso,
        Artifact::from_path(ArtifactKind::BootloaderBinary, &bootloader_out)?,
    ])
}

/// Populate the staging tree: kernel and initramfs under fixed names at
/// the root, isolinux files and config under isolinux/.
fn stage_layout(
    ctx: &BuildContext,
    kernel: &Path,
    initramfs: &Path,
    isolinux_bin: &Path,
    ldlinux: &Path,
) -> Result<PathBuf> {
    let iso_root = ctx.output_dir.join("iso-root");
    if iso_root.exists() {
        fs::remove_dir_all(&iso_root)?;
    }
    fs::create_dir_all(iso_root.join("isolinux"))?;

    fs::copy(kernel, iso_root.join("bzImage"))?;
    fs::copy(initramfs, iso_root.join("initramfs"))?;
    fs::copy(isolinux_bin, iso_root.join("isolinux/isolinux.bin"))?;
    fs::copy(ldlinux, iso_root.join("isolinux/ldlinux.c32"))?;
    fs::write(iso_root.join("isolinux/isolinux.cfg"), ISOLINUX_CFG)?;

    Ok(iso_root)
}

fn require_input(path: &Path) -> Result<()> {
    let ok = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if !ok {
        return Err(BuildError::ValidationFailure {
            path: path.to_path_buf(),
            reason: "required ISO assembly input missing or empty".to_string(),
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
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_inputs(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let kernel = dir.join("bzImage");
        fs::write(&kernel, b"fake kernel").unwrap();
        let initramfs = dir.join("initramfs.cpio.gz");
        fs::write(&initramfs, [0x1f, 0x8b, 0x08, 0x00]).unwrap();

        let tree = dir.join("syslinux");
        for rel in [ISOLINUX_BIN, LDLINUX_C32] {
            let p = tree.join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(&p, b"loader bytes").unwrap();
        }
        (kernel, initramfs, tree)
    }

    #[test]
    fn missing_input_fails_before_any_staging() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        let (kernel, _initramfs, tree) = fake_inputs(tmp.path());

        let err = build_iso(&ctx, &kernel, &tmp.path().join("absent"), &tree).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ValidationFailure { .. })
        ));
        assert!(
            !ctx.output_dir.join("iso-root").exists(),
            "staging must not be touched when inputs are invalid"
        );
    }

    #[test]
    fn mastered_iso_has_volume_descriptor_and_payload_layout() {
        if !process::exists("xorriso") {
            eprintln!("skipping: xorriso not installed");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::for_testing(tmp.path());
        fs::create_dir_all(&ctx.output_dir).unwrap();
        let (kernel, initramfs, tree) = fake_inputs(tmp.path());
        // Make the init-like file executable so permissions survive staging.
        let mut perms = fs::metadata(&kernel).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&kernel, perms).unwrap();

        let artifacts = build_iso(&ctx, &kernel, &initramfs, &tree).unwrap();
        assert_eq!(artifacts.len(), 2);

        let iso = &artifacts[0];
        validate::verify_artifact(ArtifactKind::IsoImage, &iso.path).unwrap();

        let iso_root = ctx.output_dir.join("iso-root");
        assert!(iso_root.join("bzImage").is_file());
        assert!(iso_root.join("initramfs").is_file());
        assert!(iso_root.join("isolinux/isolinux.cfg").is_file());
    }
}
