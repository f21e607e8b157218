//! Post-hoc artifact validation.
//!
//! Checks that an exported artifact begins with the binary signature
//! expected for its kind. Read-only: the artifact is never mutated.

use anyhow::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::artifact::ArtifactKind;
use crate::error::BuildError;

/// gzip magic, first two bytes of a compressed initramfs.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// ISO 9660 standard identifier inside the primary volume descriptor,
/// located at 32 KiB + 1 sector offset + 1 byte type field.
const ISO_MAGIC: &[u8; 5] = b"CD001";
const ISO_MAGIC_OFFSET: u64 = 32769;

/// x86 boot sector signature at the end of sector 0.
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xaa];
const BOOT_SIGNATURE_OFFSET: u64 = 510;

/// Linux x86 boot protocol header magic ("HdrS").
const KERNEL_HDR_MAGIC: &[u8; 4] = b"HdrS";
const KERNEL_HDR_OFFSET: u64 = 0x202;

/// Verify the signature of an artifact file for its declared kind.
pub fn verify_artifact(kind: ArtifactKind, path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|_| BuildError::MissingInputFile {
        path: path.to_path_buf(),
    })?;
    if meta.len() == 0 {
        return Err(BuildError::MissingInputFile {
            path: path.to_path_buf(),
        }
        .into());
    }

    match kind {
        ArtifactKind::InitramfsArchive => {
            expect_magic(path, 0, &GZIP_MAGIC, "gzip header")?;
        }
        ArtifactKind::IsoImage => {
            expect_magic(path, ISO_MAGIC_OFFSET, ISO_MAGIC, "ISO 9660 volume descriptor")?;
        }
        ArtifactKind::RawDiskImage => {
            expect_magic(path, BOOT_SIGNATURE_OFFSET, &BOOT_SIGNATURE, "boot sector signature")?;
        }
        ArtifactKind::KernelImage => {
            expect_magic(path, KERNEL_HDR_OFFSET, KERNEL_HDR_MAGIC, "kernel setup header")?;
            expect_magic(path, BOOT_SIGNATURE_OFFSET, &BOOT_SIGNATURE, "boot sector signature")?;
        }
        // Loader blobs vary (isolinux.bin has no stable magic); presence
        // and non-emptiness is the whole contract.
        ArtifactKind::BootloaderBinary => {}
    }
    Ok(())
}

/// Verify every artifact in a list, reporting each as it passes.
pub fn verify_all<'a, I>(artifacts: I) -> Result<()>
where
    I: IntoIterator<Item = (ArtifactKind, &'a Path)>,
{
    for (kind, path) in artifacts {
        verify_artifact(kind, path)?;
        println!("  [OK] {} signature valid: {}", kind, path.display());
    }
    Ok(())
}

fn expect_magic(path: &Path, offset: u64, expected: &[u8], what: &str) -> Result<()> {
    let mut file = File::open(path).map_err(|_| BuildError::MissingInputFile {
        path: path.to_path_buf(),
    })?;
    let mut actual = vec![0u8; expected.len()];
    let read_ok = file
        .seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(&mut actual))
        .is_ok();

    if !read_ok || actual != expected {
        return Err(BuildError::ValidationFailure {
            path: path.to_path_buf(),
            reason: format!("{} not found at offset {}", what, offset),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_with_magic(dir: &Path, name: &str, offset: u64, magic: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut content = vec![0u8; offset as usize + magic.len() + 16];
        content[offset as usize..offset as usize + magic.len()].copy_from_slice(magic);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn gzip_magic_accepted_garbage_rejected() {
        let tmp = TempDir::new().unwrap();
        let good = write_with_magic(tmp.path(), "good.cpio.gz", 0, &GZIP_MAGIC);
        verify_artifact(ArtifactKind::InitramfsArchive, &good).unwrap();

        let bad = tmp.path().join("bad.cpio.gz");
        fs::write(&bad, b"not gzip at all").unwrap();
        let err = verify_artifact(ArtifactKind::InitramfsArchive, &bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn iso_volume_descriptor_at_defined_offset() {
        let tmp = TempDir::new().unwrap();
        let good = write_with_magic(tmp.path(), "a.iso", ISO_MAGIC_OFFSET, ISO_MAGIC);
        verify_artifact(ArtifactKind::IsoImage, &good).unwrap();

        // Magic at the wrong offset does not count.
        let shifted = write_with_magic(tmp.path(), "b.iso", ISO_MAGIC_OFFSET + 1, ISO_MAGIC);
        assert!(verify_artifact(ArtifactKind::IsoImage, &shifted).is_err());
    }

    #[test]
    fn disk_image_needs_boot_signature() {
        let tmp = TempDir::new().unwrap();
        let good = write_with_magic(tmp.path(), "boot.img", BOOT_SIGNATURE_OFFSET, &BOOT_SIGNATURE);
        verify_artifact(ArtifactKind::RawDiskImage, &good).unwrap();

        let blank = tmp.path().join("blank.img");
        fs::write(&blank, vec![0u8; 1024]).unwrap();
        assert!(verify_artifact(ArtifactKind::RawDiskImage, &blank).is_err());
    }

    #[test]
    fn truncated_file_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let short = tmp.path().join("short.iso");
        fs::write(&short, b"tiny").unwrap();
        let err = verify_artifact(ArtifactKind::IsoImage, &short).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::ValidationFailure { .. })
        ));
    }

    #[test]
    fn empty_file_is_missing_input() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty.bin");
        fs::write(&empty, b"").unwrap();
        let err = verify_artifact(ArtifactKind::BootloaderBinary, &empty).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingInputFile { .. })
        ));
    }
}
