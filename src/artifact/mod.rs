//! Build artifacts - kinds, fixed output paths, and the builders that
//! produce them (initramfs archive, bootable ISO).

pub mod initramfs;
pub mod iso;

pub use initramfs::build_initramfs;
pub use iso::build_iso;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::context::BuildContext;
use crate::error::BuildError;

/// Kinds of artifacts the pipeline produces. At most one artifact of a
/// given kind exists per build context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    KernelImage,
    InitramfsArchive,
    BootloaderBinary,
    IsoImage,
    RawDiskImage,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::KernelImage,
        ArtifactKind::InitramfsArchive,
        ArtifactKind::BootloaderBinary,
        ArtifactKind::IsoImage,
        ArtifactKind::RawDiskImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::KernelImage => "kernel-image",
            ArtifactKind::InitramfsArchive => "initramfs-archive",
            ArtifactKind::BootloaderBinary => "bootloader-binary",
            ArtifactKind::IsoImage => "iso-image",
            ArtifactKind::RawDiskImage => "raw-disk-image",
        }
    }

    /// Fixed file name within the output directory. Downstream stages
    /// rely on these being stable.
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::KernelImage => "bzImage",
            ArtifactKind::InitramfsArchive => "initramfs.cpio.gz",
            ArtifactKind::BootloaderBinary => "isolinux.bin",
            ArtifactKind::IsoImage => "miniso.iso",
            ArtifactKind::RawDiskImage => "boot.img",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kernel-image" => Ok(ArtifactKind::KernelImage),
            "initramfs-archive" => Ok(ArtifactKind::InitramfsArchive),
            "bootloader-binary" => Ok(ArtifactKind::BootloaderBinary),
            "iso-image" => Ok(ArtifactKind::IsoImage),
            "raw-disk-image" => Ok(ArtifactKind::RawDiskImage),
            other => anyhow::bail!("unknown artifact kind '{}'", other),
        }
    }
}

/// A produced artifact: kind, path, size, optional content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: Option<String>,
}

impl Artifact {
    /// Record an artifact that must already exist and be non-empty.
    pub fn from_path(kind: ArtifactKind, path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|_| BuildError::MissingInputFile {
            path: path.to_path_buf(),
        })?;
        if meta.len() == 0 {
            return Err(BuildError::MissingInputFile {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            sha256: None,
        })
    }

    /// True if the recorded path still exists on disk.
    pub fn still_present(&self) -> bool {
        self.path.is_file()
    }
}

/// Fixed output path for an artifact kind in this build context.
pub fn output_path(ctx: &BuildContext, kind: ArtifactKind) -> PathBuf {
    ctx.output_dir.join(kind.file_name())
}
