//! Miniso - minimal OS image builder.
//!
//! Assembles a bootable minimal operating system from independently
//! produced artifacts:
//! - Kernel image (built by the kernel's own build system)
//! - Initramfs archive (packed from a prepared root filesystem tree)
//! - Bootloader (syslinux/isolinux)
//!
//! Two pipelines:
//! - `build` - staged artifact pipeline with dependency ordering and
//!   cache-keyed skipping, ending in a bootable ISO
//! - `image` - raw FAT disk image assembly (create, format, install
//!   bootloader, mount, copy, unmount) with guaranteed cleanup

pub mod artifact;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod image;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod source;
pub mod validate;

pub use context::BuildContext;
pub use error::BuildError;
