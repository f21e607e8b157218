//! miniso - minimal OS image builder.
//!
//! Builds a bootable minimal Linux system:
//! - staged pipeline: fetch sources, build kernel + userspace, pack
//!   initramfs, master a bootable ISO
//! - disk image assembly: raw FAT32 image with syslinux boot sector

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use miniso::commands::{self, CleanTarget, FetchTarget, ImageArgs, ShowTarget};
use miniso::config::Config;
use miniso::BuildContext;

#[derive(Parser)]
#[command(name = "miniso")]
#[command(about = "Minimal OS image builder")]
#[command(
    after_help = "QUICK START:\n  miniso preflight  Check host tools\n  miniso build      Build kernel, initramfs, and ISO\n  miniso image      Assemble a raw bootable disk image\n  miniso clean      Remove build artifacts"
)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build all artifacts (fetches sources automatically)
    Build {
        /// Skip the host tool preflight check
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Assemble a raw bootable disk image from existing artifacts
    Image {
        /// Image size in megabytes
        #[arg(long, default_value_t = 50)]
        size: u64,
        /// Output image path
        #[arg(long, default_value = "boot.img")]
        output: PathBuf,
        /// Kernel image path
        #[arg(long, default_value = "./myiso/bzImage")]
        kernel: PathBuf,
        /// Initramfs archive path
        #[arg(long, default_value = "./myiso/initramfs")]
        initrd: PathBuf,
        /// Bootloader configuration path
        #[arg(long, default_value = "./myiso/isolinux/isolinux.cfg")]
        config: PathBuf,
        /// Overwrite an existing output image without confirmation
        #[arg(long)]
        force: bool,
    },

    /// Fetch sources into the cache (usually automatic)
    Fetch {
        #[command(subcommand)]
        what: Option<FetchCommand>,
    },

    /// Copy finished artifacts to a directory and validate them
    Export {
        /// Destination directory
        #[arg(long)]
        dest: PathBuf,
        /// Artifact kinds to export (default: all pipeline products)
        #[arg(long = "kind")]
        kinds: Vec<String>,
    },

    /// Run preflight checks (verify host tools before a build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Clean build artifacts (default: preserves the cache)
    Clean {
        #[command(subcommand)]
        what: Option<CleanCommand>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
}

#[derive(Subcommand)]
enum FetchCommand {
    /// Fetch the kernel source
    Kernel,
    /// Fetch the userspace (busybox) source
    Userspace,
    /// Fetch the bootloader (syslinux) source
    Bootloader,
}

#[derive(Subcommand)]
enum CleanCommand {
    /// Clean cached source trees
    Sources,
    /// Clean stage completion records
    Cache,
    /// Clean everything (outputs + cache)
    All,
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show current configuration
    Config,
    /// Show build status (what would be rebuilt)
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present; real environment wins.
    dotenvy::dotenv().ok();

    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);
    let ctx = BuildContext::new(&base_dir, &config.cache_dir, cli.verbose);

    match cli.command {
        Commands::Build { skip_preflight } => {
            commands::cmd_build(&ctx, &config, skip_preflight)?;
        }

        Commands::Image {
            size,
            output,
            kernel,
            initrd,
            config,
            force,
        } => {
            commands::cmd_image(&ImageArgs {
                size_mb: size,
                output,
                kernel,
                initrd,
                config,
                force,
            })?;
        }

        Commands::Fetch { what } => {
            let target = match what {
                None => FetchTarget::All,
                Some(FetchCommand::Kernel) => FetchTarget::Kernel,
                Some(FetchCommand::Userspace) => FetchTarget::Userspace,
                Some(FetchCommand::Bootloader) => FetchTarget::Bootloader,
            };
            commands::cmd_fetch(&ctx, &config, target)?;
        }

        Commands::Export { dest, kinds } => {
            let kinds = kinds
                .iter()
                .map(|k| k.parse())
                .collect::<Result<Vec<_>>>()?;
            commands::cmd_export(&ctx, &kinds, &dest)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(strict)?;
        }

        Commands::Clean { what } => {
            let target = match what {
                None => CleanTarget::Outputs,
                Some(CleanCommand::Sources) => CleanTarget::Sources,
                Some(CleanCommand::Cache) => CleanTarget::Cache,
                Some(CleanCommand::All) => CleanTarget::All,
            };
            commands::cmd_clean(&ctx, target)?;
        }

        Commands::Show { what } => {
            let target = match what {
                ShowCommand::Config => ShowTarget::Config,
                ShowCommand::Status => ShowTarget::Status,
            };
            commands::cmd_show(&ctx, &config, target)?;
        }
    }

    Ok(())
}
