//! Build command - runs the staged artifact pipeline.
//!
//! The stage registry is fixed: sources are fetched once, the kernel
//! and userspace build independently on top of them, the initramfs is
//! packed from the userspace tree, and the ISO is mastered from the
//! kernel, the initramfs, and the bootloader source. Each stage is
//! keyed so unchanged inputs are skipped on re-runs.

use anyhow::Result;
use std::fs;

use crate::artifact::{self, ArtifactKind};
use crate::cache;
use crate::config::{Config, SourceSpec};
use crate::context::BuildContext;
use crate::pipeline::{Executor, Stage};
use crate::preflight;
use crate::process::Cmd;
use crate::source::SourceResolver;
use crate::validate;

/// Script run as PID 1 by the kernel once the initramfs is unpacked.
const INIT_SCRIPT: &str = "\
#!/bin/sh
mount -t proc none /proc
mount -t sysfs none /sys
mount -t devtmpfs none /dev 2>/dev/null
echo 'miniso: userspace up'
exec /bin/sh
";

/// Execute the build command.
pub fn cmd_build(ctx: &BuildContext, config: &Config, skip_preflight: bool) -> Result<()> {
    println!("=== MinISO Build ===\n");

    if !skip_preflight {
        preflight::require_tools(preflight::BUILD_TOOLS)?;
    }
    fs::create_dir_all(&ctx.output_dir)?;

    let executor = registry(ctx, config)?;
    let report = executor.run(ctx)?;

    // Always verify, whether stages ran or replayed from cache; this
    // catches broken artifacts from previous runs.
    println!("\n=== Artifact Verification ===");
    validate::verify_all(
        report
            .artifacts
            .values()
            .map(|a| (a.kind, a.path.as_path())),
    )?;

    report.print_summary();
    println!("\nNext: miniso image --kernel output/bzImage --initrd output/initramfs.cpio.gz");
    Ok(())
}

/// The fixed stage registry.
pub fn registry(ctx: &BuildContext, config: &Config) -> Result<Executor> {
    let fetch_specs: Vec<SourceSpec> = vec![
        config.kernel.clone(),
        config.userspace.clone(),
        config.bootloader.clone(),
    ];
    let entries: Vec<String> = fetch_specs.iter().map(|s| s.cache_entry()).collect();
    let entry_refs: Vec<&str> = entries.iter().map(String::as_str).collect();
    let fetch_key = cache::hash_strings(&entry_refs);

    let kernel_spec = config.kernel.clone();
    let userspace_spec = config.userspace.clone();
    let bootloader_spec = config.bootloader.clone();
    let iso_key = cache::hash_strings(&[
        config.kernel.cache_entry().as_str(),
        config.userspace.cache_entry().as_str(),
        config.bootloader.cache_entry().as_str(),
        "image-assembly",
    ]);
    let kernel_key =
        cache::hash_strings(&[config.kernel.cache_entry().as_str(), "kernel-build"]);
    let userspace_key =
        cache::hash_strings(&[config.userspace.cache_entry().as_str(), "userspace-build"]);
    // Re-pack when the staged init actually changed, not just on a
    // version bump; before the first userspace build there is nothing
    // to hash and the stage runs unconditionally.
    let init_path = ctx.rootfs_staging().join("init");
    let initramfs_key = match cache::hash_files(&[&init_path]) {
        Some(init_hash) => cache::hash_strings(&[
            config.userspace.cache_entry().as_str(),
            init_hash.as_str(),
        ]),
        None => cache::hash_strings(&[
            config.userspace.cache_entry().as_str(),
            "initramfs-unbuilt",
        ]),
    };

    let stages = vec![
        Stage::new("source-fetch", &[], {
            let specs = fetch_specs;
            Box::new(move |ctx| {
                let resolver = SourceResolver::new(ctx);
                for spec in &specs {
                    resolver.resolve(spec)?;
                }
                Ok(vec![])
            })
        })
        .cache_key(fetch_key),
        Stage::new("kernel-build", &["source-fetch"], {
            let spec = kernel_spec;
            Box::new(move |ctx| Ok(vec![build_kernel(ctx, &spec)?]))
        })
        .produces(&[ArtifactKind::KernelImage])
        .cache_key(kernel_key),
        Stage::new("userspace-build", &["source-fetch"], {
            let spec = userspace_spec;
            Box::new(move |ctx| {
                build_userspace(ctx, &spec)?;
                Ok(vec![])
            })
        })
        .cache_key(userspace_key),
        Stage::new("initramfs-assembly", &["userspace-build"], {
            Box::new(move |ctx| {
                Ok(vec![artifact::build_initramfs(ctx, &ctx.rootfs_staging())?])
            })
        })
        .produces(&[ArtifactKind::InitramfsArchive])
        .cache_key(initramfs_key),
        Stage::new(
            "image-assembly",
            &["kernel-build", "initramfs-assembly", "source-fetch"],
            {
                let spec = bootloader_spec;
                Box::new(move |ctx| {
                    let resolver = SourceResolver::new(ctx);
                    artifact::build_iso(
                        ctx,
                        &artifact::output_path(ctx, ArtifactKind::KernelImage),
                        &artifact::output_path(ctx, ArtifactKind::InitramfsArchive),
                        &resolver.entry_path(&spec),
                    )
                })
            },
        )
        .produces(&[ArtifactKind::IsoImage, ArtifactKind::BootloaderBinary])
        .cache_key(iso_key),
    ];

    Executor::new(stages)
}

/// Compile the kernel with its own build system and publish bzImage.
fn build_kernel(ctx: &BuildContext, spec: &SourceSpec) -> Result<crate::artifact::Artifact> {
    let src = SourceResolver::new(ctx).entry_path(spec);
    let jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    println!("Building kernel {} (this can take a while)...", spec.version);
    Cmd::new("make")
        .arg("-C")
        .arg_path(&src)
        .arg("defconfig")
        .error_msg("kernel configuration failed")
        .run_interactive()?;
    Cmd::new("make")
        .arg("-C")
        .arg_path(&src)
        .arg(format!("-j{jobs}"))
        .arg("bzImage")
        .error_msg("kernel build failed")
        .run_interactive()?;

    let built = src.join("arch/x86/boot/bzImage");
    let out = artifact::output_path(ctx, ArtifactKind::KernelImage);
    fs::copy(&built, &out)?;
    crate::artifact::Artifact::from_path(ArtifactKind::KernelImage, &out)
}

/// Build busybox and lay out the rootfs staging tree with an init.
fn build_userspace(ctx: &BuildContext, spec: &SourceSpec) -> Result<()> {
    let src = SourceResolver::new(ctx).entry_path(spec);
    let staging = ctx.rootfs_staging();
    let jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    println!("Building userspace {}...", spec.version);
    Cmd::new("make")
        .arg("-C")
        .arg_path(&src)
        .arg("defconfig")
        .error_msg("userspace configuration failed")
        .run_interactive()?;
    Cmd::new("make")
        .arg("-C")
        .arg_path(&src)
        .arg(format!("-j{jobs}"))
        .error_msg("userspace build failed")
        .run_interactive()?;

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    Cmd::new("make")
        .arg("-C")
        .arg_path(&src)
        .arg(format!("CONFIG_PREFIX={}", staging.display()))
        .arg("install")
        .error_msg("userspace install failed")
        .run_interactive()?;

    for dir in ["proc", "sys", "dev", "etc", "tmp", "root"] {
        fs::create_dir_all(staging.join(dir))?;
    }
    write_init(&staging)?;
    Ok(())
}

fn write_init(staging: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let init = staging.join("init");
    fs::write(&init, INIT_SCRIPT)?;
    let mut perms = fs::metadata(&init)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&init, perms)?;
    Ok(())
}
