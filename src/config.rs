//! Configuration management.
//!
//! Reads configuration from a .env file and environment variables
//! (loaded via dotenvy in main; environment takes precedence over
//! compiled-in defaults). Every source has a primary and a fallback
//! location; fetch tries them in that order, once each.

use std::env;
use std::path::{Path, PathBuf};

/// Default kernel release built into the image.
pub const DEFAULT_KERNEL_VERSION: &str = "6.6.8";
const DEFAULT_KERNEL_URL: &str =
    "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.6.8.tar.xz";
const DEFAULT_KERNEL_MIRROR: &str =
    "https://mirrors.edge.kernel.org/pub/linux/kernel/v6.x/linux-6.6.8.tar.xz";

/// Default userspace (busybox provides every utility in the rootfs).
pub const DEFAULT_USERSPACE_VERSION: &str = "1.36.1";
const DEFAULT_USERSPACE_URL: &str = "https://busybox.net/downloads/busybox-1.36.1.tar.bz2";
const DEFAULT_USERSPACE_MIRROR: &str =
    "https://sources.buildroot.net/busybox/busybox-1.36.1.tar.bz2";

/// Default bootloader (syslinux ships both isolinux and the FAT boot sector).
pub const DEFAULT_BOOTLOADER_VERSION: &str = "6.03";
const DEFAULT_BOOTLOADER_URL: &str =
    "https://www.kernel.org/pub/linux/utils/boot/syslinux/syslinux-6.03.tar.xz";
const DEFAULT_BOOTLOADER_MIRROR: &str =
    "https://mirrors.edge.kernel.org/pub/linux/utils/boot/syslinux/syslinux-6.03.tar.xz";

/// One fetchable source tree, keyed by (name, version) in the cache.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub version: String,
    pub primary_url: String,
    pub fallback_url: String,
    /// Expected SHA-256 of the downloaded archive, when pinned.
    pub sha256: Option<String>,
}

impl SourceSpec {
    /// Cache entry name: one subdirectory per (name, version) pair.
    pub fn cache_entry(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Miniso configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Persistent cache directory (sources + stage records).
    pub cache_dir: PathBuf,
    pub kernel: SourceSpec,
    pub userspace: SourceSpec,
    pub bootloader: SourceSpec,
}

impl Config {
    /// Load configuration from the environment (dotenv already applied).
    pub fn load(base_dir: &Path) -> Self {
        let cache_dir = env::var("MINISO_CACHE_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::cache_dir().map(|d| d.join("miniso")))
            .unwrap_or_else(|| base_dir.join(".cache"));

        Self {
            cache_dir,
            kernel: source_from_env(
                "kernel",
                "MINISO_KERNEL",
                DEFAULT_KERNEL_VERSION,
                DEFAULT_KERNEL_URL,
                DEFAULT_KERNEL_MIRROR,
            ),
            userspace: source_from_env(
                "userspace",
                "MINISO_USERSPACE",
                DEFAULT_USERSPACE_VERSION,
                DEFAULT_USERSPACE_URL,
                DEFAULT_USERSPACE_MIRROR,
            ),
            bootloader: source_from_env(
                "bootloader",
                "MINISO_BOOTLOADER",
                DEFAULT_BOOTLOADER_VERSION,
                DEFAULT_BOOTLOADER_URL,
                DEFAULT_BOOTLOADER_MIRROR,
            ),
        }
    }

    /// Print resolved configuration for `show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  MINISO_CACHE_DIR: {}", self.cache_dir.display());
        for spec in [&self.kernel, &self.userspace, &self.bootloader] {
            println!("  {} {}:", spec.name, spec.version);
            println!("    primary:  {}", spec.primary_url);
            println!("    fallback: {}", spec.fallback_url);
            if let Some(sha) = &spec.sha256 {
                println!("    sha256:   {}", sha);
            }
        }
    }
}

fn source_from_env(
    name: &str,
    prefix: &str,
    default_version: &str,
    default_url: &str,
    default_mirror: &str,
) -> SourceSpec {
    let version =
        env::var(format!("{prefix}_VERSION")).unwrap_or_else(|_| default_version.to_string());

    // URL defaults only apply to the default version; a custom version
    // without custom URLs substitutes the version into the default URL.
    let primary_url = env::var(format!("{prefix}_URL"))
        .unwrap_or_else(|_| default_url.replace(default_version, &version));
    let fallback_url = env::var(format!("{prefix}_MIRROR"))
        .unwrap_or_else(|_| default_mirror.replace(default_version, &version));
    let sha256 = env::var(format!("{prefix}_SHA256")).ok();

    SourceSpec {
        name: name.to_string(),
        version,
        primary_url,
        fallback_url,
        sha256,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn custom_version_is_substituted_into_default_urls() {
        env::set_var("MINISO_KERNEL_VERSION", "6.6.9");
        env::remove_var("MINISO_KERNEL_URL");
        env::remove_var("MINISO_KERNEL_MIRROR");

        let config = Config::load(Path::new("/tmp"));
        assert_eq!(config.kernel.version, "6.6.9");
        assert!(config.kernel.primary_url.contains("linux-6.6.9.tar.xz"));
        assert!(config.kernel.fallback_url.contains("linux-6.6.9.tar.xz"));

        env::remove_var("MINISO_KERNEL_VERSION");
    }

    #[test]
    #[serial]
    fn cache_dir_override_wins() {
        env::set_var("MINISO_CACHE_DIR", "/tmp/miniso-test-cache");
        let config = Config::load(Path::new("/tmp"));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/miniso-test-cache"));
        env::remove_var("MINISO_CACHE_DIR");
    }

    #[test]
    #[serial]
    fn cache_entry_is_name_dash_version() {
        env::remove_var("MINISO_USERSPACE_VERSION");
        let config = Config::load(Path::new("/tmp"));
        assert_eq!(
            config.userspace.cache_entry(),
            format!("userspace-{DEFAULT_USERSPACE_VERSION}")
        );
    }
}
