//! Preflight checks.
//!
//! Validates host tools before a build so failures happen up front with
//! package hints instead of halfway through a pipeline. Run with
//! `miniso preflight`; the build and image commands check their own
//! required subset automatically.

use anyhow::Result;

use crate::error::BuildError;
use crate::process;

/// Tools the staged build pipeline shells out to.
pub const BUILD_TOOLS: &[(&str, &str, &str)] = &[
    ("curl", "curl", "Required to fetch source archives"),
    ("tar", "tar", "Required to unpack source archives"),
    ("sh", "sh", "Required to drive archive packing"),
    ("cpio", "cpio", "Required to pack the initramfs"),
    ("gzip", "gzip", "Required to compress the initramfs"),
    ("xorriso", "xorriso", "Required to master the bootable ISO"),
    ("make", "make", "Required to drive kernel/userspace builds"),
];

/// Tools the disk image builder shells out to.
pub const IMAGE_TOOLS: &[(&str, &str, &str)] = &[
    ("mkfs.vfat", "dosfstools", "Required to format the disk image"),
    ("syslinux", "syslinux", "Required to install the bootloader"),
    ("mount", "util-linux", "Required to mount the disk image"),
    ("umount", "util-linux", "Required to unmount the disk image"),
];

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Build will fail.
    Fail,
    /// Usable, but degraded.
    Warn,
}

impl CheckResult {
    fn pass(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.checks {
            let tag = match check.status {
                CheckStatus::Pass => "PASS",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Warn => "WARN",
            };
            match &check.details {
                Some(details) => println!("  [{}] {}: {}", tag, check.name, details),
                None => println!("  [{}] {}", tag, check.name),
            }
        }
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        println!("\nSummary: {}/{} passed", passed, self.checks.len());
        if self.fail_count() > 0 {
            println!("         {} FAILED - build will not succeed", self.fail_count());
        }
    }
}

/// Run all checks (build + image tool sets).
pub fn run_preflight() -> PreflightReport {
    let mut checks = Vec::new();
    for &(tool, package, purpose) in BUILD_TOOLS.iter().chain(IMAGE_TOOLS) {
        checks.push(check_tool(tool, package, purpose));
    }
    PreflightReport { checks }
}

fn check_tool(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::lookup(tool) {
        Some(path) => CheckResult::pass(tool, &path.display().to_string()),
        None => CheckResult::fail(
            tool,
            &format!("Not found. Install '{}' package. {}", package, purpose),
        ),
    }
}

/// Require a tool set up front; the first absent tool aborts with
/// `MissingDependency` naming the package to install.
pub fn require_tools(tools: &[(&str, &str, &str)]) -> Result<()> {
    for &(tool, package, purpose) in tools {
        if !process::exists(tool) {
            return Err(BuildError::MissingDependency(format!(
                "'{}' not found in PATH (install '{}'). {}",
                tool, package, purpose
            ))
            .into());
        }
    }
    Ok(())
}
