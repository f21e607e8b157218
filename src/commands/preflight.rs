//! Preflight command - checks host tools before a build.

use anyhow::{bail, Result};

use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(strict: bool) -> Result<()> {
    let report = preflight::run_preflight();
    report.print();

    if !report.all_passed() {
        if strict {
            bail!(
                "Preflight failed: {} check(s) failed. Fix the issues above before building.",
                report.fail_count()
            );
        }
        println!("\nSome checks failed; the affected commands will not work.");
    } else {
        println!("\nAll preflight checks passed!");
    }
    Ok(())
}
