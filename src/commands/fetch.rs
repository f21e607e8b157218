//! Fetch command - resolves sources into the cache (usually automatic).

use anyhow::Result;

use crate::config::Config;
use crate::context::BuildContext;
use crate::source::SourceResolver;

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub enum FetchTarget {
    All,
    Kernel,
    Userspace,
    Bootloader,
}

/// Execute the fetch command.
pub fn cmd_fetch(ctx: &BuildContext, config: &Config, target: FetchTarget) -> Result<()> {
    let resolver = SourceResolver::new(ctx);
    let specs = match target {
        FetchTarget::All => vec![&config.kernel, &config.userspace, &config.bootloader],
        FetchTarget::Kernel => vec![&config.kernel],
        FetchTarget::Userspace => vec![&config.userspace],
        FetchTarget::Bootloader => vec![&config.bootloader],
    };

    for spec in specs {
        let path = resolver.resolve(spec)?;
        println!("  {} {} -> {}", spec.name, spec.version, path.display());
    }
    Ok(())
}
