//! Show command - displays configuration and cache status.

use anyhow::Result;

use crate::commands::build;
use crate::config::Config;
use crate::context::BuildContext;

/// What to show.
#[derive(Debug, Clone, Copy)]
pub enum ShowTarget {
    Config,
    Status,
}

/// Execute the show command.
pub fn cmd_show(ctx: &BuildContext, config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Status => {
            let executor = build::registry(ctx, config)?;
            println!("Build status (next run):");
            for (stage, cached) in executor.cached_stages(ctx) {
                let tag = if cached { "CACHED" } else { "STALE " };
                println!("  [{}] {}", tag, stage);
            }
        }
    }
    Ok(())
}
