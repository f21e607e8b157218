//! Export command - copies artifacts out of the build tree, then
//! validates the exported copies.

use anyhow::Result;
use std::path::Path;

use crate::artifact::ArtifactKind;
use crate::context::BuildContext;
use crate::export;
use crate::validate;

/// Kinds exported when none are named: the pipeline's products.
const DEFAULT_KINDS: [ArtifactKind; 4] = [
    ArtifactKind::KernelImage,
    ArtifactKind::InitramfsArchive,
    ArtifactKind::BootloaderBinary,
    ArtifactKind::IsoImage,
];

/// Execute the export command.
pub fn cmd_export(ctx: &BuildContext, kinds: &[ArtifactKind], dest: &Path) -> Result<()> {
    let kinds: Vec<ArtifactKind> = if kinds.is_empty() {
        DEFAULT_KINDS.to_vec()
    } else {
        kinds.to_vec()
    };

    println!("=== Exporting Artifacts ===");
    let exported = export::export_artifacts(ctx, &kinds, dest)?;

    println!("\n=== Validating Exports ===");
    validate::verify_all(
        kinds
            .iter()
            .copied()
            .zip(exported.iter().map(|p| p.as_path())),
    )?;
    Ok(())
}
