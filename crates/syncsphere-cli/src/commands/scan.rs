//! Scan command handler

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use syncsphere_core::manifest::scan_async;
use syncsphere_core::Config;

use crate::output::Output;

/// Print the manifest that would be sent for `dir` (or the configured root)
pub async fn scan(dir: Option<PathBuf>, output: &Output) -> Result<()> {
    let root = match dir {
        Some(dir) => dir,
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            let Some(root) = config.sync_root else {
                bail!(
                    "No directory given and sync_root is not configured. Set it with:\n  \
                     syncsphere config set sync_root ~/Sync"
                );
            };
            root
        }
    };

    let manifest = scan_async(root.clone())
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    output.print_manifest(&manifest);

    Ok(())
}
