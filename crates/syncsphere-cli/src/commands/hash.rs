//! Hash command handler

use std::path::PathBuf;

use anyhow::{Context, Result};

use syncsphere_core::hash::digest_file;

use crate::output::{Output, OutputFormat};

/// Print the digest an upload of `file` would report
pub async fn hash(file: PathBuf, output: &Output) -> Result<()> {
    let hash = digest_file(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({"path": file.display().to_string(), "hash": hash})
            );
        }
        OutputFormat::Quiet => println!("{}", hash),
        OutputFormat::Human => println!("{}  {}", hash, file.display()),
    }

    Ok(())
}
