//! Send command handler

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use syncsphere_core::quick::ProgressFn;
use syncsphere_core::{Config, QuickTransfer};

use crate::output::{percent, Output};

/// Progress is printed each time a file crosses another step of this size
const PROGRESS_STEP: u64 = 10;

/// Send files to the peer without touching the sync root
pub async fn send(files: Vec<PathBuf>, url: Option<String>, output: &Output) -> Result<()> {
    let server_url = match url {
        Some(url) => url,
        None => {
            Config::load()
                .context("Failed to load configuration")?
                .server_url
        }
    };
    let sender = QuickTransfer::new(&server_url)?;
    send_all(&sender, &files, output).await
}

async fn send_all(sender: &QuickTransfer, files: &[PathBuf], output: &Output) -> Result<()> {
    output.message(&format!(
        "Sending {} file(s) to {}",
        files.len(),
        sender.endpoint()
    ));

    let mut failed = 0;
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());

        match sender.send_file(file, progress_reporter(*output, name.clone())).await {
            Ok(receipt) => output.success(&format!("{} sent", receipt.name)),
            Err(e) => {
                failed += 1;
                output.failure(&format!("{} failed: {}", name, e));
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) failed to send", failed, files.len());
    }
    Ok(())
}

/// Print progress in steps rather than on every chunk
fn progress_reporter(output: Output, name: String) -> ProgressFn {
    let last_step = AtomicU64::new(u64::MAX);
    Arc::new(move |sent, total| {
        let step = percent(sent, total) / PROGRESS_STEP;
        if last_step.swap(step, Ordering::Relaxed) != step {
            output.print_send_progress(&name, sent, total);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;

    #[tokio::test]
    async fn test_missing_files_fail_the_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let sender = QuickTransfer::new("ws://127.0.0.1:9/ws").unwrap();
        let output = Output::new(OutputFormat::Quiet);

        let files = vec![dir.path().join("a.txt"), dir.path().join("b.txt")];
        let err = send_all(&sender, &files, &output).await.unwrap_err();
        assert_eq!(err.to_string(), "2 of 2 file(s) failed to send");
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let output = Output::new(OutputFormat::Quiet);
        let result = send(vec![], Some("ftp://nowhere".to_string()), &output).await;
        assert!(result.is_err());
    }
}
