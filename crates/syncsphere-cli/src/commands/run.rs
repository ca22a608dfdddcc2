//! Run command handler

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::info;

use syncsphere_core::sync::{spawn_session, SyncEngine};
use syncsphere_core::Config;

use crate::output::Output;

/// Keep the sync root in sync with the peer until interrupted
pub async fn run(
    mut config: Config,
    root: Option<PathBuf>,
    url: Option<String>,
    output: &Output,
) -> Result<()> {
    if let Some(root) = root {
        config.sync_root = Some(root);
    }
    if let Some(url) = url {
        config.set_value("server_url", &url)?;
    }

    let Some(ref sync_root) = config.sync_root else {
        bail!(
            "No folder to sync. Pass --root or set it with:\n  \
             syncsphere config set sync_root ~/Sync"
        );
    };

    output.message(&format!(
        "Syncing {} with {}",
        sync_root.display(),
        config.server_url
    ));
    info!(
        "Starting session: root={:?} url={} device={:?}",
        sync_root, config.server_url, config.device_name
    );

    let engine = SyncEngine::new(config.engine_config());
    let mut handle = spawn_session(config.session_config(), engine);
    let Some(mut events) = handle.event_rx.take() else {
        bail!("Session events already taken");
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => output.print_event(&event),
                    None => {
                        // The task dropped the engine: reconnect limit reached
                        handle.join().await;
                        bail!("Gave up reconnecting to {}", config.server_url);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                output.message("Shutting down...");
                handle.shutdown().await;
                return Ok(());
            }
        }
    }
}
