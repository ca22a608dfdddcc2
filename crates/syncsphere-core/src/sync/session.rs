//! Persistent session connection
//!
//! Maintains a long-lived WebSocket connection to the peer and feeds every
//! frame, tick and command into the [`SyncEngine`]. Reconnects after a
//! fixed delay whenever the connection closes or fails.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncEvent};
use crate::error::{SyncError, SyncResult};

/// Default reconnect delay
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default interval between rescans while idle
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Commands sent to the session task
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Rescan and resend the manifest now, unless a sync is running
    SyncNow,
    /// Close the connection and stop reconnecting
    Shutdown,
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connection open
    Connected,
}

/// When and how often to reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait before each reconnect attempt
    pub delay: Duration,
    /// Give up after this many consecutive failed connects (`None` = never)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the peer
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub rescan_interval: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
        }
    }
}

/// Handle to control the session task
pub struct SessionHandle {
    /// Send commands to the session task
    pub command_tx: mpsc::Sender<SessionCommand>,
    /// Engine and connection events, unless the caller already took them
    pub event_rx: Option<mpsc::Receiver<SyncEvent>>,
    /// Watch connection status
    pub status_rx: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Ask for an immediate rescan
    pub async fn sync_now(&self) {
        let _ = self.command_tx.send(SessionCommand::SyncNow).await;
    }

    /// Stop the session and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
        let _ = self.task.await;
    }

    /// Wait for the task to end on its own (retry limit reached)
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn a persistent session
///
/// The task owns the engine. It reconnects after every disconnect until
/// shut down or until the reconnect policy gives up.
pub fn spawn_session(config: SessionConfig, mut engine: SyncEngine) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let event_rx = engine.take_events();

    let task = tokio::spawn(session_loop(config, engine, command_rx, status_tx));

    SessionHandle {
        command_tx,
        event_rx,
        status_rx,
        task,
    }
}

/// Main session loop with reconnection
async fn session_loop(
    config: SessionConfig,
    mut engine: SyncEngine,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let mut failures: u32 = 0;

    loop {
        set_status(&engine, &status_tx, ConnectionStatus::Connecting);

        match connect_async(&config.url).await {
            Ok((ws_stream, _response)) => {
                failures = 0;
                info!("Connected to {}", config.url);
                set_status(&engine, &status_tx, ConnectionStatus::Connected);

                let result = run_connection(ws_stream, &config, &mut engine, &mut command_rx).await;
                engine.on_disconnected();
                set_status(&engine, &status_tx, ConnectionStatus::Disconnected);

                match result {
                    Ok(true) => break,
                    Ok(false) => info!("Connection to {} closed", config.url),
                    Err(e) => {
                        warn!("Connection to {} lost: {}", config.url, e);
                        engine.emit(SyncEvent::Error(e.to_string()));
                    }
                }
            }
            Err(e) => {
                failures += 1;
                let err = SyncError::Connection(e.to_string());
                warn!("Failed to connect to {}: {}", config.url, err);
                engine.emit(SyncEvent::Error(err.to_string()));
                set_status(&engine, &status_tx, ConnectionStatus::Disconnected);

                if config
                    .reconnect
                    .max_attempts
                    .is_some_and(|max| failures >= max)
                {
                    warn!("Giving up after {} failed connection attempts", failures);
                    break;
                }
            }
        }

        // Wait before reconnecting, but check for shutdown command
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect.delay) => {}
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(SessionCommand::SyncNow) => {
                        // A fresh connection scans anyway
                    }
                }
            }
        }
    }

    debug!("Session task finished");
}

/// Drive one connection until it closes or shutdown is requested
///
/// Returns `Ok(true)` on shutdown, `Ok(false)` when the peer closed.
async fn run_connection(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &SessionConfig,
    engine: &mut SyncEngine,
    command_rx: &mut mpsc::Receiver<SessionCommand>,
) -> SyncResult<bool> {
    let (mut write, mut read) = ws_stream.split();

    engine.on_connected(&mut write).await?;

    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.rescan_interval,
        config.rescan_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SessionCommand::SyncNow) => engine.rescan(&mut write).await?,
                    Some(SessionCommand::Shutdown) | None => {
                        write.close().await.ok();
                        return Ok(true);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => return Ok(false),
                    Some(Ok(frame)) => engine.handle_frame(frame, &mut write).await?,
                    Some(Err(e)) => return Err(SyncError::Connection(e.to_string())),
                }
            }

            _ = ticker.tick() => engine.rescan(&mut write).await?,
        }
    }
}

fn set_status(
    engine: &SyncEngine,
    status_tx: &watch::Sender<ConnectionStatus>,
    status: ConnectionStatus,
) {
    if *status_tx.borrow() != status {
        let _ = status_tx.send(status);
        engine.emit(SyncEvent::StatusChanged(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status() {
        assert_eq!(
            ConnectionStatus::Disconnected,
            ConnectionStatus::Disconnected
        );
        assert_ne!(ConnectionStatus::Connected, ConnectionStatus::Connecting);
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::new("ws://localhost:8080/ws");
        assert_eq!(config.reconnect.delay, Duration::from_secs(3));
        assert_eq!(config.reconnect.max_attempts, None);
        assert_eq!(config.rescan_interval, Duration::from_secs(10));
    }
}
