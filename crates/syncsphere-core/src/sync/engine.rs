//! Sync protocol engine
//!
//! State machine for one device pairing. It reacts to connection events,
//! incoming frames and the periodic rescan tick; the session task owns it
//! and drives it from a single loop, so at most one scan, one upload and
//! one download are ever in flight.
//!
//! ```text
//! Idle -> AwaitingHello -> Ready -> Scanning -> AwaitingPlan
//!      -> ExecutingUploads -> AwaitingDownloads -> Idle
//! ```
//!
//! Handlers only return errors that make the connection unusable. Every
//! other failure is logged, reported as a [`SyncEvent::Error`] and the
//! session continues.

use std::path::PathBuf;

use futures_util::Sink;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::message::{send_control, ClientMessage, ServerMessage};
use super::session::ConnectionStatus;
use super::transfer::{TransferExecutor, DEFAULT_CHUNK_SIZE};
use crate::access::{AccessDecision, FolderAccess, FsFolderAccess};
use crate::error::{SyncError, SyncResult};
use crate::manifest::{scan_async, Manifest};
use crate::plan::SyncPlan;

/// Engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Between sync cycles, or not connected
    Idle,
    /// `hello` sent, waiting for `device_info`
    AwaitingHello,
    /// Handshake done
    Ready,
    /// Building the manifest
    Scanning,
    /// `file_list` sent, waiting for `sync_plan`
    AwaitingPlan,
    /// Streaming planned uploads
    ExecutingUploads,
    /// `start_downloads` sent, the peer drives the rest
    AwaitingDownloads,
}

impl EngineState {
    /// Whether a sync cycle is executing and rescans must wait
    pub fn is_syncing(&self) -> bool {
        matches!(
            self,
            EngineState::Scanning | EngineState::ExecutingUploads | EngineState::AwaitingDownloads
        )
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// Engine moved to a new state
    StateChanged(EngineState),
    /// Peer identified itself
    PeerInfo(String),
    /// Manifest was sent to the peer
    ManifestSent { entries: usize, total_size: u64 },
    /// Plan received and about to run
    PlanReady(SyncPlan),
    /// `current` of `total` transfers finished
    Progress {
        current: usize,
        total: usize,
        label: String,
    },
    /// One file finished
    TransferComplete {
        path: String,
        direction: Direction,
        bytes: u64,
    },
    /// Every transfer in the plan is accounted for
    SyncComplete { uploaded: usize, downloaded: usize },
    /// Something failed; the session continues
    Error(String),
}

/// Pending notifications kept for the event receiver
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sent in `hello`
    pub device_name: String,
    /// Folder to synchronize; without one the engine only handshakes
    pub sync_root: Option<PathBuf>,
    /// Upload chunk size in bytes
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            sync_root: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Describes this client the way a user agent would
pub fn default_device_name() -> String {
    format!(
        "syncsphere/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Bookkeeping for the plan being executed
#[derive(Debug)]
struct Round {
    plan: SyncPlan,
    uploaded: usize,
    /// Uploads sent or skipped
    uploads_finished: usize,
    downloaded: usize,
    /// Downloads completed or abandoned
    downloads_finished: usize,
}

impl Round {
    fn new(plan: SyncPlan) -> Self {
        Self {
            plan,
            uploaded: 0,
            uploads_finished: 0,
            downloaded: 0,
            downloads_finished: 0,
        }
    }

    fn finished(&self) -> usize {
        self.uploads_finished + self.downloads_finished
    }
}

/// Session coordinator for one device pairing
///
/// Constructed once and reset (not rebuilt) whenever the connection drops.
pub struct SyncEngine {
    config: EngineConfig,
    access: Box<dyn FolderAccess>,
    state: EngineState,
    remote_name: Option<String>,
    manifest: Option<Manifest>,
    round: Option<Round>,
    /// Present while access to the sync root is granted
    transfer: Option<TransferExecutor>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            access: Box::new(FsFolderAccess),
            state: EngineState::Idle,
            remote_name: None,
            manifest: None,
            round: None,
            transfer: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Use a different folder access policy
    pub fn with_access(mut self, access: Box<dyn FolderAccess>) -> Self {
        self.access = access;
        self
    }

    /// Take the event receiver (can only be called once)
    ///
    /// Events are dropped while the receiver is full, so a holder that
    /// stops draining it only loses notifications.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Display name reported by the peer
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Manifest most recently sent
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Path of the download currently receiving frames
    pub fn active_download(&self) -> Option<&str> {
        self.transfer.as_ref().and_then(|t| t.active_download())
    }

    /// A new connection is open: request folder access and say hello
    pub async fn on_connected<S>(&mut self, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        self.reset();
        self.transfer = self.request_access();

        send_control(sink, &ClientMessage::hello(&self.config.device_name)).await?;
        self.set_state(EngineState::AwaitingHello);
        Ok(())
    }

    /// The connection is gone; discard everything in flight
    pub fn on_disconnected(&mut self) {
        if self.state != EngineState::Idle {
            info!("Disconnected while {:?}; discarding sync state", self.state);
        }
        self.reset();
        self.transfer = None;
        self.set_state(EngineState::Idle);
    }

    /// Periodic or user-requested rescan
    ///
    /// Ignored while a cycle is executing or before the handshake.
    pub async fn rescan<S>(&mut self, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        match self.state {
            EngineState::Idle | EngineState::Ready | EngineState::AwaitingPlan => {
                self.begin_cycle(sink).await
            }
            state => {
                debug!("Skipping rescan while {:?}", state);
                Ok(())
            }
        }
    }

    /// Dispatch one incoming frame
    pub async fn handle_frame<S>(&mut self, frame: Message, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        match frame {
            Message::Text(text) => match ServerMessage::decode(&text) {
                Ok(msg) => self.handle_message(msg, sink).await,
                Err(e) => {
                    warn!("Ignoring malformed control message: {}", e);
                    Ok(())
                }
            },
            Message::Binary(data) => {
                self.handle_binary(&data).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn handle_message<S>(&mut self, msg: ServerMessage, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        match msg {
            ServerMessage::DeviceInfo { name } => {
                info!("Paired with {}", name);
                self.remote_name = Some(name.clone());
                self.emit(SyncEvent::PeerInfo(name));

                if self.state == EngineState::AwaitingHello {
                    self.set_state(EngineState::Ready);
                    self.begin_cycle(sink).await?;
                }
                Ok(())
            }
            ServerMessage::SyncPlan { plan } => {
                if self.state != EngineState::AwaitingPlan {
                    self.violation(format!("sync_plan received while {:?}", self.state));
                    return Ok(());
                }
                self.execute_plan(plan, sink).await
            }
            ServerMessage::DownloadStart { path, size } => {
                self.on_download_start(&path, size).await;
                Ok(())
            }
            ServerMessage::DownloadComplete { path } => {
                self.on_download_complete(path).await;
                Ok(())
            }
            ServerMessage::Unknown => {
                debug!("Ignoring unknown control message");
                Ok(())
            }
        }
    }

    /// Scan the root and send the manifest
    ///
    /// A failed scan aborts the cycle; the next tick tries again.
    async fn begin_cycle<S>(&mut self, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let Some(root) = self.transfer.as_ref().map(|t| t.root().to_path_buf()) else {
            debug!("No accessible sync root; nothing to scan");
            return Ok(());
        };

        self.round = None;
        self.set_state(EngineState::Scanning);

        let manifest = match scan_async(root).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.emit(SyncEvent::Error(e.to_string()));
                self.set_state(EngineState::Idle);
                return Ok(());
            }
        };

        send_control(sink, &ClientMessage::file_list(&manifest)).await?;
        debug!("Sent manifest with {} entries", manifest.len());
        self.emit(SyncEvent::ManifestSent {
            entries: manifest.len(),
            total_size: manifest.total_size(),
        });
        self.manifest = Some(manifest);
        self.set_state(EngineState::AwaitingPlan);
        Ok(())
    }

    /// Upload everything in order, then hand over to the peer for downloads
    async fn execute_plan<S>(&mut self, plan: SyncPlan, sink: &mut S) -> SyncResult<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        info!(
            "Plan: {} uploads, {} downloads, {} conflicts",
            plan.upload.len(),
            plan.download.len(),
            plan.conflicts.len()
        );
        for conflict in &plan.conflicts {
            info!("Conflict left for the user: {}", conflict.path);
        }
        self.emit(SyncEvent::PlanReady(plan.clone()));

        let total = plan.transfer_count();
        let uploads = plan.upload.clone();
        self.round = Some(Round::new(plan));
        self.set_state(EngineState::ExecutingUploads);

        for (done, item) in uploads.iter().enumerate() {
            self.emit(SyncEvent::Progress {
                current: done,
                total,
                label: format!("Uploading {}", item.path),
            });

            let Some(transfer) = self.transfer.as_mut() else {
                break;
            };
            let result = transfer.upload(&item.path, sink).await;
            let sent = result.is_ok();
            match result {
                Ok(receipt) => self.emit(SyncEvent::TransferComplete {
                    path: receipt.path,
                    direction: Direction::Upload,
                    bytes: receipt.size,
                }),
                Err(e @ (SyncError::Connection(_) | SyncError::IntegrityMismatch { .. })) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!("Skipping upload of {}: {}", item.path, e);
                    self.emit(SyncEvent::Error(e.to_string()));
                }
            }

            if let Some(round) = self.round.as_mut() {
                round.uploads_finished += 1;
                if sent {
                    round.uploaded += 1;
                }
            }
        }

        send_control(sink, &ClientMessage::StartDownloads).await?;
        self.set_state(EngineState::AwaitingDownloads);
        self.report_progress("Waiting for downloads".to_string());
        self.check_round_complete();
        Ok(())
    }

    async fn on_download_start(&mut self, path: &str, size: Option<u64>) {
        if self.state != EngineState::AwaitingDownloads {
            self.violation(format!("download_start for {} while {:?}", path, self.state));
            return;
        }
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };

        // The previous target is closed even if the new one is refused
        let abandoned = transfer.abandon_download();
        let result = transfer.start_download(path, size).await;

        if let Some(abandoned) = abandoned {
            self.violation(format!(
                "download_start for {} before {} completed",
                path, abandoned
            ));
            self.count_finished_download(false);
        }
        match result {
            Ok(()) => self.report_progress(format!("Downloading {}", path)),
            Err(e) => {
                warn!("Cannot receive {}: {}", path, e);
                self.emit(SyncEvent::Error(e.to_string()));
                self.count_finished_download(false);
                self.check_round_complete();
            }
        }
    }

    async fn on_download_complete(&mut self, announced: Option<String>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };

        let result = transfer.finish_download().await;
        match result {
            Ok(Some(receipt)) => {
                if let Some(announced) = announced.filter(|p| *p != receipt.path) {
                    warn!(
                        "download_complete names {} but {} was active",
                        announced, receipt.path
                    );
                }
                debug!("Downloaded {} ({} bytes)", receipt.path, receipt.bytes);
                self.count_finished_download(true);
                self.emit(SyncEvent::TransferComplete {
                    path: receipt.path,
                    direction: Direction::Download,
                    bytes: receipt.bytes,
                });
            }
            Ok(None) => {
                self.violation("download_complete with no active download".to_string());
            }
            Err(e) => {
                warn!("Failed to finalize download: {}", e);
                self.emit(SyncEvent::Error(e.to_string()));
                self.count_finished_download(false);
            }
        }
        self.check_round_complete();
    }

    async fn handle_binary(&mut self, data: &[u8]) {
        let Some(transfer) = self.transfer.as_mut() else {
            debug!("Dropping {} bytes: no sync root", data.len());
            return;
        };

        let result = transfer.write_chunk(data).await;
        match result {
            Ok(true) => {}
            Ok(false) => debug!("Dropping {} bytes: no active download", data.len()),
            Err(e) => {
                warn!("Download write failed: {}", e);
                self.emit(SyncEvent::Error(e.to_string()));
                self.count_finished_download(false);
                self.check_round_complete();
            }
        }
    }

    fn count_finished_download(&mut self, completed: bool) {
        if let Some(round) = self.round.as_mut() {
            round.downloads_finished += 1;
            if completed {
                round.downloaded += 1;
            }
        }
    }

    /// Declare the round done once every planned download is accounted for
    fn check_round_complete(&mut self) {
        if self.state != EngineState::AwaitingDownloads || self.active_download().is_some() {
            return;
        }
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if round.downloads_finished < round.plan.download.len() {
            return;
        }

        let total = round.plan.transfer_count();
        let (uploaded, downloaded) = (round.uploaded, round.downloaded);
        info!(
            "Sync complete: {} uploaded, {} downloaded",
            uploaded, downloaded
        );
        self.emit(SyncEvent::Progress {
            current: total,
            total,
            label: "Sync complete".to_string(),
        });
        self.emit(SyncEvent::SyncComplete {
            uploaded,
            downloaded,
        });
        self.round = None;
        self.set_state(EngineState::Idle);
    }

    fn report_progress(&self, label: String) {
        if let Some(round) = self.round.as_ref() {
            self.emit(SyncEvent::Progress {
                current: round.finished().min(round.plan.transfer_count()),
                total: round.plan.transfer_count(),
                label,
            });
        }
    }

    fn request_access(&self) -> Option<TransferExecutor> {
        let root = self.config.sync_root.as_ref()?;
        match self.access.request(root) {
            AccessDecision::Granted => Some(TransferExecutor::new(root, self.config.chunk_size)),
            AccessDecision::Denied(reason) => {
                warn!("Access to sync root denied: {}", reason);
                self.emit(SyncEvent::Error(format!(
                    "Access to sync root denied: {}",
                    reason
                )));
                None
            }
        }
    }

    fn violation(&self, details: String) {
        let err = SyncError::ProtocolViolation(details);
        warn!("{}", err);
        self.emit(SyncEvent::Error(err.to_string()));
    }

    fn reset(&mut self) {
        self.round = None;
        self.manifest = None;
        self.remote_name = None;
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.reset();
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!("Engine state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(SyncEvent::StateChanged(state));
        }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            trace!("Event queue full, dropping {:?}", event);
        }
    }
}
