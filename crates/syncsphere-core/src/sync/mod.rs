//! Sync session for a SyncSphere peer
//!
//! Provides WebSocket-based folder synchronization with a remote peer.
//!
//! ## Protocol
//!
//! 1. Connect via WebSocket and send `hello`
//! 2. Peer answers `device_info`
//! 3. Send the manifest as `file_list`, receive a `sync_plan`
//! 4. Stream planned uploads, then `start_downloads`
//! 5. Peer streams each download between `download_start` and
//!    `download_complete`
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::new(EngineConfig { sync_root: Some(root), ..Default::default() });
//! let handle = spawn_session(SessionConfig::new("ws://localhost:8080/ws"), engine);
//! ```

mod engine;
mod message;
mod session;
mod transfer;

#[cfg(test)]
mod testing;

pub use engine::{
    default_device_name, Direction, EngineConfig, EngineState, SyncEngine, SyncEvent,
    EVENT_CHANNEL_CAPACITY,
};
pub use message::{ClientMessage, ServerMessage};
pub use session::{
    spawn_session, ConnectionStatus, ReconnectPolicy, SessionCommand, SessionConfig,
    SessionHandle, DEFAULT_RECONNECT_DELAY, DEFAULT_RESCAN_INTERVAL,
};
pub use transfer::{
    DownloadReceipt, TransferExecutor, UploadProgress, UploadReceipt, DEFAULT_CHUNK_SIZE,
};
