//! Sync protocol message types
//!
//! Control messages travel as JSON text frames tagged by `type`. File
//! content travels as raw binary frames with no header; which file they
//! belong to is implied by the last `upload_start` / `download_start`.

use futures_util::{Sink, SinkExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

use crate::error::{SyncError, SyncResult};
use crate::manifest::{Entry, Manifest};
use crate::plan::SyncPlan;

/// Messages sent to the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake carrying a description of this device
    Hello { device: String },

    /// Full manifest of the sync root
    FileList { files: Vec<Entry> },

    /// Announces `size` bytes of binary frames for `path`
    UploadStart { path: String, size: u64 },

    /// Sent after the last chunk, with the digest of the streamed content
    UploadComplete { path: String, hash: String },

    /// Uploads are done; the peer may start streaming downloads
    StartDownloads,
}

/// Messages received from the peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake response
    DeviceInfo {
        #[serde(default)]
        name: String,
    },

    /// Plan computed from our last `file_list`
    SyncPlan { plan: SyncPlan },

    /// Subsequent binary frames belong to `path`
    DownloadStart {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },

    /// Closes the active download
    DownloadComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Any control type this client does not know
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn hello(device: &str) -> Self {
        ClientMessage::Hello {
            device: device.to_string(),
        }
    }

    pub fn file_list(manifest: &Manifest) -> Self {
        ClientMessage::FileList {
            files: manifest.entries().to_vec(),
        }
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::FileList { .. } => "file_list",
            ClientMessage::UploadStart { .. } => "upload_start",
            ClientMessage::UploadComplete { .. } => "upload_complete",
            ClientMessage::StartDownloads => "start_downloads",
        }
    }
}

impl ServerMessage {
    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode as a text frame
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Send one frame, mapping transport failures to connection errors
pub(crate) async fn send_frame<S>(sink: &mut S, frame: Message) -> SyncResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    sink.send(frame)
        .await
        .map_err(|e| SyncError::Connection(e.to_string()))
}

/// Encode and send a control message
pub(crate) async fn send_control<S>(sink: &mut S, msg: &ClientMessage) -> SyncResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    trace!("Sending {}", msg.kind());
    send_frame(sink, msg.to_frame()?).await
}
