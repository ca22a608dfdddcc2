//! Quick transfer
//!
//! Sends individual files to the peer outside the sync cycle, as a
//! multipart `POST /upload` on the host serving the WebSocket endpoint.
//! Nothing is written into the sync root and no manifest is involved.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Url};
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info};

use crate::error::QuickTransferError;

/// Read size for the request body
const READ_CHUNK: usize = 64 * 1024;

/// Called with `(bytes_sent, total)` as the body is streamed
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Summary of a finished send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickReceipt {
    pub name: String,
    pub bytes: u64,
    pub status: u16,
}

/// HTTP sender for ad-hoc files
#[derive(Debug, Clone)]
pub struct QuickTransfer {
    client: Client,
    endpoint: Url,
}

impl QuickTransfer {
    /// Target the upload endpoint next to `server_url`
    pub fn new(server_url: &str) -> Result<Self, QuickTransferError> {
        Self::with_client(server_url, Client::new())
    }

    pub fn with_client(server_url: &str, client: Client) -> Result<Self, QuickTransferError> {
        Ok(Self {
            client,
            endpoint: upload_endpoint(server_url)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one file as the `file` field of a multipart form
    pub async fn send_file(
        &self,
        path: &Path,
        on_progress: ProgressFn,
    ) -> Result<QuickReceipt, QuickTransferError> {
        let io_err = |source: io::Error| QuickTransferError::Io {
            path: path.to_path_buf(),
            source,
        };

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| io_err(io::Error::new(io::ErrorKind::InvalidInput, "no file name")))?;

        let file = File::open(path).await.map_err(io_err)?;
        let metadata = file.metadata().await.map_err(io_err)?;
        if !metadata.is_file() {
            return Err(io_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let total = metadata.len();

        let body = Body::wrap_stream(ProgressStream {
            file,
            sent: 0,
            total,
            on_progress,
        });
        let part = Part::stream_with_length(body, total)
            .file_name(name.clone())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        debug!("Sending {} ({} bytes) to {}", name, total, self.endpoint);
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuickTransferError::Rejected {
                name,
                status: status.as_u16(),
            });
        }

        info!("Sent {} ({} bytes)", name, total);
        Ok(QuickReceipt {
            name,
            bytes: total,
            status: status.as_u16(),
        })
    }
}

/// Map `ws://host:port/...` to `http://host:port/upload` (and wss to https)
pub fn upload_endpoint(server_url: &str) -> Result<Url, QuickTransferError> {
    let invalid = |reason: String| QuickTransferError::InvalidUrl {
        url: server_url.to_string(),
        reason,
    };

    let mut url = Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch to {}", scheme)))?;
    url.set_path("/upload");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// File body that reports how much has been handed to the connection
struct ProgressStream {
    file: File,
    sent: u64,
    total: u64,
    on_progress: ProgressFn,
}

impl Stream for ProgressStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut read_buf = ReadBuf::new(&mut buf);

        match Pin::new(&mut this.file).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled().len();
                if filled == 0 {
                    return Poll::Ready(None);
                }
                buf.truncate(filled);
                this.sent += filled as u64;
                (this.on_progress)(this.sent, this.total);
                Poll::Ready(Some(Ok(buf)))
            }
        }
    }
}
