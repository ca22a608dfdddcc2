//! Chunked file transfer
//!
//! Uploads stream a file as consecutive binary frames of `chunk_size` bytes
//! with no per-chunk acknowledgment: the peer counts bytes until the size
//! announced in `upload_start` has arrived. Downloads append every binary
//! frame to the single active write target.
//!
//! At most one upload and one download are active at a time.

use std::path::{Component, Path, PathBuf};

use futures_util::Sink;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{send_control, send_frame, ClientMessage};
use crate::error::{SyncError, SyncResult};
use crate::hash::ContentHasher;

/// Default upload chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Progress of the upload in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub path: String,
    pub bytes_sent: u64,
    pub total: u64,
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub path: String,
    pub size: u64,
    pub hash: String,
    pub frames: usize,
}

/// Summary of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub path: String,
    pub bytes: u64,
}

/// The download currently receiving binary frames
#[derive(Debug)]
struct ActiveDownload {
    path: String,
    target: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    expected: Option<u64>,
}

/// Moves file content between the sync root and the connection
#[derive(Debug)]
pub struct TransferExecutor {
    root: PathBuf,
    chunk_size: usize,
    upload: Option<UploadProgress>,
    download: Option<ActiveDownload>,
}

impl TransferExecutor {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
            upload: None,
            download: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn active_upload(&self) -> Option<&UploadProgress> {
        self.upload.as_ref()
    }

    /// Path of the active download, if any
    pub fn active_download(&self) -> Option<&str> {
        self.download.as_ref().map(|d| d.path.as_str())
    }

    /// Drop all in-flight transfer state
    ///
    /// Partially written downloads stay on disk; nothing resumes them.
    pub fn reset(&mut self) {
        if let Some(upload) = self.upload.take() {
            info!(
                "Discarding upload of {} after {}/{} bytes",
                upload.path, upload.bytes_sent, upload.total
            );
        }
        if let Some(download) = self.download.take() {
            info!(
                "Discarding download of {} after {} bytes",
                download.path, download.bytes_written
            );
        }
    }

    /// Stream one file to the peer
    ///
    /// Failures before `upload_start` is sent leave the connection usable
    /// and are returned as-is. Once the peer is counting bytes, any failure
    /// is returned as a connection error because the stream can no longer
    /// be realigned.
    pub async fn upload<S>(&mut self, path: &str, sink: &mut S) -> SyncResult<UploadReceipt>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let source = resolve(&self.root, path)?;
        let file = File::open(&source)
            .await
            .map_err(|e| SyncError::io(&source, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| SyncError::io(&source, e))?;
        if !metadata.is_file() {
            return Err(SyncError::ProtocolViolation(format!(
                "planned upload {} is not a regular file",
                path
            )));
        }
        let size = metadata.len();

        send_control(
            sink,
            &ClientMessage::UploadStart {
                path: path.to_string(),
                size,
            },
        )
        .await?;

        self.upload = Some(UploadProgress {
            path: path.to_string(),
            bytes_sent: 0,
            total: size,
        });

        let result = self.stream_chunks(file, size, sink).await;
        self.upload = None;

        let (hash, frames) = result.map_err(|e| match e {
            SyncError::Connection(_) | SyncError::IntegrityMismatch { .. } => e,
            other => SyncError::Connection(format!("upload of {} aborted: {}", path, other)),
        })?;

        send_control(
            sink,
            &ClientMessage::UploadComplete {
                path: path.to_string(),
                hash: hash.clone(),
            },
        )
        .await?;

        debug!("Uploaded {} ({} bytes, {} frames)", path, size, frames);
        Ok(UploadReceipt {
            path: path.to_string(),
            size,
            hash,
            frames,
        })
    }

    async fn stream_chunks<S>(
        &mut self,
        file: File,
        size: u64,
        sink: &mut S,
    ) -> SyncResult<(String, usize)>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        // Never send more than announced, even if the file grew meanwhile
        let mut reader = file.take(size);
        let mut hasher = ContentHasher::new();
        let mut frames = 0;
        let mut sent = 0u64;

        loop {
            let mut chunk = vec![0u8; self.chunk_size];
            let filled = read_chunk(&mut reader, &mut chunk).await.map_err(|e| {
                let path = self.upload.as_ref().map(|u| u.path.clone());
                SyncError::io(path.unwrap_or_default(), e)
            })?;
            if filled == 0 {
                break;
            }
            chunk.truncate(filled);
            hasher.update(&chunk);

            send_frame(sink, Message::Binary(chunk)).await?;
            frames += 1;
            sent += filled as u64;
            if let Some(progress) = self.upload.as_mut() {
                progress.bytes_sent = sent;
            }

            if filled < self.chunk_size {
                break;
            }
        }

        if sent != size {
            let path = self
                .upload
                .as_ref()
                .map(|u| u.path.clone())
                .unwrap_or_default();
            return Err(SyncError::IntegrityMismatch {
                path,
                details: format!("announced {} bytes but only {} were readable", size, sent),
            });
        }

        Ok((hasher.finalize(), frames))
    }

    /// Drop the active download, leaving the partial file in place
    ///
    /// Returns the abandoned path, if a download was active.
    pub fn abandon_download(&mut self) -> Option<String> {
        self.download.take().map(|d| {
            warn!(
                "Abandoning download of {} after {} bytes",
                d.path, d.bytes_written
            );
            d.path
        })
    }

    /// Open the write target for `path` and make it the active download
    ///
    /// Any download still active is abandoned first, whether or not the new
    /// target can be opened; callers that need its path take it with
    /// [`abandon_download`](Self::abandon_download) beforehand. On error no
    /// download is active and binary frames are dropped.
    pub async fn start_download(&mut self, path: &str, expected: Option<u64>) -> SyncResult<()> {
        self.abandon_download();

        let target = resolve(&self.root, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        let file = File::create(&target)
            .await
            .map_err(|e| SyncError::io(&target, e))?;

        debug!("Receiving {} into {:?}", path, target);
        self.download = Some(ActiveDownload {
            path: path.to_string(),
            target,
            writer: BufWriter::new(file),
            bytes_written: 0,
            expected,
        });

        Ok(())
    }

    /// Append a binary frame to the active download
    ///
    /// Returns `false` when no download is active and the frame was dropped.
    /// A write failure abandons the download.
    pub async fn write_chunk(&mut self, data: &[u8]) -> SyncResult<bool> {
        let Some(download) = self.download.as_mut() else {
            return Ok(false);
        };

        let result = download.writer.write_all(data).await;
        if let Err(e) = result {
            let target = download.target.clone();
            self.download = None;
            return Err(SyncError::io(target, e));
        }
        download.bytes_written += data.len() as u64;
        Ok(true)
    }

    /// Flush and close the active download
    ///
    /// Returns `None` when no download was active.
    pub async fn finish_download(&mut self) -> SyncResult<Option<DownloadReceipt>> {
        let Some(mut download) = self.download.take() else {
            return Ok(None);
        };

        download
            .writer
            .flush()
            .await
            .map_err(|e| SyncError::io(&download.target, e))?;
        download
            .writer
            .shutdown()
            .await
            .map_err(|e| SyncError::io(&download.target, e))?;

        if let Some(expected) = download.expected {
            if expected != download.bytes_written {
                // Verification belongs to the peer; only note it here
                warn!(
                    "Download of {} announced {} bytes, received {}",
                    download.path, expected, download.bytes_written
                );
            }
        }

        Ok(Some(DownloadReceipt {
            path: download.path,
            bytes: download.bytes_written,
        }))
    }
}

/// Map a wire path onto the root, refusing anything that could escape it
fn resolve(root: &Path, path: &str) -> SyncResult<PathBuf> {
    let relative = Path::new(path);
    let is_plain = !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if !is_plain {
        return Err(SyncError::ProtocolViolation(format!(
            "refusing path outside the sync root: {:?}",
            path
        )));
    }

    Ok(root.join(relative))
}

/// Fill `buf` unless the reader ends first
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::digest;
    use crate::sync::testing::RecordingSink;
    use tempfile::TempDir;

    fn binary_frames(sink: &RecordingSink) -> Vec<usize> {
        sink.frames
            .iter()
            .filter_map(|f| match f {
                Message::Binary(data) => Some(data.len()),
                _ => None,
            })
            .collect()
    }

    fn control_messages(sink: &RecordingSink) -> Vec<ClientMessage> {
        sink.frames
            .iter()
            .filter_map(|f| match f {
                Message::Text(text) => Some(serde_json::from_str(text).unwrap()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upload_chunk_count_and_sizes() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..2560u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(dir.path().join("clip.bin"), &content).unwrap();

        let mut executor = TransferExecutor::new(dir.path(), 1024);
        let mut sink = RecordingSink::default();
        let receipt = executor.upload("clip.bin", &mut sink).await.unwrap();

        assert_eq!(binary_frames(&sink), vec![1024, 1024, 512]);
        assert_eq!(receipt.frames, 3);
        assert_eq!(receipt.size, 2560);
        assert_eq!(receipt.hash, digest(&content));
        assert!(executor.active_upload().is_none());

        let messages = control_messages(&sink);
        assert_eq!(
            messages,
            vec![
                ClientMessage::UploadStart {
                    path: "clip.bin".to_string(),
                    size: 2560
                },
                ClientMessage::UploadComplete {
                    path: "clip.bin".to_string(),
                    hash: digest(&content)
                },
            ]
        );
        assert!(matches!(sink.frames.last(), Some(Message::Text(_))));
    }

    #[tokio::test]
    async fn test_upload_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("even.bin"), vec![1u8; 2048]).unwrap();

        let mut executor = TransferExecutor::new(dir.path(), 1024);
        let mut sink = RecordingSink::default();
        executor.upload("even.bin", &mut sink).await.unwrap();

        assert_eq!(binary_frames(&sink), vec![1024, 1024]);
    }

    #[tokio::test]
    async fn test_upload_empty_file_sends_no_frames() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();

        let mut executor = TransferExecutor::new(dir.path(), 1024);
        let mut sink = RecordingSink::default();
        let receipt = executor.upload("empty", &mut sink).await.unwrap();

        assert!(binary_frames(&sink).is_empty());
        assert_eq!(receipt.hash, digest(b""));
        assert_eq!(control_messages(&sink).len(), 2);
    }

    #[tokio::test]
    async fn test_upload_missing_file_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);
        let mut sink = RecordingSink::default();

        let err = executor.upload("gone.txt", &mut sink).await.unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn test_upload_failure_mid_stream_is_a_connection_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![3u8; 3000]).unwrap();

        let mut executor = TransferExecutor::new(dir.path(), 1024);
        // upload_start and one chunk get through
        let mut sink = RecordingSink::failing_after(2);

        let err = executor.upload("big.bin", &mut sink).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(binary_frames(&sink), vec![1024]);
        assert!(executor.active_upload().is_none());
    }

    #[tokio::test]
    async fn test_download_writes_frames_in_order() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        executor
            .start_download("nested/dir/file.txt", Some(11))
            .await
            .unwrap();
        assert_eq!(executor.active_download(), Some("nested/dir/file.txt"));

        assert!(executor.write_chunk(b"hello ").await.unwrap());
        assert!(executor.write_chunk(b"world").await.unwrap());
        let receipt = executor.finish_download().await.unwrap().unwrap();

        assert_eq!(receipt.bytes, 11);
        assert!(executor.active_download().is_none());
        let written = std::fs::read(dir.path().join("nested/dir/file.txt")).unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn test_frames_without_download_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        assert!(!executor.write_chunk(b"stray").await.unwrap());
        assert!(executor.finish_download().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_download_start_abandons_first() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        executor.start_download("first.txt", None).await.unwrap();
        executor.write_chunk(b"partial").await.unwrap();

        executor.start_download("second.txt", None).await.unwrap();
        assert_eq!(executor.active_download(), Some("second.txt"));

        executor.write_chunk(b"complete").await.unwrap();
        let receipt = executor.finish_download().await.unwrap().unwrap();
        assert_eq!(receipt.path, "second.txt");
        assert_eq!(
            std::fs::read(dir.path().join("second.txt")).unwrap(),
            b"complete"
        );
    }

    #[tokio::test]
    async fn test_paths_outside_root_are_refused() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        for path in ["../escape.txt", "/etc/passwd", "a/../../b", ""] {
            let err = executor.start_download(path, None).await.unwrap_err();
            assert!(
                matches!(err, SyncError::ProtocolViolation(_)),
                "{} was accepted",
                path
            );
        }
        assert!(executor.active_download().is_none());
    }

    #[tokio::test]
    async fn test_abandon_download_reports_path() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        assert!(executor.abandon_download().is_none());
        executor.start_download("first.txt", None).await.unwrap();
        assert_eq!(executor.abandon_download().as_deref(), Some("first.txt"));
        assert!(executor.active_download().is_none());
    }

    #[tokio::test]
    async fn test_refused_start_closes_previous_target() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        executor.start_download("a.txt", None).await.unwrap();
        executor.write_chunk(b"AAAA").await.unwrap();

        let err = executor
            .start_download("../evil.txt", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProtocolViolation(_)));
        assert!(executor.active_download().is_none());

        // Frames meant for the refused path go nowhere
        assert!(!executor.write_chunk(b"EVIL").await.unwrap());
        assert!(executor.finish_download().await.unwrap().is_none());
        assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_unopenable_target_closes_previous_target() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), b"file, not a dir").unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        executor.start_download("a.txt", None).await.unwrap();
        let err = executor
            .start_download("blocker/inner.txt", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
        assert!(executor.active_download().is_none());
    }

    #[tokio::test]
    async fn test_reset_discards_active_download() {
        let dir = TempDir::new().unwrap();
        let mut executor = TransferExecutor::new(dir.path(), 1024);

        executor.start_download("x.txt", None).await.unwrap();
        executor.reset();

        assert!(executor.active_download().is_none());
        assert!(!executor.write_chunk(b"late").await.unwrap());
    }
}
