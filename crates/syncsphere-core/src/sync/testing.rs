//! Test doubles for the outgoing half of a connection

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Sink;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Records every frame; optionally drops the connection after `limit` frames
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub frames: Vec<Message>,
    limit: Option<usize>,
}

impl RecordingSink {
    pub fn failing_after(limit: usize) -> Self {
        Self {
            frames: Vec::new(),
            limit: Some(limit),
        }
    }

    /// Bytes carried by binary frames
    pub fn binary_bytes(&self) -> usize {
        self.frames
            .iter()
            .map(|f| match f {
                Message::Binary(data) => data.len(),
                _ => 0,
            })
            .sum()
    }

    /// Decoded `type` of every text frame, in order
    pub fn control_types(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Message::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(text).ok()?;
                    value["type"].as_str().map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }
}

impl Sink<Message> for RecordingSink {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        let this = self.get_mut();
        if this.limit.is_some_and(|limit| this.frames.len() >= limit) {
            return Err(WsError::ConnectionClosed);
        }
        this.frames.push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
