//! Content digests
//!
//! SHA-256 over file contents only, hex encoded. The peer computes the same
//! digest over the bytes it received.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read buffer for hashing files from disk
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the digest of a byte slice
#[must_use]
pub fn digest(content: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(content);
    hasher.finalize()
}

/// Compute the digest of a file's contents
pub async fn digest_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize())
}

/// Incremental hasher fed while a file is streamed
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    /// Consume the hasher and return the lowercase hex digest
    #[must_use]
    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
