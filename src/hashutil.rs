//! Content-hash helpers: validation of the canonical package hash shape and
//! a tee hasher that digests bytes while spooling them to disk.

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

/// Length of the canonical hex-encoded package hash.
pub const STD_HASH_LEN: usize = 64;

/// Reports whether `hash` has the canonical shape: exactly 64 lowercase hex
/// digits. Every hash persisted by the hub must pass this check first.
pub fn is_std_hash(hash: &str) -> bool {
    hash.len() == STD_HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Writes incoming chunks to an async writer while feeding a SHA-256 digest,
/// so a streamed upload can be stored and content-addressed in one pass.
pub struct TeeHasher<W> {
    writer: W,
    hasher: Sha256,
}

impl<W: tokio::io::AsyncWrite + Unpin> TeeHasher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.hasher.update(chunk);
        self.writer.write_all(chunk).await
    }

    /// Flushes the writer and returns the lowercase hex digest.
    pub async fn finish(mut self) -> std::io::Result<(W, String)> {
        self.writer.flush().await?;
        let digest = hex::encode(self.hasher.finalize());
        Ok((self.writer, digest))
    }
}
