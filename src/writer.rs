//! Positional chunk writes into a pre-sized destination file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::hash::sha1_hex;

/// result of one committed chunk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes_written: u64,
    /// sha1 of the bytes read back from disk after the write
    pub computed_hash: String,
}

/// Writes chunks of one session's destination file.
///
/// Chunk writes target disjoint ranges and run without locking; only sizing
/// the file goes through the session's guard.
pub struct ChunkWriter {
    path: PathBuf,
    expected_bytes: u64,
    guard: Arc<Mutex<()>>,
}

impl ChunkWriter {
    pub fn new(path: PathBuf, expected_bytes: u64, guard: Arc<Mutex<()>>) -> Self {
        Self {
            path,
            expected_bytes,
            guard,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// create the destination if absent and size it to exactly `expected_bytes`
    pub async fn prepare(&self) -> std::io::Result<()> {
        let _guard = self.guard.lock().await;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        let len = file.metadata().await?.len();
        if len != self.expected_bytes {
            tracing::debug!("Sizing {:?} from {} to {} bytes", self.path, len, self.expected_bytes);
            file.set_len(self.expected_bytes).await?;
        }
        Ok(())
    }

    /// Writes `data` at `offset`, syncs, then reads the range back and hashes
    /// what actually landed on disk.
    pub async fn write_chunk(&self, offset: u64, data: &[u8]) -> std::io::Result<WriteOutcome> {
        self.prepare().await?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_data().await?;

        file.seek(SeekFrom::Start(offset)).await?;
        let mut readback = vec![0u8; data.len()];
        file.read_exact(&mut readback).await?;
        tracing::trace!("Wrote {} bytes at offset {} of {:?}", data.len(), offset, self.path);

        Ok(WriteOutcome {
            bytes_written: data.len() as u64,
            computed_hash: sha1_hex(&readback),
        })
    }
}

/// Reads up to `len` bytes at `offset`.
///
/// Returns `None` when `offset` lies at or beyond the end of the file, i.e. the
/// range has not been written yet. A range that crosses the end is truncated.
pub async fn read_range(path: &Path, offset: u64, len: u64) -> std::io::Result<Option<Vec<u8>>> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();
    if offset >= size {
        return Ok(None);
    }
    let real_len = len.min(size - offset) as usize;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; real_len];
    file.read_exact(&mut buffer).await?;
    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(dir: &Path, expected: u64) -> ChunkWriter {
        ChunkWriter::new(dir.join("dest.bin"), expected, Arc::new(Mutex::new(())))
    }

    #[tokio::test]
    async fn out_of_order_writes_land_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), 10);

        let second = w.write_chunk(4, b"efgh").await.unwrap();
        assert_eq!(second.computed_hash, sha1_hex(b"efgh"));
        assert_eq!(std::fs::metadata(w.path()).unwrap().len(), 10);

        w.write_chunk(0, b"abcd").await.unwrap();
        w.write_chunk(8, b"ij").await.unwrap();
        assert_eq!(std::fs::read(w.path()).unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn prepare_resizes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), 4);
        std::fs::write(w.path(), b"0123456789").unwrap();
        w.prepare().await.unwrap();
        assert_eq!(std::fs::read(w.path()).unwrap(), b"0123");
    }

    #[tokio::test]
    async fn concurrent_first_writes_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let w = Arc::new(writer(dir.path(), 8));
        let a = {
            let w = w.clone();
            tokio::spawn(async move { w.write_chunk(0, b"AAAA").await })
        };
        let b = {
            let w = w.clone();
            tokio::spawn(async move { w.write_chunk(4, b"BBBB").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(std::fs::read(w.path()).unwrap(), b"AAAABBBB");
    }

    #[tokio::test]
    async fn read_range_handles_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(read_range(&path, 0, 2).await.unwrap().unwrap(), b"he");
        assert_eq!(read_range(&path, 3, 10).await.unwrap().unwrap(), b"lo");
        assert!(read_range(&path, 5, 1).await.unwrap().is_none());
    }
}
