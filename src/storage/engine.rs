//! Atomic single-shot upload, chunked upload/merge, and range download math.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};

pub const MAX_CHUNK_BYTES: u64 = 10 * 1024 * 1024;

pub struct UploadOutcome {
    pub stored_name: String,
    pub hash: String,
    pub size: u64,
}

/// Stream `field` into `<upload_dir>/<nanos>_<sanitized>.tmp`, hashing as it
/// goes, fsync, then rename to the final name. Enforces `max_bytes` against
/// `current_usage` twice: once against the caller's declared size (fast
/// reject) and again against the actual byte count once the stream is
/// exhausted.
pub async fn save_single_shot(
    upload_dir: &Path,
    original_name: &str,
    declared_size: Option<u64>,
    max_bytes: u64,
    current_usage: u64,
    mut field: impl Stream<Item = std::result::Result<Bytes, axum::extract::multipart::MultipartError>>
        + Unpin,
) -> Result<UploadOutcome> {
    if let Some(declared) = declared_size {
        if current_usage.saturating_add(declared) > max_bytes {
            return Err(Error::QuotaExceeded);
        }
    }

    let stored_name = super::index::unique_stored_name(original_name);
    let tmp_path = upload_dir.join(format!("{}.tmp", stored_name));
    let final_path = upload_dir.join(&stored_name);

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| Error::BadRequest(e.to_string()))?;
        total += chunk.len() as u64;
        if current_usage.saturating_add(total) > max_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::QuotaExceeded);
        }
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }

    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp_path, &final_path).await?;

    Ok(UploadOutcome {
        stored_name,
        hash: hex::encode(hasher.finalize()),
        size: total,
    })
}

fn chunk_dir(upload_dir: &Path, file_id: &str) -> PathBuf {
    upload_dir.join("chunks").join(file_id)
}

/// Write one chunk part to `<upload>/chunks/<fileID>/<index>`.
pub async fn write_chunk(
    upload_dir: &Path,
    file_id: &str,
    index: u64,
    bytes: &[u8],
) -> Result<()> {
    if bytes.len() as u64 > MAX_CHUNK_BYTES {
        return Err(Error::BadRequest("chunk exceeds 10 MiB".to_string()));
    }
    let dir = chunk_dir(upload_dir, file_id);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(index.to_string());
    tokio::fs::write(&path, bytes).await?;
    Ok(())
}

/// Verify all `total_chunks` parts are present, stream them in order through
/// an fsynced temp file, rename atomically, then delete the chunk directory.
/// On any missing part or copy failure the temp file is removed and the
/// parts are left in place for retry.
pub async fn merge_chunks(
    upload_dir: &Path,
    file_id: &str,
    total_chunks: u64,
    original_name: &str,
) -> Result<UploadOutcome> {
    let dir = chunk_dir(upload_dir, file_id);

    for i in 0..total_chunks {
        if !tokio::fs::try_exists(dir.join(i.to_string())).await? {
            return Err(Error::BadRequest(format!("missing chunk part {}", i)));
        }
    }

    let stored_name = super::index::unique_stored_name(original_name);
    let tmp_path = upload_dir.join(format!("{}.tmp", stored_name));
    let final_path = upload_dir.join(&stored_name);

    let result = merge_chunks_into(&dir, total_chunks, &tmp_path).await;
    let (mut hasher_total, size) = match result {
        Ok(v) => v,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&tmp_path, &final_path).await?;
    tokio::fs::remove_dir_all(&dir).await.ok();

    Ok(UploadOutcome {
        stored_name,
        hash: hex::encode(hasher_total.finalize()),
        size,
    })
}

async fn merge_chunks_into(
    chunk_dir: &Path,
    total_chunks: u64,
    tmp_path: &Path,
) -> Result<(Sha256, u64)> {
    let mut out = tokio::fs::File::create(tmp_path).await?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    for i in 0..total_chunks {
        let part_path = chunk_dir.join(i.to_string());
        let mut part = tokio::fs::File::open(&part_path).await?;
        let mut buf = vec![0u8; 1 << 16];
        loop {
            let n = part.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    out.sync_all().await?;
    Ok((hasher, total))
}

#[derive(Debug, Clone, Copy)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single `Range: bytes=<start>-<end?>` header against `size`.
/// Returns `None` for "no range requested" (caller should serve the whole
/// file with 200), `Some(Ok(range))` for a satisfiable range, or
/// `Some(Err(RangeUnsatisfiable))` otherwise.
pub fn parse_range(header: Option<&str>, size: u64) -> Option<Result<ByteRange>> {
    let header = header?;
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    let start: u64 = match start_str.parse() {
        Ok(v) => v,
        Err(_) => return Some(Err(Error::RangeUnsatisfiable { size })),
    };
    let end: u64 = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        match end_str.parse() {
            Ok(v) => v,
            Err(_) => return Some(Err(Error::RangeUnsatisfiable { size })),
        }
    };

    if size == 0 || start >= size || end < start || end >= size {
        return Some(Err(Error::RangeUnsatisfiable { size }));
    }

    Some(Ok(ByteRange { start, end }))
}

/// Read `range` (or the whole file when `None`) out of `path`.
pub async fn read_range(path: &Path, range: Option<ByteRange>) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    match range {
        None => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            Ok(buf)
        }
        Some(r) => {
            file.seek(std::io::SeekFrom::Start(r.start)).await?;
            let mut buf = vec![0u8; r.len() as usize];
            file.read_exact(&mut buf).await?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_single_byte() {
        let r = parse_range(Some("bytes=0-0"), 100).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 0);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn parse_range_open_ended() {
        let r = parse_range(Some("bytes=4194304-"), 8388608).unwrap().unwrap();
        assert_eq!(r.start, 4194304);
        assert_eq!(r.end, 8388607);
    }

    #[test]
    fn parse_range_out_of_bounds_is_unsatisfiable() {
        let err = parse_range(Some("bytes=200-"), 100).unwrap().unwrap_err();
        assert!(matches!(err, Error::RangeUnsatisfiable { size: 100 }));
    }

    #[test]
    fn no_range_header_returns_none() {
        assert!(parse_range(None, 100).is_none());
    }

    #[tokio::test]
    async fn merge_chunks_concatenates_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path();
        write_chunk(upload_dir, "FILE1", 0, b"hello, ").await.unwrap();
        write_chunk(upload_dir, "FILE1", 1, b"world!").await.unwrap();

        let outcome = merge_chunks(upload_dir, "FILE1", 2, "greeting.txt").await.unwrap();
        let bytes = tokio::fs::read(upload_dir.join(&outcome.stored_name))
            .await
            .unwrap();
        assert_eq!(bytes, b"hello, world!");
        assert_eq!(outcome.size, 13);
    }

    #[tokio::test]
    async fn merge_chunks_fails_on_missing_part() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path();
        write_chunk(upload_dir, "FILE2", 0, b"only part").await.unwrap();

        let result = merge_chunks(upload_dir, "FILE2", 2, "f.bin").await;
        assert!(result.is_err());
        // part 0 is left in place for retry
        assert!(tokio::fs::try_exists(upload_dir.join("chunks/FILE2/0"))
            .await
            .unwrap());
    }
}
