use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use appdump_protocol::FileStat;
use filetime::FileTime;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::TransferError;

/// Streams one named file (`download` transfer) straight to disk.
///
/// Each chunk is written at the handle's current position as it arrives;
/// nothing beyond the current chunk is buffered.
#[derive(Debug)]
pub struct StreamWriter {
    session: String,
    path: PathBuf,
    file: File,
    declared_size: u64,
    received: u64,
    stat: Option<FileStat>,
}

impl StreamWriter {
    /// Wraps an already opened handle (`begin`).
    ///
    /// `stat` carries the device timestamps, re-applied by [`finish`](Self::finish).
    pub fn new(
        session: impl Into<String>,
        path: PathBuf,
        file: File,
        declared_size: u64,
        stat: Option<FileStat>,
    ) -> Self {
        Self {
            session: session.into(),
            path,
            file,
            declared_size,
            received: 0,
            stat,
        }
    }

    /// Appends a chunk at the current write cursor.
    pub async fn on_data(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(bytes).await?;
        self.received += bytes.len() as u64;
        Ok(())
    }

    /// Flushes and closes the handle.
    ///
    /// Writing bumps the modification time, so the device timestamps are
    /// applied once more after the handle is closed. Returns the number of
    /// bytes written.
    pub async fn finish(mut self) -> Result<u64, TransferError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        if let Some(stat) = self.stat {
            apply_file_times(&self.path, &stat).await?;
        }

        if self.received != self.declared_size {
            tracing::debug!(
                session = %self.session,
                path = %self.path.display(),
                declared = self.declared_size,
                received = self.received,
                "file size differs from declared size"
            );
        }
        Ok(self.received)
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Bytes written so far.
    pub fn received(&self) -> u64 {
        self.received
    }
}

/// Creates (or truncates) a destination file with the device's permission bits.
pub async fn create_output_file(path: &Path, mode: u32) -> Result<File, TransferError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode & 0o7777);
    #[cfg(not(unix))]
    let _ = mode;
    Ok(options.open(path).await?)
}

/// Sets access and modification times from device metadata.
pub async fn apply_file_times(path: &Path, stat: &FileStat) -> Result<(), TransferError> {
    let path = path.to_path_buf();
    let atime = file_time_from_ms(stat.atime_ms);
    let mtime = file_time_from_ms(stat.mtime_ms);
    tokio::task::spawn_blocking(move || filetime::set_file_times(&path, atime, mtime))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

/// Writes `buf` at `offset`, creating the file if needed.
///
/// Bytes outside `[offset, offset + buf.len())` are left untouched; writing
/// past the end extends the file (sparse where the platform allows).
pub async fn write_at(path: &Path, offset: u64, buf: &[u8]) -> Result<(), TransferError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(buf).await?;
    file.flush().await?;
    Ok(())
}

/// Zero-fills `[offset, offset + len)`, creating the file if needed.
///
/// Existing bytes in the range are overwritten from a fixed 64 KiB buffer;
/// the part past the current end is produced by extending the file.
pub async fn write_zeros_at(path: &Path, offset: u64, len: u64) -> Result<(), TransferError> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= MAX_FILE_OFFSET)
        .ok_or(TransferError::RegionTooLarge { offset, len })?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    let current = file.metadata().await?.len();

    let overwrite_end = end.min(current);
    if offset < overwrite_end {
        file.seek(SeekFrom::Start(offset)).await?;
        let mut remaining = overwrite_end - offset;
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK as u64) as usize;
            file.write_all(&ZEROS[..n]).await?;
            remaining -= n as u64;
        }
        file.flush().await?;
    }
    if end > current {
        file.set_len(end).await?;
    }
    Ok(())
}

const ZERO_CHUNK: usize = 64 * 1024;
static ZEROS: [u8; ZERO_CHUNK] = [0; ZERO_CHUNK];

/// Largest offset a file can be extended to (`off_t` is signed).
const MAX_FILE_OFFSET: u64 = i64::MAX as u64;

fn file_time_from_ms(ms: f64) -> FileTime {
    let secs = (ms / 1000.0).floor();
    let nanos = ((ms - secs * 1000.0) * 1_000_000.0).round().clamp(0.0, 999_999_999.0);
    FileTime::from_unix_time(secs as i64, nanos as u32)
}
