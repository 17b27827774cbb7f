use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::IoError;

/// Number of leading bytes handed to `signature_matches`.
pub const SIGNATURE_LEN: usize = 262;

/// Trait for reading byte ranges from a file.
///
/// Format plugins parse containers through this abstraction so that only the
/// bytes they need are read, whatever the backing storage is.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier used in logs and error messages.
    fn identifier(&self) -> &str;
}

// =============================================================================
// LocalFileReader
// =============================================================================

/// Range reader over a file on the local filesystem.
///
/// The handle is shared behind a mutex; every read seeks first, so reads
/// never depend on the position left by a previous one.
pub struct LocalFileReader {
    path: PathBuf,
    identifier: String,
    size: u64,
    file: Mutex<File>,
}

impl LocalFileReader {
    /// Open `path` for range reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = File::open(&path)
            .await
            .map_err(|e| io_error(&identifier, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| io_error(&identifier, e))?
            .len();

        Ok(Self {
            path,
            identifier,
            size,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeReader for LocalFileReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.size) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size,
            });
        }

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(&self.identifier, e))?;
        file.read_exact(&mut buf)
            .await
            .map_err(|e| io_error(&self.identifier, e))?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Read the leading bytes of a file used for signature matching.
///
/// Short files yield fewer than [`SIGNATURE_LEN`] bytes.
pub async fn read_signature(path: impl AsRef<Path>) -> Result<Vec<u8>, IoError> {
    let path = path.as_ref();
    let identifier = path.display().to_string();
    let file = File::open(path)
        .await
        .map_err(|e| io_error(&identifier, e))?;

    let mut buf = Vec::with_capacity(SIGNATURE_LEN);
    file.take(SIGNATURE_LEN as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| io_error(&identifier, e))?;
    Ok(buf)
}

fn io_error(identifier: &str, err: std::io::Error) -> IoError {
    if err.kind() == std::io::ErrorKind::NotFound {
        IoError::NotFound(identifier.to_string())
    } else {
        IoError::Read {
            path: identifier.to_string(),
            message: err.to_string(),
        }
    }
}
