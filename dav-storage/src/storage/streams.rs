use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncSeekExt, AsyncWrite};

use super::{DavStorage, settle};
use crate::error::StorageError;
use crate::paths;
use crate::write_back::{OpenMode, WriteHandle};

/// Local anonymous file holding a downloaded object, positioned at its start.
pub type ReadStream = tokio::fs::File;

/// Handle returned by [`DavStorage::open`].
pub enum FileStream {
    Read(ReadStream),
    Write(WriteHandle),
}

impl DavStorage {
    pub async fn open(&self, path: &str, mode: OpenMode) -> Option<FileStream> {
        if mode.is_read_only() {
            self.open_read(path).await.map(FileStream::Read)
        } else {
            self.open_write(path, mode).await.map(FileStream::Write)
        }
    }

    /// Downloads the object into a local temporary file and returns it rewound.
    ///
    /// Missing objects fail before any transfer is attempted. The body is streamed to
    /// disk chunk by chunk; dropping the future aborts the transfer.
    pub async fn open_read(&self, path: &str) -> Option<ReadStream> {
        let result = self.try_open_read(path).await;
        settle("open_read", path, result)
    }

    /// Copies the remote object into `target`, returning the number of bytes written.
    pub async fn download_to(&self, path: &str, target: &Path) -> Option<u64> {
        let result = async {
            let mut source = self.try_open_read(path).await?;
            let mut file = tokio::fs::File::create(target).await?;
            Ok::<_, StorageError>(tokio::io::copy(&mut source, &mut file).await?)
        }
        .await;
        settle("download_to", path, result)
    }

    /// Opens a locally buffered handle whose content is uploaded when it is closed.
    ///
    /// `x` modes fail when the object already exists. Modes that do not start empty
    /// are seeded with the current remote content.
    pub async fn open_write(&self, path: &str, mode: OpenMode) -> Option<WriteHandle> {
        let result = self.try_open_write(path, mode).await;
        settle("open_write", path, result)
    }

    /// Uploads a local file as the whole content of `path`.
    pub async fn upload_from(&self, local: &Path, path: &str) -> bool {
        let result = async {
            let client = self.client().await?;
            let file = tokio::fs::File::open(local).await?;
            let len = file.metadata().await?.len();
            let encoded = paths::encode(&paths::normalize(path));
            Ok::<_, StorageError>(client.upload(&encoded, file, len).await?)
        }
        .await;
        settle("upload_from", path, result).is_some()
    }

    async fn try_open_read(&self, path: &str) -> Result<ReadStream, StorageError> {
        let normalized = paths::normalize(path);
        if !self.file_exists(&normalized).await {
            return Err(StorageError::NotFound(normalized));
        }
        let scratch = tempfile::tempfile_in(&self.connection.settings().scratch_dir)?;
        let mut sink = tokio::fs::File::from_std(scratch);
        self.fetch_into(&normalized, &mut sink).await?;
        sink.seek(SeekFrom::Start(0)).await?;
        Ok(sink)
    }

    async fn try_open_write(
        &self,
        path: &str,
        mode: OpenMode,
    ) -> Result<WriteHandle, StorageError> {
        if mode.is_read_only() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read-only mode passed to open_write",
            )));
        }
        let normalized = paths::normalize(path);
        let client = self.client().await?.clone();
        let scratch = tempfile::Builder::new()
            .prefix("dav-storage-")
            .suffix(&paths::extension(&normalized))
            .tempfile_in(&self.connection.settings().scratch_dir)?;

        let check_remote = mode.is_exclusive() || !mode.starts_empty();
        let exists = check_remote && self.file_exists(&normalized).await;
        if exists && mode.is_exclusive() {
            return Err(StorageError::AlreadyExists(normalized));
        }
        if exists {
            let mut sink = tokio::fs::File::from_std(scratch.reopen()?);
            let bytes = self.fetch_into(&normalized, &mut sink).await?;
            tracing::debug!(path = %normalized, bytes, "scratch file seeded from remote");
        }

        let scratch = scratch.into_temp_path();
        let file = mode.local_options().open(&scratch)?;
        Ok(WriteHandle::new(
            file,
            scratch,
            normalized,
            client,
            Arc::clone(&self.pending),
        ))
    }

    async fn fetch_into<W>(&self, normalized: &str, sink: &mut W) -> Result<u64, StorageError>
    where
        W: AsyncWrite + Unpin,
    {
        let client = self.client().await?;
        match client.download(&paths::encode(normalized), sink).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                if let Some(status) = err.status() {
                    tracing::error!(
                        path = normalized,
                        %status,
                        "GET returned non-success status; partial content discarded"
                    );
                }
                Err(err.into())
            }
        }
    }
}
