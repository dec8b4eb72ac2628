use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use dav_core::{DavClient, DavError};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::paths;

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("unsupported open mode: {0:?}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum WriteBackError {
    #[error("scratch file I/O failed: {0}")]
    Local(#[from] io::Error),
    #[error("upload to {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: DavError,
    },
}

/// fopen-style access modes. Binary/text flags (`b`, `t`) are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `w`
    Write,
    /// `a`
    Append,
    /// `r+`
    ReadWrite,
    /// `w+`
    WriteRead,
    /// `a+`
    AppendRead,
    /// `x`
    CreateNew,
    /// `x+`
    CreateNewRead,
    /// `c`
    Create,
    /// `c+`
    CreateRead,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<Self, ModeError> {
        let flags: String = mode.chars().filter(|c| !matches!(c, 'b' | 't')).collect();
        Ok(match flags.as_str() {
            "r" => OpenMode::Read,
            "w" => OpenMode::Write,
            "a" => OpenMode::Append,
            "r+" => OpenMode::ReadWrite,
            "w+" => OpenMode::WriteRead,
            "a+" => OpenMode::AppendRead,
            "x" => OpenMode::CreateNew,
            "x+" => OpenMode::CreateNewRead,
            "c" => OpenMode::Create,
            "c+" => OpenMode::CreateRead,
            _ => return Err(ModeError::Unsupported(mode.to_string())),
        })
    }

    pub fn is_read_only(self) -> bool {
        self == OpenMode::Read
    }

    /// Modes whose handle begins with no content; everything else is seeded from the remote.
    pub fn starts_empty(self) -> bool {
        matches!(
            self,
            OpenMode::Write | OpenMode::WriteRead | OpenMode::CreateNew | OpenMode::CreateNewRead
        )
    }

    pub fn is_exclusive(self) -> bool {
        matches!(self, OpenMode::CreateNew | OpenMode::CreateNewRead)
    }

    pub fn is_readable(self) -> bool {
        !matches!(
            self,
            OpenMode::Write | OpenMode::Append | OpenMode::CreateNew | OpenMode::Create
        )
    }

    pub fn is_append(self) -> bool {
        matches!(self, OpenMode::Append | OpenMode::AppendRead)
    }

    pub(crate) fn local_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.is_readable())
            .write(!self.is_read_only())
            .append(self.is_append())
            .truncate(self.starts_empty() && !self.is_append());
        options
    }
}

impl FromStr for OpenMode {
    type Err = ModeError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        Self::parse(mode)
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    destination: String,
    scratch: PathBuf,
}

/// Scratch files awaiting upload, keyed by a per-open id.
#[derive(Debug, Default)]
pub(crate) struct PendingWrites {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, PendingWrite>>,
}

impl PendingWrites {
    pub fn register(&self, destination: &str, scratch: &Path) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            PendingWrite {
                destination: destination.to_string(),
                scratch: scratch.to_path_buf(),
            },
        );
        id
    }

    pub fn destination(&self, id: u64) -> Option<String> {
        self.lock().get(&id).map(|entry| entry.destination.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, id: u64) {
        if let Some(entry) = self.lock().remove(&id) {
            tracing::trace!(id, scratch = %entry.scratch.display(), "write registration removed");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingWrite>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Local file handle over a scratch file whose content is uploaded on close.
///
/// Reads, writes and seeks never touch the network. `close` uploads the whole scratch
/// file to the destination and reports the outcome; the scratch file and its
/// registration are removed either way. Dropping an unclosed handle spawns the same
/// write-back on the current tokio runtime, where failures can only be logged.
pub struct WriteHandle {
    id: u64,
    file: Option<tokio::fs::File>,
    scratch: Option<TempPath>,
    destination: String,
    client: DavClient,
    pending: Arc<PendingWrites>,
}

impl WriteHandle {
    pub(crate) fn new(
        file: std::fs::File,
        scratch: TempPath,
        destination: String,
        client: DavClient,
        pending: Arc<PendingWrites>,
    ) -> Self {
        let id = pending.register(&destination, &scratch);
        Self {
            id,
            file: Some(tokio::fs::File::from_std(file)),
            scratch: Some(scratch),
            destination,
            client,
            pending,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Normalized remote path the content will be uploaded to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }

    /// Uploads the buffered content and returns the number of bytes sent.
    pub async fn close(mut self) -> Result<u64, WriteBackError> {
        let file = self.file.take();
        let scratch = self.scratch.take();
        let result = match (file, scratch.as_deref()) {
            (Some(file), Some(path)) => {
                write_back(&self.client, &self.destination, file, path).await
            }
            _ => Ok(0),
        };
        self.pending.remove(self.id);
        discard_scratch(scratch);
        if let Err(err) = &result {
            tracing::error!(path = %self.destination, error = %err, "write-back failed");
        }
        result
    }

    fn file_mut(&mut self) -> io::Result<&mut tokio::fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("write handle is closed"))
    }
}

impl Drop for WriteHandle {
    fn drop(&mut self) {
        let (Some(file), Some(scratch)) = (self.file.take(), self.scratch.take()) else {
            self.pending.remove(self.id);
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(path = %self.destination, "write handle dropped; writing back in background");
                let client = self.client.clone();
                let destination = std::mem::take(&mut self.destination);
                let pending = Arc::clone(&self.pending);
                let id = self.id;
                runtime.spawn(async move {
                    let result = write_back(&client, &destination, file, &scratch).await;
                    pending.remove(id);
                    discard_scratch(Some(scratch));
                    if let Err(err) = result {
                        tracing::error!(path = %destination, error = %err, "background write-back failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    path = %self.destination,
                    "write handle dropped outside a runtime; buffered content discarded"
                );
                drop(file);
                self.pending.remove(self.id);
                discard_scratch(Some(scratch));
            }
        }
    }
}

impl AsyncRead for WriteHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().file_mut() {
            Ok(file) => Pin::new(file).poll_read(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncWrite for WriteHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().file_mut() {
            Ok(file) => Pin::new(file).poll_write(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file_mut() {
            Ok(file) => Pin::new(file).poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file_mut() {
            Ok(file) => Pin::new(file).poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncSeek for WriteHandle {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        Pin::new(self.get_mut().file_mut()?).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match self.get_mut().file_mut() {
            Ok(file) => Pin::new(file).poll_complete(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

async fn write_back(
    client: &DavClient,
    destination: &str,
    mut file: tokio::fs::File,
    scratch: &Path,
) -> Result<u64, WriteBackError> {
    file.flush().await?;
    drop(file);

    let source = tokio::fs::File::open(scratch).await?;
    let len = source.metadata().await?.len();
    client
        .upload(&paths::encode(destination), source, len)
        .await
        .map_err(|source| WriteBackError::Upload {
            path: destination.to_string(),
            source,
        })?;
    tracing::debug!(path = %destination, bytes = len, "write-back uploaded");
    Ok(len)
}

fn discard_scratch(scratch: Option<TempPath>) {
    if let Some(scratch) = scratch {
        let path = scratch.to_path_buf();
        if let Err(err) = scratch.close() {
            tracing::warn!(scratch = %path.display(), error = %err, "failed to delete scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fopen_modes() {
        assert_eq!(OpenMode::parse("rb").unwrap(), OpenMode::Read);
        assert_eq!(OpenMode::parse("wb+").unwrap(), OpenMode::WriteRead);
        assert_eq!(OpenMode::parse("r+b").unwrap(), OpenMode::ReadWrite);
        assert_eq!("ab".parse::<OpenMode>().unwrap(), OpenMode::Append);
        assert_eq!(OpenMode::parse("c+").unwrap(), OpenMode::CreateRead);
        assert!(matches!(
            OpenMode::parse("q"),
            Err(ModeError::Unsupported(mode)) if mode == "q"
        ));
    }

    #[test]
    fn only_truncating_modes_start_empty() {
        let empty = [
            OpenMode::Write,
            OpenMode::WriteRead,
            OpenMode::CreateNew,
            OpenMode::CreateNewRead,
        ];
        let seeded = [
            OpenMode::Append,
            OpenMode::AppendRead,
            OpenMode::ReadWrite,
            OpenMode::Create,
            OpenMode::CreateRead,
        ];
        assert!(empty.iter().all(|mode| mode.starts_empty()));
        assert!(seeded.iter().all(|mode| !mode.starts_empty()));
    }

    #[test]
    fn append_mode_keeps_existing_scratch_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.txt");
        std::fs::write(&path, b"head-").unwrap();

        {
            use std::io::Write;
            let mut file = OpenMode::Append.local_options().open(&path).unwrap();
            file.write_all(b"tail").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"head-tail");

        {
            use std::io::Write;
            let mut file = OpenMode::Write.local_options().open(&path).unwrap();
            file.write_all(b"new").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn dropping_outside_a_runtime_discards_the_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::NamedTempFile::new_in(dir.path())
            .unwrap()
            .into_temp_path();
        let scratch_path = scratch.to_path_buf();
        let file = OpenMode::Write.local_options().open(&scratch).unwrap();
        let client = DavClient::with_base_url("http://127.0.0.1:9/dav/", "u", "p").unwrap();
        let pending = Arc::new(PendingWrites::default());

        let handle = WriteHandle::new(
            file,
            scratch,
            "Docs/a.txt".to_string(),
            client,
            Arc::clone(&pending),
        );
        assert_eq!(pending.len(), 1);
        assert!(scratch_path.exists());

        drop(handle);

        assert_eq!(pending.len(), 0);
        assert!(!scratch_path.exists());
    }

    #[test]
    fn registrations_are_unique_per_open() {
        let pending = PendingWrites::default();
        let a = pending.register("Docs/a.txt", Path::new("/tmp/one"));
        let b = pending.register("Docs/a.txt", Path::new("/tmp/two"));

        assert_ne!(a, b);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.destination(b).as_deref(), Some("Docs/a.txt"));
        pending.remove(a);
        assert_eq!(pending.len(), 1);
    }
}
