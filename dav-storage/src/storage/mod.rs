use std::sync::Arc;
use std::time::SystemTime;

use dav_core::{DavClient, Depth, Prop, PropMap};

use crate::config::{ParamsError, StorageParams};
use crate::connection::ConnectionContext;
use crate::dir::{DirHandle, DirRegistry};
use crate::error::StorageError;
use crate::paths;
use crate::write_back::PendingWrites;

mod ops;
mod streams;

pub use streams::{FileStream, ReadStream};

/// MIME type reported for collections.
pub const DIRECTORY_MIME_TYPE: &str = "httpd/unix-directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub mtime: Option<SystemTime>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpace {
    Known(u64),
    Unknown,
}

/// A remote WebDAV collection exposed through filesystem-style operations.
///
/// Every operation reports failure as `false`, `None` or [`FreeSpace::Unknown`]; the
/// cause goes to the `tracing` side channel. Nothing is cached between calls.
pub struct DavStorage {
    connection: ConnectionContext,
    pending: Arc<PendingWrites>,
    listings: Arc<DirRegistry>,
}

impl DavStorage {
    pub fn new(params: StorageParams) -> Result<Self, ParamsError> {
        Ok(Self {
            connection: ConnectionContext::new(params.validate()?),
            pending: Arc::new(PendingWrites::default()),
            listings: Arc::new(DirRegistry::default()),
        })
    }

    /// Stable key distinguishing mounts: `webdav::{user}@{host}/{root}`.
    pub fn id(&self) -> String {
        self.connection.settings().id()
    }

    pub fn base_uri(&self) -> String {
        self.connection.settings().base_uri()
    }

    /// Write handles opened but not yet written back.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Destination of a still-open write handle, by handle id.
    pub fn pending_destination(&self, id: u64) -> Option<String> {
        self.pending.destination(id)
    }

    /// Directory listings not yet exhausted or closed.
    pub fn open_listings(&self) -> usize {
        self.listings.len()
    }

    pub async fn stat(&self, path: &str) -> Option<Stat> {
        let result = self
            .fetch_props(path, &[Prop::GetLastModified, Prop::GetContentLength])
            .await
            .map(|props| Stat {
                mtime: props.last_modified(),
                size: props.content_length().unwrap_or(0),
            });
        settle("stat", path, result)
    }

    pub async fn mime_type(&self, path: &str) -> Option<String> {
        let result = self
            .fetch_props(path, &[Prop::GetContentType, Prop::ResourceType])
            .await
            .map(|props| {
                if props.is_collection() {
                    Some(DIRECTORY_MIME_TYPE.to_string())
                } else {
                    props.content_type().map(str::to_string)
                }
            });
        settle("mime_type", path, result).flatten()
    }

    pub async fn filetype(&self, path: &str) -> Option<FileType> {
        match self.fetch_props(path, &[Prop::ResourceType]).await {
            Ok(props) if props.is_collection() => Some(FileType::Dir),
            Ok(_) => Some(FileType::File),
            Err(err) => {
                tracing::warn!(path, kind = ?err.kind(), error = %err, "filetype lookup failed");
                None
            }
        }
    }

    pub async fn is_dir(&self, path: &str) -> bool {
        self.filetype(path).await == Some(FileType::Dir)
    }

    pub async fn is_file(&self, path: &str) -> bool {
        self.filetype(path).await == Some(FileType::File)
    }

    /// Never errors: absence and transport failures both read as `false`.
    pub async fn file_exists(&self, path: &str) -> bool {
        settle(
            "file_exists",
            path,
            self.fetch_props(path, &[Prop::ResourceType]).await,
        )
        .is_some()
    }

    pub async fn free_space(&self, path: &str) -> FreeSpace {
        settle(
            "free_space",
            path,
            self.fetch_props(path, &[Prop::QuotaAvailableBytes]).await,
        )
        .and_then(|props| props.quota_available_bytes())
        .map_or(FreeSpace::Unknown, FreeSpace::Known)
    }

    /// Lists the children of a collection. `None` means the listing could not be
    /// fetched, which is distinct from an empty collection.
    pub async fn opendir(&self, path: &str) -> Option<DirHandle> {
        let result = self.list_children(path).await;
        settle("opendir", path, result).map(|names| self.listings.register(names))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let client = self.client().await?;
        let encoded = paths::encode(&paths::normalize(path));
        let entries = client.propfind(&encoded, &[], Depth::One).await?;
        Ok(entries
            .iter()
            .skip(1)
            .map(|entry| paths::basename(&entry.href))
            .collect())
    }

    async fn fetch_props(&self, path: &str, props: &[Prop]) -> Result<PropMap, StorageError> {
        let client = self.client().await?;
        let encoded = paths::encode(&paths::normalize(path));
        Ok(client.propfind_one(&encoded, props).await?)
    }

    async fn client(&self) -> Result<&DavClient, StorageError> {
        self.connection.ensure_ready().await
    }
}

/// Collapses a result into the public vocabulary, logging the cause of failure.
fn settle<T>(operation: &str, path: &str, result: Result<T, StorageError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            err.log(operation, path);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_mount_definition() {
        let storage = DavStorage::new(
            StorageParams::new("dav.example.com", "alice", "secret")
                .secure(true)
                .root("/remote.php/webdav/"),
        )
        .unwrap();

        assert_eq!(storage.id(), "webdav::alice@dav.example.com/remote.php/webdav/");
        assert_eq!(storage.base_uri(), "https://dav.example.com/remote.php/webdav/");
        assert_eq!(storage.pending_writes(), 0);
        assert_eq!(storage.open_listings(), 0);
    }

    #[test]
    fn construction_requires_credentials() {
        let params = StorageParams {
            host: Some("dav.example.com".into()),
            ..StorageParams::default()
        };
        assert!(matches!(
            DavStorage::new(params),
            Err(ParamsError::Missing("user"))
        ));
    }

    #[test]
    fn distinct_roots_have_distinct_ids() {
        let a = DavStorage::new(StorageParams::new("h", "u", "p").root("a")).unwrap();
        let b = DavStorage::new(StorageParams::new("h", "u", "p").root("b")).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
