use std::time::{SystemTime, UNIX_EPOCH};

use dav_core::{Prop, StatusCode};

use super::DavStorage;
use crate::error::StorageError;
use crate::paths;
use crate::write_back::OpenMode;

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Move,
    Copy,
}

impl DavStorage {
    /// MKCOL; succeeds only on `201 Created`.
    pub async fn mkdir(&self, path: &str) -> bool {
        let result = async {
            let client = self.client().await?;
            Ok::<_, StorageError>(client.mkcol(&encoded(path)).await?)
        }
        .await;
        expect_status("mkdir", path, result, StatusCode::CREATED)
    }

    /// DELETE on the collection URL (trailing separator); succeeds only on `204 No Content`.
    ///
    /// Servers that refuse to delete non-empty collections make this return `false`,
    /// which does not imply the collection is missing.
    pub async fn rmdir(&self, path: &str) -> bool {
        let Some(encoded) = below_root("rmdir", path) else {
            return false;
        };
        let result = async {
            let client = self.client().await?;
            Ok::<_, StorageError>(client.delete(&format!("{encoded}/")).await?)
        }
        .await;
        expect_status("rmdir", path, result, StatusCode::NO_CONTENT)
    }

    /// DELETE; succeeds only on `204 No Content`. The mount root is never deleted.
    pub async fn unlink(&self, path: &str) -> bool {
        let Some(encoded) = below_root("unlink", path) else {
            return false;
        };
        let result = async {
            let client = self.client().await?;
            Ok::<_, StorageError>(client.delete(&encoded).await?)
        }
        .await;
        expect_status("unlink", path, result, StatusCode::NO_CONTENT)
    }

    /// MOVE to the absolute URL of `target`. Any non-error status counts as success.
    pub async fn rename(&self, source: &str, target: &str) -> bool {
        self.transfer(Transfer::Move, source, target).await
    }

    /// COPY to the absolute URL of `target`. Any non-error status counts as success.
    pub async fn copy(&self, source: &str, target: &str) -> bool {
        self.transfer(Transfer::Copy, source, target).await
    }

    /// Sets the remote modification time, or creates an empty object if none exists.
    ///
    /// Servers without writable `lastmodified` make this return `false`.
    pub async fn touch(&self, path: &str, mtime: Option<SystemTime>) -> bool {
        let mtime = mtime.unwrap_or_else(SystemTime::now);
        if !self.file_exists(path).await {
            let Some(handle) = self.open_write(path, OpenMode::Write).await else {
                return false;
            };
            return match handle.close().await {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(path, error = %err, "touch could not create empty object");
                    false
                }
            };
        }

        let seconds = mtime
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let result = async {
            let client = self.client().await?;
            client
                .proppatch(&encoded(path), &[(Prop::LastModified, seconds.to_string())])
                .await?;
            Ok::<_, StorageError>(())
        }
        .await;
        match result {
            Ok(()) => true,
            Err(err) => {
                err.log("touch", path);
                false
            }
        }
    }

    async fn transfer(&self, kind: Transfer, source: &str, target: &str) -> bool {
        let operation = match kind {
            Transfer::Move => "rename",
            Transfer::Copy => "copy",
        };
        let (Some(from), Some(to)) = (below_root(operation, source), below_root(operation, target))
        else {
            return false;
        };
        let result = async {
            let client = self.client().await?;
            let destination = client.absolute_url(&to)?;
            let status = match kind {
                Transfer::Move => client.move_resource(&from, &destination).await?,
                Transfer::Copy => client.copy_resource(&from, &destination).await?,
            };
            Ok::<_, StorageError>(status)
        }
        .await;
        match result {
            Ok(status) => {
                tracing::debug!(?kind, source, target, %status, "transfer accepted");
                true
            }
            Err(err) => {
                err.log(operation, source);
                false
            }
        }
    }
}

fn encoded(path: &str) -> String {
    paths::encode(&paths::normalize(path))
}

/// Encoded path, or `None` when it resolves to the mount root itself.
fn below_root(operation: &str, path: &str) -> Option<String> {
    let encoded = encoded(path);
    if encoded.is_empty() {
        tracing::warn!(operation, path, "refusing to operate on the mount root");
        return None;
    }
    Some(encoded)
}

fn expect_status(
    operation: &str,
    path: &str,
    result: Result<StatusCode, StorageError>,
    expected: StatusCode,
) -> bool {
    match result {
        Ok(status) if status == expected => true,
        Ok(status) => {
            let err = StorageError::UnexpectedStatus {
                path: path.to_string(),
                status,
            };
            err.log(operation, path);
            false
        }
        Err(err) => {
            err.log(operation, path);
            false
        }
    }
}
