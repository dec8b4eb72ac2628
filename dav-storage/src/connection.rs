use dav_core::{ClientConfig, DavClient};
use tokio::sync::OnceCell;

use crate::config::MountSettings;
use crate::error::StorageError;

/// Lazily configured wire client for one mount.
///
/// Configuration happens at most once even under concurrent first use; a failed
/// attempt leaves the cell empty so the next operation retries.
pub(crate) struct ConnectionContext {
    settings: MountSettings,
    client: OnceCell<DavClient>,
}

impl ConnectionContext {
    pub fn new(settings: MountSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &MountSettings {
        &self.settings
    }

    pub async fn ensure_ready(&self) -> Result<&DavClient, StorageError> {
        self.client
            .get_or_try_init(|| async {
                let settings = &self.settings;
                let mut config =
                    ClientConfig::new(settings.base_uri(), &settings.user, &settings.password);
                config.trusted_certificates = settings.trusted_certificates.clone();
                config.timeout = settings.timeout;
                tracing::debug!(
                    base_uri = %settings.base_uri(),
                    trusted_certificates = settings.trusted_certificates.is_some(),
                    "configuring webdav client"
                );
                DavClient::new(config).map_err(StorageError::from)
            })
            .await
    }

    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        self.client.initialized()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::config::StorageParams;

    fn context(params: StorageParams) -> ConnectionContext {
        ConnectionContext::new(params.validate().unwrap())
    }

    #[tokio::test]
    async fn first_call_configures_client_once() {
        let ctx = context(StorageParams::new("dav.example.com", "alice", "pw").root("dav"));
        assert!(!ctx.is_ready());

        let first = ctx.ensure_ready().await.unwrap() as *const DavClient;
        let second = ctx.ensure_ready().await.unwrap() as *const DavClient;

        assert!(ctx.is_ready());
        assert_eq!(first, second);
        assert_eq!(
            ctx.ensure_ready().await.unwrap().base_url().as_str(),
            "http://dav.example.com/dav/"
        );
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_client() {
        let ctx = Arc::new(context(StorageParams::new("dav.example.com", "alice", "pw")));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    ctx.ensure_ready().await.map(|client| client as *const DavClient as usize)
                })
            })
            .collect();

        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap().unwrap());
        }
        addresses.dedup();
        assert_eq!(addresses.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_trust_store_leaves_context_unconfigured() {
        let mut params = StorageParams::new("dav.example.com", "alice", "pw").secure(true);
        params.trusted_certificates = Some(PathBuf::from("/nonexistent/rootcerts.crt"));
        let ctx = context(params);

        assert!(ctx.ensure_ready().await.is_err());
        assert!(!ctx.is_ready());
    }
}
