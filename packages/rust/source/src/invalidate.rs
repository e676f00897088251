//! Storefront cache-invalidation webhook.
//!
//! The storefront exposes a GET endpoint that drops cached pages tagged with
//! an entity reference. Tags are the entity prefix followed by the id, so
//! category 5 becomes `C5`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use catalogsync_shared::{AppConfig, CatalogSyncError, CategoryId, EntityKind, Result};

use crate::{NotificationSink, USER_AGENT};

/// Timeout for a single invalidation request.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Build the invalidation tag for an entity, e.g. `C5`.
pub fn invalidation_tag(kind: EntityKind, id: &CategoryId) -> String {
    format!("{}{id}", kind.tag_prefix())
}

/// Sends invalidation requests to `<url prefix><tag>`.
pub struct HttpInvalidator {
    client: Client,
    url_prefix: String,
}

impl HttpInvalidator {
    /// `url_prefix` is used verbatim; the tag is appended to it, so it
    /// normally ends in `tag=`.
    pub fn new(url_prefix: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CatalogSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url_prefix: url_prefix.into(),
        })
    }

    /// Build from the `[invalidation]` section.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.invalidation.url.clone())
    }
}

#[async_trait]
impl NotificationSink for HttpInvalidator {
    async fn invalidate(&self, kind: EntityKind, id: &CategoryId) -> Result<()> {
        let url = format!("{}{}", self.url_prefix, invalidation_tag(kind, id));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogSyncError::Notification(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogSyncError::Notification(format!(
                "{url}: HTTP {status}"
            )));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(kind = kind.as_str(), %id, %body, "cache invalidated");
        Ok(())
    }
}

/// Sink used when invalidation is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn invalidate(&self, _kind: EntityKind, _id: &CategoryId) -> Result<()> {
        Ok(())
    }
}
