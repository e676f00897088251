//! Remote collaborators of the sync pipeline.
//!
//! This crate provides:
//! - [`CatalogSource`]: listing and single-record fetches from the catalog API
//! - [`NotificationSink`]: best-effort downstream cache invalidation
//! - [`MagentoClient`] and [`HttpInvalidator`]: reqwest-backed implementations

mod client;
mod invalidate;

use async_trait::async_trait;
use catalogsync_shared::{CategoryId, CategoryNode, EntityKind, Result};

pub use client::{ClientOptions, MagentoClient};
pub use invalidate::{HttpInvalidator, NoopNotifier, invalidation_tag};

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("catalogsync/", env!("CARGO_PKG_VERSION"));

/// Read access to the source catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the category tree. Called once per sync run.
    async fn list_categories(&self) -> Result<Vec<CategoryNode>>;

    /// Fetch the full record of one category.
    async fn get_single_category(&self, id: &CategoryId) -> Result<CategoryNode>;
}

/// Downstream cache invalidation, keyed by entity kind and id.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn invalidate(&self, kind: EntityKind, id: &CategoryId) -> Result<()>;
}
