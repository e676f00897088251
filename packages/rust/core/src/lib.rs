//! Core sync pipeline for catalogsync.
//!
//! This crate turns a listed category forest into storefront-ready
//! documents: normalization, optional per-node enrichment under a shared
//! rate limit, caching, invalidation and bulk-index rendering.

pub mod enrich;
pub mod index;
pub mod limiter;
pub mod normalize;
pub mod slug;
pub mod sync;
pub mod walker;

pub use enrich::{Enricher, EnrichmentOutcome};
pub use index::{DOCUMENT_TYPE, bulk_body};
pub use limiter::RateLimiter;
pub use normalize::{merge_extended, normalize};
pub use slug::{slugify, url_key_for};
pub use sync::{
    CategorySync, EnrichmentStats, RootFailure, SilentObserver, SyncObserver, SyncReport,
};
pub use walker::{EnrichmentTask, extend_children, locate_mut};
